//! Gateway state: per-connection subscription sets, reference-counted
//! broker subscriptions, and bounded per-connection outbound queues.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use futures_util::StreamExt;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use clipforge_models::{normalize_channel, ProgressUpdate, WsServerFrame};
use clipforge_queue::ProgressFabric;

/// Frames queued per connection before overflow handling kicks in.
const OUTBOUND_CAPACITY: usize = 256;

/// Unique id per WebSocket connection.
pub type ConnId = Uuid;

/// Bounded outbound frame queue. Overflow drops the oldest non-snapshot
/// frame so a slow reader still sees the latest snapshot.
pub struct Outbound {
    queue: Mutex<OutboundQueue>,
    notify: Notify,
}

struct OutboundQueue {
    frames: VecDeque<WsServerFrame>,
    closed: bool,
}

impl Outbound {
    fn new() -> Self {
        Self {
            queue: Mutex::new(OutboundQueue {
                frames: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a frame, applying the overflow policy.
    pub fn push(&self, frame: WsServerFrame) {
        {
            let mut q = self.queue.lock().expect("outbound lock poisoned");
            if q.closed {
                return;
            }
            if q.frames.len() >= OUTBOUND_CAPACITY {
                let victim = q
                    .frames
                    .iter()
                    .position(|f| !matches!(f, WsServerFrame::Progress { snapshot: true, .. }));
                match victim {
                    Some(pos) => {
                        q.frames.remove(pos);
                    }
                    None => {
                        q.frames.pop_front();
                    }
                }
            }
            q.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Wait for the next frame; `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<WsServerFrame> {
        loop {
            {
                let mut q = self.queue.lock().expect("outbound lock poisoned");
                if let Some(frame) = q.frames.pop_front() {
                    return Some(frame);
                }
                if q.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.queue.lock().expect("outbound lock poisoned").closed = true;
        self.notify.notify_one();
    }
}

struct ConnHandle {
    outbound: Arc<Outbound>,
    /// Desired subscription set, canonical channel names.
    channels: HashSet<String>,
    /// Highest percent sent per channel; lower live frames are dropped.
    last_sent: HashMap<String, u8>,
}

struct ChannelSub {
    refcount: usize,
    task: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct GatewayInner {
    connections: HashMap<ConnId, ConnHandle>,
    channels: HashMap<String, ChannelSub>,
}

/// Result of one subscription synchronisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub added: usize,
    pub removed: usize,
}

/// The WebSocket gateway: fan-out of progress events to many clients with
/// snapshot replay on subscribe.
pub struct Gateway {
    fabric: Arc<ProgressFabric>,
    inner: Mutex<GatewayInner>,
}

impl Gateway {
    pub fn new(fabric: Arc<ProgressFabric>) -> Self {
        Self {
            fabric,
            inner: Mutex::new(GatewayInner::default()),
        }
    }

    /// Register a new connection; returns its id and outbound queue.
    pub fn register(&self) -> (ConnId, Arc<Outbound>) {
        let conn_id = Uuid::new_v4();
        let outbound = Arc::new(Outbound::new());

        let mut inner = self.inner.lock().expect("gateway lock poisoned");
        inner.connections.insert(
            conn_id,
            ConnHandle {
                outbound: Arc::clone(&outbound),
                channels: HashSet::new(),
                last_sent: HashMap::new(),
            },
        );
        metrics::gauge!("clipforge_ws_connections").set(inner.connections.len() as f64);

        (conn_id, outbound)
    }

    /// Remove a connection and release its channel references.
    pub fn unregister(&self, conn_id: &ConnId) {
        let mut inner = self.inner.lock().expect("gateway lock poisoned");
        let Some(handle) = inner.connections.remove(conn_id) else {
            return;
        };
        handle.outbound.close();
        for channel in &handle.channels {
            release_channel(&mut inner, channel);
        }
        metrics::gauge!("clipforge_ws_connections").set(inner.connections.len() as f64);
        debug!(%conn_id, "connection unregistered");
    }

    /// Replace a connection's desired subscription set.
    ///
    /// Idempotent: re-sending the same set performs no broker calls and logs
    /// at DEBUG only. New channels get their snapshot replayed with
    /// `snapshot: true`.
    pub async fn sync_subscriptions(
        self: &Arc<Self>,
        conn_id: &ConnId,
        project_ids: &[String],
    ) -> SyncResult {
        let desired: BTreeSet<String> = project_ids
            .iter()
            .map(|id| normalize_channel(id))
            .collect();

        let (added, removed) = {
            let mut inner = self.inner.lock().expect("gateway lock poisoned");
            let Some(handle) = inner.connections.get(conn_id) else {
                return SyncResult::default();
            };

            let current = handle.channels.clone();
            let added: Vec<String> = desired
                .iter()
                .filter(|c| !current.contains(*c))
                .cloned()
                .collect();
            let removed: Vec<String> = current
                .iter()
                .filter(|c| !desired.contains(*c))
                .cloned()
                .collect();

            let handle = inner
                .connections
                .get_mut(conn_id)
                .expect("connection disappeared under lock");
            for channel in &added {
                handle.channels.insert(channel.clone());
            }
            for channel in &removed {
                handle.channels.remove(channel);
                handle.last_sent.remove(channel);
            }

            for channel in &added {
                acquire_channel(&mut inner, self, channel);
            }
            for channel in &removed {
                release_channel(&mut inner, channel);
            }

            (added, removed)
        };

        if added.is_empty() && removed.is_empty() {
            debug!(%conn_id, "subscription sync: no change");
            return SyncResult::default();
        }
        info!(
            %conn_id,
            added = added.len(),
            removed = removed.len(),
            "subscription set changed"
        );

        // Replay snapshots for the new channels, outside the lock.
        for channel in &added {
            match self.fabric.snapshot(channel).await {
                Ok(Some(update)) => {
                    self.deliver(conn_id, channel, &update.as_snapshot());
                }
                Ok(None) => {}
                Err(e) => warn!(%channel, "snapshot replay failed: {e}"),
            }
        }

        SyncResult {
            added: added.len(),
            removed: removed.len(),
        }
    }

    /// Fan a live event out to every connection subscribed to its channel.
    pub fn dispatch(&self, channel: &str, update: &ProgressUpdate) {
        let mut inner = self.inner.lock().expect("gateway lock poisoned");
        let conn_ids: Vec<ConnId> = inner
            .connections
            .iter()
            .filter(|(_, h)| h.channels.contains(channel))
            .map(|(id, _)| *id)
            .collect();

        for conn_id in conn_ids {
            deliver_locked(&mut inner, &conn_id, channel, update);
        }
    }

    /// Deliver to a single connection (snapshot replays).
    fn deliver(&self, conn_id: &ConnId, channel: &str, update: &ProgressUpdate) {
        let mut inner = self.inner.lock().expect("gateway lock poisoned");
        deliver_locked(&mut inner, conn_id, channel, update);
    }

    /// Number of live broker subscriptions (one per channel, shared across
    /// connections).
    pub fn channel_count(&self) -> usize {
        self.inner.lock().expect("gateway lock poisoned").channels.len()
    }
}

/// Monotone-drop delivery under the gateway lock. Snapshots bypass the
/// drop check: they are the truth on reconnect.
fn deliver_locked(
    inner: &mut GatewayInner,
    conn_id: &ConnId,
    channel: &str,
    update: &ProgressUpdate,
) {
    let Some(handle) = inner.connections.get_mut(conn_id) else {
        return;
    };
    let last = handle.last_sent.get(channel).copied().unwrap_or(0);
    if !update.snapshot && update.percent < last {
        return;
    }
    handle
        .last_sent
        .insert(channel.to_string(), last.max(update.percent));
    handle.outbound.push(WsServerFrame::from_update(update));
}

/// Take a reference on a channel, spawning its subscriber task on 0 -> 1.
fn acquire_channel(inner: &mut GatewayInner, gateway: &Arc<Gateway>, channel: &str) {
    if let Some(sub) = inner.channels.get_mut(channel) {
        sub.refcount += 1;
        return;
    }

    let task = spawn_channel_task(Arc::downgrade(gateway), Arc::clone(&gateway.fabric), channel);
    inner.channels.insert(
        channel.to_string(),
        ChannelSub { refcount: 1, task },
    );
    metrics::gauge!("clipforge_ws_channels").set(inner.channels.len() as f64);
}

/// Drop a reference; unsubscribe at zero.
fn release_channel(inner: &mut GatewayInner, channel: &str) {
    let Some(sub) = inner.channels.get_mut(channel) else {
        return;
    };
    sub.refcount = sub.refcount.saturating_sub(1);
    if sub.refcount == 0 {
        sub.task.abort();
        inner.channels.remove(channel);
        metrics::gauge!("clipforge_ws_channels").set(inner.channels.len() as f64);
        debug!(%channel, "broker subscription released");
    }
}

/// One subscriber task per channel: consume the broker stream and dispatch.
/// Holding only a weak gateway reference lets the gateway drop freely.
fn spawn_channel_task(
    gateway: Weak<Gateway>,
    fabric: Arc<ProgressFabric>,
    channel: &str,
) -> tokio::task::JoinHandle<()> {
    let channel = channel.to_string();
    tokio::spawn(async move {
        let mut stream = match fabric.subscribe(&channel).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%channel, "broker subscribe failed: {e}");
                return;
            }
        };
        debug!(%channel, "broker subscription established");

        while let Some(update) = stream.next().await {
            let Some(gateway) = gateway.upgrade() else {
                break;
            };
            gateway.dispatch(&channel, &update);
        }
    })
}
