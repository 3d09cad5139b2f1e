//! Gateway bookkeeping: subscription idempotence, monotone fan-out,
//! backpressure. The broker is unreachable here; everything under test is
//! in-process state.

use std::sync::Arc;
use std::time::Duration;

use clipforge_api::ws::Gateway;
use clipforge_models::{
    normalize_channel, ProgressUpdate, ProjectId, ProjectStatus, Stage, WsServerFrame,
};
use clipforge_queue::{FabricConfig, ProgressFabric};

fn gateway() -> Arc<Gateway> {
    let fabric = ProgressFabric::new(FabricConfig {
        broker_url: "redis://127.0.0.1:1".to_string(),
        ..Default::default()
    })
    .unwrap();
    Arc::new(Gateway::new(Arc::new(fabric)))
}

fn update(project: &ProjectId, percent: u8) -> ProgressUpdate {
    ProgressUpdate::new(
        project.clone(),
        Stage::Highlight,
        percent,
        "scoring",
        ProjectStatus::Processing,
    )
}

async fn recv_frame(
    outbound: &Arc<clipforge_api::ws::Outbound>,
    timeout: Duration,
) -> Option<WsServerFrame> {
    tokio::time::timeout(timeout, outbound.recv()).await.ok()?
}

#[tokio::test]
async fn repeated_sync_with_same_set_is_a_no_op() {
    let gateway = gateway();
    let (conn_id, _outbound) = gateway.register();

    let ids = vec!["p1".to_string(), "p2".to_string()];
    let first = gateway.sync_subscriptions(&conn_id, &ids).await;
    assert_eq!(first.added, 2);
    assert_eq!(first.removed, 0);
    assert_eq!(gateway.channel_count(), 2);

    // The every-10-seconds client resend must not churn subscriptions.
    for _ in 0..12 {
        let result = gateway.sync_subscriptions(&conn_id, &ids).await;
        assert_eq!(result.added, 0);
        assert_eq!(result.removed, 0);
    }
    assert_eq!(gateway.channel_count(), 2);

    let shrunk = gateway
        .sync_subscriptions(&conn_id, &["p2".to_string()])
        .await;
    assert_eq!(shrunk.added, 0);
    assert_eq!(shrunk.removed, 1);
    assert_eq!(gateway.channel_count(), 1);
}

#[tokio::test]
async fn channel_spellings_collapse_to_one_subscription() {
    let gateway = gateway();
    let (conn_id, _outbound) = gateway.register();

    let result = gateway
        .sync_subscriptions(
            &conn_id,
            &[
                "p1".to_string(),
                "project:p1".to_string(),
                "progress:project:p1".to_string(),
            ],
        )
        .await;
    assert_eq!(result.added, 1);
    assert_eq!(gateway.channel_count(), 1);
}

#[tokio::test]
async fn fan_out_drops_regressing_percents_except_snapshots() {
    let gateway = gateway();
    let (conn_id, outbound) = gateway.register();

    let project = ProjectId::from_string("p1");
    let channel = normalize_channel(project.as_str());
    gateway
        .sync_subscriptions(&conn_id, &[project.to_string()])
        .await;

    gateway.dispatch(&channel, &update(&project, 50));
    gateway.dispatch(&channel, &update(&project, 40)); // regression: dropped
    gateway.dispatch(&channel, &update(&project, 60));

    let first = recv_frame(&outbound, Duration::from_secs(1)).await.unwrap();
    let second = recv_frame(&outbound, Duration::from_secs(1)).await.unwrap();
    match (&first, &second) {
        (
            WsServerFrame::Progress { percent: 50, .. },
            WsServerFrame::Progress { percent: 60, .. },
        ) => {}
        other => panic!("unexpected frames: {other:?}"),
    }
    assert!(recv_frame(&outbound, Duration::from_millis(100)).await.is_none());

    // A snapshot below the floor still goes through: it is the truth on
    // reconnect.
    gateway.dispatch(&channel, &update(&project, 30).as_snapshot());
    let frame = recv_frame(&outbound, Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        frame,
        WsServerFrame::Progress {
            percent: 30,
            snapshot: true,
            ..
        }
    ));
}

#[tokio::test]
async fn channel_refcounts_follow_connections() {
    let gateway = gateway();
    let (conn_a, _out_a) = gateway.register();
    let (conn_b, _out_b) = gateway.register();

    gateway
        .sync_subscriptions(&conn_a, &["p1".to_string()])
        .await;
    gateway
        .sync_subscriptions(&conn_b, &["p1".to_string()])
        .await;
    assert_eq!(gateway.channel_count(), 1);

    gateway.unregister(&conn_a);
    assert_eq!(gateway.channel_count(), 1);

    gateway.unregister(&conn_b);
    assert_eq!(gateway.channel_count(), 0);
}

#[tokio::test]
async fn outbound_overflow_keeps_the_snapshot() {
    let gateway = gateway();
    let (conn_id, outbound) = gateway.register();

    let project = ProjectId::from_string("p1");
    let channel = normalize_channel(project.as_str());
    gateway
        .sync_subscriptions(&conn_id, &[project.to_string()])
        .await;

    gateway.dispatch(&channel, &update(&project, 1).as_snapshot());
    for percent in 1..=100u8 {
        // Repeats at equal percent are not regressions; flood the queue.
        for _ in 0..4 {
            gateway.dispatch(&channel, &update(&project, percent));
        }
    }

    let mut frames = Vec::new();
    while let Some(frame) = recv_frame(&outbound, Duration::from_millis(50)).await {
        frames.push(frame);
    }
    assert!(frames.len() <= 256, "queue exceeded its bound: {}", frames.len());
    assert!(
        frames
            .iter()
            .any(|f| matches!(f, WsServerFrame::Progress { snapshot: true, .. })),
        "snapshot frame must survive overflow"
    );
}
