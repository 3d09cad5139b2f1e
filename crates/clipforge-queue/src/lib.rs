//! Broker-backed job queue and the progress event fabric.
//!
//! Both halves share one Redis deployment (`BROKER_URL`): the queue uses
//! Streams with consumer groups for at-least-once delivery, the fabric uses
//! pub/sub for fan-out plus a per-channel snapshot hash as the durable truth
//! consulted on reconnect.

mod error;
mod fabric;
mod job;
mod queue;

pub use error::{QueueError, QueueResult};
pub use fabric::{FabricConfig, ProgressFabric};
pub use job::{Priority, RunJob};
pub use queue::{JobQueue, QueueConfig};
