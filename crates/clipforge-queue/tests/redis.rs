//! Queue and fabric behaviour against a live Redis.
//!
//! Skipped unless `CLIPFORGE_TEST_REDIS_URL` points at a disposable
//! instance.

use std::time::Duration;

use futures_util::StreamExt;

use clipforge_models::{
    normalize_channel, ProgressStage, ProgressUpdate, ProjectId, ProjectStatus, Stage, TaskId,
    TaskKind,
};
use clipforge_queue::{
    FabricConfig, JobQueue, Priority, ProgressFabric, QueueConfig, QueueError, RunJob,
};

fn test_url() -> Option<String> {
    std::env::var("CLIPFORGE_TEST_REDIS_URL").ok()
}

fn queue(url: &str) -> JobQueue {
    // Unique stream names per test run keep reruns independent.
    let nonce = uuid_like();
    JobQueue::new(QueueConfig {
        broker_url: url.to_string(),
        stream_prefix: format!("test:{nonce}:jobs"),
        consumer_group: format!("test:{nonce}:workers"),
        dlq_stream: format!("test:{nonce}:dlq"),
        ..Default::default()
    })
    .unwrap()
}

fn uuid_like() -> String {
    format!("{:x}", std::time::UNIX_EPOCH.elapsed().unwrap().as_nanos())
}

#[tokio::test]
async fn enqueue_consume_ack_round_trip() {
    let Some(url) = test_url() else {
        eprintln!("CLIPFORGE_TEST_REDIS_URL not set, skipping");
        return;
    };
    let queue = queue(&url);
    queue.init().await.unwrap();

    let job = RunJob::new(TaskId::new(), ProjectId::new(), TaskKind::Process);
    queue.enqueue(&job).await.unwrap();
    assert_eq!(queue.len(Priority::Processing).await.unwrap(), 1);

    // The same task id cannot be enqueued twice.
    assert!(matches!(
        queue.enqueue(&job).await,
        Err(QueueError::Duplicate(_))
    ));

    let consumed = queue.consume("consumer-1", 500, 5).await.unwrap();
    assert_eq!(consumed.len(), 1);
    let (priority, message_id, delivered) = &consumed[0];
    assert_eq!(*priority, Priority::Processing);
    assert_eq!(delivered.task_id, job.task_id);

    queue.ack(*priority, message_id).await.unwrap();
    assert_eq!(queue.len(Priority::Processing).await.unwrap(), 0);

    // After clearing the dedup key the task may be re-enqueued.
    queue.clear_dedup(&job).await.unwrap();
    queue.enqueue(&job).await.unwrap();
}

#[tokio::test]
async fn priority_classes_drain_in_order() {
    let Some(url) = test_url() else {
        eprintln!("CLIPFORGE_TEST_REDIS_URL not set, skipping");
        return;
    };
    let queue = queue(&url);
    queue.init().await.unwrap();

    let project = ProjectId::new();
    let export = RunJob::new(TaskId::new(), project.clone(), TaskKind::Export);
    let process = RunJob::new(TaskId::new(), project, TaskKind::Process);
    queue.enqueue(&export).await.unwrap();
    queue.enqueue(&process).await.unwrap();

    // The processing class is consumed before export despite arriving later.
    let first = queue.consume("consumer-1", 500, 1).await.unwrap();
    assert_eq!(first[0].0, Priority::Processing);
}

#[tokio::test]
async fn dlq_keeps_the_failed_payload() {
    let Some(url) = test_url() else {
        eprintln!("CLIPFORGE_TEST_REDIS_URL not set, skipping");
        return;
    };
    let queue = queue(&url);
    queue.init().await.unwrap();

    let job = RunJob::new(TaskId::new(), ProjectId::new(), TaskKind::Process);
    queue.enqueue(&job).await.unwrap();
    let consumed = queue.consume("consumer-1", 500, 1).await.unwrap();
    let (priority, message_id, job) = &consumed[0];

    queue.dlq(*priority, message_id, job, "boom").await.unwrap();
    assert_eq!(queue.len(Priority::Processing).await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}

#[tokio::test]
async fn cancel_flags_round_trip() {
    let Some(url) = test_url() else {
        eprintln!("CLIPFORGE_TEST_REDIS_URL not set, skipping");
        return;
    };
    let queue = queue(&url);
    let project = ProjectId::new();

    assert!(!queue.cancel_requested(&project).await.unwrap());
    queue.request_cancel(&project).await.unwrap();
    assert!(queue.cancel_requested(&project).await.unwrap());
    queue.clear_cancel(&project).await.unwrap();
    assert!(!queue.cancel_requested(&project).await.unwrap());
}

#[tokio::test]
async fn snapshot_is_the_durable_truth() {
    let Some(url) = test_url() else {
        eprintln!("CLIPFORGE_TEST_REDIS_URL not set, skipping");
        return;
    };
    let fabric = ProgressFabric::new(FabricConfig {
        broker_url: url,
        ..Default::default()
    })
    .unwrap();

    let project = ProjectId::new();
    let update = ProgressUpdate::new(
        project.clone(),
        Stage::Highlight,
        55,
        "scoring",
        ProjectStatus::Processing,
    );
    fabric.publish(&update).await.unwrap();

    // The snapshot is readable through any accepted channel spelling.
    for spelling in [
        project.to_string(),
        format!("project:{project}"),
        format!("progress:project:{project}"),
    ] {
        let snapshot = fabric
            .snapshot(&spelling)
            .await
            .unwrap()
            .expect("snapshot must exist");
        assert_eq!(snapshot.percent, 55);
        assert_eq!(snapshot.stage, ProgressStage::Highlight);
    }

    fabric.drop_snapshot(&project).await.unwrap();
    let channel = normalize_channel(project.as_str());
    assert!(fabric.snapshot(&channel).await.unwrap().is_none());
}

#[tokio::test]
async fn subscribe_receives_published_events() {
    let Some(url) = test_url() else {
        eprintln!("CLIPFORGE_TEST_REDIS_URL not set, skipping");
        return;
    };
    let fabric = ProgressFabric::new(FabricConfig {
        broker_url: url,
        ..Default::default()
    })
    .unwrap();

    let project = ProjectId::new();
    let mut stream = fabric.subscribe(project.as_str()).await.unwrap();

    let update = ProgressUpdate::new(
        project.clone(),
        Stage::Ingest,
        10,
        "ingest finished",
        ProjectStatus::Processing,
    );
    fabric.publish(&update).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("event must arrive")
        .expect("stream open");
    assert_eq!(received.project_id, project);
    assert_eq!(received.percent, 10);
}
