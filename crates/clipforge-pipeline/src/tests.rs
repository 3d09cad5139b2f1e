//! End-to-end orchestrator scenarios against scripted capabilities.
//!
//! The broker is intentionally unreachable in these tests: progress
//! publication and cancel-flag polling are best-effort, so runs proceed on
//! the metadata store and content tree alone.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use clipforge_content::ContentStore;
use clipforge_db::{Db, NewProject};
use clipforge_models::{
    ClipDraft, Project, ProjectCategory, ProjectId, ProjectSettings, ProjectSource, ProjectStatus,
};
use clipforge_queue::{FabricConfig, JobQueue, ProgressFabric, QueueConfig};

use crate::capabilities::{Capabilities, ClipCutter, LlmClient, LlmKind, MediaDownloader, Transcriber};
use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::sync::DataSync;

const SAMPLE_SRT: &str = "\
1
00:00:00,000 --> 00:00:10,000
Opening remarks.

2
00:00:10,000 --> 00:00:25,000
The first big idea.

3
00:00:25,000 --> 00:00:55,000
A long discussion with a strong conclusion.
";

/// Scripted language model: canned responses per prompt kind, optional
/// transient failures on the outline call, optional gate on scoring.
struct ScriptedLlm {
    calls: AtomicU32,
    outline_failures: AtomicU32,
    scoring_gate: Option<ScoringGate>,
}

struct ScoringGate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
    tripped: AtomicBool,
}

impl ScriptedLlm {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            outline_failures: AtomicU32::new(0),
            scoring_gate: None,
        }
    }

    fn with_outline_failures(mut self, n: u32) -> Self {
        self.outline_failures = AtomicU32::new(n);
        self
    }

    fn with_scoring_gate(mut self, reached: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.scoring_gate = Some(ScoringGate {
            reached,
            release,
            tripped: AtomicBool::new(false),
        });
        self
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn call(&self, kind: LlmKind, _input: &str) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match kind {
            LlmKind::Outline => {
                let remaining = self.outline_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.outline_failures.store(remaining - 1, Ordering::SeqCst);
                    return Err(PipelineError::transient("503 from provider"));
                }
                Ok(r#"{"entries":[
                    {"heading":"Opening","summary":"Remarks and setup."},
                    {"heading":"Big idea","summary":"The core claim."}
                ]}"#
                .to_string())
            }
            LlmKind::Timeline => Ok(r#"{"intervals":[
                {"id":1,"start":5.0,"end":20.0,"topic":"The first big idea","chunk_index":0},
                {"id":2,"start":30.0,"end":50.0,"topic":"The conclusion","chunk_index":0}
            ]}"#
            .to_string()),
            LlmKind::Scoring => {
                if let Some(gate) = &self.scoring_gate {
                    if !gate.tripped.swap(true, Ordering::SeqCst) {
                        gate.reached.notify_one();
                        gate.release.notified().await;
                    }
                }
                Ok(r#"{"score":0.9,"reasons":["strong hook"]}"#.to_string())
            }
            LlmKind::Title => Ok(r#"{"title":"A Punchy Title"}"#.to_string()),
            LlmKind::Clustering => Ok(r#"{"collections":[
                {"id":1,"title":"Best of","description":"The highlights","interval_ids":[1,2]}
            ]}"#
            .to_string()),
            LlmKind::Repair => Ok("{}".to_string()),
        }
    }
}

struct FakeDownloader;

#[async_trait]
impl MediaDownloader for FakeDownloader {
    async fn download<'a>(
        &self,
        _url: &str,
        _cookie_jar: Option<&'a Path>,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        tokio::fs::write(dest, b"downloaded-video").await?;
        Ok(())
    }
}

struct FakeTranscriber;

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _video: &Path,
        dest_srt: &Path,
        _cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        tokio::fs::create_dir_all(dest_srt.parent().unwrap()).await?;
        tokio::fs::write(dest_srt, SAMPLE_SRT).await?;
        Ok(())
    }
}

struct FakeCutter {
    fail_cuts: AtomicBool,
    cuts: AtomicU32,
}

impl FakeCutter {
    fn new() -> Self {
        Self {
            fail_cuts: AtomicBool::new(false),
            cuts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ClipCutter for FakeCutter {
    async fn cut(
        &self,
        _source: &Path,
        _start: f64,
        _end: f64,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        if self.fail_cuts.load(Ordering::SeqCst) {
            return Err(PipelineError::unrecoverable("cutter exited with 1"));
        }
        self.cuts.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        tokio::fs::write(dest, b"cut").await?;
        Ok(())
    }

    async fn concat(
        &self,
        inputs: &[PathBuf],
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        assert!(!inputs.is_empty());
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        tokio::fs::write(dest, b"concat").await?;
        Ok(())
    }

    async fn probe_duration(&self, _source: &Path) -> PipelineResult<f64> {
        Ok(60.0)
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    db: Db,
    store: ContentStore,
    llm: Arc<ScriptedLlm>,
    cutter: Arc<FakeCutter>,
    orchestrator: Arc<Orchestrator>,
}

async fn harness(llm: ScriptedLlm) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::in_memory().await.unwrap();
    let store = ContentStore::new(tmp.path()).await.unwrap();

    // Unroutable broker: every publish degrades to a logged warning.
    let broker_url = "redis://127.0.0.1:1".to_string();
    let queue = Arc::new(
        JobQueue::new(QueueConfig {
            broker_url: broker_url.clone(),
            ..Default::default()
        })
        .unwrap(),
    );
    let fabric = ProgressFabric::new(FabricConfig {
        broker_url,
        ..Default::default()
    })
    .unwrap();

    let llm = Arc::new(llm);
    let cutter = Arc::new(FakeCutter::new());
    let caps = Capabilities::new(
        Arc::clone(&llm) as Arc<dyn LlmClient>,
        Arc::new(FakeDownloader),
        Arc::new(FakeTranscriber),
        Arc::clone(&cutter) as Arc<dyn ClipCutter>,
    );

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        store.clone(),
        fabric,
        queue,
        caps,
        WorkerConfig {
            concurrency: 1,
            ..Default::default()
        },
    ));

    Harness {
        _tmp: tmp,
        db,
        store,
        llm,
        cutter,
        orchestrator,
    }
}

/// Create an upload-sourced project with staged video and subtitle files.
async fn staged_project(h: &Harness, name: &str) -> Project {
    let project = h
        .db
        .projects()
        .create(NewProject {
            name: name.to_string(),
            description: None,
            category: ProjectCategory::Default,
            source: ProjectSource::Upload {
                file_name: "video.mp4".to_string(),
            },
            settings: ProjectSettings::default(),
        })
        .await
        .unwrap();

    let upload_dir = h.store.uploads_dir().join(project.id.as_str());
    tokio::fs::create_dir_all(&upload_dir).await.unwrap();
    tokio::fs::write(upload_dir.join("video.mp4"), b"fake-video")
        .await
        .unwrap();
    tokio::fs::write(upload_dir.join("subtitle.srt"), SAMPLE_SRT)
        .await
        .unwrap();

    project
}

async fn project_status(h: &Harness, id: &ProjectId) -> ProjectStatus {
    h.db.projects().get(id).await.unwrap().status
}

#[tokio::test]
async fn happy_path_produces_clips_and_collections() {
    let h = harness(ScriptedLlm::new()).await;
    let project = staged_project(&h, "s1").await;

    h.orchestrator
        .run(&project.id, RunOptions::default())
        .await
        .unwrap();

    let row = h.db.projects().get(&project.id).await.unwrap();
    assert_eq!(row.status, ProjectStatus::Completed);
    assert_eq!(row.progress, 100);
    assert_eq!(row.current_stage, 6);
    assert!(row.completed_at.is_some());
    assert!(!row.sync_pending);
    assert_eq!(row.video_duration, Some(60.0));

    // Every stage artifact landed.
    let layout = h.store.project(&project.id);
    for path in [
        layout.subtitle_chunks(),
        layout.outline(),
        layout.timeline(),
        layout.scoring(),
        layout.titles(),
        layout.clustering(),
        layout.clips_metadata(),
        layout.collections_metadata(),
    ] {
        assert!(h.store.exists(&path).await, "missing {}", path.display());
    }

    // Database rows match the metadata artifact.
    let drafts: Vec<ClipDraft> = h.store.read_json(&layout.clips_metadata()).await.unwrap();
    let clips = h.db.clips().list_for_project(&project.id).await.unwrap();
    assert_eq!(clips.len(), drafts.len());
    assert!(!clips.is_empty());
    for clip in &clips {
        assert!(clip.start_time < clip.end_time);
        assert!(clip.end_time <= 60.0);
        assert!(clip.output_path.is_some());
        assert!(clip.metadata.original_id.is_some());
    }

    let collections = h.db.collections().list_for_project(&project.id).await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].clip_ids.len(), 2);
    // Collection members reference real clips of the same project.
    for clip_id in &collections[0].clip_ids {
        assert!(clips.iter().any(|c| c.id == *clip_id));
    }

    assert_eq!(h.cutter.cuts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancel_mid_highlight_leaves_no_titles_and_no_rows() {
    let reached = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let llm = ScriptedLlm::new().with_scoring_gate(Arc::clone(&reached), Arc::clone(&release));
    let h = harness(llm).await;
    let project = staged_project(&h, "s2").await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let project_id = project.id.clone();
    let run = tokio::spawn(async move {
        orchestrator.run(&project_id, RunOptions::default()).await
    });

    // The run is now inside the first scoring call.
    reached.notified().await;
    assert!(h.orchestrator.cancel(&project.id));
    release.notify_one();

    let result = run.await.unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));

    assert_eq!(project_status(&h, &project.id).await, ProjectStatus::Cancelled);

    let layout = h.store.project(&project.id);
    assert!(!h.store.exists(&layout.titles()).await);
    assert!(h.db.clips().list_for_project(&project.id).await.unwrap().is_empty());

    // Cancelling a finished project is a no-op.
    assert!(!h.orchestrator.cancel(&project.id));
}

#[tokio::test]
async fn transient_llm_errors_are_retried_to_success() {
    let h = harness(ScriptedLlm::new().with_outline_failures(2)).await;
    let project = staged_project(&h, "s3").await;

    h.orchestrator
        .run(&project.id, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(project_status(&h, &project.id).await, ProjectStatus::Completed);
}

#[tokio::test]
async fn retry_after_export_failure_resumes_without_llm_calls() {
    let h = harness(ScriptedLlm::new()).await;
    let project = staged_project(&h, "s6").await;

    h.cutter.fail_cuts.store(true, Ordering::SeqCst);
    let result = h.orchestrator.run(&project.id, RunOptions::default()).await;
    assert!(result.is_err());

    let row = h.db.projects().get(&project.id).await.unwrap();
    assert_eq!(row.status, ProjectStatus::Failed);
    let error = row.error.expect("failure must be recorded");
    assert_eq!(error.stage, "export");

    // Fix the cutter and retry: earlier stages read their artifacts from
    // disk, so the model is never consulted again.
    h.cutter.fail_cuts.store(false, Ordering::SeqCst);
    let calls_before = h.llm.call_count();

    h.orchestrator
        .run(
            &project.id,
            RunOptions {
                resume: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(h.llm.call_count(), calls_before);
    assert_eq!(project_status(&h, &project.id).await, ProjectStatus::Completed);
    assert!(h.db.clips().count_for_project(&project.id).await.unwrap() > 0);
}

#[tokio::test]
async fn second_run_for_same_project_is_refused() {
    let reached = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let llm = ScriptedLlm::new().with_scoring_gate(Arc::clone(&reached), Arc::clone(&release));
    let h = harness(llm).await;
    let project = staged_project(&h, "dup").await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let project_id = project.id.clone();
    let run = tokio::spawn(async move {
        orchestrator.run(&project_id, RunOptions::default()).await
    });
    reached.notified().await;

    let second = h.orchestrator.run(&project.id, RunOptions::default()).await;
    assert!(matches!(second, Err(PipelineError::Busy(_))));

    release.notify_one();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn manual_resync_is_idempotent() {
    let h = harness(ScriptedLlm::new()).await;
    let project = staged_project(&h, "resync").await;
    h.orchestrator
        .run(&project.id, RunOptions::default())
        .await
        .unwrap();

    let before = h.db.clips().list_for_project(&project.id).await.unwrap();
    let key = |clips: &[clipforge_models::Clip]| {
        let mut keys: Vec<(String, String, String)> = clips
            .iter()
            .map(|c| {
                (
                    c.title.clone(),
                    format!("{:.3}", c.start_time),
                    format!("{:.3}", c.end_time),
                )
            })
            .collect();
        keys.sort();
        keys
    };

    let sync = DataSync::new(h.db.clone(), h.store.clone());
    sync.sync_project(&project.id).await.unwrap();

    let after = h.db.clips().list_for_project(&project.id).await.unwrap();
    assert_eq!(before.len(), after.len());
    assert_eq!(key(&before), key(&after));
}
