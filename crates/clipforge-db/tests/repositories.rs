//! Repository behaviour against an in-memory store.

use chrono::{Duration, Utc};

use clipforge_db::{Db, DbError, NewProject, ProjectFilter, StatusFields};
use clipforge_models::{
    Clip, ClipId, ClipMetadata, Collection, CollectionId, CollectionStatus, ProjectCategory,
    ProjectSettings, ProjectSource, ProjectStatus, RemotePlatform, Task, TaskKind, TaskStatus,
};

fn upload_spec(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        description: None,
        category: ProjectCategory::Knowledge,
        source: ProjectSource::Upload {
            file_name: "video.mp4".to_string(),
        },
        settings: ProjectSettings::default(),
    }
}

fn make_clip(project_id: &clipforge_models::ProjectId, title: &str, start: f64, end: f64) -> Clip {
    Clip {
        id: ClipId::new(),
        project_id: project_id.clone(),
        title: title.to_string(),
        score: 0.8,
        start_time: start,
        end_time: end,
        output_path: None,
        metadata: ClipMetadata::default(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn project_round_trip_preserves_source_and_settings() {
    let db = Db::in_memory().await.unwrap();

    let created = db
        .projects()
        .create(NewProject {
            name: "remote".to_string(),
            description: Some("a talk".to_string()),
            category: ProjectCategory::Speech,
            source: ProjectSource::Remote {
                url: "https://youtube.com/watch?v=abc".to_string(),
                platform: RemotePlatform::Youtube,
                cookie_jar_id: Some("jar-1".to_string()),
            },
            settings: ProjectSettings {
                max_clips: 3,
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let fetched = db.projects().get(&created.id).await.unwrap();
    assert_eq!(fetched.name, "remote");
    assert_eq!(fetched.category, ProjectCategory::Speech);
    assert_eq!(fetched.settings.max_clips, 3);
    assert_eq!(fetched.status, ProjectStatus::Pending);
    match fetched.source {
        ProjectSource::Remote { url, cookie_jar_id, .. } => {
            assert_eq!(url, "https://youtube.com/watch?v=abc");
            assert_eq!(cookie_jar_id.as_deref(), Some("jar-1"));
        }
        other => panic!("expected remote source, got {other:?}"),
    }
}

#[tokio::test]
async fn create_rejects_empty_name() {
    let db = Db::in_memory().await.unwrap();
    let result = db.projects().create(upload_spec("  ")).await;
    assert!(matches!(result, Err(DbError::InvalidArgument(_))));
}

#[tokio::test]
async fn list_filters_by_status() {
    let db = Db::in_memory().await.unwrap();
    let a = db.projects().create(upload_spec("a")).await.unwrap();
    let _b = db.projects().create(upload_spec("b")).await.unwrap();

    db.projects()
        .update_status(
            &a.id,
            ProjectStatus::Pending,
            ProjectStatus::Processing,
            StatusFields::default(),
        )
        .await
        .unwrap();

    let processing = db
        .projects()
        .list(ProjectFilter {
            status: Some(ProjectStatus::Processing),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].id, a.id);

    let all = db.projects().list(ProjectFilter::page(10, 0)).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn status_cas_detects_lost_races() {
    let db = Db::in_memory().await.unwrap();
    let project = db.projects().create(upload_spec("cas")).await.unwrap();

    db.projects()
        .update_status(
            &project.id,
            ProjectStatus::Pending,
            ProjectStatus::Processing,
            StatusFields::default(),
        )
        .await
        .unwrap();

    // The row is no longer Pending: the same transition now conflicts.
    let result = db
        .projects()
        .update_status(
            &project.id,
            ProjectStatus::Pending,
            ProjectStatus::Processing,
            StatusFields::default(),
        )
        .await;
    assert!(matches!(result, Err(DbError::Conflict(_))));

    // Transitions outside the diagram are rejected before touching the row.
    let result = db
        .projects()
        .update_status(
            &project.id,
            ProjectStatus::Completed,
            ProjectStatus::Processing,
            StatusFields::default(),
        )
        .await;
    assert!(matches!(result, Err(DbError::InvalidArgument(_))));
}

#[tokio::test]
async fn delete_refuses_while_task_runs_then_cascades() {
    let db = Db::in_memory().await.unwrap();
    let project = db.projects().create(upload_spec("del")).await.unwrap();

    let task = Task::new(project.id.clone(), TaskKind::Process);
    db.tasks().create(&task).await.unwrap();
    db.tasks().claim(&task.id, "worker-1").await.unwrap();

    assert!(matches!(
        db.projects().delete(&project.id).await,
        Err(DbError::Busy(_))
    ));

    db.tasks()
        .finish(&task.id, TaskStatus::Completed, None)
        .await
        .unwrap();

    db.sync_writer()
        .replace_project_artifacts(
            &project.id,
            &[make_clip(&project.id, "one", 0.0, 5.0)],
            &[],
        )
        .await
        .unwrap();

    db.projects().delete(&project.id).await.unwrap();
    assert!(matches!(
        db.projects().get(&project.id).await,
        Err(DbError::NotFound(_))
    ));
    assert_eq!(db.clips().count_for_project(&project.id).await.unwrap(), 0);
    assert!(db.tasks().list_for_project(&project.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn task_claim_short_circuits_duplicates() {
    let db = Db::in_memory().await.unwrap();
    let project = db.projects().create(upload_spec("dup")).await.unwrap();

    let task = Task::new(project.id.clone(), TaskKind::Process);
    db.tasks().create(&task).await.unwrap();

    db.tasks().claim(&task.id, "worker-1").await.unwrap();
    // A redelivery of the same task finds it no longer pending.
    assert!(matches!(
        db.tasks().claim(&task.id, "worker-2").await,
        Err(DbError::Conflict(_))
    ));

    let running = db
        .tasks()
        .find_running(&project.id, TaskKind::Process)
        .await
        .unwrap()
        .expect("task should be running");
    assert_eq!(running.worker_id.as_deref(), Some("worker-1"));
    assert!(db.tasks().has_active(&project.id).await.unwrap());
}

#[tokio::test]
async fn janitor_sweeps_orphans_and_old_tasks() {
    let db = Db::in_memory().await.unwrap();
    let project = db.projects().create(upload_spec("sweep")).await.unwrap();

    let task = Task::new(project.id.clone(), TaskKind::Process);
    db.tasks().create(&task).await.unwrap();
    db.tasks().claim(&task.id, "worker-1").await.unwrap();

    // A cutoff in the future makes the just-claimed task count as stuck.
    let swept = db
        .tasks()
        .orphan_stuck(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(swept, 1);

    let task = db.tasks().get(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("orphaned"));

    let deleted = db
        .tasks()
        .delete_terminal_before(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn reorder_preserves_the_multiset() {
    let db = Db::in_memory().await.unwrap();
    let project = db.projects().create(upload_spec("order")).await.unwrap();

    let clips = vec![
        make_clip(&project.id, "a", 0.0, 5.0),
        make_clip(&project.id, "b", 10.0, 15.0),
        make_clip(&project.id, "c", 20.0, 25.0),
    ];
    let collection = Collection {
        id: CollectionId::new(),
        project_id: project.id.clone(),
        title: "themed".to_string(),
        description: None,
        clip_ids: clips.iter().map(|c| c.id.clone()).collect(),
        status: CollectionStatus::Created,
        export_path: None,
        created_at: Utc::now(),
    };
    db.sync_writer()
        .replace_project_artifacts(&project.id, &clips, &[collection.clone()])
        .await
        .unwrap();

    let mut reversed: Vec<ClipId> = collection.clip_ids.clone();
    reversed.reverse();
    db.collections()
        .reorder(&collection.id, reversed.clone())
        .await
        .unwrap();

    let after = db.collections().get(&collection.id).await.unwrap();
    assert_eq!(after.clip_ids, reversed);

    let mut before_sorted: Vec<String> =
        collection.clip_ids.iter().map(|c| c.to_string()).collect();
    let mut after_sorted: Vec<String> = after.clip_ids.iter().map(|c| c.to_string()).collect();
    before_sorted.sort();
    after_sorted.sort();
    assert_eq!(before_sorted, after_sorted);

    // Dropping a member is not a reorder.
    let partial = vec![collection.clip_ids[0].clone()];
    assert!(matches!(
        db.collections().reorder(&collection.id, partial).await,
        Err(DbError::InvalidArgument(_))
    ));

    // Neither is duplicating one.
    let duplicated = vec![
        collection.clip_ids[0].clone(),
        collection.clip_ids[0].clone(),
        collection.clip_ids[1].clone(),
    ];
    assert!(matches!(
        db.collections().reorder(&collection.id, duplicated).await,
        Err(DbError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn sync_writer_is_idempotent() {
    let db = Db::in_memory().await.unwrap();
    let project = db.projects().create(upload_spec("sync")).await.unwrap();

    let build = |pid: &clipforge_models::ProjectId| {
        vec![
            make_clip(pid, "one", 0.0, 5.0),
            make_clip(pid, "two", 10.0, 18.0),
        ]
    };

    db.sync_writer()
        .replace_project_artifacts(&project.id, &build(&project.id), &[])
        .await
        .unwrap();
    // Second generation: fresh row ids, same content.
    db.sync_writer()
        .replace_project_artifacts(&project.id, &build(&project.id), &[])
        .await
        .unwrap();

    let clips = db.clips().list_for_project(&project.id).await.unwrap();
    assert_eq!(clips.len(), 2);
    let mut titles: Vec<&str> = clips.iter().map(|c| c.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["one", "two"]);
}

#[tokio::test]
async fn collection_export_marking() {
    let db = Db::in_memory().await.unwrap();
    let project = db.projects().create(upload_spec("exp")).await.unwrap();

    let clips = vec![make_clip(&project.id, "a", 0.0, 5.0)];
    let collection = Collection {
        id: CollectionId::new(),
        project_id: project.id.clone(),
        title: "t".to_string(),
        description: None,
        clip_ids: clips.iter().map(|c| c.id.clone()).collect(),
        status: CollectionStatus::Created,
        export_path: None,
        created_at: Utc::now(),
    };
    db.sync_writer()
        .replace_project_artifacts(&project.id, &clips, &[collection.clone()])
        .await
        .unwrap();

    db.collections()
        .mark_exported(&collection.id, "/data/out.mp4")
        .await
        .unwrap();
    let after = db.collections().get(&collection.id).await.unwrap();
    assert_eq!(after.status, CollectionStatus::Exported);
    assert_eq!(after.export_path.as_deref(), Some("/data/out.mp4"));
}
