//! Checkpointed clone jobs: progress persistence and resume.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use callsheet_clone::{CloneConfig, CloneError};
use callsheet_core::{
    defaults::MEMBERSHIP_COLLECTION, CheckpointRepository, CheckpointStatus, CloneSchema,
    DocumentStore, FIELD_IS_DEMO_CLONE,
};
use callsheet_db::{MemoryCheckpointRepository, MemoryDocumentStore, SeededTemplate};

use common::{canonical, checkpointed_orchestrator, orchestrator, seeded_store};

fn template_config(root: Uuid) -> CloneConfig {
    CloneConfig::default().with_template_root_id(root)
}

#[tokio::test]
async fn test_completed_job_leaves_no_checkpoint() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));

    let outcome = cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    assert!(checkpoints.is_empty().await);
    assert!(checkpoints.load(outcome.job_id).await.unwrap().is_none());
    assert!(cloner.list_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_job_is_recorded_and_resumes_to_completion() {
    let (store, seeded) = seeded_store().await;
    let schema = CloneSchema::production().unwrap();
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));
    let owner = Uuid::new_v4();

    store.fail_batch("scenes", 0).await;
    let err = cloner
        .clone_template_for(owner, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.collection(), Some("scenes"));

    let incomplete = cloner.list_incomplete().await.unwrap();
    assert_eq!(incomplete.len(), 1);
    let checkpoint = &incomplete[0];
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    assert_eq!(checkpoint.owner_id, owner);
    assert_eq!(
        checkpoint.completed_collections,
        vec!["locations", "cast_members", "crew_members"]
    );
    assert!(checkpoint.last_error.is_some());
    assert!(checkpoint
        .identity
        .get("scenes")
        .map_or(true, |ids| ids.is_empty()));

    store.clear_faults().await;
    let outcome = cloner.resume(checkpoint.job_id).await.unwrap();

    assert!(outcome.resumed);
    assert_eq!(outcome.job_id, checkpoint.job_id);
    assert_eq!(outcome.new_root_id, checkpoint.new_root_id);
    assert_eq!(outcome.total_documents(), seeded.total());
    assert_eq!(
        canonical(&store, &schema, seeded.root_id).await,
        canonical(&store, &schema, outcome.new_root_id).await
    );
    assert!(checkpoints.is_empty().await);

    let clone_roots = store
        .all("projects")
        .await
        .into_iter()
        .filter(|d| d.has_flag(FIELD_IS_DEMO_CLONE, true))
        .count();
    assert_eq!(clone_roots, 1);
}

#[tokio::test]
async fn test_resume_continues_a_partially_written_collection() {
    let (store, seeded) = seeded_store().await;
    let schema = CloneSchema::production().unwrap();
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(
        &store,
        &checkpoints,
        template_config(seeded.root_id).with_batch_size(1),
    );

    store.fail_batch("shots", 2).await;
    assert!(cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .is_err());

    let checkpoint = cloner.list_incomplete().await.unwrap().remove(0);
    assert_eq!(checkpoint.identity["shots"].len(), 2);
    let partial = checkpoint
        .counts
        .iter()
        .find(|c| c.collection == "shots")
        .map(|c| c.count);
    assert_eq!(partial, Some(2));
    assert_eq!(
        store
            .read_by_parent("shots", checkpoint.new_root_id)
            .await
            .unwrap()
            .len(),
        2
    );

    store.clear_faults().await;
    let outcome = cloner.resume(checkpoint.job_id).await.unwrap();

    assert_eq!(outcome.count("shots"), seeded.counts["shots"]);
    assert_eq!(
        store
            .read_by_parent("shots", outcome.new_root_id)
            .await
            .unwrap()
            .len(),
        seeded.counts["shots"]
    );
    assert_eq!(
        canonical(&store, &schema, seeded.root_id).await,
        canonical(&store, &schema, outcome.new_root_id).await
    );
}

#[tokio::test]
async fn test_resume_after_membership_failure_only_provisions_owner() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));
    let owner = Uuid::new_v4();

    store.fail_creates(MEMBERSHIP_COLLECTION).await;
    let err = cloner
        .clone_template_for(owner, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_orphaning());

    let checkpoint = cloner.list_incomplete().await.unwrap().remove(0);
    assert_eq!(
        checkpoint.completed_collections.len(),
        CloneSchema::production().unwrap().len()
    );

    store.clear_faults().await;
    let writes = store.write_count().await;
    let outcome = cloner.resume(checkpoint.job_id).await.unwrap();

    assert_eq!(store.write_count().await, writes + 1);
    assert_eq!(outcome.total_documents(), seeded.total());
    let members = store
        .read_by_parent(MEMBERSHIP_COLLECTION, outcome.new_root_id)
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, outcome.membership_id);
    assert_eq!(members[0].uuid_field("user_id"), Some(owner));
}

#[tokio::test]
async fn test_resume_of_unknown_or_finished_job_fails() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));

    let unknown = Uuid::new_v4();
    assert!(matches!(
        cloner.resume(unknown).await,
        Err(CloneError::JobNotFound(id)) if id == unknown
    ));

    let outcome = cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();
    assert!(matches!(
        cloner.resume(outcome.job_id).await,
        Err(CloneError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_resume_requires_checkpoints() {
    let (store, seeded) = seeded_store().await;
    let cloner = orchestrator(&store, template_config(seeded.root_id));

    assert!(matches!(
        cloner.resume(Uuid::new_v4()).await,
        Err(CloneError::Config(_))
    ));
    assert!(cloner.list_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_attached_repository_is_unused_while_disabled() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = orchestrator(&store, template_config(seeded.root_id))
        .with_checkpoints(checkpoints.clone() as Arc<dyn CheckpointRepository>);

    store.fail_batch("scenes", 0).await;
    assert!(cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .is_err());
    assert!(checkpoints.is_empty().await);
}

#[tokio::test]
async fn test_checkpoint_store_failure_stops_the_job() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    checkpoints.fail_saves(true);
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));

    let err = cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();

    assert!(matches!(err, CloneError::Checkpoint(_)));
    assert_eq!(err.kind(), "checkpoint");
    assert_eq!(store.count(MEMBERSHIP_COLLECTION).await, 0);
}

async fn clone_counts(store: &MemoryDocumentStore, root: Uuid, collections: &[&str]) -> Vec<usize> {
    let mut counts = Vec::new();
    for collection in collections {
        counts.push(store.read_by_parent(collection, root).await.unwrap().len());
    }
    counts
}

fn source_counts(seeded: &SeededTemplate, collections: &[&str]) -> Vec<usize> {
    collections.iter().map(|c| seeded.counts[*c]).collect()
}

#[tokio::test]
async fn test_second_resume_of_a_job_is_rejected() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));

    store.fail_batch("scenes", 0).await;
    assert!(cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .is_err());
    store.clear_faults().await;

    // What a second operator read before the first resume finished.
    let stale = cloner.list_incomplete().await.unwrap().remove(0);
    let outcome = cloner.resume(stale.job_id).await.unwrap();

    assert!(!checkpoints.save(&stale).await.unwrap());
    assert!(checkpoints
        .claim(stale.job_id, stale.version, Utc::now())
        .await
        .unwrap()
        .is_none());
    let writes = store.write_count().await;
    assert!(matches!(
        cloner.resume(stale.job_id).await,
        Err(CloneError::JobNotFound(_))
    ));
    assert_eq!(store.write_count().await, writes);

    let pending = ["scenes", "shots", "budget_items"];
    assert_eq!(
        clone_counts(&store, outcome.new_root_id, &pending).await,
        source_counts(&seeded, &pending)
    );
}

#[tokio::test]
async fn test_concurrent_resumes_write_each_document_once() {
    let (store, seeded) = seeded_store().await;
    let schema = CloneSchema::production().unwrap();
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));

    store.fail_batch("scenes", 0).await;
    assert!(cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .is_err());
    store.clear_faults().await;
    let job_id = cloner.list_incomplete().await.unwrap()[0].job_id;

    let (first, second) = tokio::join!(cloner.resume(job_id), cloner.resume(job_id));

    let outcomes: Vec<_> = [first, second].into_iter().collect();
    let finished: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(finished.len(), 1);
    for result in &outcomes {
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    CloneError::JobClaimed(_)
                        | CloneError::JobInProgress(_)
                        | CloneError::JobNotFound(_)
                ),
                "unexpected error: {}",
                e
            );
        }
    }

    let new_root_id = finished[0].new_root_id;
    assert_eq!(
        canonical(&store, &schema, seeded.root_id).await,
        canonical(&store, &schema, new_root_id).await
    );
    assert_eq!(
        store
            .read_by_parent(MEMBERSHIP_COLLECTION, new_root_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_running_job_is_not_resumed_within_lease() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));

    store.fail_batch("scenes", 0).await;
    assert!(cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .is_err());
    store.clear_faults().await;

    // Looks like a job that is still writing.
    let mut running = cloner.list_incomplete().await.unwrap().remove(0);
    running.status = CheckpointStatus::InProgress;
    running.updated_at_utc = Utc::now();
    assert!(checkpoints.save(&running).await.unwrap());

    let writes = store.write_count().await;
    let err = cloner.resume(running.job_id).await.unwrap_err();
    assert!(matches!(err, CloneError::JobInProgress(id) if id == running.job_id));
    assert_eq!(err.kind(), "job_in_progress");
    assert_eq!(store.write_count().await, writes);
    assert_eq!(checkpoints.len().await, 1);

    // Once the lease has run out the job can be taken over.
    let takeover = checkpointed_orchestrator(
        &store,
        &checkpoints,
        template_config(seeded.root_id).with_resume_lease(Duration::ZERO),
    );
    let outcome = takeover.resume(running.job_id).await.unwrap();
    assert_eq!(outcome.total_documents(), seeded.total());
    assert!(checkpoints.is_empty().await);
}

#[tokio::test]
async fn test_resume_of_owned_root_discards_checkpoint() {
    let (store, seeded) = seeded_store().await;
    let checkpoints = Arc::new(MemoryCheckpointRepository::new());
    let cloner = checkpointed_orchestrator(&store, &checkpoints, template_config(seeded.root_id));

    store.fail_batch("scenes", 0).await;
    assert!(cloner
        .clone_template_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .is_err());
    store.clear_faults().await;
    let checkpoint = cloner.list_incomplete().await.unwrap().remove(0);
    cloner.reprovision_owner(checkpoint.new_root_id).await.unwrap();

    let writes = store.write_count().await;
    assert!(matches!(
        cloner.resume(checkpoint.job_id).await,
        Err(CloneError::JobNotFound(_))
    ));
    assert_eq!(store.write_count().await, writes);
    assert!(checkpoints.is_empty().await);
}
