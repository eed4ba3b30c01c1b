//! End-to-end execution scenarios against the in-memory emulator.

mod common;

use common::*;
use matlas_core::resources::{ClusterSpec, DatabaseUserSpec};
use matlas_core::{KindSpec, OperationStatus, ResourceKind, RunStatus};
use matlas_planner::{PlanOptions, Planner};
use matlas_runtime::{
    CancelToken, CollectingProgressSink, EmulatorOptions, ExecuteError, Fault, Method,
    MongoAdminService, MongoCredentials, ProgressEvent, ServiceError, RUN_DEADLINE,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c.starts_with(call))
        .unwrap_or_else(|| panic!("no call {call} in {calls:?}"))
}

#[tokio::test]
async fn create_from_empty_runs_stage_by_stage() {
    let (atlas, services) = emulator(EmulatorOptions {
        provisioning_polls: 3,
        ..Default::default()
    });
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;
    let sink = Arc::new(CollectingProgressSink::new());

    let result = executor(&services)
        .with_progress(sink.clone())
        .execute(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.summary.completed, 3);
    assert_eq!(
        sink.finished(),
        vec![
            "project:p1:create".to_string(),
            "cluster:c1:create".to_string(),
            "databaseuser:u1:create".to_string(),
        ]
    );
    // The user is created only once the cluster reported AVAILABLE.
    let calls = atlas.calls();
    let last_poll = calls
        .iter()
        .rposition(|c| c.starts_with("readiness Cluster"))
        .unwrap();
    assert!(last_poll < position(&calls, "create DatabaseUser"));
    let cluster = result.operation("cluster:c1:create").unwrap();
    assert!(cluster.warnings.is_empty());
    assert!(cluster.resource_id.is_some());
    assert_eq!(result.project_id, PROJECT);
}

#[tokio::test]
async fn second_apply_is_all_noop_and_writes_nothing() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let doc = load(S1);
    let first = plan(&services, &doc, PlanOptions::default()).await;
    executor(&services).execute(&first).await.unwrap();
    let writes = atlas.writes();

    let second = plan(&services, &doc, PlanOptions::default()).await;
    assert!(!second.has_changes(), "{:#?}", second.operations);
    assert_eq!(second.summary.noop, 3);

    let result = executor(&services).execute(&second).await.unwrap();
    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.summary.unchanged, 3);
    assert_eq!(atlas.writes(), writes);
}

#[tokio::test]
async fn failed_sibling_does_not_stop_the_stage() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let doc = document(&[
        cluster_yaml("c1", "M10"),
        cluster_yaml("c2", "M10"),
        user_yaml("u1", "c1"),
        user_yaml("u2", "c2"),
    ]);
    atlas.inject(
        Fault::new(Method::Create, ServiceError::validation("instance size unavailable"))
            .on_kind(ResourceKind::Cluster)
            .on_target("c2"),
    );
    let plan = plan(&services, &doc, PlanOptions::default()).await;

    let result = executor(&services).execute(&plan).await.unwrap();

    assert_eq!(result.status_of("cluster:c1:create"), Some(OperationStatus::Completed));
    assert_eq!(result.status_of("cluster:c2:create"), Some(OperationStatus::Failed));
    assert_eq!(result.status_of("databaseuser:u1:create"), Some(OperationStatus::Completed));
    assert_eq!(result.status_of("databaseuser:u2:create"), Some(OperationStatus::Skipped));
    let skipped = result.operation("databaseuser:u2:create").unwrap();
    assert_eq!(
        skipped.reason.as_deref(),
        Some("dependency cluster:c2:create failed")
    );
    let failed = result.operation("cluster:c2:create").unwrap();
    let error = failed.error.as_ref().unwrap();
    assert_eq!(error.code, "MATLAS-EXEC-004");
    assert_eq!(failed.retry_count, 0);
    assert_eq!(result.status, RunStatus::Failed);
}

#[tokio::test]
async fn ten_wide_stage_with_third_failure() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let mut items: Vec<String> = (0..10).map(|i| cluster_yaml(&format!("c{i}"), "M10")).collect();
    items.push(user_yaml("u2", "c2"));
    items.push(user_yaml("u5", "c5"));
    let doc = document(&items);
    atlas.inject(
        Fault::new(Method::Create, ServiceError::validation("bad request"))
            .on_kind(ResourceKind::Cluster)
            .on_target("c2"),
    );
    let plan = plan(&services, &doc, PlanOptions::default()).await;
    assert_eq!(plan.stages()[&1].len(), 10);

    let result = executor(&services).execute(&plan).await.unwrap();

    let completed = (0..10)
        .filter(|i| result.status_of(&format!("cluster:c{i}:create")) == Some(OperationStatus::Completed))
        .count();
    assert_eq!(completed, 9);
    assert_eq!(result.status_of("databaseuser:u2:create"), Some(OperationStatus::Skipped));
    assert_eq!(result.status_of("databaseuser:u5:create"), Some(OperationStatus::Completed));
    assert_eq!(result.summary.failed, 1);
    assert_eq!(result.summary.skipped, 1);
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    atlas.inject(
        Fault::new(Method::Create, ServiceError::transient("503 service unavailable"))
            .on_kind(ResourceKind::Cluster)
            .times(2),
    );
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;
    let sink = Arc::new(CollectingProgressSink::new());

    let result = executor(&services)
        .with_progress(sink.clone())
        .execute(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.operation("cluster:c1:create").unwrap().retry_count, 2);
    let retries = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, ProgressEvent::OperationRetrying { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn rate_limits_exhaust_attempts() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    atlas.inject(
        Fault::new(Method::Create, ServiceError::rate_limited(Some(Duration::from_millis(2))))
            .on_kind(ResourceKind::Cluster),
    );
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;

    let result = executor(&services).execute(&plan).await.unwrap();

    let cluster = result.operation("cluster:c1:create").unwrap();
    assert_eq!(cluster.status, OperationStatus::Failed);
    assert_eq!(cluster.retry_count, 2);
    assert_eq!(cluster.error.as_ref().unwrap().code, "MATLAS-EXEC-006");
    assert_eq!(result.status_of("databaseuser:u1:create"), Some(OperationStatus::Skipped));
}

#[tokio::test]
async fn authentication_failure_is_run_fatal() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    atlas.inject(
        Fault::new(Method::Create, ServiceError::authn("API key revoked")).on_kind(ResourceKind::Cluster),
    );
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;

    let result = executor(&services).execute(&plan).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.status_of("project:p1:create"), Some(OperationStatus::Completed));
    assert_eq!(result.status_of("cluster:c1:create"), Some(OperationStatus::Failed));
    assert_eq!(result.status_of("databaseuser:u1:create"), Some(OperationStatus::Cancelled));
    assert!(result
        .cancel_reason
        .as_deref()
        .unwrap()
        .starts_with("authentication failed"));
}

#[tokio::test]
async fn create_conflict_with_identical_resource_is_adopted() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let doc = load(S1);
    // Plan against a stale, empty snapshot while Atlas already holds c1.
    let state = matlas_core::ProjectState::empty(PROJECT);
    let plan = Planner::default().plan(&doc, &state).unwrap();
    let c1 = doc.find(ResourceKind::Cluster, "c1").unwrap().spec.clone();
    atlas.seed(PROJECT, c1).unwrap();

    let result = executor(&services).execute(&plan).await.unwrap();

    let cluster = result.operation("cluster:c1:create").unwrap();
    assert_eq!(cluster.status, OperationStatus::Completed);
    assert_eq!(cluster.warnings.len(), 1);
    assert!(cluster.warnings[0].contains("already existed"));
    assert_eq!(result.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn create_conflict_with_different_resource_fails() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let doc = load(S1);
    let state = matlas_core::ProjectState::empty(PROJECT);
    let plan = Planner::default().plan(&doc, &state).unwrap();
    let other = ClusterSpec {
        name: "c1".into(),
        provider: "AWS".into(),
        region: "US_EAST_1".into(),
        instance_size: "M30".into(),
        ..Default::default()
    };
    atlas.seed(PROJECT, other.into_spec()).unwrap();

    let result = executor(&services).execute(&plan).await.unwrap();

    let cluster = result.operation("cluster:c1:create").unwrap();
    assert_eq!(cluster.status, OperationStatus::Failed);
    let error = cluster.error.as_ref().unwrap();
    assert_eq!(error.code, "MATLAS-EXEC-002");
    assert!(error.message.contains("instanceSize"), "{}", error.message);
}

#[tokio::test]
async fn slow_provisioning_downgrades_to_warning() {
    let (_atlas, services) = emulator(EmulatorOptions {
        provisioning_polls: u32::MAX,
        ..Default::default()
    });
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;
    let mut config = fast_config();
    config.post_condition_timeout = Duration::from_millis(50);

    let result = executor(&services)
        .with_config(config)
        .execute(&plan)
        .await
        .unwrap();

    let cluster = result.operation("cluster:c1:create").unwrap();
    assert_eq!(cluster.status, OperationStatus::Completed);
    assert_eq!(
        cluster.warnings,
        vec!["created, not yet AVAILABLE (last state CREATING)".to_string()]
    );
    assert_eq!(result.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn cancellation_stops_queued_operations() {
    let (atlas, services) = emulator(EmulatorOptions {
        provisioning_polls: u32::MAX,
        ..Default::default()
    });
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;
    let cancel = CancelToken::new();

    let watcher = {
        let atlas = atlas.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while !atlas.calls().iter().any(|c| c == "create Cluster c1") {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            cancel.cancel("user requested");
        })
    };

    let result = executor(&services)
        .with_cancel(cancel)
        .execute(&plan)
        .await
        .unwrap();
    watcher.await.unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.cancel_reason.as_deref(), Some("user requested"));
    let cluster = result.operation("cluster:c1:create").unwrap();
    assert_eq!(cluster.status, OperationStatus::Completed);
    assert!(cluster.warnings[0].contains("cancelled before AVAILABLE"));
    let user = result.operation("databaseuser:u1:create").unwrap();
    assert_eq!(user.status, OperationStatus::Cancelled);
    assert!(user.started_at.is_none());
    assert!(!atlas.calls().iter().any(|c| c.starts_with("create DatabaseUser")));
}

#[tokio::test]
async fn run_deadline_cancels_the_run() {
    let (_atlas, services) = emulator(EmulatorOptions {
        provisioning_polls: u32::MAX,
        ..Default::default()
    });
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;

    let result = executor(&services)
        .with_run_timeout(Some(Duration::from_millis(100)))
        .execute(&plan)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.cancel_reason.as_deref(), Some(RUN_DEADLINE));
    assert_eq!(result.status_of("databaseuser:u1:create"), Some(OperationStatus::Cancelled));
}

#[tokio::test]
async fn search_index_prepares_its_collection_with_a_temporary_user() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let index = r#"  - kind: SearchIndex
    metadata:
      name: orders-text
    spec:
      clusterName: c1
      databaseName: app
      collectionName: orders
      indexType: search
      definition:
        mappings:
          dynamic: true
"#;
    let doc = document(&[cluster_yaml("c1", "M10"), index.to_string()]);
    let plan = plan(&services, &doc, PlanOptions::default()).await;

    let result = executor(&services).execute(&plan).await.unwrap();

    assert_eq!(result.status, RunStatus::Succeeded, "{:#?}", result.errors);
    assert_eq!(atlas.collections(PROJECT), vec!["c1/app.orders".to_string()]);
    let calls = atlas.calls();
    let user_created = position(&calls, "create DatabaseUser admin/matlas-search-index-");
    let ensured = position(&calls, "ensure-collection c1/app.orders");
    let index_created = position(&calls, "create SearchIndex");
    assert!(user_created < ensured && ensured < index_created);
    // The temporary user is gone.
    assert!(atlas
        .resources(PROJECT)
        .iter()
        .all(|o| o.spec.downcast::<DatabaseUserSpec>().is_none()));
}

#[tokio::test]
async fn temporary_user_is_deleted_when_its_operation_fails() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    atlas.inject(Fault::new(
        Method::EnsureCollection,
        ServiceError::transient("connection reset"),
    ));
    let index = r#"  - kind: SearchIndex
    metadata:
      name: orders-text
    spec:
      clusterName: c1
      databaseName: app
      collectionName: orders
      definition:
        mappings:
          dynamic: true
"#;
    let doc = document(&[cluster_yaml("c1", "M10"), index.to_string()]);
    let plan = plan(&services, &doc, PlanOptions::default()).await;

    let result = executor(&services).execute(&plan).await.unwrap();

    let op = result.operation("searchindex:orders-text:create").unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.retry_count, 2);
    assert!(result.errors.iter().all(|e| !e.contains("MATLAS-TEMPUSER")));
    assert!(atlas
        .resources(PROJECT)
        .iter()
        .all(|o| o.spec.downcast::<DatabaseUserSpec>().is_none()));
}

const ORDERS_INDEX: &str = r#"  - kind: SearchIndex
    metadata:
      name: orders-text
    spec:
      clusterName: c1
      databaseName: app
      collectionName: orders
      definition:
        mappings:
          dynamic: true
"#;

fn no_database_users(atlas: &matlas_runtime::InMemoryAtlas) -> bool {
    atlas
        .resources(PROJECT)
        .iter()
        .all(|o| o.spec.downcast::<DatabaseUserSpec>().is_none())
}

/// A MongoDB connection whose driver crashes mid-call.
struct CrashingMongo;

#[async_trait::async_trait]
impl MongoAdminService for CrashingMongo {
    async fn ensure_collection(
        &self,
        _project_id: &str,
        _credentials: &MongoCredentials,
        _database: &str,
        _collection: &str,
    ) -> Result<bool, ServiceError> {
        tokio::task::yield_now().await;
        panic!("driver crashed");
    }
}

#[tokio::test]
async fn temporary_user_is_deleted_when_its_operation_panics() {
    let (atlas, mut services) = emulator(EmulatorOptions::default());
    services.mongo = Arc::new(CrashingMongo);
    let doc = document(&[cluster_yaml("c1", "M10"), ORDERS_INDEX.to_string()]);
    let plan = plan(&services, &doc, PlanOptions::default()).await;

    let result = executor(&services).execute(&plan).await.unwrap();

    let op = result.operation("searchindex:orders-text:create").unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.error.as_ref().unwrap().message, "operation panicked");
    assert_eq!(result.status, RunStatus::Failed);
    assert!(no_database_users(&atlas));
}

#[tokio::test]
async fn temporary_user_is_deleted_when_cancelled_mid_operation() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    atlas.inject(
        Fault::new(Method::EnsureCollection, ServiceError::transient("slow primary"))
            .after(Duration::from_secs(30)),
    );
    let doc = document(&[cluster_yaml("c1", "M10"), ORDERS_INDEX.to_string()]);
    let plan = plan(&services, &doc, PlanOptions::default()).await;
    let cancel = CancelToken::new();

    let watcher = {
        let atlas = atlas.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while !atlas
                .calls()
                .iter()
                .any(|c| c.starts_with("ensure-collection c1/app.orders"))
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            cancel.cancel("user requested");
        })
    };

    let result = executor(&services)
        .with_cancel(cancel)
        .execute(&plan)
        .await
        .unwrap();
    watcher.await.unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(
        result.status_of("searchindex:orders-text:create"),
        Some(OperationStatus::Cancelled)
    );
    assert!(!atlas.calls().iter().any(|c| c.starts_with("create SearchIndex")));
    assert!(no_database_users(&atlas));
}

#[tokio::test]
async fn destroy_removes_everything_dependents_first() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let doc = load(S1);
    let create = plan(&services, &doc, PlanOptions::default()).await;
    executor(&services).execute(&create).await.unwrap();

    let destroy = plan(&services, &doc, PlanOptions::destroy()).await;
    assert_eq!(destroy.summary.delete, 3);
    let sink = Arc::new(CollectingProgressSink::new());
    let result = executor(&services)
        .with_progress(sink.clone())
        .execute(&destroy)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(
        sink.finished(),
        vec![
            "databaseuser:u1:delete".to_string(),
            "cluster:c1:delete".to_string(),
            "project:p1:delete".to_string(),
        ]
    );
    assert!(atlas.resources(PROJECT).is_empty());
}

#[tokio::test]
async fn delete_of_vanished_resource_completes_with_warning() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let doc = load(S1);
    let create = plan(&services, &doc, PlanOptions::default()).await;
    executor(&services).execute(&create).await.unwrap();
    let destroy = plan(&services, &doc, PlanOptions::destroy()).await;
    atlas.inject(
        Fault::new(Method::Delete, ServiceError::not_found("gone"))
            .on_kind(ResourceKind::DatabaseUser)
            .times(1),
    );

    let result = executor(&services).execute(&destroy).await.unwrap();

    let user = result.operation("databaseuser:u1:delete").unwrap();
    assert_eq!(user.status, OperationStatus::Completed);
    assert_eq!(user.warnings, vec!["DatabaseUser u1 was already deleted".to_string()]);
}

#[tokio::test]
async fn applied_state_round_trips_through_discovery() {
    let (_atlas, services) = emulator(EmulatorOptions::default());
    let doc = load(S1);
    let create = plan(&services, &doc, PlanOptions::default()).await;
    executor(&services).execute(&create).await.unwrap();

    let discovered = discover(&services).await.to_apply_document("discovered");
    let replan = plan(&services, &discovered, PlanOptions::default()).await;
    assert!(!replan.has_changes(), "{:#?}", replan.operations);
    assert_eq!(replan.summary.noop, 3);
}

#[tokio::test]
async fn inconsistent_or_foreign_plans_are_rejected() {
    let (_atlas, services) = emulator(EmulatorOptions::default());
    let mut plan = plan(&services, &load(S1), PlanOptions::default()).await;

    let mut foreign = plan.clone();
    foreign.project_id = "someone-else".into();
    assert!(matches!(
        executor(&services).execute(&foreign).await,
        Err(ExecuteError::ProjectMismatch { .. })
    ));

    plan.get_mut("databaseuser:u1:create").unwrap().stage = 0;
    assert!(matches!(
        executor(&services).execute(&plan).await,
        Err(ExecuteError::InconsistentPlan)
    ));
}
