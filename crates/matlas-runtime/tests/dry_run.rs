//! Dry runs never write and predict against the live project.

mod common;

use common::*;
use matlas_core::resources::ClusterSpec;
use matlas_core::{KindSpec, ResourceKind, ResourceSpec};
use matlas_planner::PlanOptions;
use matlas_runtime::{
    simulate, simulate_thorough, DryRunMode, EmulatorOptions, Discoverer, Executor, Prediction,
};
use pretty_assertions::assert_eq;

fn discoverer(services: &matlas_runtime::Services) -> Discoverer {
    Discoverer::new(services.clone()).with_execution(fast_config())
}

#[tokio::test]
async fn thorough_dry_run_performs_no_writes() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;
    atlas.forbid_writes(true);
    let before = atlas.writes();

    let report = simulate(&plan, DryRunMode::Thorough, &discoverer(&services)).await;

    assert_eq!(atlas.writes(), before);
    assert_eq!(report.mode, DryRunMode::Thorough);
    assert_eq!(report.predictions.len(), 3);
    assert!(report.looks_clean(), "{report:#?}");
    assert_eq!(report.by_kind.get(&ResourceKind::Cluster), Some(&1));
}

#[tokio::test]
async fn quick_dry_run_does_not_touch_the_backend() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;
    let calls = atlas.calls().len();

    let report = simulate(&plan, DryRunMode::Quick, &discoverer(&services)).await;

    assert_eq!(atlas.calls().len(), calls);
    assert!(report.predictions.is_empty());
    assert!(report.unsatisfied.is_empty());
}

#[tokio::test]
async fn conflicting_resource_is_predicted_to_fail() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let plan = plan(&services, &load(S1), PlanOptions::default()).await;
    // Someone else creates c1 between plan and apply.
    let other = ClusterSpec {
        name: "c1".into(),
        provider: "AWS".into(),
        region: "US_EAST_1".into(),
        instance_size: "M40".into(),
        ..Default::default()
    };
    atlas.seed(PROJECT, other.into_spec()).unwrap();

    let report = simulate_thorough(&plan, &discoverer(&services)).await;

    let cluster = report.prediction("cluster:c1:create").unwrap();
    assert_eq!(cluster.prediction, Prediction::LikelyFail);
    assert!(cluster.reason.contains("different settings"));
    assert!(!report.looks_clean());
}

#[tokio::test]
async fn unknown_instance_size_is_predicted_to_fail() {
    let (_atlas, services) = emulator(EmulatorOptions::default());
    let mut plan = plan(&services, &load(S1), PlanOptions::default()).await;
    let op = plan.get_mut("cluster:c1:create").unwrap();
    if let Some(ResourceSpec::Cluster(cluster)) = op.desired.as_mut() {
        cluster.instance_size = "M7".into();
    }

    let report = simulate_thorough(&plan, &discoverer(&services)).await;

    let cluster = report.prediction("cluster:c1:create").unwrap();
    assert_eq!(cluster.prediction, Prediction::LikelyFail);
    assert_eq!(cluster.reason, "unknown instance size 'M7'");
}

#[tokio::test]
async fn update_of_vanished_target_is_predicted_to_fail() {
    let (atlas, services) = emulator(EmulatorOptions::default());
    let doc = load(S1);
    let first = plan(&services, &doc, PlanOptions::default()).await;
    Executor::new(services.clone(), PROJECT)
        .with_config(fast_config())
        .execute(&first)
        .await
        .unwrap();

    let resized = load(&S1.replace("instanceSize: M10", "instanceSize: M20"));
    let update = plan(&services, &resized, PlanOptions::default()).await;
    let op = update.get("cluster:c1:update").unwrap();
    let id = op.target_id().unwrap().to_string();

    let report = simulate_thorough(&update, &discoverer(&services)).await;
    assert_eq!(
        report.prediction("cluster:c1:update").unwrap().prediction,
        Prediction::LikelySucceed
    );

    // The cluster disappears out of band.
    let atlas_svc = services.clone();
    matlas_runtime::dispatch::delete(&atlas_svc, ResourceKind::Cluster, PROJECT, &id)
        .await
        .unwrap();
    assert!(atlas.resources(PROJECT).iter().all(|o| o.id != id));

    let report = simulate_thorough(&update, &discoverer(&services)).await;
    assert_eq!(
        report.prediction("cluster:c1:update").unwrap().prediction,
        Prediction::LikelyFail
    );
}

#[tokio::test]
async fn search_index_without_cluster_is_predicted_to_fail() {
    let (_atlas, services) = emulator(EmulatorOptions::default());
    let index = r#"  - kind: SearchIndex
    metadata:
      name: orders-text
    spec:
      clusterName: c9
      databaseName: app
      collectionName: orders
      definition:
        mappings:
          dynamic: true
"#;
    let doc = document(&[index.to_string()]);
    let state = discover(&services).await;
    // Planning does not check cross-document references; validation does.
    let plan = matlas_planner::Planner::default().plan(&doc, &state).unwrap();

    let report = simulate_thorough(&plan, &discoverer(&services)).await;

    let op = report.prediction("searchindex:orders-text:create").unwrap();
    assert_eq!(op.prediction, Prediction::LikelyFail);
    assert_eq!(op.reason, "cluster 'c9' does not exist");
}
