#![allow(dead_code)]

use matlas_core::config::{ExecutionConfig, RetryConfig};
use matlas_core::loader::load_str;
use matlas_core::{ApplyDocument, Plan, ProjectState};
use matlas_planner::{PlanOptions, Planner};
use matlas_runtime::{Discoverer, EmulatorOptions, Executor, InMemoryAtlas, Services};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const PROJECT: &str = "proj-1";

pub const S1: &str = r#"
apiVersion: matlas.mongodb.com/v1
kind: ApplyDocument
metadata:
  name: s1
resources:
  - kind: Project
    metadata:
      name: p1
    spec:
      organizationId: 5f1b2c3d4e5f6a7b8c9d0e1f
  - kind: Cluster
    metadata:
      name: c1
    spec:
      provider: AWS
      region: US_EAST_1
      instanceSize: M10
  - kind: DatabaseUser
    metadata:
      name: u1
    spec:
      password: correct-horse-battery
      roles:
        - roleName: readWrite
          databaseName: admin
      scopes:
        - name: c1
          type: CLUSTER
"#;

/// Millisecond-scale timings so scenarios finish quickly.
pub fn fast_config() -> ExecutionConfig {
    ExecutionConfig {
        max_concurrent_operations: 5,
        operation_timeout: Duration::from_secs(10),
        call_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        post_condition_timeout: Duration::from_secs(5),
        kind_timeouts: BTreeMap::new(),
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            rate_limit_multiplier: 2,
        },
    }
}

pub fn load(yaml: &str) -> ApplyDocument {
    load_str(yaml, "test.yaml").unwrap()
}

pub fn emulator(options: EmulatorOptions) -> (Arc<InMemoryAtlas>, Services) {
    let atlas = Arc::new(InMemoryAtlas::with_options(options));
    let services = Services::from_backend(atlas.clone());
    (atlas, services)
}

pub async fn discover(services: &Services) -> ProjectState {
    Discoverer::new(services.clone())
        .with_execution(fast_config())
        .discover_all(PROJECT)
        .await
}

pub async fn plan(services: &Services, doc: &ApplyDocument, options: PlanOptions) -> Plan {
    let state = discover(services).await;
    Planner::new(options).plan(doc, &state).unwrap()
}

pub fn executor(services: &Services) -> Executor {
    Executor::new(services.clone(), PROJECT).with_config(fast_config())
}

/// Cluster `name` in AWS us-east-1.
pub fn cluster_yaml(name: &str, size: &str) -> String {
    format!(
        r#"  - kind: Cluster
    metadata:
      name: {name}
    spec:
      provider: AWS
      region: US_EAST_1
      instanceSize: {size}
"#
    )
}

/// Admin-database user scoped to `cluster`.
pub fn user_yaml(name: &str, cluster: &str) -> String {
    format!(
        r#"  - kind: DatabaseUser
    metadata:
      name: {name}
    spec:
      password: correct-horse-battery
      roles:
        - roleName: readWrite
          databaseName: app
      scopes:
        - name: {cluster}
          type: CLUSTER
"#
    )
}

pub fn document(items: &[String]) -> ApplyDocument {
    let mut yaml = String::from(
        r#"apiVersion: matlas.mongodb.com/v1
kind: ApplyDocument
metadata:
  name: scenario
resources:
  - kind: Project
    metadata:
      name: p1
    spec:
      organizationId: 5f1b2c3d4e5f6a7b8c9d0e1f
"#,
    );
    for item in items {
        yaml.push_str(item);
    }
    load(&yaml)
}
