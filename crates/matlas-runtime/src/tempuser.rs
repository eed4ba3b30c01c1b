//! Temporary database users.
//!
//! A [`TempUserManager`] mints short-lived, least-privilege database users
//! for MongoDB-level work and tracks every one it created until it is
//! deleted. Each user comes wrapped in a [`TempUserGuard`]: release it
//! explicitly to observe the delete, or drop it and the delete is spawned on
//! the current runtime. A dropped user stays outstanding until that delete
//! lands, so [`TempUserManager::release_all`] still covers it.

use crate::cancel::CancelToken;
use crate::dispatch;
use crate::error::{ServiceError, ServiceErrorKind, TempUserError};
use crate::retry::CallPolicy;
use crate::services::{MongoCredentials, Services};
use chrono::{DateTime, Utc};
use matlas_core::config::{ExecutionConfig, TempUsersConfig, MAX_PAGE_SIZE};
use matlas_core::resources::{DatabaseUserSpec, RoleAssignment, UserScope};
use matlas_core::{KindSpec, ResourceKind};
use rand::rngs::OsRng;
use rand::TryRngCore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label marking a user as temporary.
pub const TEMPORARY_LABEL: &str = "temporary";
/// Label carrying the purpose a temporary user was minted for.
pub const PURPOSE_LABEL: &str = "purpose";
/// Every temporary username starts with this.
pub const USERNAME_PREFIX: &str = "matlas-";

const PASSWORD_LEN: usize = 32;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// =============================================================================
// Requests
// =============================================================================

/// Privileges granted to a temporary user.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessTier {
    /// Read-only across databases.
    Discovery,
    /// Create collections and indexes.
    Maintenance,
    Custom(Vec<RoleAssignment>),
}

impl AccessTier {
    pub fn roles(&self) -> Vec<RoleAssignment> {
        match self {
            AccessTier::Discovery => vec![RoleAssignment::new("readAnyDatabase", "admin")],
            AccessTier::Maintenance => vec![
                RoleAssignment::new("readWriteAnyDatabase", "admin"),
                RoleAssignment::new("dbAdminAnyDatabase", "admin"),
            ],
            AccessTier::Custom(roles) => roles.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TempUserRequest {
    /// Short tag embedded in the username and the `purpose` label.
    pub purpose: String,
    pub tier: AccessTier,
    /// Clusters the user is scoped to; at least one.
    pub clusters: Vec<String>,
    /// Overrides the configured TTL.
    pub ttl: Option<Duration>,
}

impl TempUserRequest {
    pub fn new(purpose: impl Into<String>, tier: AccessTier, cluster: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            tier,
            clusters: vec![cluster.into()],
            ttl: None,
        }
    }

    fn check(&self) -> Result<(), TempUserError> {
        if self.clusters.iter().all(|c| c.trim().is_empty()) {
            return Err(TempUserError::InvalidRequest(
                "a temporary user must be scoped to at least one cluster".into(),
            ));
        }
        if let AccessTier::Custom(roles) = &self.tier {
            if roles.is_empty() {
                return Err(TempUserError::InvalidRequest("custom tier without roles".into()));
            }
            if let Some(role) = roles
                .iter()
                .find(|r| matches!(r.role_name.as_str(), "atlasAdmin" | "root" | "userAdminAnyDatabase"))
            {
                return Err(TempUserError::InvalidRequest(format!(
                    "role '{}' is not allowed for temporary users",
                    role.role_name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Users
// =============================================================================

/// A minted temporary user.
#[derive(Clone)]
pub struct TempUser {
    pub id: String,
    pub username: String,
    pub auth_database: String,
    password: String,
    pub clusters: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl TempUser {
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Credentials for a connection to `cluster`.
    pub fn credentials(&self, cluster: &str) -> MongoCredentials {
        MongoCredentials {
            cluster: cluster.to_string(),
            username: self.username.clone(),
            password: self.password.clone(),
            auth_database: self.auth_database.clone(),
        }
    }

    /// SRV connection string for `cluster`; credentials are passed separately.
    pub fn connection_string(&self, cluster: &str) -> String {
        format!(
            "mongodb+srv://{}@{}.mongodb.net/?authSource={}",
            self.username,
            cluster.to_ascii_lowercase(),
            self.auth_database
        )
    }
}

impl fmt::Debug for TempUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempUser")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("auth_database", &self.auth_database)
            .field("password", &"<redacted>")
            .field("clusters", &self.clusters)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Outcome of a cleanup sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    /// Temporary users seen in the project.
    pub scanned: usize,
    pub deleted: Vec<String>,
    /// Temporary users not yet expired.
    pub kept: Vec<String>,
}

// =============================================================================
// Manager
// =============================================================================

struct Inner {
    services: Services,
    project_id: String,
    /// Atlas id -> username of every user not yet deleted.
    outstanding: Mutex<BTreeMap<String, String>>,
}

impl Inner {
    fn track(&self, id: &str, username: &str) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.insert(id.to_string(), username.to_string());
        }
    }

    fn is_tracked(&self, id: &str) -> bool {
        self.outstanding
            .lock()
            .map(|outstanding| outstanding.contains_key(id))
            .unwrap_or(false)
    }

    /// Remove from the outstanding set; `false` when already released.
    fn untrack(&self, id: &str) -> bool {
        self.outstanding
            .lock()
            .map(|mut outstanding| outstanding.remove(id).is_some())
            .unwrap_or(false)
    }

    async fn delete(&self, id: &str, username: &str) -> Result<(), ServiceError> {
        match self
            .services
            .database_users
            .delete(&self.project_id, id)
            .await
        {
            Ok(()) => {
                info!(username = %username, "temporary user deleted");
                Ok(())
            }
            Err(err) if err.kind == ServiceErrorKind::NotFound => {
                debug!(username = %username, "temporary user already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Mints and tracks temporary users in one project.
#[derive(Clone)]
pub struct TempUserManager {
    inner: Arc<Inner>,
    config: TempUsersConfig,
    execution: ExecutionConfig,
}

impl TempUserManager {
    pub fn new(services: Services, project_id: impl Into<String>, config: TempUsersConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                services,
                project_id: project_id.into(),
                outstanding: Mutex::new(BTreeMap::new()),
            }),
            config,
            execution: ExecutionConfig::default(),
        }
    }

    /// Timeouts and retries for the project scan in [`cleanup_expired`].
    ///
    /// [`cleanup_expired`]: TempUserManager::cleanup_expired
    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    /// Create a user for `request`. The returned guard deletes it.
    pub async fn acquire(&self, request: &TempUserRequest) -> Result<TempUserGuard, TempUserError> {
        request.check()?;
        let password = generate_password()?;
        let now = Utc::now();
        let ttl = request.ttl.unwrap_or(self.config.ttl);
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|_| TempUserError::InvalidRequest(format!("ttl {ttl:?} is out of range")))?;
        let username = generate_username(&request.purpose, now)?;
        let purpose = sanitize_purpose(&request.purpose);

        let mut spec = DatabaseUserSpec {
            username: username.clone(),
            auth_database: self.config.auth_database.clone(),
            password: Some(password.clone()),
            roles: request.tier.roles(),
            scopes: request
                .clusters
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| UserScope::cluster(c.trim()))
                .collect(),
            delete_after_date: Some(expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            ..Default::default()
        };
        spec.labels.insert(TEMPORARY_LABEL.into(), "true".into());
        spec.labels.insert(PURPOSE_LABEL.into(), purpose);
        spec.normalize();

        let created = self
            .inner
            .services
            .database_users
            .create(&self.inner.project_id, &spec)
            .await?;
        self.inner.track(&created.id, &username);
        info!(
            username = %username,
            clusters = ?request.clusters,
            expires_at = %expires_at,
            "temporary user created"
        );

        Ok(TempUserGuard {
            user: TempUser {
                id: created.id,
                username,
                auth_database: spec.auth_database,
                password,
                clusters: request.clusters.clone(),
                expires_at,
            },
            inner: Arc::clone(&self.inner),
        })
    }

    /// Usernames created and not yet deleted.
    pub fn outstanding(&self) -> Vec<String> {
        self.inner
            .outstanding
            .lock()
            .map(|outstanding| outstanding.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Delete every outstanding user, reporting the ones that could not be.
    pub async fn release_all(&self) -> Result<(), TempUserError> {
        let pending: Vec<(String, String)> = self
            .inner
            .outstanding
            .lock()
            .map(|outstanding| {
                outstanding
                    .iter()
                    .map(|(id, name)| (id.clone(), name.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut failures = Vec::new();
        for (id, username) in pending {
            if !self.inner.untrack(&id) {
                continue;
            }
            if let Err(err) = self.inner.delete(&id, &username).await {
                warn!(username = %username, error = %err, "failed to delete temporary user");
                self.inner.track(&id, &username);
                failures.push(format!("{username}: {err}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TempUserError::Cleanup(failures))
        }
    }

    /// Delete temporary users whose `deleteAfterDate` has passed.
    ///
    /// Every page of database users is scanned.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupReport, TempUserError> {
        let cancel = CancelToken::new();
        let policy = CallPolicy {
            retry: &self.execution.retry,
            call_timeout: self.execution.call_timeout,
            deadline: tokio::time::Instant::now() + self.execution.operation_timeout,
            cancel: &cancel,
        };
        let users = policy
            .run(
                || {
                    dispatch::list(
                        &self.inner.services,
                        ResourceKind::DatabaseUser,
                        &self.inner.project_id,
                        MAX_PAGE_SIZE,
                    )
                },
                |attempt, err, delay| {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying user scan")
                },
            )
            .await
            .result?;
        debug!(users = users.len(), "scanned database users");

        let mut report = CleanupReport::default();
        let mut failures = Vec::new();
        for observed in users {
            let Some(spec) = observed.spec.downcast::<DatabaseUserSpec>() else {
                continue;
            };
            if !is_temporary(spec) {
                continue;
            }
            report.scanned += 1;
            let expired = spec
                .delete_after_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .is_none_or(|d| d.with_timezone(&Utc) <= now);
            if !expired {
                report.kept.push(spec.username.clone());
                continue;
            }
            match self.inner.delete(&observed.id, &spec.username).await {
                Ok(()) => {
                    self.inner.untrack(&observed.id);
                    report.deleted.push(spec.username.clone());
                }
                Err(err) => failures.push(format!("{}: {err}", spec.username)),
            }
        }
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(TempUserError::Cleanup(failures))
        }
    }
}

/// Whether a database user carries the temporary markers.
pub fn is_temporary(user: &DatabaseUserSpec) -> bool {
    user.labels.get(TEMPORARY_LABEL).map(String::as_str) == Some("true")
        && user.username.starts_with(USERNAME_PREFIX)
}

/// Owns one temporary user until it is released.
pub struct TempUserGuard {
    user: TempUser,
    inner: Arc<Inner>,
}

impl TempUserGuard {
    pub fn user(&self) -> &TempUser {
        &self.user
    }

    /// Delete the user. Safe to call after [`TempUserManager::release_all`].
    pub async fn release(self) -> Result<(), TempUserError> {
        if !self.inner.untrack(&self.user.id) {
            return Ok(());
        }
        let result = self.inner.delete(&self.user.id, &self.user.username).await;
        if let Err(err) = &result {
            // Leave it outstanding so release_all retries.
            self.inner.track(&self.user.id, &self.user.username);
            warn!(username = %self.user.username, error = %err, "failed to delete temporary user");
        }
        result.map_err(TempUserError::from)
    }
}

impl std::ops::Deref for TempUserGuard {
    type Target = TempUser;

    fn deref(&self) -> &TempUser {
        &self.user
    }
}

impl Drop for TempUserGuard {
    fn drop(&mut self) {
        if !self.inner.is_tracked(&self.user.id) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(username = %self.user.username, "temporary user dropped outside a runtime");
            return;
        };
        let inner = Arc::clone(&self.inner);
        let id = self.user.id.clone();
        let username = self.user.username.clone();
        handle.spawn(async move {
            match inner.delete(&id, &username).await {
                Ok(()) => {
                    inner.untrack(&id);
                }
                Err(err) => {
                    warn!(username = %username, error = %err, "failed to delete dropped temporary user")
                }
            }
        });
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// 32 alphanumeric characters from the OS random source.
pub fn generate_password() -> Result<String, TempUserError> {
    let mut out = String::with_capacity(PASSWORD_LEN);
    let mut buf = [0u8; 64];
    while out.len() < PASSWORD_LEN {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| TempUserError::Entropy(e.to_string()))?;
        // 248 = 4 * 62; larger bytes would bias the modulo.
        for b in buf.iter().copied().filter(|b| *b < 248) {
            if out.len() == PASSWORD_LEN {
                break;
            }
            out.push(ALPHABET[usize::from(b) % ALPHABET.len()] as char);
        }
    }
    Ok(out)
}

fn sanitize_purpose(purpose: &str) -> String {
    let cleaned: String = purpose
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    let cleaned = if cleaned.is_empty() { "task" } else { cleaned };
    cleaned.chars().take(16).collect::<String>().trim_end_matches('-').to_string()
}

/// `matlas-<purpose>-<unix>-<hex>`
fn generate_username(purpose: &str, now: DateTime<Utc>) -> Result<String, TempUserError> {
    let mut suffix = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut suffix)
        .map_err(|e| TempUserError::Entropy(e.to_string()))?;
    let hex: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!(
        "{USERNAME_PREFIX}{}-{}-{hex}",
        sanitize_purpose(purpose),
        now.timestamp()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAtlas;
    use matlas_core::resources::ClusterSpec;

    fn manager() -> (Arc<InMemoryAtlas>, TempUserManager) {
        let atlas = Arc::new(InMemoryAtlas::new());
        atlas
            .seed(
                "p",
                ClusterSpec {
                    name: "c1".into(),
                    provider: "AWS".into(),
                    region: "US_EAST_1".into(),
                    instance_size: "M10".into(),
                    ..Default::default()
                }
                .into_spec(),
            )
            .unwrap();
        let services = Services::from_backend(atlas.clone());
        (atlas, TempUserManager::new(services, "p", TempUsersConfig::default()))
    }

    #[test]
    fn test_password_shape() {
        let a = generate_password().unwrap();
        let b = generate_password().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_username_shape() {
        let now = Utc::now();
        let name = generate_username("Search Index!", now).unwrap();
        let prefix = format!("matlas-search-index-{}-", now.timestamp());
        assert!(name.starts_with(&prefix), "{name}");
        assert_eq!(name.len(), prefix.len() + 8);
    }

    #[test]
    fn test_custom_tier_rejects_admin_roles() {
        let request = TempUserRequest::new(
            "x",
            AccessTier::Custom(vec![RoleAssignment::new("atlasAdmin", "admin")]),
            "c1",
        );
        assert!(matches!(request.check(), Err(TempUserError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (atlas, manager) = manager();
        let guard = manager
            .acquire(&TempUserRequest::new("index", AccessTier::Maintenance, "c1"))
            .await
            .unwrap();
        assert_eq!(manager.outstanding(), vec![guard.username.clone()]);

        let stored = atlas.resources("p");
        let user = stored
            .iter()
            .find_map(|o| o.spec.downcast::<DatabaseUserSpec>())
            .unwrap();
        assert!(is_temporary(user));
        assert_eq!(user.labels.get(PURPOSE_LABEL).map(String::as_str), Some("index"));
        assert_eq!(user.scopes, vec![UserScope::cluster("c1")]);
        assert!(user.delete_after_date.is_some());

        guard.release().await.unwrap();
        assert!(manager.outstanding().is_empty());
        assert!(atlas
            .resources("p")
            .iter()
            .all(|o| o.spec.downcast::<DatabaseUserSpec>().is_none()));
        // Already released.
        manager.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_all_deletes_forgotten_users() {
        let (atlas, manager) = manager();
        let guard = manager
            .acquire(&TempUserRequest::new("scan", AccessTier::Discovery, "c1"))
            .await
            .unwrap();
        manager.release_all().await.unwrap();
        assert!(manager.outstanding().is_empty());
        // The guard no longer owns anything.
        guard.release().await.unwrap();
        let users = atlas
            .resources("p")
            .into_iter()
            .filter(|o| o.spec.downcast::<DatabaseUserSpec>().is_some())
            .count();
        assert_eq!(users, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_temporary_users() {
        let (atlas, manager) = manager();
        let keep = manager
            .acquire(&TempUserRequest::new("keep", AccessTier::Discovery, "c1"))
            .await
            .unwrap();
        let mut expired = DatabaseUserSpec {
            username: "matlas-old-1-deadbeef".into(),
            auth_database: "admin".into(),
            delete_after_date: Some("2020-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        expired.labels.insert(TEMPORARY_LABEL.into(), "true".into());
        atlas.seed("p", expired.into_spec()).unwrap();
        let regular = DatabaseUserSpec {
            username: "app".into(),
            auth_database: "admin".into(),
            delete_after_date: Some("2020-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        atlas.seed("p", regular.into_spec()).unwrap();

        let report = manager.cleanup_expired(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, vec!["matlas-old-1-deadbeef".to_string()]);
        assert_eq!(report.kept, vec![keep.username.clone()]);
        keep.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_scans_every_page() {
        let (atlas, manager) = manager();
        for i in 0..500 {
            let user = DatabaseUserSpec {
                username: format!("app-{i:04}"),
                auth_database: "admin".into(),
                ..Default::default()
            };
            atlas.seed("p", user.into_spec()).unwrap();
        }
        let mut expired = DatabaseUserSpec {
            username: "matlas-old-1-deadbeef".into(),
            auth_database: "admin".into(),
            delete_after_date: Some("2020-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        expired.labels.insert(TEMPORARY_LABEL.into(), "true".into());
        atlas.seed("p", expired.into_spec()).unwrap();

        let report = manager.cleanup_expired(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.deleted, vec!["matlas-old-1-deadbeef".to_string()]);
        let pages = atlas
            .calls()
            .iter()
            .filter(|c| c.starts_with("list DatabaseUser"))
            .count();
        assert_eq!(pages, 2);
    }

    #[tokio::test]
    async fn test_dropped_guard_stays_outstanding_until_deleted() {
        let (atlas, manager) = manager();
        let guard = manager
            .acquire(&TempUserRequest::new("drop", AccessTier::Discovery, "c1"))
            .await
            .unwrap();
        let username = guard.username.clone();
        drop(guard);
        // The spawned delete has not run yet on this single-threaded runtime.
        assert_eq!(manager.outstanding(), vec![username]);

        manager.release_all().await.unwrap();
        assert!(manager.outstanding().is_empty());
        tokio::task::yield_now().await;
        assert!(atlas
            .resources("p")
            .iter()
            .all(|o| o.spec.downcast::<DatabaseUserSpec>().is_none()));
    }
}
