//! Linking coordinator.
//!
//! Drives the data-plane runtime so that its linked programs track the
//! store's `Active` set. Per program name there is at most one install or
//! uninstall in flight; different names proceed fully in parallel.
//!
//! # Per-name state machine
//!
//! ```text
//! Idle ── add ──> Installing ──ack──> Active
//!                      └──reject/timeout──> Idle or previous Active
//! Active ── delete ──> Uninstalling ──ack──> (removed)
//!                           └──reject/timeout──> Active
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{RegistryError, RegistryResult, RuntimeError};
use crate::runtime::DataPlaneRuntime;
use crate::store::ConfigStore;
use crate::types::{validate_program_name, ProgramConfig, ProgramPayload};

/// Default deadline for a single runtime call.
pub const DEFAULT_RUNTIME_TIMEOUT: Duration = Duration::from_secs(5);

/// What a second operation on a busy program name does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentionPolicy {
    /// Wait for the in-flight operation to finish.
    #[default]
    Queue,
    /// Fail immediately with `Busy`.
    Reject,
}

/// Configuration for the [`LinkingCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for each install/uninstall call into the runtime.
    pub runtime_timeout: Duration,
    /// Behaviour on same-name contention.
    pub contention: ContentionPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            runtime_timeout: DEFAULT_RUNTIME_TIMEOUT,
            contention: ContentionPolicy::Queue,
        }
    }
}

impl CoordinatorConfig {
    /// Sets the runtime deadline.
    pub fn with_runtime_timeout(mut self, runtime_timeout: Duration) -> Self {
        self.runtime_timeout = runtime_timeout;
        self
    }

    /// Sets the contention policy.
    pub fn with_contention(mut self, contention: ContentionPolicy) -> Self {
        self.contention = contention;
        self
    }
}

/// Operation counters.
#[derive(Debug, Default)]
struct CoordinatorStats {
    installs: AtomicU64,
    install_failures: AtomicU64,
    removals: AtomicU64,
    removal_failures: AtomicU64,
    rollbacks: AtomicU64,
}

/// Point-in-time copy of the coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatsSnapshot {
    /// Configs linked successfully.
    pub installs: u64,
    /// Adds that ended in any error after validation.
    pub install_failures: u64,
    /// Programs unlinked and removed.
    pub removals: u64,
    /// Deletes refused by the runtime or timed out.
    pub removal_failures: u64,
    /// Runtime restorations to the last-known-good payload.
    pub rollbacks: u64,
}

/// Serializes per-program linking against the data-plane runtime.
pub struct LinkingCoordinator {
    store: ConfigStore,
    runtime: Arc<dyn DataPlaneRuntime>,
    /// Per-name serialization tokens.
    tokens: DashMap<String, Arc<AsyncMutex<()>>>,
    config: CoordinatorConfig,
    stats: CoordinatorStats,
}

impl std::fmt::Debug for LinkingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkingCoordinator")
            .field("runtime", &self.runtime.name())
            .field("programs", &self.store.len())
            .field("config", &self.config)
            .finish()
    }
}

impl LinkingCoordinator {
    /// Creates a coordinator with an empty registry.
    pub fn new(runtime: Arc<dyn DataPlaneRuntime>, config: CoordinatorConfig) -> Self {
        info!(
            runtime = runtime.name(),
            timeout_ms = config.runtime_timeout.as_millis() as u64,
            contention = ?config.contention,
            "Linking coordinator initialized"
        );

        Self {
            store: ConfigStore::new(),
            runtime,
            tokens: DashMap::new(),
            config,
            stats: CoordinatorStats::default(),
        }
    }

    /// Returns the coordinator configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns a snapshot of the registered program `name`.
    pub fn get(&self, name: &str) -> RegistryResult<ProgramConfig> {
        self.store.get(name)
    }

    /// Returns a point-in-time snapshot of registered names.
    pub fn list(&self) -> std::vec::IntoIter<String> {
        self.store.list()
    }

    /// Returns the operation counters.
    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            installs: self.stats.installs.load(Ordering::Relaxed),
            install_failures: self.stats.install_failures.load(Ordering::Relaxed),
            removals: self.stats.removals.load(Ordering::Relaxed),
            removal_failures: self.stats.removal_failures.load(Ordering::Relaxed),
            rollbacks: self.stats.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Validates, stages and links `config_str` as program `name`.
    ///
    /// Returns the version that became active. On any failure the
    /// previously active config, if any, stays enforced.
    #[instrument(skip(self, config_str), fields(program = %name, size = config_str.len()))]
    pub async fn add(&self, name: &str, config_str: &str) -> RegistryResult<u64> {
        validate_program_name(name)?;
        let payload = Arc::new(ProgramPayload::parse(config_str)?);

        let result = self.link(name, payload).await;
        self.release_token(name);

        if let Err(ref e) = result {
            self.stats.install_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, retryable = e.is_retryable(), "Add failed");
        }
        result
    }

    /// Unlinks and removes program `name`.
    ///
    /// Returns the version that was removed.
    #[instrument(skip(self), fields(program = %name))]
    pub async fn delete(&self, name: &str) -> RegistryResult<u64> {
        validate_program_name(name)?;
        self.store.get(name)?;

        let result = self.unlink(name).await;
        self.release_token(name);

        if let Err(ref e) = result {
            warn!(error = %e, retryable = e.is_retryable(), "Delete failed");
        }
        result
    }

    async fn link(&self, name: &str, payload: Arc<ProgramPayload>) -> RegistryResult<u64> {
        let summary = payload.summary();

        // Queued writers stage first so the newest write wins; rejecting
        // writers must not supersede the write that holds the token.
        let (version, _token) = match self.config.contention {
            ContentionPolicy::Queue => {
                let version = self.store.put(name, Arc::clone(&payload))?;
                (version, self.acquire(name).await?)
            }
            ContentionPolicy::Reject => {
                let token = self.acquire(name).await?;
                (self.store.put(name, Arc::clone(&payload))?, token)
            }
        };
        debug!(version, ?summary, "Config staged");

        // Superseded or removed while waiting for the token.
        self.store.ensure_current(name, version)?;

        match timeout(
            self.config.runtime_timeout,
            self.runtime.install(name, &payload),
        )
        .await
        {
            Ok(Ok(())) => match self.store.mark_active(name, version) {
                Ok(()) => {
                    self.stats.installs.fetch_add(1, Ordering::Relaxed);
                    info!(version, header_types = summary.header_types, "Program linked");
                    Ok(version)
                }
                Err(e) => {
                    // The runtime now enforces a payload the store no longer
                    // considers current.
                    self.restore_runtime(name).await;
                    Err(match e {
                        RegistryError::NotFound { .. } => {
                            RegistryError::install_rejected(name, "program removed while linking")
                        }
                        other => other,
                    })
                }
            },
            Ok(Err(RuntimeError::Rejected { reason })) => {
                self.store.discard_pending(name, version);
                Err(RegistryError::install_rejected(name, reason))
            }
            Err(_) => {
                self.store.discard_pending(name, version);
                self.restore_runtime(name).await;
                Err(RegistryError::Timeout {
                    program: name.to_string(),
                    operation: "install".to_string(),
                    after: self.config.runtime_timeout,
                })
            }
        }
    }

    async fn unlink(&self, name: &str) -> RegistryResult<u64> {
        let _token = self.acquire(name).await?;
        let version = self.store.begin_remove(name)?;

        match timeout(self.config.runtime_timeout, self.runtime.uninstall(name)).await {
            Ok(Ok(())) => {
                self.store.finish_remove(name);
                self.stats.removals.fetch_add(1, Ordering::Relaxed);
                info!(version, "Program unlinked");
                Ok(version)
            }
            Ok(Err(RuntimeError::Rejected { reason })) => {
                self.store.abort_remove(name);
                self.stats.removal_failures.fetch_add(1, Ordering::Relaxed);
                Err(RegistryError::remove_rejected(name, reason))
            }
            Err(_) => {
                self.store.abort_remove(name);
                self.stats.removal_failures.fetch_add(1, Ordering::Relaxed);
                self.restore_runtime(name).await;
                Err(RegistryError::Timeout {
                    program: name.to_string(),
                    operation: "uninstall".to_string(),
                    after: self.config.runtime_timeout,
                })
            }
        }
    }

    /// Re-enforces the store's last-known-good payload for `name`.
    ///
    /// Called with the name's token held, after the runtime may have been
    /// left with a config the store does not consider active.
    async fn restore_runtime(&self, name: &str) {
        self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);

        let restored = match self.store.active_payload(name) {
            Some(active) => {
                timeout(
                    self.config.runtime_timeout,
                    self.runtime.install(name, &active),
                )
                .await
            }
            None => timeout(self.config.runtime_timeout, self.runtime.uninstall(name)).await,
        };

        match restored {
            Ok(Ok(())) => info!(program = name, "Runtime restored to last-known-good config"),
            Ok(Err(e)) => warn!(program = name, error = %e, "Runtime restore refused"),
            Err(_) => error!(program = name, "Runtime restore timed out"),
        }
    }

    async fn acquire(&self, name: &str) -> RegistryResult<OwnedMutexGuard<()>> {
        let token = self.tokens.entry(name.to_string()).or_default().value().clone();

        match self.config.contention {
            ContentionPolicy::Queue => Ok(token.lock_owned().await),
            ContentionPolicy::Reject => token
                .try_lock_owned()
                .map_err(|_| RegistryError::busy(name)),
        }
    }

    /// Drops the token for `name` once nobody holds or waits on it.
    fn release_token(&self, name: &str) {
        self.tokens
            .remove_if(name, |_, token| Arc::strong_count(token) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::LinkerRuntime;
    use crate::types::ConfigState;
    use async_trait::async_trait;

    const ROUTER_V1: &str = r#"{"header_types": [{"name": "eth_t", "fields": [["dst", 48]]}]}"#;
    const ROUTER_V2: &str = r#"{"header_types": [{"name": "eth_t", "fields": [["dst", 48], ["src", 48]]}]}"#;
    const UNLINKABLE: &str = r#"{"header_types": [{"name": "eth_t", "fields": [["dst", 0]]}]}"#;

    fn coordinator(linker: Arc<LinkerRuntime>) -> LinkingCoordinator {
        LinkingCoordinator::new(linker, CoordinatorConfig::default())
    }

    /// Runtime that never answers.
    struct StuckRuntime;

    #[async_trait]
    impl DataPlaneRuntime for StuckRuntime {
        async fn install(&self, _: &str, _: &ProgramPayload) -> Result<(), RuntimeError> {
            std::future::pending().await
        }

        async fn uninstall(&self, _: &str) -> Result<(), RuntimeError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_add_then_replace() {
        let linker = Arc::new(LinkerRuntime::new());
        let coord = coordinator(Arc::clone(&linker));

        assert_eq!(coord.add("router", ROUTER_V1).await.unwrap(), 1);
        assert_eq!(coord.add("router", ROUTER_V2).await.unwrap(), 2);

        let config = coord.get("router").unwrap();
        assert_eq!(config.version, 2);
        assert_eq!(config.state, ConfigState::Active);
        assert_eq!(config.payload.raw(), ROUTER_V2);
        assert_eq!(linker.linked_programs(), vec!["router"]);
    }

    #[tokio::test]
    async fn test_invalid_payload_leaves_registry_unchanged() {
        let coord = coordinator(Arc::new(LinkerRuntime::new()));
        coord.add("router", ROUTER_V1).await.unwrap();

        let err = coord.add("router", "not-json").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { .. }));

        let config = coord.get("router").unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.staged_version, None);

        assert!(coord.add("router2", "not-json").await.is_err());
        assert!(coord.get("router2").is_err());
    }

    #[tokio::test]
    async fn test_rejected_install_rolls_back() {
        let linker = Arc::new(LinkerRuntime::new());
        let coord = coordinator(Arc::clone(&linker));
        coord.add("router", ROUTER_V1).await.unwrap();

        let err = coord.add("router", UNLINKABLE).await.unwrap_err();
        assert!(matches!(err, RegistryError::InstallRejected { .. }));

        let config = coord.get("router").unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.payload.raw(), ROUTER_V1);
        assert_eq!(
            linker.linked_header_types()[0].uid,
            "dst:48".to_string()
        );

        // A never-linked name leaves no trace
        assert!(coord.add("fresh", UNLINKABLE).await.is_err());
        assert!(coord.get("fresh").is_err());
        assert_eq!(coord.stats().install_failures, 2);
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let linker = Arc::new(LinkerRuntime::new());
        let coord = coordinator(Arc::clone(&linker));
        coord.add("router", ROUTER_V1).await.unwrap();

        assert_eq!(coord.delete("router").await.unwrap(), 1);
        assert!(linker.linked_programs().is_empty());
        assert_eq!(
            coord.delete("router").await.unwrap_err(),
            RegistryError::not_found("router")
        );
        assert_eq!(coord.list().count(), 0);
    }

    #[tokio::test]
    async fn test_delete_refused_keeps_entry_active() {
        let linker = Arc::new(LinkerRuntime::new());
        let coord = coordinator(Arc::clone(&linker));
        coord.add("router", ROUTER_V1).await.unwrap();

        // Unlinked behind the coordinator's back: the runtime now refuses.
        linker.uninstall("router").await.unwrap();

        let err = coord.delete("router").await.unwrap_err();
        assert!(matches!(err, RegistryError::RemoveRejected { .. }));
        assert_eq!(coord.get("router").unwrap().state, ConfigState::Active);
        assert_eq!(coord.stats().removal_failures, 1);
    }

    #[tokio::test]
    async fn test_delete_of_pending_only_entry_is_not_found() {
        let linker = Arc::new(LinkerRuntime::new());
        let coord = coordinator(Arc::clone(&linker));
        coord
            .store
            .put("router", ProgramPayload::parse(ROUTER_V1).unwrap())
            .unwrap();

        assert_eq!(
            coord.delete("router").await.unwrap_err(),
            RegistryError::not_found("router")
        );
        assert_eq!(coord.get("router").unwrap().state, ConfigState::Pending);
        assert_eq!(coord.stats().removals, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_timeout() {
        let coord = LinkingCoordinator::new(
            Arc::new(StuckRuntime),
            CoordinatorConfig::default().with_runtime_timeout(Duration::from_millis(100)),
        );

        let err = coord.add("router", ROUTER_V1).await.unwrap_err();
        assert!(matches!(err, RegistryError::Timeout { .. }));
        assert!(coord.get("router").is_err());
        assert!(coord.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_reject_policy_reports_busy() {
        let coord = LinkingCoordinator::new(
            Arc::new(LinkerRuntime::new()),
            CoordinatorConfig::default().with_contention(ContentionPolicy::Reject),
        );

        let held = coord.acquire("router").await.unwrap();
        assert_eq!(
            coord.add("router", ROUTER_V1).await.unwrap_err(),
            RegistryError::busy("router")
        );
        assert!(coord.get("router").is_err());

        drop(held);
        assert_eq!(coord.add("router", ROUTER_V1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tokens_released_after_operations() {
        let coord = coordinator(Arc::new(LinkerRuntime::new()));
        coord.add("a", ROUTER_V1).await.unwrap();
        coord.add("b", ROUTER_V1).await.unwrap();
        coord.delete("a").await.unwrap();

        assert!(coord.tokens.is_empty());
    }
}
