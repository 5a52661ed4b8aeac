//! In-memory, name-keyed table of program configs.
//!
//! The store owns every mutation invariant of the registry:
//!
//! - at most one entry per program name,
//! - versions strictly increase per name while the name stays registered,
//! - a staged replacement never overwrites the active payload until the
//!   linking coordinator confirms it with [`ConfigStore::mark_active`].
//!
//! Mutations are compare-and-swap by version. The table lock is held only
//! for the duration of a single primitive, never across a runtime call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{RegistryError, RegistryResult};
use crate::types::{validate_program_name, ConfigState, ProgramConfig, ProgramPayload};

#[derive(Debug, Clone)]
struct Slot {
    payload: Arc<ProgramPayload>,
    version: u64,
}

#[derive(Debug)]
struct StoreEntry {
    /// Payload currently enforced by the runtime.
    active: Option<Slot>,
    /// Newest write waiting for the runtime.
    staged: Option<Slot>,
    state: ConfigState,
    /// Highest version ever issued for this lifecycle.
    latest_version: u64,
}

impl StoreEntry {
    fn snapshot(&self, name: &str) -> Option<ProgramConfig> {
        let shown = self.active.as_ref().or(self.staged.as_ref())?;
        Some(ProgramConfig {
            name: name.to_string(),
            payload: Arc::clone(&shown.payload),
            version: shown.version,
            state: self.state,
            staged_version: match (&self.active, &self.staged) {
                (Some(_), Some(staged)) => Some(staged.version),
                _ => None,
            },
        })
    }
}

/// Authoritative table of program configs.
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: Mutex<HashMap<String, StoreEntry>>,
}

impl ConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered programs.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no program is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Stages `payload` under `name` and returns the new version.
    ///
    /// A new name starts a lifecycle in `Pending` with version 1. An existing
    /// name keeps its active payload; the write is staged as a pending
    /// replacement, superseding any older staged write.
    pub fn put(
        &self,
        name: &str,
        payload: impl Into<Arc<ProgramPayload>>,
    ) -> RegistryResult<u64> {
        validate_program_name(name)?;
        let payload = payload.into();

        let mut entries = self.entries.lock();
        let version = match entries.get_mut(name) {
            Some(entry) => {
                entry.latest_version += 1;
                let version = entry.latest_version;
                if let Some(old) = entry.staged.replace(Slot { payload, version }) {
                    debug!(
                        program = name,
                        superseded = old.version,
                        version,
                        "Staged write superseded"
                    );
                }
                version
            }
            None => {
                entries.insert(
                    name.to_string(),
                    StoreEntry {
                        active: None,
                        staged: Some(Slot {
                            payload,
                            version: 1,
                        }),
                        state: ConfigState::Pending,
                        latest_version: 1,
                    },
                );
                1
            }
        };

        trace!(program = name, version, "Config staged");
        Ok(version)
    }

    /// Returns a snapshot of the entry for `name`.
    pub fn get(&self, name: &str) -> RegistryResult<ProgramConfig> {
        self.entries
            .lock()
            .get(name)
            .and_then(|entry| entry.snapshot(name))
            .ok_or_else(|| RegistryError::not_found(name))
    }

    /// Fails with `StaleVersion` unless `version` is the newest staged write.
    ///
    /// A name removed meanwhile reports `current` as 0.
    pub fn ensure_current(&self, name: &str, version: u64) -> RegistryResult<()> {
        let entries = self.entries.lock();
        let entry = entries.get(name);

        match entry.and_then(|e| e.staged.as_ref()) {
            Some(staged) if staged.version == version => Ok(()),
            _ => Err(RegistryError::StaleVersion {
                program: name.to_string(),
                version,
                current: entry.map_or(0, |e| e.latest_version),
            }),
        }
    }

    /// Returns the payload the runtime should currently enforce for `name`.
    pub fn active_payload(&self, name: &str) -> Option<Arc<ProgramPayload>> {
        self.entries
            .lock()
            .get(name)
            .and_then(|entry| entry.active.as_ref())
            .map(|slot| Arc::clone(&slot.payload))
    }

    /// Promotes the staged write `version` to active.
    ///
    /// Fails with `StaleVersion` if a newer write superseded it and with
    /// `NotFound` if the name was removed meanwhile.
    pub fn mark_active(&self, name: &str, version: u64) -> RegistryResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::not_found(name))?;

        match entry.staged.take() {
            Some(staged) if staged.version == version => {
                entry.active = Some(staged);
                entry.state = ConfigState::Active;
                debug!(program = name, version, "Config active");
                Ok(())
            }
            other => {
                entry.staged = other;
                Err(RegistryError::StaleVersion {
                    program: name.to_string(),
                    version,
                    current: entry.latest_version,
                })
            }
        }
    }

    /// Drops the staged write `version`, leaving the active payload alone.
    ///
    /// The version number is released again, so the next write reuses it.
    /// An entry that never became active disappears with its only write.
    /// Returns false if `version` was no longer the staged write.
    pub fn discard_pending(&self, name: &str, version: u64) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };

        if !entry.staged.as_ref().is_some_and(|s| s.version == version) {
            return false;
        }
        entry.staged = None;
        if entry.latest_version == version {
            entry.latest_version -= 1;
        }

        if entry.active.is_none() {
            entries.remove(name);
            debug!(program = name, version, "Discarded never-linked entry");
        } else {
            debug!(program = name, version, "Discarded staged write");
        }
        true
    }

    /// Moves `name` to `Removing` and returns its active version.
    ///
    /// A name that was never linked reports `NotFound` and stays untouched;
    /// its pending write still owns the entry.
    pub fn begin_remove(&self, name: &str) -> RegistryResult<u64> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::not_found(name))?;
        let version = entry
            .active
            .as_ref()
            .map(|slot| slot.version)
            .ok_or_else(|| RegistryError::not_found(name))?;

        entry.state = ConfigState::Removing;
        Ok(version)
    }

    /// Deletes `name` once its removal has been reconciled with the runtime.
    pub fn finish_remove(&self, name: &str) -> bool {
        self.entries.lock().remove(name).is_some()
    }

    /// Returns `name` to its pre-removal state after a refused removal.
    pub fn abort_remove(&self, name: &str) {
        if let Some(entry) = self.entries.lock().get_mut(name) {
            entry.state = if entry.active.is_some() {
                ConfigState::Active
            } else {
                ConfigState::Pending
            };
        }
    }

    /// Point-in-time snapshot of registered names, in no particular order.
    ///
    /// Names created after the call are not included; names deleted before
    /// it are not either.
    pub fn list(&self) -> std::vec::IntoIter<String> {
        let names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.into_iter()
    }
}
