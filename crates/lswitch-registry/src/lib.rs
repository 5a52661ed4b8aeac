//! Program configuration registry for the P4 linker switch
//!
//! Keeps at most one config per program name and links it into the running
//! pipeline through a [`DataPlaneRuntime`]. The runtime only ever enforces
//! configs the registry has confirmed; failed or superseded writes leave the
//! last-known-good config in place.
//!
//! ```text
//! caller ── rpc::dispatch ──> LinkingCoordinator ──> ConfigStore
//!                                    │
//!                                    └──> DataPlaneRuntime (install/uninstall)
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod linker;
pub mod rpc;
pub mod runtime;
pub mod server;
pub mod store;
pub mod types;

pub use config::{DaemonConfig, ProgramSource, DEFAULT_CONFIG_PATH};
pub use coordinator::{
    ContentionPolicy, CoordinatorConfig, CoordinatorStatsSnapshot, LinkingCoordinator,
};
pub use error::{ConfigError, RegistryError, RegistryResult, RuntimeError};
pub use linker::LinkerRuntime;
pub use rpc::{dispatch, LinkerSwitchRequest, LinkerSwitchResponse, Status};
pub use runtime::DataPlaneRuntime;
pub use store::ConfigStore;
pub use types::{ConfigState, ProgramConfig, ProgramInfo, ProgramPayload};
