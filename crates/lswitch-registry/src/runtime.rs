//! Seam to the switch data-plane runtime.
//!
//! The linking coordinator drives the runtime exclusively through this
//! trait. Implementations must be safe to call concurrently for different
//! program names; calls for the same name are serialized by the coordinator.

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::types::ProgramPayload;

/// Data-plane runtime that executes the linked pipeline.
#[async_trait]
pub trait DataPlaneRuntime: Send + Sync {
    /// Returns the runtime name (for logging).
    fn name(&self) -> &str {
        "runtime"
    }

    /// Links `payload` into the running pipeline under `program`.
    ///
    /// Installing over an already linked program replaces it. On error the
    /// previously linked config of `program`, if any, must remain enforced.
    async fn install(&self, program: &str, payload: &ProgramPayload) -> Result<(), RuntimeError>;

    /// Unlinks `program` from the running pipeline.
    ///
    /// On error the program must remain linked.
    async fn uninstall(&self, program: &str) -> Result<(), RuntimeError>;
}
