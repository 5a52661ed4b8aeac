//! RPC surface of the linker switch.
//!
//! One request enum, one response struct and a single dispatch table. The
//! transport (see [`crate::server`]) only moves JSON in and out.
//!
//! # Status codes
//!
//! | status          | code |
//! |-----------------|------|
//! | Success         | 0    |
//! | InvalidInput    | 1    |
//! | NotFound        | 2    |
//! | InstallRejected | 3    |
//! | RemoveRejected  | 4    |
//! | Busy            | 5    |
//! | Timeout         | 6    |
//!
//! A successful add or delete reports the program's `version`. Versions count
//! from 1 per lifecycle; a write that is rejected or times out hands its
//! number back, so the next add reuses it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::LinkingCoordinator;
use crate::error::RegistryError;
use crate::types::ProgramInfo;

/// Wire status of an RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidInput,
    NotFound,
    InstallRejected,
    RemoveRejected,
    Busy,
    Timeout,
}

impl Status {
    /// Returns the stable numeric code.
    pub fn code(&self) -> i32 {
        match self {
            Status::Success => 0,
            Status::InvalidInput => 1,
            Status::NotFound => 2,
            Status::InstallRejected => 3,
            Status::RemoveRejected => 4,
            Status::Busy => 5,
            Status::Timeout => 6,
        }
    }

    /// Parses a numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Status::Success),
            1 => Some(Status::InvalidInput),
            2 => Some(Status::NotFound),
            3 => Some(Status::InstallRejected),
            4 => Some(Status::RemoveRejected),
            5 => Some(Status::Busy),
            6 => Some(Status::Timeout),
            _ => None,
        }
    }

    /// Returns true for `Success`.
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "Success",
            Status::InvalidInput => "InvalidInput",
            Status::NotFound => "NotFound",
            Status::InstallRejected => "InstallRejected",
            Status::RemoveRejected => "RemoveRejected",
            Status::Busy => "Busy",
            Status::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

/// A call into the linker switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LinkerSwitchRequest {
    /// Registers or replaces a program config.
    P4ProgramConfigAdd {
        program_name: String,
        config_str: String,
    },
    /// Unlinks and removes a program config.
    P4ProgramConfigDelete { program_name: String },
    /// Lists registered program names.
    P4ProgramConfigList,
    /// Describes one registered program.
    P4ProgramConfigGet { program_name: String },
}

impl LinkerSwitchRequest {
    /// Returns the method name as it appears on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            LinkerSwitchRequest::P4ProgramConfigAdd { .. } => "p4_program_config_add",
            LinkerSwitchRequest::P4ProgramConfigDelete { .. } => "p4_program_config_delete",
            LinkerSwitchRequest::P4ProgramConfigList => "p4_program_config_list",
            LinkerSwitchRequest::P4ProgramConfigGet { .. } => "p4_program_config_get",
        }
    }
}

/// Result of a call into the linker switch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkerSwitchResponse {
    /// Numeric [`Status`] code.
    pub status: i32,
    /// Version affected by an add or delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Error description when `status` is non-zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Registered names, for list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub programs: Option<Vec<String>>,
    /// Program description, for get.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<ProgramInfo>,
}

impl LinkerSwitchResponse {
    fn success() -> Self {
        Self::default()
    }

    /// Builds the response for a failed call.
    pub fn from_error(error: &RegistryError) -> Self {
        Self {
            status: error.status().code(),
            message: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Returns the decoded status, if the code is known.
    pub fn status(&self) -> Option<Status> {
        Status::from_code(self.status)
    }
}

/// Executes `request` against `coordinator`.
pub async fn dispatch(
    coordinator: &LinkingCoordinator,
    request: LinkerSwitchRequest,
) -> LinkerSwitchResponse {
    debug!(method = request.method(), "Dispatching request");

    let result = match request {
        LinkerSwitchRequest::P4ProgramConfigAdd {
            program_name,
            config_str,
        } => coordinator
            .add(&program_name, &config_str)
            .await
            .map(|version| LinkerSwitchResponse {
                version: Some(version),
                ..LinkerSwitchResponse::success()
            }),
        LinkerSwitchRequest::P4ProgramConfigDelete { program_name } => coordinator
            .delete(&program_name)
            .await
            .map(|version| LinkerSwitchResponse {
                version: Some(version),
                ..LinkerSwitchResponse::success()
            }),
        LinkerSwitchRequest::P4ProgramConfigList => {
            let mut programs: Vec<String> = coordinator.list().collect();
            programs.sort();
            Ok(LinkerSwitchResponse {
                programs: Some(programs),
                ..LinkerSwitchResponse::success()
            })
        }
        LinkerSwitchRequest::P4ProgramConfigGet { program_name } => {
            coordinator.get(&program_name).map(|config| LinkerSwitchResponse {
                version: Some(config.version),
                program: Some(ProgramInfo::from(&config)),
                ..LinkerSwitchResponse::success()
            })
        }
    };

    result.unwrap_or_else(|e| LinkerSwitchResponse::from_error(&e))
}
