//! In-process linker runtime.
//!
//! Links independently compiled programs into one pipeline by unifying
//! their header types: every header type gets a structural UID computed
//! from its field sequence, and programs declaring the same structure share
//! one linked header type. Shared types are reference counted so unlinking
//! one program never drops a type another program still uses.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RuntimeError;
use crate::runtime::DataPlaneRuntime;
use crate::types::ProgramPayload;

/// Width token used for variable-length fields in the structural UID.
const VARIABLE_WIDTH: &str = "*";

/// A header type as declared by one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTypeDecl {
    /// Name inside the declaring program.
    pub name: String,
    /// Structural UID shared by identical definitions.
    pub uid: String,
}

/// Extracts the header type declarations of a program config.
///
/// Fields follow the `[name, width, signed?]` layout of compiled programs;
/// `width` is a positive integer or `"*"` for a variable-length field.
pub fn header_type_decls(payload: &ProgramPayload) -> Result<Vec<HeaderTypeDecl>, RuntimeError> {
    let header_types = match payload.document().get("header_types") {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(RuntimeError::rejected("header_types must be an array")),
    };

    let mut seen = HashSet::new();
    let mut decls = Vec::with_capacity(header_types.len());

    for (index, header_type) in header_types.iter().enumerate() {
        let name = header_type
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RuntimeError::rejected(format!("header_types[{}] has no name", index))
            })?;

        if !seen.insert(name) {
            return Err(RuntimeError::rejected(format!(
                "header type '{}' declared twice",
                name
            )));
        }

        let fields = header_type
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RuntimeError::rejected(format!("header type '{}' has no fields array", name))
            })?;

        let mut parts = Vec::with_capacity(fields.len());
        for field in fields {
            parts.push(field_uid(name, field)?);
        }

        decls.push(HeaderTypeDecl {
            name: name.to_string(),
            uid: parts.join(","),
        });
    }

    Ok(decls)
}

fn field_uid(header_type: &str, field: &Value) -> Result<String, RuntimeError> {
    let bad = || RuntimeError::rejected(format!("header type '{}' has a malformed field", header_type));

    let field = field.as_array().ok_or_else(bad)?;
    let field_name = field.first().and_then(Value::as_str).ok_or_else(bad)?;

    let width = match field.get(1) {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(w) if w > 0 => w.to_string(),
            _ => {
                return Err(RuntimeError::rejected(format!(
                    "field '{}.{}' must have a positive width",
                    header_type, field_name
                )))
            }
        },
        Some(Value::String(s)) if s == VARIABLE_WIDTH => VARIABLE_WIDTH.to_string(),
        _ => return Err(bad()),
    };

    Ok(format!("{}:{}", field_name, width))
}

/// A header type linked into the running pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedHeaderType {
    /// Structural UID.
    pub uid: String,
    /// Number of linked programs declaring this structure.
    pub ref_count: u32,
}

#[derive(Debug, Default)]
struct LinkerState {
    /// Program name -> UIDs it references.
    programs: HashMap<String, Vec<String>>,
    /// UID -> reference count.
    header_types: HashMap<String, u32>,
}

impl LinkerState {
    fn retain(&mut self, uids: &[String]) {
        for uid in uids {
            *self.header_types.entry(uid.clone()).or_insert(0) += 1;
        }
    }

    fn release(&mut self, uids: &[String]) {
        for uid in uids {
            // Never auto-create on release; a missing UID is simply skipped.
            if let Some(count) = self.header_types.get_mut(uid) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.header_types.remove(uid);
                    debug!(uid = %uid, "Header type unlinked");
                }
            }
        }
    }
}

/// Linker runtime that keeps the linked pipeline in memory.
#[derive(Debug, Default)]
pub struct LinkerRuntime {
    state: Mutex<LinkerState>,
}

impl LinkerRuntime {
    /// Creates a linker with an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the linked program names, sorted.
    pub fn linked_programs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().programs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the linked header types, sorted by UID.
    pub fn linked_header_types(&self) -> Vec<LinkedHeaderType> {
        let state = self.state.lock();
        let sorted: BTreeMap<&String, &u32> = state.header_types.iter().collect();
        sorted
            .into_iter()
            .map(|(uid, count)| LinkedHeaderType {
                uid: uid.clone(),
                ref_count: *count,
            })
            .collect()
    }
}

#[async_trait]
impl DataPlaneRuntime for LinkerRuntime {
    fn name(&self) -> &str {
        "linker"
    }

    async fn install(&self, program: &str, payload: &ProgramPayload) -> Result<(), RuntimeError> {
        // Everything that can fail happens before the pipeline is touched.
        let decls = header_type_decls(payload)?;
        let uids: Vec<String> = decls.into_iter().map(|d| d.uid).collect();

        let mut state = self.state.lock();
        state.retain(&uids);
        let replaced = state.programs.insert(program.to_string(), uids);
        if let Some(old) = &replaced {
            state.release(old);
        }

        info!(
            program,
            replaced = replaced.is_some(),
            header_types = state.header_types.len(),
            "Program linked"
        );
        Ok(())
    }

    async fn uninstall(&self, program: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let uids = state
            .programs
            .remove(program)
            .ok_or_else(|| RuntimeError::rejected(format!("program '{}' is not linked", program)))?;
        state.release(&uids);

        info!(
            program,
            header_types = state.header_types.len(),
            "Program unlinked"
        );
        Ok(())
    }
}
