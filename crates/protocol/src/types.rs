use serde::{Deserialize, Serialize};

/// Describes the local file when a session is created on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Base name of the source file.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// SHA-256 hex digest of the whole file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Repository and unit identity an import targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoContext {
    pub repo_id: String,
    pub unit_type_id: String,
    /// Fields that uniquely identify the unit within its type.
    #[serde(default)]
    pub unit_key: serde_json::Value,
    /// Extra, non-identifying metadata for the unit.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub unit_metadata: serde_json::Value,
}

impl RepoContext {
    /// Creates a context with an empty unit key and no metadata.
    pub fn new(repo_id: impl Into<String>, unit_type_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            unit_type_id: unit_type_id.into(),
            unit_key: serde_json::Value::Object(Default::default()),
            unit_metadata: serde_json::Value::Null,
        }
    }
}

/// Successful reply to an import request.
///
/// A conflict is not a variant here; transports report it as
/// [`ServerError::Conflict`](crate::ServerError::Conflict).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    /// `true` when the import finished within the call.
    pub synchronous: bool,
    /// Reference to the server-side task when the import was queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<String>,
}

impl ImportResponse {
    /// An import that completed immediately.
    pub fn completed() -> Self {
        Self {
            synchronous: true,
            task_ref: None,
        }
    }

    /// An import the server queued behind other repository operations.
    pub fn queued(task_ref: impl Into<String>) -> Self {
        Self {
            synchronous: false,
            task_ref: Some(task_ref.into()),
        }
    }

    /// Returns `true` if the server postponed the import.
    pub fn is_async(&self) -> bool {
        !self.synchronous
    }
}
