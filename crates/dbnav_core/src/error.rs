use std::sync::Arc;

use thiserror::Error;

use crate::NodePath;

/// Errors surfaced by the navigator model.
///
/// Every failure reported to callers is one of these kinds. Errors coming from
/// a data source are wrapped together with the path of the node involved, so a
/// transport-level message never reaches callers on its own.
#[derive(Debug, Clone, Error)]
pub enum NavError {
    #[error("Failed to load children of '{path}': {message}")]
    LoadFailed { path: NodePath, message: String },

    #[error("Node not found: '{0}'")]
    NotFound(NodePath),

    #[error("Invalid node path {0:?}")]
    InvalidPath(String),

    #[error("Cannot drop '{candidate}' into '{target}': {reason}")]
    DropRejected {
        target: NodePath,
        candidate: NodePath,
        reason: String,
    },

    #[error("Node '{0}' is no longer part of the navigator")]
    StaleNode(NodePath),

    #[error("Load cancelled")]
    Cancelled,

    #[error("Children of '{0}' are not loaded")]
    NotLoaded(NodePath),

    #[error("Node '{0}' cannot have children")]
    NotContainer(NodePath),

    #[error("Node '{0}' already exists")]
    AlreadyExists(NodePath),

    #[error("Rename of '{path}' rejected: {message}")]
    RenameRejected { path: NodePath, message: String },

    #[error("Invalid filter pattern {pattern:?}: {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("Preference store error: {0}")]
    Preferences(String),

    #[error("IO error: {0}")]
    IoError(#[source] Arc<std::io::Error>),
}

impl From<std::io::Error> for NavError {
    fn from(error: std::io::Error) -> Self {
        NavError::IoError(Arc::new(error))
    }
}

impl NavError {
    pub fn load_failed(path: &NodePath, message: impl Into<String>) -> Self {
        NavError::LoadFailed {
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn drop_rejected(target: &NodePath, candidate: &NodePath, reason: impl Into<String>) -> Self {
        NavError::DropRejected {
            target: target.clone(),
            candidate: candidate.clone(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for failures a caller may retry without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NavError::LoadFailed { .. } | NavError::Cancelled)
    }
}

/// Errors returned by data source implementations.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SourceError {
    pub fn query_failed(message: impl Into<String>) -> Self {
        SourceError::QueryFailed(message.into())
    }
}
