//! Runtime Error Types
//!
//! Recoverable error values returned by context operations. Contract violations
//! are not represented here; they go through [`crate::fatal`].

use thiserror::Error;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Classification of a [`RuntimeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Resource,
    Unknown,
    Conflict,
    Dependency,
    Runtime,
    Malformed,
}

/// Recoverable errors reported by the plug-in runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// An allocation or operating system resource was exhausted
    #[error("Insufficient resources: {message}")]
    Resource { message: String },

    /// An identifier, symbol or address was not found
    #[error("Unknown {what}: {name}")]
    Unknown { what: &'static str, name: String },

    /// A plug-in or extension point identifier is already in use
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// An import could not be satisfied
    #[error("Plug-in {plugin} could not be resolved: {message}")]
    Dependency {
        plugin: String,
        dependency: String,
        message: String,
    },

    /// A plug-in entry point failed or is malformed
    #[error("Plug-in {plugin} runtime error: {message}")]
    Runtime { plugin: String, message: String },

    /// A plug-in descriptor could not be loaded
    #[error("Malformed plug-in descriptor: {message}")]
    Malformed { message: String },
}

impl RuntimeError {
    /// Create a resource error
    pub fn resource<S: Into<String>>(message: S) -> Self {
        Self::Resource { message: message.into() }
    }

    /// Create an unknown plug-in error
    pub fn unknown_plugin<S: Into<String>>(id: S) -> Self {
        Self::Unknown { what: "plug-in", name: id.into() }
    }

    /// Create an unknown symbol error
    pub fn unknown_symbol<S: Into<String>>(name: S) -> Self {
        Self::Unknown { what: "symbol", name: name.into() }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Create a dependency error naming the failing plug-in and the import at fault
    pub fn dependency<P, D, M>(plugin: P, dependency: D, message: M) -> Self
    where
        P: Into<String>,
        D: Into<String>,
        M: Into<String>,
    {
        Self::Dependency {
            plugin: plugin.into(),
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    /// Create a runtime error
    pub fn runtime<P: Into<String>, M: Into<String>>(plugin: P, message: M) -> Self {
        Self::Runtime { plugin: plugin.into(), message: message.into() }
    }

    /// Create a malformed descriptor error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::Malformed { message: message.into() }
    }

    /// Get the error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Resource { .. } => ErrorKind::Resource,
            RuntimeError::Unknown { .. } => ErrorKind::Unknown,
            RuntimeError::Conflict { .. } => ErrorKind::Conflict,
            RuntimeError::Dependency { .. } => ErrorKind::Dependency,
            RuntimeError::Runtime { .. } => ErrorKind::Runtime,
            RuntimeError::Malformed { .. } => ErrorKind::Malformed,
        }
    }

    /// Plug-in the error is attributed to, if any
    pub fn plugin(&self) -> Option<&str> {
        match self {
            RuntimeError::Dependency { plugin, .. } | RuntimeError::Runtime { plugin, .. } => {
                Some(plugin)
            }
            _ => None,
        }
    }

    /// Check if error is caused by the import graph rather than the plug-in itself
    pub fn is_dependency_error(&self) -> bool {
        matches!(self, RuntimeError::Dependency { .. })
    }
}
