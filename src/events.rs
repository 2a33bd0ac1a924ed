//! Events and Log Records
//!
//! Types delivered synchronously to plug-in listeners and loggers.

use std::fmt;
use std::str::FromStr;

use log::Level;
use serde::{Deserialize, Serialize};

/// Plug-in lifecycle state.
///
/// Ordered as the runtime compares them: anything below `Resolved` has no
/// native module loaded and anything below `Active` is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Uninstalled,
    Installed,
    Resolved,
    Starting,
    Stopping,
    Active,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::Uninstalled => "UNINSTALLED",
            PluginState::Installed => "INSTALLED",
            PluginState::Resolved => "RESOLVED",
            PluginState::Starting => "STARTING",
            PluginState::Stopping => "STOPPING",
            PluginState::Active => "ACTIVE",
        };
        f.write_str(name)
    }
}

/// A plug-in state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEvent {
    pub plugin_id: String,
    pub old_state: PluginState,
    pub new_state: PluginState,
}

/// Receives plug-in state transitions of one context
pub trait PluginListener: Send + Sync {
    fn on_event(&self, event: &PluginEvent);
}

impl<F> PluginListener for F
where
    F: Fn(&PluginEvent) + Send + Sync,
{
    fn on_event(&self, event: &PluginEvent) {
        self(event)
    }
}

/// Handle returned by listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Log message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Matching `log` facade level
    pub fn level(self) -> Level {
        match self {
            Severity::Debug => Level::Debug,
            Severity::Info => Level::Info,
            Severity::Warning => Level::Warn,
            Severity::Error => Level::Error,
        }
    }
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => Severity::Error,
            Level::Warn => Severity::Warning,
            Level::Info => Severity::Info,
            Level::Debug | Level::Trace => Severity::Debug,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(format!("Invalid severity: {}. Valid options: debug, info, warning, error", s)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// Receives log messages emitted by the runtime and by plug-ins
pub trait Logger: Send + Sync {
    /// `source` is the identifier of the plug-in that emitted the message, or
    /// `None` when it came from the runtime or the host.
    fn log(&self, severity: Severity, message: &str, source: Option<&str>);
}

impl<F> Logger for F
where
    F: Fn(Severity, &str, Option<&str>) + Send + Sync,
{
    fn log(&self, severity: Severity, message: &str, source: Option<&str>) {
        self(severity, message, source)
    }
}

/// Handle returned by logger registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoggerId(pub(crate) u64);
