//! Plug-in Descriptors
//!
//! Immutable, already-validated description of an installable plug-in as
//! produced by an external [`DescriptorLoader`]. The runtime never inspects
//! manifest bytes itself.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{version_matches, MatchRule};

/// Plug-in descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Globally unique identifier
    pub identifier: String,

    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Plug-in version
    #[serde(default)]
    pub version: Option<String>,

    /// Name of the plug-in provider
    #[serde(default)]
    pub provider_name: Option<String>,

    /// Imports in declaration order
    #[serde(default)]
    pub imports: Vec<PluginImport>,

    /// Extension points declared by this plug-in
    #[serde(default)]
    pub ext_points: Vec<ExtensionPointSpec>,

    /// Extensions contributed by this plug-in
    #[serde(default)]
    pub extensions: Vec<ExtensionSpec>,

    /// Native library containing the plug-in runtime
    #[serde(default)]
    pub runtime_lib: Option<String>,

    /// Symbol of the runtime entry point table within `runtime_lib`
    #[serde(default)]
    pub runtime_entry: Option<String>,
}

impl PluginDescriptor {
    /// Create a descriptor with only an identifier
    pub fn new<S: Into<String>>(identifier: S) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            version: None,
            provider_name: None,
            imports: Vec::new(),
            ext_points: Vec::new(),
            extensions: Vec::new(),
            runtime_lib: None,
            runtime_entry: None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_provider<S: Into<String>>(mut self, provider_name: S) -> Self {
        self.provider_name = Some(provider_name.into());
        self
    }

    /// Add an import
    pub fn with_import(mut self, import: PluginImport) -> Self {
        self.imports.push(import);
        self
    }

    /// Set the native runtime library and, optionally, its entry point symbol
    pub fn with_runtime<S: Into<String>>(mut self, library: S, entry: Option<&str>) -> Self {
        self.runtime_lib = Some(library.into());
        self.runtime_entry = entry.map(str::to_string);
        self
    }

    pub fn with_ext_point(mut self, ext_point: ExtensionPointSpec) -> Self {
        self.ext_points.push(ext_point);
        self
    }

    pub fn with_extension(mut self, extension: ExtensionSpec) -> Self {
        self.extensions.push(extension);
        self
    }
}

/// Dependency on another plug-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginImport {
    /// Identifier of the imported plug-in
    pub plugin_id: String,

    /// Required version, if any
    #[serde(default)]
    pub version: Option<String>,

    /// Version match rule
    #[serde(default)]
    pub match_rule: MatchRule,

    /// Whether the import may be absent
    #[serde(default)]
    pub optional: bool,
}

impl PluginImport {
    /// Mandatory import without version requirement
    pub fn new<S: Into<String>>(plugin_id: S) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version: None,
            match_rule: MatchRule::None,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_version<S: Into<String>>(mut self, version: S, rule: MatchRule) -> Self {
        self.version = Some(version.into());
        self.match_rule = rule;
        self
    }

    /// Check whether an installed plug-in version satisfies this import
    pub fn accepts(&self, installed: Option<&str>) -> bool {
        version_matches(self.match_rule, self.version.as_deref(), installed)
    }
}

/// Extension point declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPointSpec {
    pub local_id: String,
    pub global_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub schema_path: Option<String>,
}

impl ExtensionPointSpec {
    /// Declare an extension point; the global id is `<plugin>.<local_id>`
    pub fn new(plugin_id: &str, local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            global_id: format!("{}.{}", plugin_id, local_id),
            name: None,
            schema_path: None,
        }
    }
}

/// Extension contributed to an extension point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSpec {
    #[serde(default)]
    pub local_id: Option<String>,
    #[serde(default)]
    pub global_id: Option<String>,
    /// Global identifier of the extended extension point
    pub ext_point_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub configuration: ConfigTree,
}

impl ExtensionSpec {
    pub fn new<S: Into<String>>(ext_point_id: S, configuration: ConfigTree) -> Self {
        Self {
            local_id: None,
            global_id: None,
            ext_point_id: ext_point_id.into(),
            name: None,
            configuration,
        }
    }
}

/// Read-only configuration element tree attached to an extension
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigTree {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub children: Vec<ConfigTree>,
}

impl ConfigTree {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_value<S: Into<String>>(mut self, value: S) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_child(mut self, child: ConfigTree) -> Self {
        self.children.push(child);
        self
    }

    /// Attribute value by name
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Find an element by `/`-separated path relative to this element.
    ///
    /// `.` stays on the current element and `..` moves to the parent; moving
    /// above the starting element fails. The first child with a matching name
    /// is taken at each step.
    pub fn lookup(&self, path: &str) -> Option<&ConfigTree> {
        let mut stack: Vec<&ConfigTree> = vec![self];
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match segment {
                "." => {}
                ".." => {
                    if stack.len() == 1 {
                        return None;
                    }
                    stack.pop();
                }
                name => {
                    let current = *stack.last()?;
                    let child = current.children.iter().find(|c| c.name == name)?;
                    stack.push(child);
                }
            }
        }
        stack.last().copied()
    }

    /// Value of the element at `path`, or of an attribute when the final segment is `@name`
    pub fn lookup_value(&self, path: &str) -> Option<&str> {
        match path.rsplit_once('/') {
            Some((element, last)) if last.starts_with('@') => {
                self.lookup(element)?.attribute(&last[1..])
            }
            None if path.starts_with('@') => self.attribute(&path[1..]),
            _ => self.lookup(path)?.value.as_deref(),
        }
    }
}

/// Failure reported by a [`DescriptorLoader`]
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed plug-in descriptor {path}: {message}")]
    Malformed { path: String, message: String },
}

/// Parses a plug-in manifest into a [`PluginDescriptor`]
pub trait DescriptorLoader {
    fn load(&self, path: &Path) -> Result<PluginDescriptor, LoadError>;
}
