//! Version Compatibility
//!
//! Parses plug-in version strings and evaluates import match rules.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How an import's version requirement is compared with the installed version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchRule {
    /// No rule given; treated as `Compatible` when a version is required
    #[default]
    None,
    /// Exact equality
    Perfect,
    /// Same major.minor and at least the required version
    Equivalent,
    /// Same major and at least the required version
    Compatible,
    /// At least the required version, no upper bound
    GreaterOrEqual,
}

/// A parsed `major.minor.revision[.qualifier]` version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    parts: [u32; 3],
    qualifier: Option<String>,
}

impl Version {
    /// Parse a dotted version string.
    ///
    /// Missing numeric components are zero. The first component that is not a
    /// number starts the qualifier, which swallows the rest of the string.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let mut parts = [0u32; 3];
        let mut qualifier = None;
        let mut segments = text.splitn(4, '.');
        let mut index = 0;

        while let Some(segment) = segments.next() {
            if index < 3 {
                if let Ok(number) = segment.parse::<u32>() {
                    parts[index] = number;
                    index += 1;
                    continue;
                }
                if index == 0 {
                    return None;
                }
            }
            let mut rest = segment.to_string();
            for tail in segments.by_ref() {
                rest.push('.');
                rest.push_str(tail);
            }
            qualifier = (!rest.is_empty()).then_some(rest);
            break;
        }

        Some(Self { parts, qualifier })
    }

    pub fn major(&self) -> u32 {
        self.parts[0]
    }

    pub fn minor(&self) -> u32 {
        self.parts[1]
    }

    pub fn revision(&self) -> u32 {
        self.parts[2]
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts).then_with(|| {
            self.qualifier.as_deref().unwrap_or("").cmp(other.qualifier.as_deref().unwrap_or(""))
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.parts[0], self.parts[1], self.parts[2])?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, ".{}", qualifier)?;
        }
        Ok(())
    }
}

/// Check whether an installed version satisfies a requirement under `rule`.
///
/// A missing requirement matches anything; a requirement against a plug-in
/// without a (parseable) version never matches.
pub fn version_matches(rule: MatchRule, required: Option<&str>, installed: Option<&str>) -> bool {
    let Some(required) = required else {
        return true;
    };
    let (Some(required), Some(installed)) = (Version::parse(required), installed.and_then(Version::parse)) else {
        return false;
    };

    match rule {
        MatchRule::Perfect => installed == required,
        MatchRule::Equivalent => {
            installed.major() == required.major()
                && installed.minor() == required.minor()
                && installed >= required
        }
        MatchRule::Compatible | MatchRule::None => {
            installed.major() == required.major() && installed >= required
        }
        MatchRule::GreaterOrEqual => installed >= required,
    }
}
