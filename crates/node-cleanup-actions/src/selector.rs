//! Equality-based label selectors used by action applicability checks
//!
//! Supports the comma-separated subset of the Kubernetes selector syntax:
//! `key=value`, `key==value`, `key!=value`, `key` and `!key`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use node_cleanup_common::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::Exists(k) => labels.contains_key(k),
            Self::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Parsed label selector; every requirement must match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Whether the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Whether the given labels satisfy every requirement
    ///
    /// An empty selector matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for LabelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut requirements = Vec::new();

        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((k, v)) = term.split_once("!=") {
                Requirement::NotEquals(key(k, term)?, v.trim().to_string())
            } else if let Some((k, v)) = term.split_once("==") {
                Requirement::Equals(key(k, term)?, v.trim().to_string())
            } else if let Some((k, v)) = term.split_once('=') {
                Requirement::Equals(key(k, term)?, v.trim().to_string())
            } else if let Some(k) = term.strip_prefix('!') {
                Requirement::DoesNotExist(key(k, term)?)
            } else {
                Requirement::Exists(key(term, term)?)
            };
            requirements.push(requirement);
        }

        Ok(Self {
            raw: s.trim().to_string(),
            requirements,
        })
    }
}

fn key(raw: &str, term: &str) -> Result<String, Error> {
    let k = raw.trim();
    if k.is_empty() || k.contains(char::is_whitespace) {
        return Err(Error::config(format!("invalid label selector term '{}'", term)));
    }
    Ok(k.to_string())
}
