//! Error types for rule resolution and record patching
//!
//! Everything in this module is fatal to a run. Recoverable per-entry
//! conditions are reported as [`crate::patch::SkipReason`] instead, so callers
//! can pattern-match on the outcome rather than catching broad errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::record::{RecordRef, ScriptIdentity};

/// Which rule layer a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLayer {
    Keyword,
    NamePattern,
}

impl std::fmt::Display for RuleLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleLayer::Keyword => write!(f, "keyword rule"),
            RuleLayer::NamePattern => write!(f, "name-pattern rule"),
        }
    }
}

/// Malformed rule tables and looping rule chains
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("{layer} '{rule}' has no output script")]
    MissingOutput { layer: RuleLayer, rule: String },

    #[error("rule group '{group}' has an empty input set")]
    EmptyInputSet { group: String },

    #[error("invalid name pattern '{pattern}' in rule '{rule}': {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule cycle: '{from}' rewrites back to '{to}' (chain: {})", format_chain(.chain))]
    Cycle {
        from: ScriptIdentity,
        to: ScriptIdentity,
        chain: Vec<ScriptIdentity>,
    },
}

fn format_chain(chain: &[ScriptIdentity]) -> String {
    chain
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Record graph accessor failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("record {0} not found in any source")]
    RecordNotFound(RecordRef),

    #[error("record {record} already has a script named '{script}'")]
    ScriptConflict {
        record: RecordRef,
        script: ScriptIdentity,
    },

    #[error("record {record} has no script named '{script}'")]
    ScriptNotFound {
        record: RecordRef,
        script: ScriptIdentity,
    },

    #[error("record {record} has no script container")]
    MissingScriptContainer { record: RecordRef },
}

/// Run-aborting failure while patching one entry
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("invalid rule table: {0}")]
    Rules(#[from] ResolveError),

    #[error("resolving render script for {record}: {source}")]
    Resolution {
        record: RecordRef,
        #[source]
        source: ResolveError,
    },

    #[error("patching {record}: {source}")]
    Graph {
        record: RecordRef,
        #[source]
        source: GraphError,
    },
}

impl PatchError {
    /// Record whose processing aborted the run, if any
    pub fn record(&self) -> Option<&RecordRef> {
        match self {
            PatchError::Resolution { record, .. } | PatchError::Graph { record, .. } => Some(record),
            PatchError::Rules(_) => None,
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid record reference '{0}', expected '<hex id>:<source>'")]
    InvalidRecordRef(String),

    #[error("invalid rule table: {0}")]
    Rules(#[from] ResolveError),
}
