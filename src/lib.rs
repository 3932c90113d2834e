//! Script Graft - counterpart script resolution and record patching
//!
//! This crate decides, for every inventory record that carries a source-system
//! script, which counterpart script should now govern its paired render record,
//! and grafts that script onto run-local overrides without touching shared
//! originals.
//!
//! ## Call chain
//!
//! ```text
//! GraftConfig (YAML) ──► RuleEngine ──┐
//!                                     ▼
//! RecordGraph ──► Catalog::discover ──► Patcher::patch ──► PatchSummary
//!                  (scan filter)         (graft / duplicate)
//! ```
//!
//! - [`resolve`] holds the layered rule engine (direct maps, keyword rules,
//!   name-pattern rules, rule groups) with cycle detection.
//! - [`patch`] performs the per-entry graft protocol against overrides.
//! - [`scan`] discovers catalog entries and aggregates outcomes.
//! - [`record`] is the data model plus the record graph accessor.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use script_graft::{run_batch, CatalogSnapshot, GraftConfig, InMemoryGraph};
//!
//! let config = GraftConfig::from_file("graft.yaml").unwrap();
//! let snapshot = CatalogSnapshot::from_file("catalog.yaml").unwrap();
//! let mut graph = InMemoryGraph::from_snapshot(snapshot, "ScriptGraft.esp");
//! let summary = run_batch(&mut graph, &config).unwrap();
//! println!("patched {}", summary.patched);
//! ```

pub mod config;
pub mod error;
pub mod patch;
pub mod record;
pub mod resolve;
pub mod scan;

pub use config::{
    DirectMapping, GraftConfig, KeywordRuleConfig, MarkerConfig, NameRuleConfig, PropertyMapping,
    RuleGroupConfig, RuleStoreConfig,
};
pub use error::{ConfigError, GraphError, PatchError, ResolveError, RuleLayer};
pub use patch::{PatchOutcome, Patcher, SkipReason};
pub use record::graph::{
    CatalogSnapshot, InMemoryGraph, RecordGraph, SourceSnapshot, WinningRecord,
};
pub use record::{
    Property, PropertyKind, PropertyValue, Record, RecordCategory, RecordRef, ScriptAttachment,
    ScriptIdentity,
};
pub use resolve::{DirectMap, RecordAttributes, RuleEngine};
pub use scan::{run_batch, Catalog, CatalogEntry, EntryReport, PatchSummary};
