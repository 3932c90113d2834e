//! Catalog scan and batch driver
//!
//! Discovers inventory records that carry the source marker keyword and a
//! script, pairs each with its render record, then patches them one at a time
//! in source-priority order.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::GraftConfig;
use crate::error::PatchError;
use crate::patch::{PatchOutcome, Patcher, SkipReason};
use crate::record::graph::RecordGraph;
use crate::record::{RecordCategory, RecordRef, ScriptIdentity};

/// One inventory record paired with its render record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Source holding the winning inventory record
    pub source: String,
    pub inventory: RecordRef,
    /// Governing inventory script, if one was found
    pub inventory_script: Option<ScriptIdentity>,
    /// Render record referenced by the inventory script
    pub render: Option<RecordRef>,
    /// Counterpart script already on the render record at scan time
    pub render_script: Option<ScriptIdentity>,
}

impl CatalogEntry {
    fn fully_patched(&self, patcher: &Patcher<'_>) -> bool {
        self.render_script.is_some()
            && self
                .inventory_script
                .as_ref()
                .is_some_and(|s| patcher.is_counterpart_inventory_script(s.as_str()))
    }
}

/// Ordered stream of entries to patch
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Scan the graph for entries
    ///
    /// Keeps winning inventory records from included sources that carry the
    /// source marker and a non-empty script container. Entries whose
    /// inventory and render sides are both patched already are dropped.
    pub fn discover<G: RecordGraph>(graph: &G, patcher: &Patcher<'_>) -> Self {
        let config = patcher.config();
        let mut entries = Vec::new();

        for winning in graph.winning_records(RecordCategory::Inventory, &config.markers.source) {
            if !config.includes_source(winning.source) || winning.record.scripts().is_empty() {
                continue;
            }

            let script = patcher.inventory_script(winning.record);
            let render = script.and_then(|s| patcher.render_target(s)).cloned();
            let render_script = render
                .as_ref()
                .and_then(|r| graph.current(r))
                .and_then(|r| patcher.render_counterpart(r))
                .map(|s| s.name.clone());

            let entry = CatalogEntry {
                source: winning.source.to_string(),
                inventory: winning.record.id.clone(),
                inventory_script: script.map(|s| s.name.clone()),
                render,
                render_script,
            };

            if entry.fully_patched(patcher) {
                debug!(record = %entry.inventory, "already patched on both sides");
                continue;
            }
            entries.push(entry);
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a CatalogEntry;
    type IntoIter = std::slice::Iter<'a, CatalogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Outcome for one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub inventory: RecordRef,
    #[serde(flatten)]
    pub outcome: PatchOutcome,
}

/// Aggregated counts for a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchSummary {
    pub patched: usize,
    pub already_patched: usize,
    pub duplicated: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub entries: Vec<EntryReport>,
}

impl PatchSummary {
    pub fn record(&mut self, inventory: RecordRef, outcome: PatchOutcome) {
        match &outcome {
            PatchOutcome::Patched => self.patched += 1,
            PatchOutcome::AlreadyPatched => self.already_patched += 1,
            PatchOutcome::DuplicatedNewRecord { .. } => self.duplicated += 1,
            PatchOutcome::Skipped { reason } => *self.skipped.entry(*reason).or_default() += 1,
        }
        self.entries.push(EntryReport { inventory, outcome });
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Discover and patch every entry
///
/// Stops at the first fatal error; the graph's patch layer must then be
/// discarded rather than written.
pub fn run_batch<G: RecordGraph>(graph: &mut G, config: &GraftConfig) -> Result<PatchSummary, PatchError> {
    let patcher = Patcher::new(config)?;
    let catalog = Catalog::discover(graph, &patcher);
    info!(entries = catalog.len(), "catalog scanned");

    let mut summary = PatchSummary::default();
    for entry in &catalog {
        let outcome = patcher.patch(graph, entry)?;
        summary.record(entry.inventory.clone(), outcome);
    }

    info!(
        patched = summary.patched,
        duplicated = summary.duplicated,
        already_patched = summary.already_patched,
        skipped = summary.total_skipped(),
        "batch complete"
    );
    Ok(summary)
}
