//! Record Graph Accessor
//!
//! [`RecordGraph`] is the contract the patcher mutates through. Reads go to
//! the winning version of a record; writes only ever go to an override,
//! created on first request and returned by identity afterwards.
//!
//! [`InMemoryGraph`] keeps sources in priority order (later wins) and a single
//! patch layer keyed by [`RecordRef`]. Overrides and duplicated records both
//! live in the patch layer; nothing in a source is ever modified.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Record, RecordCategory, RecordRef};
use crate::error::{ConfigError, GraphError};

/// First local id handed out to new records in the patch layer
const FIRST_NEW_LOCAL_ID: u32 = 0x800;

/// A record together with the source that holds its winning version
#[derive(Debug, Clone, Copy)]
pub struct WinningRecord<'a> {
    pub source: &'a str,
    pub record: &'a Record,
}

/// Access to an override-based record store
pub trait RecordGraph {
    /// Winning version of a record across all sources
    fn resolve(&self, record: &RecordRef) -> Option<&Record>;

    /// This run's override of a record, if one was created
    fn override_of(&self, record: &RecordRef) -> Option<&Record>;

    /// Existing override, or a new one copied from the winning version
    fn get_or_add_override(&mut self, record: &RecordRef) -> Result<&mut Record, GraphError>;

    /// Copy a record's current state into a brand-new record
    ///
    /// The copy gets a fresh [`RecordRef`] and `editor_id_suffix` appended to
    /// its editor id. The original is left as is.
    fn duplicate_as_new_record(
        &mut self,
        record: &RecordRef,
        editor_id_suffix: &str,
    ) -> Result<RecordRef, GraphError>;

    /// Winning records of a category carrying `keyword`, in source priority
    /// order and then by id
    fn winning_records(&self, category: RecordCategory, keyword: &RecordRef) -> Vec<WinningRecord<'_>>;

    /// The override if one exists, otherwise the winning version
    fn current(&self, record: &RecordRef) -> Option<&Record> {
        self.override_of(record).or_else(|| self.resolve(record))
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Records contributed by one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub name: String,
    #[serde(default)]
    pub records: Vec<Record>,
}

/// Serializable catalog: sources in priority order, lowest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub sources: Vec<SourceSnapshot>,
}

impl CatalogSnapshot {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

// ============================================================================
// IN-MEMORY GRAPH
// ============================================================================

#[derive(Debug, Clone)]
struct Source {
    name: String,
    records: BTreeMap<RecordRef, Record>,
}

impl Source {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: BTreeMap::new(),
        }
    }
}

/// Winning version: the last source that carries the record
fn winning_in<'a>(sources: &'a [Source], record: &RecordRef) -> Option<(&'a Source, &'a Record)> {
    sources
        .iter()
        .rev()
        .find_map(|s| s.records.get(record).map(|r| (s, r)))
}

/// Record store backed by in-memory sources plus one patch layer
#[derive(Debug, Clone)]
pub struct InMemoryGraph {
    sources: Vec<Source>,
    patch: Source,
    next_local_id: u32,
}

impl InMemoryGraph {
    /// Empty graph writing overrides and new records to `patch_source`
    pub fn new(patch_source: impl Into<String>) -> Self {
        Self {
            sources: Vec::new(),
            patch: Source::new(patch_source),
            next_local_id: FIRST_NEW_LOCAL_ID,
        }
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot, patch_source: impl Into<String>) -> Self {
        let mut graph = Self::new(patch_source);
        for source in snapshot.sources {
            graph.add_source(source.name, source.records);
        }
        graph
    }

    /// Append a source with higher priority than every existing one
    pub fn add_source(&mut self, name: impl Into<String>, records: impl IntoIterator<Item = Record>) {
        let mut source = Source::new(name);
        for record in records {
            source.records.insert(record.id.clone(), record);
        }
        self.sources.push(source);
    }

    /// Overrides and new records created this run, ordered by id
    pub fn patch_records(&self) -> impl Iterator<Item = &Record> {
        self.patch.records.values()
    }

    /// The patch layer as a one-source snapshot, for the external writer
    pub fn patch_snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            name: self.patch.name.clone(),
            records: self.patch.records.values().cloned().collect(),
        }
    }

    fn is_new_record(&self, record: &RecordRef) -> bool {
        record.source == self.patch.name
    }

    fn allocate_id(&mut self) -> RecordRef {
        loop {
            let candidate = RecordRef::new(self.patch.name.clone(), self.next_local_id);
            self.next_local_id += 1;
            if !self.patch.records.contains_key(&candidate)
                && winning_in(&self.sources, &candidate).is_none()
            {
                return candidate;
            }
        }
    }
}

impl RecordGraph for InMemoryGraph {
    fn resolve(&self, record: &RecordRef) -> Option<&Record> {
        match winning_in(&self.sources, record) {
            Some((_, r)) => Some(r),
            // Records created this run resolve to themselves
            None if self.is_new_record(record) => self.patch.records.get(record),
            None => None,
        }
    }

    fn override_of(&self, record: &RecordRef) -> Option<&Record> {
        self.patch.records.get(record)
    }

    fn get_or_add_override(&mut self, record: &RecordRef) -> Result<&mut Record, GraphError> {
        match self.patch.records.entry(record.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let (_, winning) = winning_in(&self.sources, record)
                    .ok_or_else(|| GraphError::RecordNotFound(record.clone()))?;
                debug!(record = %record, "created override");
                Ok(entry.insert(winning.clone()))
            }
        }
    }

    fn duplicate_as_new_record(
        &mut self,
        record: &RecordRef,
        editor_id_suffix: &str,
    ) -> Result<RecordRef, GraphError> {
        let mut copy = self
            .current(record)
            .cloned()
            .ok_or_else(|| GraphError::RecordNotFound(record.clone()))?;

        let id = self.allocate_id();
        let base = copy.editor_id.take().unwrap_or_else(|| record.to_string());
        copy.editor_id = Some(format!("{base}{editor_id_suffix}"));
        copy.id = id.clone();

        debug!(original = %record, duplicate = %id, "duplicated record");
        self.patch.records.insert(id.clone(), copy);
        Ok(id)
    }

    fn winning_records(&self, category: RecordCategory, keyword: &RecordRef) -> Vec<WinningRecord<'_>> {
        let mut found = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            for record in source.records.values() {
                // Only report a record at the source holding its winning version
                let overridden_later = self.sources[index + 1..]
                    .iter()
                    .any(|later| later.records.contains_key(&record.id));
                if overridden_later || record.category != category || !record.has_keyword(keyword) {
                    continue;
                }
                found.push(WinningRecord {
                    source: &source.name,
                    record,
                });
            }
        }
        found
    }
}
