//! Record Graph Patcher
//!
//! Grafts counterpart scripts onto inventory/render record pairs.
//!
//! Per entry:
//! 1. Pick the inventory script (counterpart identity first, else source)
//! 2. Check the render record it references resolves
//! 3. Resolve the new inventory script (direct map) and render script (rule
//!    chain) before touching anything
//! 4. Rename + link the inventory script on its override, then attach the
//!    render script to the render override, or to a duplicate of it when
//!    another inventory item already claimed the render record
//!
//! All writes go through [`RecordGraph::get_or_add_override`]. Recoverable
//! conditions come back as [`PatchOutcome::Skipped`]; anything that means the
//! rule table or the scan is broken is a [`PatchError`].

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::GraftConfig;
use crate::error::{GraphError, PatchError, ResolveError};
use crate::record::graph::RecordGraph;
use crate::record::{Property, PropertyValue, Record, RecordRef, ScriptAttachment, ScriptIdentity};
use crate::resolve::{DirectMap, RecordAttributes, RuleEngine};
use crate::scan::CatalogEntry;

/// Why an entry was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoScriptFound,
    InvalidRenderTarget,
    NoInventoryCounterpart,
    NoRenderCounterpart,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NoScriptFound => "no script found",
            SkipReason::InvalidRenderTarget => "invalid render target",
            SkipReason::NoInventoryCounterpart => "no inventory counterpart",
            SkipReason::NoRenderCounterpart => "no render counterpart",
        };
        f.write_str(reason)
    }
}

/// Result of patching one catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PatchOutcome {
    Patched,
    AlreadyPatched,
    /// The render record was already claimed; `record` is the new copy
    DuplicatedNewRecord { record: RecordRef },
    Skipped { reason: SkipReason },
}

fn graph_error(record: &RecordRef) -> impl FnOnce(GraphError) -> PatchError + '_ {
    move |source| PatchError::Graph {
        record: record.clone(),
        source,
    }
}

fn resolve_error(record: &RecordRef) -> impl FnOnce(ResolveError) -> PatchError + '_ {
    move |source| PatchError::Resolution {
        record: record.clone(),
        source,
    }
}

fn attach_markers(record: &mut Record, markers: &[RecordRef]) {
    for marker in markers {
        record.add_keyword(marker.clone());
    }
}

/// Applies the graft protocol using one configuration
pub struct Patcher<'c> {
    config: &'c GraftConfig,
    inventory: DirectMap,
    render: RuleEngine,
}

impl<'c> Patcher<'c> {
    pub fn new(config: &'c GraftConfig) -> Result<Self, ResolveError> {
        Ok(Self {
            config,
            inventory: DirectMap::new(&config.inventory),
            render: RuleEngine::new(&config.render)?,
        })
    }

    pub fn config(&self) -> &GraftConfig {
        self.config
    }

    /// Whether the script already belongs to the counterpart system
    pub fn is_counterpart_inventory_script(&self, name: &str) -> bool {
        self.inventory.is_output(name)
    }

    /// Whether the script belongs to the source system
    ///
    /// Recognition is independent of the inventory direct map having an entry
    /// for it; a recognised script with no entry is skipped later.
    pub fn is_source_inventory_script(&self, name: &str) -> bool {
        self.config.lists_source_script(name)
            || self.inventory.is_input(name)
            || self.render.direct_map().is_input(name)
    }

    /// The inventory script governing `record`
    ///
    /// A counterpart script wins over a source-system one.
    pub fn inventory_script<'r>(&self, record: &'r Record) -> Option<&'r ScriptAttachment> {
        record
            .find_script(|s| self.inventory.is_output(s.as_str()))
            .or_else(|| record.find_script(|s| self.is_source_inventory_script(s.as_str())))
    }

    /// Render record referenced from an inventory script
    pub fn render_target<'s>(&self, script: &'s ScriptAttachment) -> Option<&'s RecordRef> {
        script
            .property(&self.config.render_reference_property)
            .and_then(|p| p.value.as_object())
    }

    /// Counterpart script already attached to a render record, if any
    pub fn render_counterpart<'r>(&self, record: &'r Record) -> Option<&'r ScriptAttachment> {
        record.find_script(|s| self.render.is_output(s.as_str()))
    }

    fn skip(&self, entry: &CatalogEntry, reason: SkipReason) -> Result<PatchOutcome, PatchError> {
        warn!(
            record = %entry.inventory,
            source = %entry.source,
            script = entry.inventory_script.as_ref().map(|s| s.as_str()),
            %reason,
            "skipping entry"
        );
        Ok(PatchOutcome::Skipped { reason })
    }

    /// Patch one catalog entry
    pub fn patch<G: RecordGraph>(
        &self,
        graph: &mut G,
        entry: &CatalogEntry,
    ) -> Result<PatchOutcome, PatchError> {
        let Some(script_name) = entry.inventory_script.clone() else {
            return self.skip(entry, SkipReason::NoScriptFound);
        };
        let Some(render_ref) = entry.render.clone().filter(|r| graph.resolve(r).is_some()) else {
            return self.skip(entry, SkipReason::InvalidRenderTarget);
        };

        let inventory = graph
            .current(&entry.inventory)
            .cloned()
            .ok_or_else(|| GraphError::RecordNotFound(entry.inventory.clone()))
            .map_err(graph_error(&entry.inventory))?;
        if !inventory.has_script_container() {
            return Err(graph_error(&entry.inventory)(GraphError::MissingScriptContainer {
                record: entry.inventory.clone(),
            }));
        }
        let script = inventory
            .script(script_name.as_str())
            .ok_or_else(|| GraphError::ScriptNotFound {
                record: entry.inventory.clone(),
                script: script_name.clone(),
            })
            .map_err(graph_error(&entry.inventory))?;
        let attrs = RecordAttributes::of(&inventory);

        let claimed_slot = graph
            .current(&render_ref)
            .and_then(|r| self.render_counterpart(r))
            .map(|s| s.name.clone());

        if self.is_counterpart_inventory_script(script_name.as_str()) {
            return self.repair_render(graph, entry, script, &attrs, render_ref, claimed_slot);
        }

        let Some(new_inventory) = self.inventory.lookup(script_name.as_str()).cloned() else {
            return self.skip(entry, SkipReason::NoInventoryCounterpart);
        };
        let Some(new_render) = self
            .render
            .resolve_chain(script_name.as_str(), &attrs)
            .map_err(resolve_error(&entry.inventory))?
        else {
            return self.skip(entry, SkipReason::NoRenderCounterpart);
        };
        let render_script = script.copy_as(new_render.clone(), &self.config.property_mapping);

        // Inventory side: rename in place, link, mark
        {
            let record = graph
                .get_or_add_override(&entry.inventory)
                .map_err(graph_error(&entry.inventory))?;
            record
                .rename_script(script_name.as_str(), new_inventory.clone())
                .map_err(graph_error(&entry.inventory))?;
            if let Some(live) = record.script_mut(new_inventory.as_str()) {
                live.set_property(self.config.link_property.clone());
            }
            attach_markers(record, &self.config.markers.inventory);
        }

        match claimed_slot {
            None => {
                let record = graph
                    .get_or_add_override(&render_ref)
                    .map_err(graph_error(&render_ref))?;
                record
                    .attach_script(render_script)
                    .map_err(graph_error(&render_ref))?;
                attach_markers(record, &self.config.markers.render);

                info!(
                    inventory = %entry.inventory,
                    render = %render_ref,
                    inventory_script = %new_inventory,
                    render_script = %new_render,
                    "patched"
                );
                Ok(PatchOutcome::Patched)
            }
            Some(slot) => {
                let duplicate = graph
                    .duplicate_as_new_record(&render_ref, &self.config.duplicate_suffix)
                    .map_err(graph_error(&render_ref))?;
                {
                    let record = graph
                        .get_or_add_override(&duplicate)
                        .map_err(graph_error(&duplicate))?;
                    if !record.replace_script(slot.as_str(), render_script) {
                        return Err(graph_error(&duplicate)(GraphError::ScriptNotFound {
                            record: duplicate.clone(),
                            script: slot,
                        }));
                    }
                    attach_markers(record, &self.config.markers.render);
                }

                let record = graph
                    .get_or_add_override(&entry.inventory)
                    .map_err(graph_error(&entry.inventory))?;
                if let Some(live) = record.script_mut(new_inventory.as_str()) {
                    live.set_property(Property::new(
                        self.config.render_reference_property.clone(),
                        PropertyValue::Object(duplicate.clone()),
                    ));
                }

                info!(
                    inventory = %entry.inventory,
                    render = %render_ref,
                    duplicate = %duplicate,
                    claimed_by = %slot,
                    render_script = %new_render,
                    "render record already claimed; patched a duplicate"
                );
                Ok(PatchOutcome::DuplicatedNewRecord { record: duplicate })
            }
        }
    }

    /// Inventory already carries a counterpart script; graft the render side
    ///
    /// Resolution starts from the configured fallback source script, not the
    /// inventory's own script.
    fn repair_render<G: RecordGraph>(
        &self,
        graph: &mut G,
        entry: &CatalogEntry,
        script: &ScriptAttachment,
        attrs: &RecordAttributes<'_>,
        render_ref: RecordRef,
        claimed_slot: Option<ScriptIdentity>,
    ) -> Result<PatchOutcome, PatchError> {
        if claimed_slot.is_some() {
            return Ok(PatchOutcome::AlreadyPatched);
        }

        let fallback = self.config.fallback_source_script.as_str();
        let Some(new_render) = self
            .render
            .resolve_chain(fallback, attrs)
            .map_err(resolve_error(&entry.inventory))?
        else {
            return self.skip(entry, SkipReason::NoRenderCounterpart);
        };
        let render_script = script.copy_as(new_render.clone(), &self.config.property_mapping);

        let record = graph
            .get_or_add_override(&render_ref)
            .map_err(graph_error(&render_ref))?;
        record
            .attach_script(render_script)
            .map_err(graph_error(&render_ref))?;
        attach_markers(record, &self.config.markers.render);

        info!(
            inventory = %entry.inventory,
            render = %render_ref,
            render_script = %new_render,
            "patched render side of an already patched inventory record"
        );
        Ok(PatchOutcome::Patched)
    }
}
