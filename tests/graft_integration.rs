//! Integration tests for the graft batch pass
//!
//! Tests verify:
//! 1. Render scripts resolve through keyword and name rule groups
//! 2. A claimed render record is duplicated, never overwritten
//! 3. No-match entries are skipped without touching any record
//! 4. Rule cycles abort the run
//! 5. Repeated runs over the same catalog are identical

use proptest::prelude::*;
use script_graft::{
    run_batch, Catalog, GraftConfig, InMemoryGraph, PatchError, PatchOutcome, Patcher, Property,
    PropertyValue, Record, RecordCategory, RecordGraph, RecordRef, ResolveError,
    ScriptAttachment, SkipReason,
};

// ============================================================================
// TEST FIXTURES
// ============================================================================

const DEV: &str = "Devices.esm";
const PATCH: &str = "ScriptGraft.esp";

const CONFIG: &str = r#"
markers:
  source: "000010:Devices.esm"
  inventory: ["000001:Graft.esm"]
  render: ["000002:Graft.esm"]
render_reference_property: deviceRendered
link_property:
  name: graftQuest
  value: { kind: object, value: "000003:Graft.esm" }
fallback_source_script: zad_InventoryScript
property_mapping:
  deviceRendered: renderTarget
  deviceName: ~
inventory:
  - output: zadx_InventoryScript
    inputs: [zad_InventoryScript, zad_GagScript]
render:
  direct:
    - output: zadx_RenderScript
      inputs: [zad_InventoryScript, zad_GagScript]
  groups:
    - name: gags
      inputs: [zadx_RenderScript]
      keyword_rules:
        - priority: 2
          keywords: ["000020:Devices.esm"]
          output: zadx_GagRenderScript
        - priority: 1
          keywords: ["000021:Devices.esm"]
          output: zadx_PanelGagRenderScript
      name_rules:
        - pattern: "collar"
          output: zadx_CollarRenderScript
"#;

fn r(id: u32) -> RecordRef {
    RecordRef::new(DEV, id)
}

fn marker() -> RecordRef {
    r(0x10)
}

fn config() -> GraftConfig {
    GraftConfig::from_yaml_str(CONFIG).expect("fixture config parses")
}

fn inventory(id: u32, render: u32, script: &str) -> Record {
    Record::new(r(id), RecordCategory::Inventory)
        .with_editor_id(format!("zad_Item{id:X}"))
        .with_keyword(marker())
        .with_script(
            ScriptAttachment::new(script)
                .with_property(Property::new("deviceRendered", PropertyValue::Object(r(render))))
                .with_property(Property::new("deviceName", PropertyValue::String(format!("item {id}"))))
                .with_property(Property::new("zad_Internal", PropertyValue::Int(7))),
        )
}

fn render(id: u32) -> Record {
    Record::new(r(id), RecordCategory::Render).with_editor_id(format!("zad_Item{id:X}AA"))
}

fn graph(records: Vec<Record>) -> InMemoryGraph {
    let mut graph = InMemoryGraph::new(PATCH);
    graph.add_source(DEV, records);
    graph
}

// ============================================================================
// RESOLUTION THROUGH THE BATCH
// ============================================================================

#[test]
fn test_keyword_priority_decides_render_script() {
    let config = config();
    let item = inventory(1, 2, "zad_GagScript")
        .with_keyword(r(0x20))
        .with_keyword(r(0x21));
    let mut graph = graph(vec![item, render(2)]);

    let summary = run_batch(&mut graph, &config).unwrap();
    assert_eq!(summary.patched, 1);

    let render = graph.override_of(&r(2)).unwrap();
    assert!(render.script("zadx_PanelGagRenderScript").is_some());
    assert!(render.script("zadx_GagRenderScript").is_none());
}

#[test]
fn test_name_rule_applies_case_insensitively() {
    let config = config();
    let item = inventory(1, 2, "zad_InventoryScript").with_name("Iron COLLAR");
    let mut graph = graph(vec![item, render(2)]);

    run_batch(&mut graph, &config).unwrap();

    let render = graph.override_of(&r(2)).unwrap();
    let script = render.script("zadx_CollarRenderScript").unwrap();
    let names: Vec<&str> = script.properties.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["renderTarget", "deviceName"]);
}

#[test]
fn test_inventory_side_renamed_linked_and_marked() {
    let config = config();
    let mut graph = graph(vec![inventory(1, 2, "zad_InventoryScript"), render(2)]);

    run_batch(&mut graph, &config).unwrap();

    let inv = graph.override_of(&r(1)).unwrap();
    assert!(inv.script("zad_InventoryScript").is_none());
    let live = inv.script("zadx_InventoryScript").unwrap();
    // untouched properties survive the rename
    assert!(live.property("zad_Internal").is_some());
    assert_eq!(
        live.property("graftQuest").unwrap().value,
        PropertyValue::Object(RecordRef::new("Graft.esm", 3))
    );
    assert!(inv.has_keyword(&RecordRef::new("Graft.esm", 1)));

    // shared originals are never mutated
    let original = graph.resolve(&r(1)).unwrap();
    assert!(original.script("zad_InventoryScript").is_some());
    assert!(graph.resolve(&r(2)).unwrap().scripts().is_empty());
}

// ============================================================================
// CONFLICT DUPLICATION
// ============================================================================

#[test]
fn test_shared_render_record_is_duplicated() {
    let config = config();
    let first = inventory(1, 5, "zad_InventoryScript").with_keyword(r(0x20));
    let second = inventory(2, 5, "zad_InventoryScript").with_name("Steel Collar");
    let mut graph = graph(vec![first, second, render(5)]);

    let summary = run_batch(&mut graph, &config).unwrap();
    assert_eq!(summary.patched, 1);
    assert_eq!(summary.duplicated, 1);

    let duplicate = match &summary.entries[1].outcome {
        PatchOutcome::DuplicatedNewRecord { record } => record.clone(),
        other => panic!("expected duplicate, got {other:?}"),
    };
    assert_ne!(duplicate, r(5));
    assert_eq!(duplicate.source, PATCH);

    // original override keeps the first item's script
    let original = graph.override_of(&r(5)).unwrap();
    let kept = original.script("zadx_GagRenderScript").unwrap();
    assert_eq!(
        kept.property("renderTarget").unwrap().value,
        PropertyValue::Object(r(5))
    );
    assert_eq!(original.scripts().len(), 1);

    // the duplicate carries the second item's script in the same slot
    let copy = graph.resolve(&duplicate).unwrap();
    assert_eq!(copy.editor_id.as_deref(), Some("zad_Item5AA_Graft"));
    assert_eq!(copy.scripts().len(), 1);
    assert!(copy.script("zadx_CollarRenderScript").is_some());

    // second inventory item now points at the duplicate
    let inv = graph.override_of(&r(2)).unwrap();
    let live = inv.script("zadx_InventoryScript").unwrap();
    assert_eq!(
        live.property("deviceRendered").unwrap().value,
        PropertyValue::Object(duplicate)
    );
}

#[test]
fn test_marker_keywords_attached_once() {
    let config = config();
    let mut graph = graph(vec![render(2)]);
    graph.add_source(
        "Tweaks.esp",
        vec![inventory(1, 2, "zad_InventoryScript").with_keyword(RecordRef::new("Graft.esm", 1))],
    );

    run_batch(&mut graph, &config).unwrap();

    let inv = graph.override_of(&r(1)).unwrap();
    let count = inv
        .keywords
        .iter()
        .filter(|k| **k == RecordRef::new("Graft.esm", 1))
        .count();
    assert_eq!(count, 1);
}

// ============================================================================
// SKIPS AND FATAL ERRORS
// ============================================================================

#[test]
fn test_no_direct_match_skips_without_changes() {
    let mut config = config();
    config.source_scripts = vec!["zad_BeltScript".into()];
    let mut graph = graph(vec![inventory(1, 2, "zad_BeltScript"), render(2)]);

    let summary = run_batch(&mut graph, &config).unwrap();
    assert_eq!(summary.patched, 0);
    assert_eq!(summary.skipped.get(&SkipReason::NoInventoryCounterpart), Some(&1));
    assert_eq!(summary.skipped.get(&SkipReason::NoScriptFound), None);
    assert_eq!(graph.patch_records().count(), 0);
}

#[test]
fn test_render_only_source_script_has_no_inventory_counterpart() {
    let mut config = config();
    config.render.direct[0].inputs.push("zad_BeltScript".into());
    let mut graph = graph(vec![inventory(1, 2, "zad_BeltScript"), render(2)]);

    let summary = run_batch(&mut graph, &config).unwrap();
    assert_eq!(summary.skipped.get(&SkipReason::NoInventoryCounterpart), Some(&1));
    assert_eq!(summary.total_skipped(), 1);
    assert_eq!(graph.patch_records().count(), 0);
}

#[test]
fn test_unrecognised_script_is_no_script_found() {
    let config = config();
    let mut graph = graph(vec![inventory(1, 2, "zad_UnknownScript"), render(2)]);

    let summary = run_batch(&mut graph, &config).unwrap();
    assert_eq!(summary.skipped.get(&SkipReason::NoScriptFound), Some(&1));
    assert_eq!(summary.skipped.get(&SkipReason::NoInventoryCounterpart), None);
    assert_eq!(graph.patch_records().count(), 0);
}

#[test]
fn test_no_render_counterpart_skips_without_changes() {
    let mut config = config();
    config.render.direct.clear();
    let mut graph = graph(vec![inventory(1, 2, "zad_InventoryScript"), render(2)]);

    let summary = run_batch(&mut graph, &config).unwrap();
    assert_eq!(summary.skipped.get(&SkipReason::NoRenderCounterpart), Some(&1));
    assert_eq!(graph.patch_records().count(), 0);
}

#[test]
fn test_scan_filters_unmarked_and_excluded_sources() {
    let mut config = config();
    config.sources = vec![DEV.to_string()];
    let mut unmarked = inventory(1, 3, "zad_InventoryScript");
    unmarked.keywords.clear();
    let mut graph = graph(vec![unmarked, inventory(2, 3, "zad_InventoryScript"), render(3)]);
    graph.add_source("Other.esp", vec![inventory(4, 3, "zad_InventoryScript")]);

    let patcher = Patcher::new(&config).unwrap();
    let catalog = Catalog::discover(&graph, &patcher);
    let ids: Vec<&RecordRef> = catalog.entries().iter().map(|e| &e.inventory).collect();
    assert_eq!(ids, vec![&r(2)]);
    assert_eq!(catalog.entries()[0].render, Some(r(3)));
}

#[test]
fn test_rule_cycle_aborts_run() {
    let cyclic = CONFIG.replace(
        "      name_rules:\n        - pattern: \"collar\"\n          output: zadx_CollarRenderScript\n",
        "    - name: loop\n      inputs: [zadx_GagRenderScript]\n      keyword_rules:\n        - keywords: [\"000020:Devices.esm\"]\n          output: zadx_RenderScript\n",
    );
    let config = GraftConfig::from_yaml_str(&cyclic).unwrap();
    let item = inventory(1, 2, "zad_InventoryScript").with_keyword(r(0x20));
    let mut graph = graph(vec![item, render(2)]);

    let err = run_batch(&mut graph, &config).unwrap_err();
    match err {
        PatchError::Resolution {
            record,
            source: ResolveError::Cycle { from, to, .. },
        } => {
            assert_eq!(record, r(1));
            assert_eq!(from.as_str(), "zadx_GagRenderScript");
            assert_eq!(to.as_str(), "zadx_RenderScript");
        }
        other => panic!("expected cycle, got {other}"),
    }
}

// ============================================================================
// DETERMINISM
// ============================================================================

fn catalog_records(items: &[(u32, u32, bool)]) -> Vec<Record> {
    let mut records: Vec<Record> = items
        .iter()
        .map(|(id, render_id, gag)| {
            let item = inventory(0x100 + id, 0x200 + render_id, "zad_InventoryScript");
            if *gag {
                item.with_keyword(r(0x20))
            } else {
                item
            }
        })
        .collect();
    records.extend((0..4).map(|i| render(0x200 + i)));
    records
}

proptest! {
    #[test]
    fn prop_runs_are_deterministic(items in proptest::collection::vec((0u32..16, 0u32..4, any::<bool>()), 0..12)) {
        let config = config();
        let mut unique = items.clone();
        unique.sort_by_key(|(id, _, _)| *id);
        unique.dedup_by_key(|(id, _, _)| *id);

        let mut first = graph(catalog_records(&unique));
        let mut second = graph(catalog_records(&unique));
        let a = run_batch(&mut first, &config).unwrap();
        let b = run_batch(&mut second, &config).unwrap();

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.patched + a.duplicated, unique.len());
        let left: Vec<&Record> = first.patch_records().collect();
        let right: Vec<&Record> = second.patch_records().collect();
        prop_assert_eq!(left, right);
    }
}
