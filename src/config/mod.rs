//! Graft configuration
//!
//! Loaded once at process start from YAML and passed explicitly into the
//! rule engine, patcher and scan. Immutable for the run.
//!
//! ```yaml
//! sources: [Devices.esm, Expansion.esp]
//! markers:
//!   source: "000010:Devices.esm"
//!   inventory: ["000800:Graft.esm"]
//!   render: ["000801:Graft.esm"]
//! render_reference_property: deviceRendered
//! link_property:
//!   name: graftQuest
//!   value: { kind: object, value: "000802:Graft.esm" }
//! fallback_source_script: zad_InventoryScript
//! source_scripts: [zad_BeltScript]
//! property_mapping:
//!   deviceRendered: renderTarget
//!   zad_DeviousDevice: ~
//! inventory:
//!   - output: zadx_InventoryScript
//!     inputs: [zad_InventoryScript, zad_GagScript]
//! render:
//!   direct:
//!     - output: zadx_RenderScript
//!       inputs: [zad_InventoryScript, zad_GagScript]
//!   groups:
//!     - name: gags
//!       inputs: [zadx_RenderScript]
//!       keyword_rules:
//!         - priority: 1
//!           keywords: ["000020:Devices.esm"]
//!           output: zadx_GagRenderScript
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::record::{Property, RecordRef, ScriptIdentity};
use crate::resolve::RuleEngine;

fn default_duplicate_suffix() -> String {
    "_Graft".to_string()
}

/// Root of a graft configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraftConfig {
    /// Sources to include in the scan, in priority order. Empty means all.
    #[serde(default)]
    pub sources: Vec<String>,

    pub markers: MarkerConfig,

    /// Inventory script property that references the render record
    pub render_reference_property: String,

    /// Fixed property added to every patched inventory script
    pub link_property: Property,

    /// Source-system script used to resolve the render side when the
    /// inventory side is already patched
    pub fallback_source_script: ScriptIdentity,

    /// Extra source-system inventory scripts. Inputs of either direct map
    /// and the fallback script are recognised without being listed here.
    #[serde(default)]
    pub source_scripts: Vec<ScriptIdentity>,

    /// Appended to the editor id of duplicated render records
    #[serde(default = "default_duplicate_suffix")]
    pub duplicate_suffix: String,

    /// Allow-list (and renames) for properties copied into render scripts
    #[serde(default)]
    pub property_mapping: PropertyMapping,

    /// Direct map from source-system to counterpart inventory scripts
    #[serde(default)]
    pub inventory: Vec<DirectMapping>,

    /// Rule store for render scripts
    #[serde(default)]
    pub render: RuleStoreConfig,
}

impl GraftConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a configuration document
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GraftConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the rule tables compile
    pub fn validate(&self) -> Result<(), ConfigError> {
        RuleEngine::new(&self.render)?;
        Ok(())
    }

    /// Whether the script is a listed source-system script
    pub fn lists_source_script(&self, name: &str) -> bool {
        self.fallback_source_script.as_str() == name
            || self.source_scripts.iter().any(|s| s.as_str() == name)
    }

    pub fn includes_source(&self, source: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == source)
    }
}

/// Marker keywords recording processing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Carried by inventory records the scan should pick up
    pub source: RecordRef,
    /// Attached to patched inventory records
    #[serde(default)]
    pub inventory: Vec<RecordRef>,
    /// Attached to patched render records
    #[serde(default)]
    pub render: Vec<RecordRef>,
}

/// One direct-map entry: output script replacing a set of inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMapping {
    pub output: ScriptIdentity,
    pub inputs: Vec<ScriptIdentity>,
}

/// Rule matching on record keywords
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordRuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Lower number wins
    #[serde(default)]
    pub priority: i32,
    pub keywords: Vec<RecordRef>,
    #[serde(default)]
    pub inputs: Vec<ScriptIdentity>,
    #[serde(default)]
    pub output: Option<ScriptIdentity>,
}

/// Rule matching on the record display name (case-insensitive regex)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameRuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Lower number wins
    #[serde(default)]
    pub priority: i32,
    pub pattern: String,
    #[serde(default)]
    pub inputs: Vec<ScriptIdentity>,
    #[serde(default)]
    pub output: Option<ScriptIdentity>,
}

/// Keyword and name rules scoped to a set of input scripts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleGroupConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<ScriptIdentity>,
    #[serde(default)]
    pub keyword_rules: Vec<KeywordRuleConfig>,
    #[serde(default)]
    pub name_rules: Vec<NameRuleConfig>,
}

/// Layered rule store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleStoreConfig {
    #[serde(default)]
    pub direct: Vec<DirectMapping>,
    /// Ungrouped keyword rules; each needs its own inputs
    #[serde(default)]
    pub keyword_rules: Vec<KeywordRuleConfig>,
    /// Ungrouped name rules; each needs its own inputs
    #[serde(default)]
    pub name_rules: Vec<NameRuleConfig>,
    #[serde(default)]
    pub groups: Vec<RuleGroupConfig>,
}

/// Property allow-list: name → optional new name
///
/// `~` keeps the original name. Names not listed are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMapping(HashMap<String, Option<String>>);

impl PropertyMapping {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        )
    }

    /// Name the property takes in the copy, or None if it is dropped
    pub fn target_name<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        match self.0.get(name) {
            Some(Some(renamed)) => Some(renamed.as_str()),
            Some(None) => Some(name),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
sources: [Devices.esm]
markers:
  source: "000010:Devices.esm"
  inventory: ["000800:Graft.esm"]
  render: ["000801:Graft.esm"]
render_reference_property: deviceRendered
link_property:
  name: graftQuest
  value: { kind: object, value: "000802:Graft.esm" }
fallback_source_script: zad_InventoryScript
source_scripts: [zad_BeltScript]
property_mapping:
  deviceRendered: renderTarget
  zad_DeviousDevice: ~
inventory:
  - output: zadx_InventoryScript
    inputs: [zad_InventoryScript]
render:
  direct:
    - output: zadx_RenderScript
      inputs: [zad_InventoryScript]
  groups:
    - name: gags
      inputs: [zadx_RenderScript]
      keyword_rules:
        - priority: 1
          keywords: ["000020:Devices.esm"]
          output: zadx_GagRenderScript
"#;

    #[test]
    fn test_parse_sample() {
        let config = GraftConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.markers.source, RecordRef::new("Devices.esm", 0x10));
        assert_eq!(config.duplicate_suffix, "_Graft");
        assert_eq!(config.render.groups.len(), 1);
        assert_eq!(
            config.property_mapping.target_name("deviceRendered"),
            Some("renderTarget")
        );
        assert_eq!(
            config.property_mapping.target_name("zad_DeviousDevice"),
            Some("zad_DeviousDevice")
        );
        assert_eq!(config.property_mapping.target_name("other"), None);
        assert!(config.lists_source_script("zad_BeltScript"));
        assert!(config.lists_source_script("zad_InventoryScript"));
        assert!(!config.lists_source_script("zadx_InventoryScript"));
        assert!(config.includes_source("Devices.esm"));
        assert!(!config.includes_source("Other.esp"));
    }

    #[test]
    fn test_missing_output_rejected() {
        let broken = SAMPLE.replace("          output: zadx_GagRenderScript\n", "");
        let err = GraftConfig::from_yaml_str(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Rules(_)), "got {err}");
    }

    #[test]
    fn test_invalid_record_ref_rejected() {
        let broken = SAMPLE.replace("000010:Devices.esm", "not-a-ref");
        let err = GraftConfig::from_yaml_str(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)), "got {err}");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = GraftConfig::from_file(file.path()).unwrap();
        assert_eq!(config.inventory.len(), 1);

        let err = GraftConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
