//! Record data model
//!
//! Records are addressed by [`RecordRef`], a stable `(source, local id)` pair.
//! The same `RecordRef` may appear in several sources; the last source that
//! carries it holds the winning version. Mutation always happens on an
//! override obtained from a [`graph::RecordGraph`].

pub mod graph;

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::PropertyMapping;
use crate::error::{ConfigError, GraphError};

/// Stable identity of a catalog record
///
/// Text form is `"{local_id:06X}:{source}"`, e.g. `000D62:Devices.esm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordRef {
    /// Source of origin (the file that first defined the record)
    pub source: String,
    /// Numeric id local to the source of origin
    pub local_id: u32,
}

impl RecordRef {
    pub fn new(source: impl Into<String>, local_id: u32) -> Self {
        Self {
            source: source.into(),
            local_id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}:{}", self.local_id, self.source)
    }
}

impl FromStr for RecordRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRecordRef(s.to_string());
        let (id, source) = s.trim().split_once(':').ok_or_else(invalid)?;
        let id = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .unwrap_or(id);
        let local_id = u32::from_str_radix(id, 16).map_err(|_| invalid())?;
        if source.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(source, local_id))
    }
}

impl TryFrom<String> for RecordRef {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecordRef> for String {
    fn from(value: RecordRef) -> Self {
        value.to_string()
    }
}

/// Name of a script; the unit of rule matching
///
/// Equality is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptIdentity(String);

impl ScriptIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ScriptIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ScriptIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Record category as seen by the scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    /// Item the player carries (owns the source script)
    Inventory,
    /// Visual counterpart referenced from the inventory script
    Render,
}

/// Kind tag of a script property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Object,
    String,
    Int,
    Float,
    Bool,
}

/// Typed value of a script property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Object(RecordRef),
    String(String),
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Object(_) => PropertyKind::Object,
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Bool(_) => PropertyKind::Bool,
        }
    }

    /// Referenced record, for object properties
    pub fn as_object(&self) -> Option<&RecordRef> {
        match self {
            PropertyValue::Object(r) => Some(r),
            _ => None,
        }
    }
}

/// A named, typed script property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
    /// Set when the value differs from the script's compiled default
    #[serde(default)]
    pub edited: bool,
}

impl Property {
    /// New property, flagged as edited
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
            edited: true,
        }
    }

    pub fn kind(&self) -> PropertyKind {
        self.value.kind()
    }
}

/// A script attached to a record, with its property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptAttachment {
    pub name: ScriptIdentity,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl ScriptAttachment {
    pub fn new(name: impl Into<ScriptIdentity>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.set_property(property);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Replace the property with the same name, or append it
    pub fn set_property(&mut self, property: Property) {
        match self.property_mut(&property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    /// Copy this script under a new name, keeping only allow-listed properties
    ///
    /// Properties keep their original relative order; a mapped name renames
    /// the property, an unmapped allow-list entry keeps the original name.
    pub fn copy_as(&self, name: ScriptIdentity, mapping: &PropertyMapping) -> ScriptAttachment {
        let properties = self
            .properties
            .iter()
            .filter_map(|p| {
                mapping.target_name(&p.name).map(|target| Property {
                    name: target.to_string(),
                    value: p.value.clone(),
                    edited: p.edited,
                })
            })
            .collect();

        ScriptAttachment { name, properties }
    }
}

/// A catalog record: the subset of fields the patcher reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "ref")]
    pub id: RecordRef,
    pub category: RecordCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_id: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub keywords: SmallVec<[RecordRef; 4]>,
    /// Script container; `None` when the record has none at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<Vec<ScriptAttachment>>,
}

impl Record {
    pub fn new(id: RecordRef, category: RecordCategory) -> Self {
        Self {
            id,
            category,
            editor_id: None,
            name: None,
            keywords: SmallVec::new(),
            scripts: None,
        }
    }

    pub fn with_editor_id(mut self, editor_id: impl Into<String>) -> Self {
        self.editor_id = Some(editor_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_keyword(mut self, keyword: RecordRef) -> Self {
        self.add_keyword(keyword);
        self
    }

    pub fn with_script(mut self, script: ScriptAttachment) -> Self {
        self.scripts.get_or_insert_with(Vec::new).push(script);
        self
    }

    pub fn has_keyword(&self, keyword: &RecordRef) -> bool {
        self.keywords.contains(keyword)
    }

    /// Add a keyword unless already present. Returns true if it was added.
    pub fn add_keyword(&mut self, keyword: RecordRef) -> bool {
        if self.has_keyword(&keyword) {
            return false;
        }
        self.keywords.push(keyword);
        true
    }

    pub fn has_script_container(&self) -> bool {
        self.scripts.is_some()
    }

    /// Attached scripts, empty when there is no container
    pub fn scripts(&self) -> &[ScriptAttachment] {
        self.scripts.as_deref().unwrap_or(&[])
    }

    pub fn script(&self, name: &str) -> Option<&ScriptAttachment> {
        self.scripts().iter().find(|s| s.name.as_str() == name)
    }

    pub fn script_mut(&mut self, name: &str) -> Option<&mut ScriptAttachment> {
        self.scripts
            .as_mut()?
            .iter_mut()
            .find(|s| s.name.as_str() == name)
    }

    /// First attached script satisfying `pred`, in attachment order
    pub fn find_script(&self, pred: impl Fn(&ScriptIdentity) -> bool) -> Option<&ScriptAttachment> {
        self.scripts().iter().find(|s| pred(&s.name))
    }

    /// Attach a script, creating the container if needed
    ///
    /// Fails with [`GraphError::ScriptConflict`] if a script with the same
    /// name is already attached; use [`Record::replace_script`] for that.
    pub fn attach_script(&mut self, script: ScriptAttachment) -> Result<(), GraphError> {
        if self.script(script.name.as_str()).is_some() {
            return Err(GraphError::ScriptConflict {
                record: self.id.clone(),
                script: script.name,
            });
        }
        self.scripts.get_or_insert_with(Vec::new).push(script);
        Ok(())
    }

    /// Replace the script named `slot` in place. Returns false if absent.
    pub fn replace_script(&mut self, slot: &str, script: ScriptAttachment) -> bool {
        match self.script_mut(slot) {
            Some(existing) => {
                *existing = script;
                true
            }
            None => false,
        }
    }

    /// Rename an attached script, keeping its slot and properties
    pub fn rename_script(&mut self, from: &str, to: ScriptIdentity) -> Result<(), GraphError> {
        if from != to.as_str() && self.script(to.as_str()).is_some() {
            return Err(GraphError::ScriptConflict {
                record: self.id.clone(),
                script: to,
            });
        }
        let record = self.id.clone();
        let script = self
            .script_mut(from)
            .ok_or_else(|| GraphError::ScriptNotFound {
                record,
                script: ScriptIdentity::from(from),
            })?;
        script.name = to;
        Ok(())
    }
}
