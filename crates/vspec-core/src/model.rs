//! Node data model
//!
//! Every node in a vspec tree carries a [`NodeData`] payload: fields common to
//! all kinds plus a kind-specific body. Payloads are built from raw YAML
//! mappings by [`NodeData::from_raw`], which dispatches on the `type` tag and
//! checks all cross-field invariants against the run's [`Registry`].
//!
//! Keys a kind does not declare are kept verbatim as extra attributes, in
//! source order.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Number, Value};
use thiserror::Error;

use crate::datatypes::{base_type, is_array};
use crate::instances::{instances_to_value, parse_instances, InstanceLevel};
use crate::registry::Registry;

static CONST_UID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9A-Fa-f]{8}$").unwrap());

pub const AUTOGENERATED_DESCRIPTION: &str = "Autogenerated branch";

const COMMON_KEYS: &[&str] = &[
    "type",
    "description",
    "comment",
    "delete",
    "deprecation",
    "constUID",
    "fka",
    "instantiate",
];

pub(crate) const DATATYPE_KEYS: &[&str] = &[
    "datatype", "arraysize", "min", "max", "unit", "allowed", "default",
];

pub(crate) const BRANCH_KEYS: &[&str] = &["instances"];

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("unknown node type '{0}'")]
    UnknownKind(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("'{field}': {reason}")]
    Invariant { field: String, reason: String },

    #[error("unknown datatype '{0}'")]
    UnknownDatatype(String),

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
}

impl ModelError {
    fn invariant(field: &str, reason: impl Into<String>) -> Self {
        ModelError::Invariant {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// A [`ModelError`] located at a node
#[derive(Debug, Error, Clone, PartialEq)]
#[error("node '{fqn}': {source}")]
pub struct NodeError {
    pub fqn: String,
    #[source]
    pub source: ModelError,
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Branch,
    Attribute,
    Sensor,
    Actuator,
    Struct,
    Property,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Branch => "branch",
            NodeKind::Attribute => "attribute",
            NodeKind::Sensor => "sensor",
            NodeKind::Actuator => "actuator",
            NodeKind::Struct => "struct",
            NodeKind::Property => "property",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "branch" => Some(NodeKind::Branch),
            "attribute" => Some(NodeKind::Attribute),
            "sensor" => Some(NodeKind::Sensor),
            "actuator" => Some(NodeKind::Actuator),
            "struct" => Some(NodeKind::Struct),
            "property" => Some(NodeKind::Property),
            _ => None,
        }
    }

    pub fn has_datatype(&self) -> bool {
        matches!(
            self,
            NodeKind::Attribute | NodeKind::Sensor | NodeKind::Actuator | NodeKind::Property
        )
    }

    fn declared_keys(&self) -> impl Iterator<Item = &'static str> {
        let specific: &[&str] = match self {
            NodeKind::Branch => BRANCH_KEYS,
            k if k.has_datatype() => DATATYPE_KEYS,
            _ => &[],
        };
        COMMON_KEYS.iter().chain(specific.iter()).copied()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommonFields {
    pub description: String,
    pub comment: Option<String>,
    /// Marks the subtree for pruning
    pub delete: bool,
    pub deprecation: Option<String>,
    pub const_uid: Option<String>,
    /// Former names
    pub fka: Vec<String>,
    /// Whether the node is copied into every instance of its parent
    pub instantiate: bool,
    pub extra: Mapping,
}

impl CommonFields {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            comment: None,
            delete: false,
            deprecation: None,
            const_uid: None,
            fka: vec![],
            instantiate: true,
            extra: Mapping::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatatypeFields {
    pub datatype: String,
    pub arraysize: Option<u64>,
    pub min: Option<Number>,
    pub max: Option<Number>,
    pub unit: Option<String>,
    pub allowed: Option<Vec<Value>>,
    pub default: Option<Value>,
}

impl DatatypeFields {
    pub fn new(datatype: impl Into<String>) -> Self {
        Self {
            datatype: datatype.into(),
            arraysize: None,
            min: None,
            max: None,
            unit: None,
            allowed: None,
            default: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchFields {
    pub instances: Vec<InstanceLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    Branch(BranchFields),
    Attribute(DatatypeFields),
    Sensor(DatatypeFields),
    Actuator(DatatypeFields),
    Struct,
    Property(DatatypeFields),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub common: CommonFields,
    pub body: NodeBody,
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

/// Deserialize a declared field, treating an explicit null as absent
fn field<T: DeserializeOwned>(map: &Mapping, key: &str) -> Result<Option<T>, ModelError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_yaml::from_value(value.clone())
            .map(Some)
            .map_err(|e| ModelError::InvalidField {
                field: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

fn required<T: DeserializeOwned>(map: &Mapping, key: &str) -> Result<T, ModelError> {
    field(map, key)?.ok_or_else(|| ModelError::MissingField(key.to_string()))
}

impl NodeData {
    /// Build and validate a payload from its raw mapping
    pub fn from_raw(raw: &Value, registry: &Registry) -> Result<Self, ModelError> {
        let map = raw.as_mapping().ok_or_else(|| ModelError::InvalidField {
            field: "payload".to_string(),
            reason: "expected a mapping".to_string(),
        })?;

        let tag: String = required(map, "type")?;
        let kind = NodeKind::parse(&tag).ok_or(ModelError::UnknownKind(tag))?;

        let mut declared = Mapping::new();
        let mut extra = Mapping::new();
        for (key, value) in map {
            let is_declared = key
                .as_str()
                .map(|k| kind.declared_keys().any(|d| d == k))
                .unwrap_or(false);
            if is_declared {
                declared.insert(key.clone(), value.clone());
            } else {
                extra.insert(key.clone(), value.clone());
            }
        }

        let common = CommonFields {
            description: required(&declared, "description")?,
            comment: field(&declared, "comment")?,
            delete: field(&declared, "delete")?.unwrap_or(false),
            deprecation: field(&declared, "deprecation")?,
            const_uid: field(&declared, "constUID")?,
            fka: field(&declared, "fka")?.unwrap_or_default(),
            instantiate: field(&declared, "instantiate")?.unwrap_or(true),
            extra,
        };

        let body = match kind {
            NodeKind::Branch => {
                let instances = match declared.get("instances") {
                    Some(value) => {
                        parse_instances(value).map_err(|reason| ModelError::InvalidField {
                            field: "instances".to_string(),
                            reason,
                        })?
                    }
                    None => vec![],
                };
                NodeBody::Branch(BranchFields { instances })
            }
            NodeKind::Struct => NodeBody::Struct,
            _ => {
                let fields = DatatypeFields {
                    datatype: required(&declared, "datatype")?,
                    arraysize: field(&declared, "arraysize")?,
                    min: field(&declared, "min")?,
                    max: field(&declared, "max")?,
                    unit: field(&declared, "unit")?,
                    allowed: field(&declared, "allowed")?,
                    default: field(&declared, "default")?,
                };
                match kind {
                    NodeKind::Attribute => NodeBody::Attribute(fields),
                    NodeKind::Sensor => NodeBody::Sensor(fields),
                    NodeKind::Actuator => NodeBody::Actuator(fields),
                    _ => NodeBody::Property(fields),
                }
            }
        };

        let data = NodeData { common, body };
        data.validate(registry)?;
        Ok(data)
    }

    pub fn branch(description: impl Into<String>) -> Self {
        NodeData {
            common: CommonFields::new(description),
            body: NodeBody::Branch(BranchFields::default()),
        }
    }

    /// Payload for a branch synthesized to connect a subtree
    pub fn autogenerated_branch() -> Self {
        Self::branch(AUTOGENERATED_DESCRIPTION)
    }

    // =========================================================================
    // INVARIANTS
    // =========================================================================

    /// Check every cross-field invariant of the payload
    pub fn validate(&self, registry: &Registry) -> Result<(), ModelError> {
        if let Some(uid) = &self.common.const_uid {
            if !CONST_UID.is_match(uid) {
                return Err(ModelError::invariant(
                    "constUID",
                    format!("'{uid}' does not match 0xXXXXXXXX"),
                ));
            }
        }
        match self.datatype_fields() {
            Some(fields) => validate_datatype_fields(fields, registry),
            None => Ok(()),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Branch(_) => NodeKind::Branch,
            NodeBody::Attribute(_) => NodeKind::Attribute,
            NodeBody::Sensor(_) => NodeKind::Sensor,
            NodeBody::Actuator(_) => NodeKind::Actuator,
            NodeBody::Struct => NodeKind::Struct,
            NodeBody::Property(_) => NodeKind::Property,
        }
    }

    pub fn datatype_fields(&self) -> Option<&DatatypeFields> {
        match &self.body {
            NodeBody::Attribute(f)
            | NodeBody::Sensor(f)
            | NodeBody::Actuator(f)
            | NodeBody::Property(f) => Some(f),
            _ => None,
        }
    }

    pub fn datatype(&self) -> Option<&str> {
        self.datatype_fields().map(|f| f.datatype.as_str())
    }

    pub fn instances(&self) -> &[InstanceLevel] {
        match &self.body {
            NodeBody::Branch(b) => &b.instances,
            _ => &[],
        }
    }

    pub fn clear_instances(&mut self) {
        if let NodeBody::Branch(b) = &mut self.body {
            b.instances.clear();
        }
    }

    /// Names of attributes outside the kind's declared schema
    pub fn additional_fields(&self) -> Vec<String> {
        self.common
            .extra
            .keys()
            .map(|k| match k.as_str() {
                Some(s) => s.to_string(),
                None => format!("{:?}", k),
            })
            .collect()
    }

    // =========================================================================
    // SERIALIZATION
    // =========================================================================

    /// Exporter view of the payload. Internal flags (`delete`,
    /// `instantiate`) are not included.
    pub fn as_dict(&self, with_extra_attributes: bool) -> Mapping {
        let mut out = Mapping::new();
        let mut put = |key: &str, value: Value| {
            out.insert(Value::String(key.to_string()), value);
        };
        let c = &self.common;

        put("type", Value::String(self.kind().as_str().to_string()));
        put("description", Value::String(c.description.clone()));
        if let Some(comment) = &c.comment {
            put("comment", Value::String(comment.clone()));
        }
        if let Some(f) = self.datatype_fields() {
            put("datatype", Value::String(f.datatype.clone()));
            if let Some(size) = f.arraysize {
                put("arraysize", Value::Number(size.into()));
            }
            if let Some(min) = &f.min {
                put("min", Value::Number(min.clone()));
            }
            if let Some(max) = &f.max {
                put("max", Value::Number(max.clone()));
            }
            if let Some(unit) = &f.unit {
                put("unit", Value::String(unit.clone()));
            }
            if let Some(allowed) = &f.allowed {
                put("allowed", Value::Sequence(allowed.clone()));
            }
            if let Some(default) = &f.default {
                put("default", default.clone());
            }
        }
        if let Some(deprecation) = &c.deprecation {
            put("deprecation", Value::String(deprecation.clone()));
        }
        if let Some(uid) = &c.const_uid {
            put("constUID", Value::String(uid.clone()));
        }
        if !c.fka.is_empty() {
            put(
                "fka",
                Value::Sequence(c.fka.iter().cloned().map(Value::String).collect()),
            );
        }
        if !self.instances().is_empty() {
            put("instances", instances_to_value(self.instances()));
        }
        if with_extra_attributes {
            for (key, value) in &c.extra {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }

    /// Full raw form, accepted back by [`NodeData::from_raw`]
    pub fn to_raw(&self) -> Mapping {
        let mut raw = self.as_dict(true);
        if self.common.delete {
            raw.insert(Value::String("delete".into()), Value::Bool(true));
        }
        if !self.common.instantiate {
            raw.insert(Value::String("instantiate".into()), Value::Bool(false));
        }
        raw
    }
}

fn validate_datatype_fields(f: &DatatypeFields, registry: &Registry) -> Result<(), ModelError> {
    let datatype = f.datatype.as_str();
    if !registry.datatypes.is_known(datatype) {
        return Err(ModelError::UnknownDatatype(datatype.to_string()));
    }
    let element_type = base_type(datatype);
    let is_member = |value: &Value, type_name: &str| {
        registry
            .is_value_of_type(value, type_name)
            .map_err(|_| ModelError::UnknownDatatype(type_name.to_string()))
    };

    if f.arraysize.is_some() && !is_array(datatype) {
        return Err(ModelError::invariant(
            "arraysize",
            format!("set on non-array datatype '{datatype}'"),
        ));
    }

    if let Some(default) = &f.default {
        match (is_array(datatype), default) {
            (true, Value::Sequence(items)) => {
                if let Some(size) = f.arraysize {
                    if items.len() as u64 != size {
                        return Err(ModelError::invariant(
                            "default",
                            format!("has {} elements but arraysize is {size}", items.len()),
                        ));
                    }
                }
            }
            (true, _) => {
                return Err(ModelError::invariant(
                    "default",
                    format!("scalar default for array datatype '{datatype}'"),
                ))
            }
            (false, Value::Sequence(_)) => {
                return Err(ModelError::invariant(
                    "default",
                    format!("list default for scalar datatype '{datatype}'"),
                ))
            }
            (false, _) => {}
        }
        if !is_member(default, datatype)? {
            return Err(ModelError::invariant(
                "default",
                format!("{} is not of type '{datatype}'", render(default)),
            ));
        }
        if let Some(allowed) = &f.allowed {
            let values = match default {
                Value::Sequence(items) => items.as_slice(),
                scalar => std::slice::from_ref(scalar),
            };
            if let Some(bad) = values.iter().find(|v| !allowed.contains(v)) {
                return Err(ModelError::invariant(
                    "default",
                    format!("value {} is not in 'allowed'", render(bad)),
                ));
            }
        }
    }

    if let Some(allowed) = &f.allowed {
        for value in allowed {
            if !is_member(value, element_type)? {
                return Err(ModelError::invariant(
                    "allowed",
                    format!("{} is not of type '{element_type}'", render(value)),
                ));
            }
        }
        if f.min.is_some() || f.max.is_some() {
            return Err(ModelError::invariant(
                "allowed",
                "'min/max' and 'allowed' cannot be used together",
            ));
        }
    }

    if let Some(unit_name) = &f.unit {
        let unit = registry
            .lookup_unit(unit_name)
            .ok_or_else(|| ModelError::UnknownUnit(unit_name.clone()))?;
        let compatible = registry
            .units
            .is_unit_compatible(unit, datatype, &registry.datatypes)
            .map_err(|_| ModelError::UnknownDatatype(datatype.to_string()))?;
        if !compatible {
            return Err(ModelError::invariant(
                "unit",
                format!(
                    "unit '{unit_name}' does not allow datatype '{datatype}' (allowed: {})",
                    unit.allowed_datatypes.join(", ")
                ),
            ));
        }
    }

    Ok(())
}

fn render(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{:?}", value))
}
