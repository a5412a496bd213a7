//! Datatype registry
//!
//! Built-in scalar datatypes plus struct types registered at runtime from
//! user type trees. Every datatype also exists in an array form spelled with
//! a `[]` suffix; the suffix is a naming convention, not a distinct kind.
//!
//! The subtype relation is declared per descriptor and only consulted when
//! checking unit compatibility. It is never used to coerce values.

use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::{Number, Value};
use thiserror::Error;

/// Suffix marking the array form of a datatype
pub const ARRAY_SUFFIX: &str = "[]";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatatypeError {
    #[error("unknown datatype '{0}'")]
    UnknownType(String),

    #[error("dynamic datatype '{0}' must be a qualified name containing '.'")]
    InvalidDynamicName(String),

    #[error("datatype '{0}' is already registered")]
    DuplicateType(String),
}

/// Value domain of a datatype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Integer { signed: bool, bits: u32 },
    Boolean,
    Float,
    String,
    Numeric,
    Struct,
}

impl TypeClass {
    /// Membership test for a single (non-array) value
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeClass::Integer { signed, bits }, Value::Number(n)) => {
                integer_in_range(n, *signed, *bits)
            }
            (TypeClass::Boolean, Value::Bool(_)) => true,
            // integral literals count as floats
            (TypeClass::Float, Value::Number(_)) => true,
            (TypeClass::String, Value::String(_)) => true,
            (TypeClass::Numeric, Value::Number(_)) => true,
            (TypeClass::Struct, Value::Mapping(_)) => true,
            _ => false,
        }
    }
}

fn integer_in_range(n: &Number, signed: bool, bits: u32) -> bool {
    let value = match (n.as_i64(), n.as_u64()) {
        (Some(v), _) => i128::from(v),
        (None, Some(v)) => i128::from(v),
        _ => return false,
    };
    let (min, max) = if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    (min..=max).contains(&value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatatypeDescriptor {
    pub name: String,
    pub class: TypeClass,
    pub subtypes: BTreeSet<String>,
}

impl DatatypeDescriptor {
    pub fn accepts(&self, value: &Value) -> bool {
        self.class.accepts(value)
    }
}

const INTEGERS: [&str; 8] = [
    "uint8", "int8", "uint16", "int16", "uint32", "int32", "uint64", "int64",
];

fn builtin_descriptors() -> Vec<DatatypeDescriptor> {
    let int = |signed, bits| TypeClass::Integer { signed, bits };
    let table: [(&str, TypeClass, &[&str]); 13] = [
        ("uint8", int(false, 8), &[]),
        ("int8", int(true, 8), &[]),
        ("uint16", int(false, 16), &["uint8"]),
        ("int16", int(true, 16), &["uint8", "int8"]),
        ("uint32", int(false, 32), &["uint8", "uint16"]),
        ("int32", int(true, 32), &["uint8", "uint16", "int8", "int16"]),
        ("uint64", int(false, 64), &["uint8", "uint16", "uint32"]),
        (
            "int64",
            int(true, 64),
            &["uint8", "uint16", "uint32", "int8", "int16", "int32"],
        ),
        ("boolean", TypeClass::Boolean, &[]),
        ("float", TypeClass::Float, &INTEGERS),
        ("double", TypeClass::Float, &[]),
        ("string", TypeClass::String, &[]),
        ("numeric", TypeClass::Numeric, &[]),
    ];

    table
        .iter()
        .map(|(name, class, subtypes)| {
            let mut subtypes: BTreeSet<String> = subtypes.iter().map(|s| s.to_string()).collect();
            match *name {
                "double" => {
                    subtypes.extend(INTEGERS.iter().map(|s| s.to_string()));
                    subtypes.insert("float".to_string());
                }
                "numeric" => {
                    subtypes.extend(INTEGERS.iter().map(|s| s.to_string()));
                    subtypes.insert("float".to_string());
                    subtypes.insert("double".to_string());
                }
                _ => {}
            }
            DatatypeDescriptor {
                name: name.to_string(),
                class: *class,
                subtypes,
            }
        })
        .collect()
}

/// Whether a datatype name denotes the array form
pub fn is_array(datatype: &str) -> bool {
    datatype.ends_with(ARRAY_SUFFIX)
}

/// Datatype name with any array suffix stripped
pub fn base_type(datatype: &str) -> &str {
    datatype.strip_suffix(ARRAY_SUFFIX).unwrap_or(datatype)
}

/// Registry of built-in and dynamically registered datatypes
#[derive(Debug, Clone)]
pub struct DatatypeRegistry {
    types: BTreeMap<String, DatatypeDescriptor>,
    dynamic: Vec<String>,
}

impl Default for DatatypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DatatypeRegistry {
    pub fn new() -> Self {
        let types = builtin_descriptors()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            types,
            dynamic: vec![],
        }
    }

    /// Register a struct type. The name must be qualified (`Types.MyStruct`)
    /// so it can never shadow a built-in.
    pub fn register_dynamic_type(&mut self, name: &str) -> Result<(), DatatypeError> {
        if !name.contains('.') {
            return Err(DatatypeError::InvalidDynamicName(name.to_string()));
        }
        if self.types.contains_key(name) {
            return Err(DatatypeError::DuplicateType(name.to_string()));
        }
        self.types.insert(
            name.to_string(),
            DatatypeDescriptor {
                name: name.to_string(),
                class: TypeClass::Struct,
                subtypes: BTreeSet::new(),
            },
        );
        self.dynamic.push(name.to_string());
        Ok(())
    }

    /// Drop every dynamic type, returning to the built-in set
    pub fn clear_dynamic(&mut self) {
        for name in self.dynamic.drain(..) {
            self.types.remove(&name);
        }
    }

    pub fn dynamic_types(&self) -> &[String] {
        &self.dynamic
    }

    /// Look up a descriptor; array names resolve to their element descriptor
    pub fn lookup(&self, name: &str) -> Option<&DatatypeDescriptor> {
        self.types.get(base_type(name))
    }

    pub fn is_known(&self, name: &str) -> bool {
        // `uint8[][]` is not a datatype
        !is_array(base_type(name)) && self.lookup(name).is_some()
    }

    fn require(&self, name: &str) -> Result<&DatatypeDescriptor, DatatypeError> {
        if !self.is_known(name) {
            return Err(DatatypeError::UnknownType(name.to_string()));
        }
        self.lookup(name)
            .ok_or_else(|| DatatypeError::UnknownType(name.to_string()))
    }

    /// Membership test. Array types require a sequence whose elements all
    /// pass the element test; an empty sequence is valid.
    pub fn is_value_of_type(&self, value: &Value, type_name: &str) -> Result<bool, DatatypeError> {
        let descriptor = self.require(type_name)?;
        if is_array(type_name) {
            return Ok(match value {
                Value::Sequence(items) => items.iter().all(|v| descriptor.accepts(v)),
                _ => false,
            });
        }
        Ok(descriptor.accepts(value))
    }

    /// Whether `candidate` is a declared subtype of `base`
    pub fn is_subtype_of(&self, candidate: &str, base: &str) -> Result<bool, DatatypeError> {
        self.require(candidate)?;
        let base = self.require(base)?;
        Ok(base.subtypes.contains(base_type(candidate)))
    }

    /// Built-ins, dynamic types and the array form of each
    pub fn all_known_type_names(&self) -> BTreeSet<String> {
        self.types
            .keys()
            .flat_map(|name| [name.clone(), format!("{name}{ARRAY_SUFFIX}")])
            .collect()
    }
}
