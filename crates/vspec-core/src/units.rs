//! Unit and quantity registry
//!
//! Populated from definition files mapping a key to a record. Unit files are
//! keyed by the canonical symbol (`km/h`) and carry the long name in their
//! `unit` field; both spellings resolve to the same descriptor.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::datatypes::{self, DatatypeRegistry};

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("unit '{unit}' references unknown quantity '{quantity}'")]
    UnknownQuantity { unit: String, quantity: String },

    #[error("unit '{unit}' allows unknown datatype '{datatype}'")]
    UnknownDatatype { unit: String, datatype: String },

    #[error("malformed entry '{key}': {reason}")]
    Malformed { key: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuantityDescriptor {
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UnitDescriptor {
    /// Canonical symbol, taken from the definition file key
    #[serde(skip)]
    pub symbol: String,
    pub definition: String,
    /// Long name
    #[serde(rename = "unit")]
    pub name: String,
    pub quantity: String,
    #[serde(rename = "allowed-datatypes")]
    pub allowed_datatypes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    quantities: BTreeMap<String, QuantityDescriptor>,
    units: BTreeMap<String, UnitDescriptor>,
    /// long name -> symbol
    aliases: BTreeMap<String, String>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_quantity(&mut self, name: impl Into<String>, quantity: QuantityDescriptor) {
        self.quantities.insert(name.into(), quantity);
    }

    /// Register a unit after checking its quantity and datatypes are known
    pub fn register_dynamic_unit(
        &mut self,
        unit: UnitDescriptor,
        datatypes: &DatatypeRegistry,
    ) -> Result<(), UnitError> {
        if !self.quantities.contains_key(&unit.quantity) {
            return Err(UnitError::UnknownQuantity {
                unit: unit.symbol.clone(),
                quantity: unit.quantity.clone(),
            });
        }
        if let Some(bad) = unit
            .allowed_datatypes
            .iter()
            .find(|dt| !datatypes.is_known(dt))
        {
            return Err(UnitError::UnknownDatatype {
                unit: unit.symbol.clone(),
                datatype: bad.clone(),
            });
        }
        if unit.name != unit.symbol {
            self.aliases.insert(unit.name.clone(), unit.symbol.clone());
        }
        self.units.insert(unit.symbol.clone(), unit);
        Ok(())
    }

    /// Resolve a unit by symbol or long name
    pub fn lookup(&self, unit: &str) -> Option<&UnitDescriptor> {
        self.units.get(unit).or_else(|| {
            self.aliases
                .get(unit)
                .and_then(|symbol| self.units.get(symbol))
        })
    }

    pub fn quantity(&self, name: &str) -> Option<&QuantityDescriptor> {
        self.quantities.get(name)
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn quantity_count(&self) -> usize {
        self.quantities.len()
    }

    /// Whether `datatype` may carry `unit`: its base type must be one of the
    /// unit's allowed datatypes or a registered subtype of one.
    pub fn is_unit_compatible(
        &self,
        unit: &UnitDescriptor,
        datatype: &str,
        datatypes: &DatatypeRegistry,
    ) -> Result<bool, datatypes::DatatypeError> {
        let base = datatypes::base_type(datatype);
        for allowed in &unit.allowed_datatypes {
            let allowed = datatypes::base_type(allowed);
            if allowed == base || datatypes.is_subtype_of(base, allowed)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn clear(&mut self) {
        self.quantities.clear();
        self.units.clear();
        self.aliases.clear();
    }

    // =========================================================================
    // LOADING
    // =========================================================================

    /// Load quantity definitions from YAML text
    pub fn load_quantities_str(&mut self, text: &str, source: &str) -> Result<usize, UnitError> {
        let entries = parse_definitions(text, source)?;
        let count = entries.len();
        for (key, value) in entries {
            let quantity: QuantityDescriptor =
                serde_yaml::from_value(value).map_err(|e| UnitError::Malformed {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            self.register_quantity(key, quantity);
        }
        info!("Loaded {} quantities from {}", count, source);
        Ok(count)
    }

    /// Load unit definitions from YAML text. Quantities must be loaded first.
    pub fn load_units_str(
        &mut self,
        text: &str,
        source: &str,
        datatypes: &DatatypeRegistry,
    ) -> Result<usize, UnitError> {
        let entries = parse_definitions(text, source)?;
        let count = entries.len();
        for (key, value) in entries {
            let mut unit: UnitDescriptor =
                serde_yaml::from_value(value).map_err(|e| UnitError::Malformed {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            unit.symbol = key;
            self.register_dynamic_unit(unit, datatypes)?;
        }
        info!("Loaded {} units from {}", count, source);
        Ok(count)
    }

    pub fn load_quantity_file(&mut self, path: &Path) -> Result<usize, UnitError> {
        let text = read_file(path)?;
        self.load_quantities_str(&text, &path.display().to_string())
    }

    pub fn load_unit_file(
        &mut self,
        path: &Path,
        datatypes: &DatatypeRegistry,
    ) -> Result<usize, UnitError> {
        let text = read_file(path)?;
        self.load_units_str(&text, &path.display().to_string(), datatypes)
    }
}

fn read_file(path: &Path) -> Result<String, UnitError> {
    std::fs::read_to_string(path).map_err(|source| UnitError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse_definitions(text: &str, source: &str) -> Result<Vec<(String, Value)>, UnitError> {
    let doc: Value = serde_yaml::from_str(text).map_err(|e| UnitError::Malformed {
        key: source.to_string(),
        reason: e.to_string(),
    })?;
    let mapping = match doc {
        Value::Null => {
            warn!("{} is empty", source);
            return Ok(vec![]);
        }
        Value::Mapping(m) if m.is_empty() => {
            warn!("{} is empty", source);
            return Ok(vec![]);
        }
        Value::Mapping(m) => m,
        _ => {
            return Err(UnitError::Malformed {
                key: source.to_string(),
                reason: "expected a mapping of definitions".to_string(),
            })
        }
    };
    mapping_entries(mapping)
}

fn mapping_entries(mapping: Mapping) -> Result<Vec<(String, Value)>, UnitError> {
    mapping
        .into_iter()
        .map(|(k, v)| match k {
            Value::String(key) => Ok((key, v)),
            other => Err(UnitError::Malformed {
                key: format!("{:?}", other),
                reason: "definition keys must be strings".to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUANTITIES: &str = r#"
velocity:
  definition: Rate of change of position
length:
  definition: Extent of something along its greatest dimension
  remark: SI base quantity
"#;

    const UNITS: &str = r#"
km/h:
  definition: Velocity measured in kilometers per hours
  unit: kilometer per hour
  quantity: velocity
  allowed-datatypes: ['numeric']
mm:
  definition: Distance measured in millimeters
  unit: millimeter
  quantity: length
  allowed-datatypes: ['uint16', 'float']
"#;

    fn loaded() -> (UnitRegistry, DatatypeRegistry) {
        let types = DatatypeRegistry::new();
        let mut units = UnitRegistry::new();
        units.load_quantities_str(QUANTITIES, "quantities.yaml").unwrap();
        units.load_units_str(UNITS, "units.yaml", &types).unwrap();
        (units, types)
    }

    #[test]
    fn test_lookup_by_symbol_and_name() {
        let (units, _) = loaded();
        assert_eq!(units.unit_count(), 2);
        assert_eq!(units.quantity_count(), 2);
        let by_symbol = units.lookup("km/h").unwrap();
        let by_name = units.lookup("kilometer per hour").unwrap();
        assert_eq!(by_symbol, by_name);
        assert_eq!(by_symbol.symbol, "km/h");
        assert!(units.lookup("furlong").is_none());
        assert_eq!(
            units.quantity("length").and_then(|q| q.remark.as_deref()),
            Some("SI base quantity")
        );
    }

    #[test]
    fn test_unit_compatibility_uses_subtypes() {
        let (units, types) = loaded();
        let mm = units.lookup("mm").unwrap();
        assert!(units.is_unit_compatible(mm, "uint16", &types).unwrap());
        assert!(units.is_unit_compatible(mm, "uint8", &types).unwrap());
        assert!(units.is_unit_compatible(mm, "int8", &types).unwrap());
        assert!(units.is_unit_compatible(mm, "float[]", &types).unwrap());
        assert!(!units.is_unit_compatible(mm, "double", &types).unwrap());
        assert!(!units.is_unit_compatible(mm, "string", &types).unwrap());

        let kmh = units.lookup("km/h").unwrap();
        assert!(units.is_unit_compatible(kmh, "double", &types).unwrap());
        assert!(!units.is_unit_compatible(kmh, "boolean", &types).unwrap());
    }

    #[test]
    fn test_unknown_quantity_rejected() {
        let types = DatatypeRegistry::new();
        let mut units = UnitRegistry::new();
        let err = units.load_units_str(UNITS, "units.yaml", &types).unwrap_err();
        assert!(matches!(err, UnitError::UnknownQuantity { ref unit, .. } if unit == "km/h"));
    }

    #[test]
    fn test_unknown_datatype_rejected() {
        let types = DatatypeRegistry::new();
        let mut units = UnitRegistry::new();
        units.load_quantities_str(QUANTITIES, "q").unwrap();
        let text = "mm:\n  definition: d\n  unit: millimeter\n  quantity: length\n  allowed-datatypes: ['int128']\n";
        let err = units.load_units_str(text, "u", &types).unwrap_err();
        assert!(matches!(err, UnitError::UnknownDatatype { ref datatype, .. } if datatype == "int128"));
    }

    #[test]
    fn test_malformed_entry_names_key() {
        let types = DatatypeRegistry::new();
        let mut units = UnitRegistry::new();
        units.load_quantities_str(QUANTITIES, "q").unwrap();
        let text = "mm:\n  definition: d\n  quantity: length\n  allowed-datatypes: []\n";
        match units.load_units_str(text, "u", &types) {
            Err(UnitError::Malformed { key, reason }) => {
                assert_eq!(key, "mm");
                assert!(reason.contains("unit"), "{reason}");
            }
            other => panic!("expected malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_file_loads_nothing() {
        let mut units = UnitRegistry::new();
        assert_eq!(units.load_quantities_str("", "empty.yaml").unwrap(), 0);
        assert_eq!(units.quantity_count(), 0);
    }
}
