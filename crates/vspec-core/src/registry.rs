//! Per-run type and unit registry
//!
//! Constructed once per compilation, populated during setup and passed by
//! reference to everything that resolves datatypes or units afterwards.

use std::collections::BTreeSet;
use std::path::Path;

use serde_yaml::Value;

use crate::datatypes::{DatatypeDescriptor, DatatypeError, DatatypeRegistry};
use crate::units::{UnitDescriptor, UnitError, UnitRegistry};

#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub datatypes: DatatypeRegistry,
    pub units: UnitRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dynamic_type(&mut self, name: &str) -> Result<(), DatatypeError> {
        self.datatypes.register_dynamic_type(name)
    }

    pub fn register_dynamic_unit(&mut self, unit: UnitDescriptor) -> Result<(), UnitError> {
        self.units.register_dynamic_unit(unit, &self.datatypes)
    }

    pub fn lookup(&self, name: &str) -> Option<&DatatypeDescriptor> {
        self.datatypes.lookup(name)
    }

    pub fn lookup_unit(&self, unit: &str) -> Option<&UnitDescriptor> {
        self.units.lookup(unit)
    }

    pub fn is_value_of_type(&self, value: &Value, type_name: &str) -> Result<bool, DatatypeError> {
        self.datatypes.is_value_of_type(value, type_name)
    }

    pub fn is_subtype_of(&self, candidate: &str, base: &str) -> Result<bool, DatatypeError> {
        self.datatypes.is_subtype_of(candidate, base)
    }

    pub fn all_known_type_names(&self) -> BTreeSet<String> {
        self.datatypes.all_known_type_names()
    }

    pub fn load_quantity_file(&mut self, path: &Path) -> Result<usize, UnitError> {
        self.units.load_quantity_file(path)
    }

    pub fn load_unit_file(&mut self, path: &Path) -> Result<usize, UnitError> {
        self.units.load_unit_file(path, &self.datatypes)
    }

    /// Forget dynamic types, units and quantities
    pub fn reset(&mut self) {
        self.datatypes.clear_dynamic();
        self.units.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::QuantityDescriptor;

    #[test]
    fn test_reset_drops_dynamic_state() {
        let mut reg = Registry::new();
        reg.register_dynamic_type("Types.Point").unwrap();
        reg.units.register_quantity(
            "length",
            QuantityDescriptor {
                definition: "len".into(),
                comment: None,
                remark: None,
            },
        );
        reg.register_dynamic_unit(UnitDescriptor {
            symbol: "m".into(),
            definition: "meter".into(),
            name: "meter".into(),
            quantity: "length".into(),
            allowed_datatypes: vec!["float".into()],
        })
        .unwrap();
        assert!(reg.lookup("Types.Point[]").is_some());
        assert!(reg.lookup_unit("meter").is_some());

        reg.reset();
        assert!(reg.lookup("Types.Point").is_none());
        assert!(reg.lookup_unit("m").is_none());
        assert!(reg.lookup("uint8").is_some());
    }
}
