//! End-to-end runs of the compiler pipeline over fixture files

use std::fs;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use serde_yaml::{Mapping, Value};
use tempfile::TempDir;
use vss_compiler::vspec_core::{CoreError, NodeKind, PolicyError};
use vss_compiler::{get_trees, to_json, AbortCategory, CompilerError, PipelineConfig};

const QUANTITIES: &str = r#"
velocity:
  definition: Rate of change of position
length:
  definition: Extent of something along its greatest dimension
"#;

const UNITS: &str = r#"
km/h:
  definition: Velocity measured in kilometers per hours
  unit: kilometer per hour
  quantity: velocity
  allowed-datatypes: ['float', 'numeric']
mm:
  definition: Distance measured in millimeters
  unit: millimeter
  quantity: length
  allowed-datatypes: ['uint16']
"#;

const ROOT: &str = r#"
Vehicle:
  type: branch
  description: High-level vehicle data.

#include Cabin.vspec Vehicle

Vehicle.Speed:
  type: sensor
  description: Vehicle speed.
  datatype: float
  unit: km/h
"#;

const CABIN: &str = r#"
Cabin:
  type: branch
  description: All in-cabin components.

Cabin.Door:
  type: branch
  description: All doors.
  instances: Row[1,2]

Cabin.Door.IsOpen:
  type: actuator
  description: Is door open.
  datatype: boolean

Cabin.Door.Width:
  type: attribute
  description: Door width.
  datatype: uint16
  unit: mm
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self {
            dir: TempDir::new().unwrap(),
        };
        fixture.write("quantities.yaml", QUANTITIES);
        fixture.write("units.yaml", UNITS);
        fixture
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn vehicle(&self) -> PipelineConfig {
        self.write("Cabin.vspec", CABIN);
        PipelineConfig::new(self.write("root.vspec", ROOT))
    }
}

fn fqns(tree: &vss_compiler::vspec_core::Tree) -> Vec<String> {
    tree.preorder().into_iter().map(|id| tree.fqn(id)).collect()
}

#[test]
fn test_two_node_scenario() {
    let fixture = Fixture::new();
    let text = r#"
Vehicle:
  type: branch
  description: root
Vehicle.Speed:
  type: sensor
  description: spd
  datatype: float
  unit: km/h
"#;
    let mut config = PipelineConfig::new(fixture.write("root.vspec", text));
    config.strict = true;

    let trees = get_trees(&config).unwrap();
    assert_eq!(trees.root.node_count(), 2);
    assert!(trees.types_root.is_none());

    let expected: Mapping = serde_yaml::from_str(text).unwrap();
    assert_eq!(trees.root.as_flat_dict(false), expected);
}

#[test]
fn test_includes_and_instances() {
    let fixture = Fixture::new();
    let trees = get_trees(&fixture.vehicle()).unwrap();
    assert_eq!(
        fqns(&trees.root),
        vec![
            "Vehicle",
            "Vehicle.Speed",
            "Vehicle.Cabin",
            "Vehicle.Cabin.Door",
            "Vehicle.Cabin.Door.Row1",
            "Vehicle.Cabin.Door.Row1.IsOpen",
            "Vehicle.Cabin.Door.Row1.Width",
            "Vehicle.Cabin.Door.Row2",
            "Vehicle.Cabin.Door.Row2.IsOpen",
            "Vehicle.Cabin.Door.Row2.Width",
        ]
    );
    assert_eq!(trees.registry.units.unit_count(), 2);
}

#[test]
fn test_expansion_can_be_disabled() {
    let fixture = Fixture::new();
    let mut config = fixture.vehicle();
    config.expand = false;
    let trees = get_trees(&config).unwrap();
    let door = trees.root.find("Vehicle.Cabin.Door").unwrap();
    assert_eq!(trees.root.node(door).data.instances().len(), 1);
    assert!(trees.root.find("Vehicle.Cabin.Door.IsOpen").is_some());
}

#[test]
fn test_overlay_refines_adds_and_deletes() {
    let fixture = Fixture::new();
    let mut config = fixture.vehicle();
    config.overlays = vec![fixture.write(
        "overlay.vspec",
        r#"
Vehicle.Speed:
  description: Speed over ground.
Vehicle.Cabin.Door.Row1.IsOpen:
  description: Is driver door open.
Vehicle.Cabin.Door.Row2:
  delete: true
Vehicle.Body.Hood.IsOpen:
  type: actuator
  description: Is hood open.
  datatype: boolean
"#,
    )];

    let trees = get_trees(&config).unwrap();
    let tree = &trees.root;

    let speed = tree.node(tree.find("Vehicle.Speed").unwrap());
    assert_eq!(speed.data.common.description, "Speed over ground.");
    assert_eq!(
        speed.data.datatype_fields().unwrap().unit.as_deref(),
        Some("km/h")
    );

    let row1 = tree.node(tree.find("Vehicle.Cabin.Door.Row1.IsOpen").unwrap());
    assert_eq!(row1.data.common.description, "Is driver door open.");
    assert_eq!(row1.data.kind(), NodeKind::Actuator);

    assert!(tree.find("Vehicle.Cabin.Door.Row2").is_none());

    let body = tree.find("Vehicle.Body").unwrap();
    assert!(tree.node(body).autogenerated);
    assert!(tree.find("Vehicle.Body.Hood.IsOpen").is_some());
}

#[test]
fn test_overlay_instances_expand_before_merge() {
    let fixture = Fixture::new();
    let mut config = fixture.vehicle();
    config.overlays = vec![fixture.write(
        "seats.vspec",
        r#"
Vehicle.Cabin.Seat:
  type: branch
  description: Seats.
  instances: Pos[1,2]
Vehicle.Cabin.Seat.IsBelted:
  type: sensor
  description: Is belted.
  datatype: boolean
"#,
    )];
    let trees = get_trees(&config).unwrap();
    assert!(trees.root.find("Vehicle.Cabin.Seat.Pos2.IsBelted").is_some());
    assert!(trees.root.find("Vehicle.Cabin.Seat.IsBelted").is_none());
}

#[test]
fn test_delete_addresses_an_instance_path() {
    let fixture = Fixture::new();
    let text = r#"
Vehicle:
  type: branch
  description: root
Vehicle.Seat:
  type: branch
  description: seat
  instances: Row[1,2]
Vehicle.Seat.Height:
  type: actuator
  description: height
  datatype: uint16
  unit: mm
Vehicle.Seat.Row2.Height:
  type: actuator
  description: height
  datatype: uint16
  unit: mm
  delete: true
"#;
    let trees = get_trees(&PipelineConfig::new(fixture.write("root.vspec", text))).unwrap();
    assert_eq!(
        fqns(&trees.root),
        vec![
            "Vehicle",
            "Vehicle.Seat",
            "Vehicle.Seat.Row1",
            "Vehicle.Seat.Row1.Height",
            "Vehicle.Seat.Row2",
        ]
    );
}

#[test]
fn test_user_types() {
    let fixture = Fixture::new();
    let mut config = fixture.vehicle();
    config.types = vec![fixture.write(
        "types.vspec",
        r#"
Types:
  type: branch
  description: User types.
Types.Position:
  type: struct
  description: A position.
Types.Position.Latitude:
  type: property
  description: Latitude.
  datatype: double
Types.Position.Longitude:
  type: property
  description: Longitude.
  datatype: double
"#,
    )];
    fixture.write(
        "root.vspec",
        &format!("{ROOT}\nVehicle.Location:\n  type: sensor\n  description: Where.\n  datatype: Types.Position\n"),
    );

    let trees = get_trees(&config).unwrap();
    assert!(trees.registry.lookup("Types.Position").is_some());
    let types_root = trees.types_root.unwrap();
    assert_eq!(types_root.node_count(), 4);
    let location = trees.root.find("Vehicle.Location").unwrap();
    assert_eq!(
        trees.root.node(location).data.datatype(),
        Some("Types.Position")
    );
}

#[test]
fn test_unknown_struct_type_is_fatal() {
    let fixture = Fixture::new();
    let config = PipelineConfig::new(fixture.write(
        "root.vspec",
        "Vehicle:\n  type: branch\n  description: r\nVehicle.Location:\n  type: sensor\n  description: w\n  datatype: Types.Position\n",
    ));
    assert!(matches!(
        get_trees(&config),
        Err(CompilerError::Core(CoreError::Build(_)))
    ));
}

#[test]
fn test_name_style_is_a_warning_unless_strict() {
    let fixture = Fixture::new();
    let mut config = PipelineConfig::new(fixture.write(
        "root.vspec",
        "Vehicle:\n  type: branch\n  description: r\nVehicle.door_count:\n  type: attribute\n  description: n\n  datatype: uint8\n",
    ));
    assert!(get_trees(&config).is_ok());

    config.aborts = vec![AbortCategory::NameStyle];
    match get_trees(&config) {
        Err(CompilerError::Core(CoreError::Policy(PolicyError::NameViolations(v)))) => {
            assert_eq!(v.len(), 1);
            assert_eq!(v[0].path, "Vehicle.door_count");
        }
        other => panic!("expected name violations, got {:?}", other.map(|t| t.root.node_count())),
    }
}

#[test]
fn test_ignored_policy_skips_extra_attributes() {
    let fixture = Fixture::new();
    let mut config = PipelineConfig::new(fixture.write(
        "root.vspec",
        "Vehicle:\n  type: branch\n  description: r\nVehicle.Speed:\n  type: sensor\n  description: s\n  datatype: float\n  x-owner: powertrain\n",
    ));
    config.ignore = vec![AbortCategory::UnknownAttribute];
    assert!(get_trees(&config).is_ok());

    config.aborts = vec![AbortCategory::UnknownAttribute];
    assert!(matches!(
        get_trees(&config),
        Err(CompilerError::Core(CoreError::Policy(
            PolicyError::ExtraAttributes(_)
        )))
    ));
}

#[test]
fn test_extended_attributes() {
    let fixture = Fixture::new();
    let mut config = PipelineConfig::new(fixture.write(
        "root.vspec",
        "Vehicle:\n  type: branch\n  description: r\nVehicle.Speed:\n  type: sensor\n  description: s\n  datatype: float\n  x-owner: powertrain\n",
    ));
    config.strict = true;
    assert!(matches!(
        get_trees(&config),
        Err(CompilerError::Core(CoreError::Policy(
            PolicyError::ExtraAttributes(_)
        )))
    ));

    config.extended_attributes = vec!["x-owner".to_string()];
    let trees = get_trees(&config).unwrap();
    let json: serde_json::Value = serde_json::from_str(&to_json(&trees.root, &config).unwrap()).unwrap();
    assert_eq!(json["Vehicle.Speed"]["x-owner"], "powertrain");
}

#[test]
fn test_uuids_are_stable() {
    let fixture = Fixture::new();
    let mut config = fixture.vehicle();
    config.uuid = true;

    let first = get_trees(&config).unwrap().root.as_flat_dict(false);
    let second = get_trees(&config).unwrap().root.as_flat_dict(false);
    assert_eq!(first, second);

    let uuid = first
        .get("Vehicle.Speed")
        .and_then(|v| v.get("uuid"))
        .and_then(Value::as_str)
        .unwrap();
    assert_eq!(uuid.len(), 32);
}

#[test]
fn test_unit_incompatible_with_datatype_is_fatal() {
    let fixture = Fixture::new();
    let config = PipelineConfig::new(fixture.write(
        "root.vspec",
        "Vehicle:\n  type: branch\n  description: r\nVehicle.Speed:\n  type: sensor\n  description: s\n  datatype: string\n  unit: km/h\n",
    ));
    match get_trees(&config) {
        Err(CompilerError::Core(CoreError::Build(e))) => {
            assert!(e.to_string().contains("Vehicle.Speed"));
        }
        other => panic!("expected build error, got {:?}", other.map(|t| t.root.node_count())),
    }
}

#[test]
fn test_missing_units_file_leaves_registry_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("root.vspec");
    fs::write(&path, "Vehicle:\n  type: branch\n  description: r\n").unwrap();
    let trees = get_trees(&PipelineConfig::new(path)).unwrap();
    assert_eq!(trees.registry.units.unit_count(), 0);
}
