//! Plain data definitions of a space system tree.
//!
//! These mirror the parts of an XTCE document the content model needs. They can be
//! deserialized from JSON or built in code.
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::ItemType;
use crate::entry_value::{Operator, ValueForm};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSystem {
    #[builder(setter(into))]
    pub name: String,
    #[builder(default)]
    #[serde(default)]
    pub parameter_types: Vec<ItemType>,
    #[builder(default)]
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[builder(default)]
    #[serde(default)]
    pub argument_types: Vec<ItemType>,
    #[builder(default)]
    #[serde(default)]
    pub containers: Vec<SequenceContainer>,
    #[builder(default)]
    #[serde(default)]
    pub meta_commands: Vec<MetaCommand>,
    #[builder(default)]
    #[serde(default)]
    pub space_systems: Vec<SpaceSystem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    #[builder(setter(into))]
    pub name: String,
    /// Reference to a parameter type, relative to the owning space system.
    #[builder(setter(into))]
    pub type_ref: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    #[builder(setter(into))]
    pub name: String,
    /// Reference to an argument type, relative to the owning space system.
    #[builder(setter(into))]
    pub type_ref: String,
    /// Calibrated value used when nothing else assigns one.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub initial_value: Option<String>,
}

/// A single comparison, used for restriction criteria and include conditions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    #[builder(setter(into))]
    pub parameter_ref: String,
    #[builder(default)]
    #[serde(default)]
    pub operator: Operator,
    #[builder(setter(into))]
    pub value: String,
    #[builder(default = ValueForm::Calibrated)]
    #[serde(default = "default_form")]
    pub form: ValueForm,
}

fn default_form() -> ValueForm {
    ValueForm::Calibrated
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceLocation {
    #[default]
    PreviousEntry,
    ContainerStart,
    ContainerEnd,
    NextEntry,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub reference: ReferenceLocation,
    #[serde(default)]
    pub offset: i64,
}

impl Location {
    #[must_use]
    pub fn new(reference: ReferenceLocation, offset: i64) -> Self {
        Self { reference, offset }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Repeat {
    Fixed(u64),
    /// Count taken from an already resolved item, as `slope * value + intercept`.
    #[serde(rename_all = "camelCase")]
    Dynamic {
        parameter_ref: String,
        #[serde(default = "default_slope")]
        slope: i64,
        #[serde(default)]
        intercept: i64,
    },
}

fn default_slope() -> i64 {
    1
}

impl Repeat {
    pub fn dynamic(parameter_ref: impl Into<String>) -> Self {
        Self::Dynamic {
            parameter_ref: parameter_ref.into(),
            slope: 1,
            intercept: 0,
        }
    }
}

/// What a container or command entry refers to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryRef {
    Parameter(String),
    Argument(String),
    Container(String),
    /// A constant of `size_in_bits` bits; `value` is hex (`0x` prefixed) or decimal.
    #[serde(rename_all = "camelCase")]
    FixedValue {
        name: String,
        size_in_bits: u64,
        value: String,
    },
    Array(String),
    Stream(String),
    Indirect(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SequenceEntry {
    pub reference: EntryRef,
    #[builder(default)]
    #[serde(default)]
    pub location: Location,
    #[builder(default)]
    #[serde(default)]
    pub include_conditions: Vec<Comparison>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub repeat: Option<Repeat>,
}

impl SequenceEntry {
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::builder()
            .reference(EntryRef::Parameter(name.into()))
            .build()
    }

    pub fn argument(name: impl Into<String>) -> Self {
        Self::builder()
            .reference(EntryRef::Argument(name.into()))
            .build()
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::builder()
            .reference(EntryRef::Container(name.into()))
            .build()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct BaseContainer {
    #[builder(setter(into))]
    pub container_ref: String,
    #[builder(default)]
    #[serde(default)]
    pub restriction_criteria: Vec<Comparison>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SequenceContainer {
    #[builder(setter(into))]
    pub name: String,
    #[builder(default)]
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub base: Option<BaseContainer>,
    #[builder(default)]
    #[serde(default)]
    pub entries: Vec<SequenceEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentAssignment {
    #[builder(setter(into))]
    pub argument_name: String,
    #[builder(setter(into))]
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct BaseMetaCommand {
    #[builder(setter(into))]
    pub command_ref: String,
    #[builder(default)]
    #[serde(default)]
    pub argument_assignments: Vec<ArgumentAssignment>,
}

/// Telecommand definition with its arguments and command container entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct MetaCommand {
    #[builder(setter(into))]
    pub name: String,
    #[builder(default)]
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub base: Option<BaseMetaCommand>,
    #[builder(default)]
    #[serde(default)]
    pub arguments: Vec<Argument>,
    #[builder(default)]
    #[serde(default)]
    pub entries: Vec<SequenceEntry>,
}
