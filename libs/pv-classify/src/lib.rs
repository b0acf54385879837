//! # pv-classify
//!
//! Maps the metadata of a connected process variable, its native field type
//! and its record type, to the [`DisplayType`] used to present it.
//!
//! The mapping is a static rule table ([`RULES`]); the first matching rule
//! wins and pairs that match nothing fall back to [`DisplayType::Unknown`].
//! Classification never fails.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The semantic kind a PV is presented as
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayType {
    /// integer or floating point value
    Numeric,
    /// multi-state choice
    Enum,
    /// two-state choice
    Binary,
    /// text
    String,
    /// motor record, addressed through its value field
    Motor,
    /// nothing in the table matched
    #[default]
    Unknown,
}

impl DisplayType {
    /// all display types, in table order
    pub const ALL: [DisplayType; 6] = [
        DisplayType::Numeric,
        DisplayType::Enum,
        DisplayType::Binary,
        DisplayType::String,
        DisplayType::Motor,
        DisplayType::Unknown,
    ];

    /// lowercase name, as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayType::Numeric => "numeric",
            DisplayType::Enum => "enum",
            DisplayType::Binary => "binary",
            DisplayType::String => "string",
            DisplayType::Motor => "motor",
            DisplayType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// error parsing a type name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized {kind} name {name:?}")]
pub struct ParseTypeError {
    kind: &'static str,
    name: String,
}

impl FromStr for DisplayType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisplayType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseTypeError {
                kind: "display type",
                name: s.to_owned(),
            })
    }
}

/// Native field type of a channel, as reported by the protocol client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[allow(missing_docs)]
    String,
    #[allow(missing_docs)]
    Short,
    #[allow(missing_docs)]
    Float,
    #[allow(missing_docs)]
    Enum,
    #[allow(missing_docs)]
    Char,
    #[allow(missing_docs)]
    Long,
    #[allow(missing_docs)]
    Double,
    /// not connected, no access, or a type we don't know about
    Unknown,
}

// time_ and ctrl_ variants carry the same value type
static FIELD_TYPE_NAMES: phf::Map<&'static str, FieldType> = phf::phf_map! {
    "string" => FieldType::String,
    "time_string" => FieldType::String,
    "ctrl_string" => FieldType::String,
    "short" => FieldType::Short,
    "int" => FieldType::Short,
    "time_short" => FieldType::Short,
    "ctrl_short" => FieldType::Short,
    "float" => FieldType::Float,
    "time_float" => FieldType::Float,
    "ctrl_float" => FieldType::Float,
    "enum" => FieldType::Enum,
    "time_enum" => FieldType::Enum,
    "ctrl_enum" => FieldType::Enum,
    "char" => FieldType::Char,
    "time_char" => FieldType::Char,
    "ctrl_char" => FieldType::Char,
    "long" => FieldType::Long,
    "time_long" => FieldType::Long,
    "ctrl_long" => FieldType::Long,
    "double" => FieldType::Double,
    "time_double" => FieldType::Double,
    "ctrl_double" => FieldType::Double,
};

impl FieldType {
    /// look up a field type by name, accepting `time_`/`ctrl_` spellings.
    /// Unrecognized names map to [`FieldType::Unknown`]
    pub fn from_name(name: &str) -> FieldType {
        FIELD_TYPE_NAMES
            .get(name.trim().to_ascii_lowercase().as_str())
            .copied()
            .unwrap_or(FieldType::Unknown)
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Short
                | FieldType::Float
                | FieldType::Char
                | FieldType::Long
                | FieldType::Double
        )
    }
}

impl FromStr for FieldType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match FieldType::from_name(s) {
            FieldType::Unknown if s != "unknown" => Err(ParseTypeError {
                kind: "field type",
                name: s.to_owned(),
            }),
            t => Ok(t),
        }
    }
}

/// Field type and element count of a connected channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceType {
    /// native value type
    pub field: FieldType,
    /// number of elements, 1 for scalars
    pub count: usize,
}

impl DeviceType {
    /// a scalar of the given type
    pub const fn scalar(field: FieldType) -> Self {
        Self { field, count: 1 }
    }

    /// an array of the given type
    pub const fn array(field: FieldType, count: usize) -> Self {
        Self { field, count }
    }

    /// nothing known about the channel
    pub const fn unknown() -> Self {
        Self::scalar(FieldType::Unknown)
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::unknown()
    }
}

impl From<FieldType> for DeviceType {
    fn from(field: FieldType) -> Self {
        Self::scalar(field)
    }
}

/// Condition a [`Rule`] places on the field type
#[derive(Debug, Clone, Copy)]
pub enum FieldMatch {
    /// matches every field type
    Any,
    /// exactly this field type
    Is(FieldType),
    /// any numeric field type
    Numeric,
    /// a `char` array longer than one element, used to carry text
    CharArray,
}

impl FieldMatch {
    fn matches(&self, device: &DeviceType) -> bool {
        match self {
            FieldMatch::Any => true,
            FieldMatch::Is(field) => device.field == *field,
            FieldMatch::Numeric => device.field.is_numeric(),
            FieldMatch::CharArray => device.field == FieldType::Char && device.count > 1,
        }
    }
}

/// Condition a [`Rule`] places on the record type
#[derive(Debug, Clone, Copy)]
pub enum RecordMatch {
    /// matches every record type, including an empty one
    Any,
    /// record type is one of these (exact, case-sensitive)
    OneOf(&'static [&'static str]),
}

impl RecordMatch {
    fn matches(&self, record_type: &str) -> bool {
        match self {
            RecordMatch::Any => true,
            RecordMatch::OneOf(names) => names.contains(&record_type),
        }
    }
}

/// One row of the classification table
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// field type condition
    pub field: FieldMatch,
    /// record type condition
    pub record: RecordMatch,
    /// result when both conditions hold
    pub display: DisplayType,
}

/// Record types whose enum field only ever has two states
pub const BINARY_RECORDS: &[&str] = &["bi", "bo", "busy"];

/// The classification table, evaluated top to bottom
pub static RULES: &[Rule] = &[
    Rule {
        field: FieldMatch::Any,
        record: RecordMatch::OneOf(&["motor"]),
        display: DisplayType::Motor,
    },
    Rule {
        field: FieldMatch::Is(FieldType::Enum),
        record: RecordMatch::OneOf(BINARY_RECORDS),
        display: DisplayType::Binary,
    },
    Rule {
        field: FieldMatch::Is(FieldType::Enum),
        record: RecordMatch::Any,
        display: DisplayType::Enum,
    },
    Rule {
        field: FieldMatch::Is(FieldType::String),
        record: RecordMatch::Any,
        display: DisplayType::String,
    },
    Rule {
        field: FieldMatch::CharArray,
        record: RecordMatch::Any,
        display: DisplayType::String,
    },
    Rule {
        field: FieldMatch::Numeric,
        record: RecordMatch::Any,
        display: DisplayType::Numeric,
    },
];

/// Classify a (device type, record type) pair. Total and deterministic
pub fn classify(device: DeviceType, record_type: &str) -> DisplayType {
    let record_type = record_type.trim();
    RULES
        .iter()
        .find(|rule| rule.field.matches(&device) && rule.record.matches(record_type))
        .map(|rule| rule.display)
        .unwrap_or_default()
}

/// Classify a channel of a record. A motor record is only shown as a motor
/// when addressed directly or through its `VAL` field; any other field of
/// the record is classified by its own field type.
pub fn classify_channel(device: DeviceType, record_type: &str, suffix: Option<&str>) -> DisplayType {
    match suffix {
        None | Some("VAL") => classify(device, record_type),
        Some(_) => match classify(device, record_type) {
            DisplayType::Motor => classify(device, ""),
            other => other,
        },
    }
}
