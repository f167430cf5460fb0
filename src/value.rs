//! Value types carried by monitor updates.
//!
//! The fan-out cache never inspects values. It only needs a structure type to
//! build empty buffer containers and a cheap way to share one materialized
//! snapshot between the upstream update, the cached last value and every
//! downstream buffer (`Arc<StructValue>`).

use serde::{Deserialize, Serialize};

use crate::bitset::BitSet;

/// Kind of a single structure field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Boolean flag.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    String,
    /// Nested structure, carried as JSON.
    Structured,
}

/// Name and kind of one field.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDesc {
    pub name: String,
    pub kind: FieldKind,
}

/// Structural type description of a monitored value.
///
/// # Examples
///
/// ```
/// use chanmon::{FieldKind, ValueType};
///
/// let ty = ValueType::builder("epics:nt/NTScalar:1.0")
///     .field("value", FieldKind::Float)
///     .field("units", FieldKind::String)
///     .build();
///
/// assert_eq!(ty.field_index("units"), Some(1));
/// assert_eq!(ty.bit_count(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueType {
    id: String,
    fields: Vec<FieldDesc>,
}

impl ValueType {
    /// Start building a structure type with the given type id.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> ValueTypeBuilder {
        ValueTypeBuilder {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    /// Type identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Field descriptions, in index order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    /// Position of the named field.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Bits needed for a mask over this type (whole structure plus one per field).
    #[must_use]
    pub fn bit_count(&self) -> usize {
        self.fields.len() + 1
    }

    /// Build an empty value container, each field holding its kind's default.
    #[must_use]
    pub fn create_value(&self) -> StructValue {
        StructValue {
            fields: self.fields.iter().map(|f| FieldValue::default_for(f.kind)).collect(),
        }
    }

    /// Build an empty mask sized for this type.
    #[must_use]
    pub fn create_mask(&self) -> BitSet {
        BitSet::with_capacity(self.bit_count())
    }
}

/// Builder for [`ValueType`].
#[derive(Debug)]
pub struct ValueTypeBuilder {
    id: String,
    fields: Vec<FieldDesc>,
}

impl ValueTypeBuilder {
    /// Append a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDesc {
            name: name.into(),
            kind,
        });
        self
    }

    /// Finish the type.
    #[must_use]
    pub fn build(self) -> ValueType {
        ValueType {
            id: self.id,
            fields: self.fields,
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Structured(serde_json::Value),
    /// Field has no value yet.
    Null,
}

impl FieldValue {
    fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Bool => Self::Bool(false),
            FieldKind::Int => Self::Int(0),
            FieldKind::Float => Self::Float(0.0),
            FieldKind::String => Self::String(String::new()),
            FieldKind::Structured => Self::Null,
        }
    }

    /// The integer payload, if this is an `Int`.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload, if this is a `Float`.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// A materialized structure value, positional over its [`ValueType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructValue {
    fields: Vec<FieldValue>,
}

impl StructValue {
    /// Wrap already-ordered field values.
    #[must_use]
    pub fn new(fields: Vec<FieldValue>) -> Self {
        Self { fields }
    }

    /// Value of field `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.fields.get(index)
    }

    /// Replace field `index`. Returns false if the index is out of range.
    pub fn set(&mut self, index: usize, value: FieldValue) -> bool {
        match self.fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// All field values, in index order.
    #[must_use]
    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True for a structure without fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
