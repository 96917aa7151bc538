use std::collections::HashMap;
use bytes::Bytes;
use serde::{Serialize, Deserialize};

/// Keyword id assigned by the trie. Numerical order equals the
/// lexicographic order of the keywords, which is what makes prefix
/// ranges expressible as closed id intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeywordId(pub u32);

/// Dense, stable handle of a keyword's inverted list. Survives keyword-id
/// reassignment, so posting storage never moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListId(pub u32);

/// Internal record id, assigned densely in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u32);

impl RecordId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

pub type AttributeId = u32;

/// Position bump between values of a multi-valued attribute, so phrase
/// alignments cannot cross value boundaries.
pub const MULTI_VALUED_ATTRIBUTE_POSITION_BUMP: u32 = 100_000;

/// A forward list stores the keyword count in 24 bits.
pub const MAX_KEYWORDS_PER_RECORD: usize = (1 << 24) - 1;

/// Combinator for a term's attribute filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeOp {
    And,
    Or,
    Nand,
}

/// Restriction of a term to a subset of searchable attributes, combined
/// with AND (keyword present in every listed attribute), OR (in at least
/// one) or NAND (not in all of them). An empty list means unrestricted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub attrs: Vec<AttributeId>,
    pub op: AttributeOp,
}

impl AttributeFilter {
    pub fn any() -> Self {
        AttributeFilter { attrs: Vec::new(), op: AttributeOp::Or }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Test the filter against the set of attributes a keyword occurs in.
    pub fn matches(&self, present: &[AttributeId]) -> bool {
        if self.attrs.is_empty() {
            return true;
        }
        let all = self.attrs.iter().all(|a| present.contains(a));
        match self.op {
            AttributeOp::And => all,
            AttributeOp::Or => self.attrs.iter().any(|a| present.contains(a)),
            AttributeOp::Nand => !all,
        }
    }
}

impl Default for AttributeFilter {
    fn default() -> Self {
        Self::any()
    }
}

/// Whether a term matches whole keywords or keyword prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermType {
    Prefix,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefiningType {
    Int,
    Long,
    Float,
    Double,
    Text,
    Time,
    Duration,
}

/// Typed scalar stored in the refining section of a forward list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefiningValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Time(i64),
    Duration(i64),
}

impl RefiningValue {
    pub fn type_of(&self) -> RefiningType {
        match self {
            RefiningValue::Int(_) => RefiningType::Int,
            RefiningValue::Long(_) => RefiningType::Long,
            RefiningValue::Float(_) => RefiningType::Float,
            RefiningValue::Double(_) => RefiningType::Double,
            RefiningValue::Text(_) => RefiningType::Text,
            RefiningValue::Time(_) => RefiningType::Time,
            RefiningValue::Duration(_) => RefiningType::Duration,
        }
    }

    /// Numeric view used by range filters and range facets. Text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RefiningValue::Int(v) => Some(*v as f64),
            RefiningValue::Long(v) => Some(*v as f64),
            RefiningValue::Float(v) => Some(*v as f64),
            RefiningValue::Double(v) => Some(*v),
            RefiningValue::Time(v) => Some(*v as f64),
            RefiningValue::Duration(v) => Some(*v as f64),
            RefiningValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RefiningValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Rendering used as a facet bucket label.
    pub fn label(&self) -> String {
        match self {
            RefiningValue::Int(v) => v.to_string(),
            RefiningValue::Long(v) => v.to_string(),
            RefiningValue::Float(v) => v.to_string(),
            RefiningValue::Double(v) => v.to_string(),
            RefiningValue::Text(s) => s.clone(),
            RefiningValue::Time(v) => v.to_string(),
            RefiningValue::Duration(v) => v.to_string(),
        }
    }

    /// Total order for sorting records by a refining attribute. Values of
    /// mismatched types compare through their numeric view when possible.
    pub fn compare(&self, other: &RefiningValue) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (RefiningValue::Text(a), RefiningValue::Text(b)) => a.cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

/// Three-state answer of an external-id lookup while writes are pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLookup {
    /// Committed: visible in the read view (and still in the write view).
    Present,
    /// Added but not yet merged into a read view.
    ToBeInserted,
    /// Unknown, or marked deleted.
    AbsentOrToBeDeleted,
}

/// Role-list mutation kinds for record ACLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclOp {
    /// Replace the role list.
    Add,
    /// Union the roles into the list.
    Append,
    /// Remove the roles from the list.
    Delete,
}

/// A caller-supplied record: searchable attribute texts plus typed refining
/// values, an optional boost, optional ACL roles and an opaque payload.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub external_id: String,
    pub searchable: HashMap<String, Vec<String>>,
    pub refining: HashMap<String, Vec<RefiningValue>>,
    pub boost: Option<f32>,
    pub roles: Vec<String>,
    pub payload: Option<Bytes>,
}

impl Record {
    pub fn new(external_id: impl Into<String>) -> Self {
        Record { external_id: external_id.into(), ..Default::default() }
    }

    pub fn set_searchable(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.searchable.insert(name.into(), vec![text.into()]);
    }

    /// Multi-valued searchable attribute; each value gets its own position
    /// space (see MULTI_VALUED_ATTRIBUTE_POSITION_BUMP).
    pub fn set_searchable_multi(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.searchable.insert(name.into(), values);
    }

    pub fn set_refining(&mut self, name: impl Into<String>, value: RefiningValue) {
        self.refining.insert(name.into(), vec![value]);
    }

    pub fn set_refining_multi(&mut self, name: impl Into<String>, values: Vec<RefiningValue>) {
        self.refining.insert(name.into(), values);
    }
}
