use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{AttributeId, RefiningType, RefiningValue};

/// Attribute ids are stored per keyword occurrence; the encoding caps them.
pub const MAX_SEARCHABLE_ATTRIBUTES: usize = 255;
pub const MAX_REFINING_ATTRIBUTES: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchableAttribute {
    pub name: String,
    /// Per-attribute boost folded into every occurrence score.
    pub boost: f32,
    pub multi_valued: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefiningAttribute {
    pub name: String,
    pub value_type: RefiningType,
    pub default: RefiningValue,
    pub multi_valued: bool,
}

/// Declared once before the first record is added. Attribute order here
/// defines the attribute ids used throughout the indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub primary_key: String,
    pub searchable: Vec<SearchableAttribute>,
    pub refining: Vec<RefiningAttribute>,
    /// Name of a refining attribute whose numeric value scales the record
    /// score. Stored half-precision; values beyond that range saturate.
    pub record_boost_attribute: Option<String>,
}

impl Schema {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Schema {
            primary_key: primary_key.into(),
            searchable: Vec::new(),
            refining: Vec::new(),
            record_boost_attribute: None,
        }
    }

    pub fn add_searchable(mut self, name: &str, boost: f32) -> Self {
        self.searchable.push(SearchableAttribute {
            name: name.to_string(),
            boost,
            multi_valued: false,
        });
        self
    }

    pub fn add_searchable_multi(mut self, name: &str, boost: f32) -> Self {
        self.searchable.push(SearchableAttribute {
            name: name.to_string(),
            boost,
            multi_valued: true,
        });
        self
    }

    pub fn add_refining(mut self, name: &str, value_type: RefiningType, default: RefiningValue) -> Self {
        self.refining.push(RefiningAttribute {
            name: name.to_string(),
            value_type,
            default,
            multi_valued: false,
        });
        self
    }

    pub fn add_refining_multi(mut self, name: &str, value_type: RefiningType, default: RefiningValue) -> Self {
        self.refining.push(RefiningAttribute {
            name: name.to_string(),
            value_type,
            default,
            multi_valued: true,
        });
        self
    }

    pub fn with_record_boost(mut self, attribute: &str) -> Self {
        self.record_boost_attribute = Some(attribute.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.searchable.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "schema has no searchable attributes"));
        }
        if self.searchable.len() > MAX_SEARCHABLE_ATTRIBUTES {
            return Err(Error::new(
                ErrorKind::AttributeLimitExceeded,
                format!("{} searchable attributes, limit {}", self.searchable.len(), MAX_SEARCHABLE_ATTRIBUTES),
            ));
        }
        if self.refining.len() > MAX_REFINING_ATTRIBUTES {
            return Err(Error::new(
                ErrorKind::AttributeLimitExceeded,
                format!("{} refining attributes, limit {}", self.refining.len(), MAX_REFINING_ATTRIBUTES),
            ));
        }
        for attr in &self.refining {
            if attr.default.type_of() != attr.value_type {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("default for refining attribute '{}' has the wrong type", attr.name),
                ));
            }
        }
        Ok(())
    }

    pub fn searchable_id(&self, name: &str) -> Option<AttributeId> {
        self.searchable.iter().position(|a| a.name == name).map(|i| i as AttributeId)
    }

    pub fn refining_id(&self, name: &str) -> Option<usize> {
        self.refining.iter().position(|a| a.name == name)
    }

    pub fn searchable_boost(&self, id: AttributeId) -> f32 {
        self.searchable.get(id as usize).map(|a| a.boost).unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_ids_follow_declaration_order() {
        let schema = Schema::new("id")
            .add_searchable("title", 2.0)
            .add_searchable("body", 1.0)
            .add_refining("year", RefiningType::Int, RefiningValue::Int(0));
        assert_eq!(schema.searchable_id("title"), Some(0));
        assert_eq!(schema.searchable_id("body"), Some(1));
        assert_eq!(schema.refining_id("year"), Some(0));
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn default_type_mismatch_is_rejected() {
        let schema = Schema::new("id")
            .add_searchable("title", 1.0)
            .add_refining("year", RefiningType::Int, RefiningValue::Text("x".into()));
        assert_eq!(schema.validate().unwrap_err().kind, ErrorKind::InvalidArgument);
    }
}
