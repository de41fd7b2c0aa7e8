//! Indexed, lazily-decoded view over a STEP file.

use rustc_hash::FxHashMap;

use crate::error::IfcError;
use crate::scanner::{parse_header, scan_entities, RawEntity};
use crate::tokenizer::parse_attributes;
use crate::value::AttributeValue;

/// An entity instance with its attribute list decoded.
#[derive(Debug, Clone)]
pub struct DecodedEntity {
    pub id: u32,
    pub type_name: String,
    pub attrs: Vec<AttributeValue>,
}

impl DecodedEntity {
    pub fn get(&self, index: usize) -> Option<&AttributeValue> {
        match self.attrs.get(index) {
            Some(AttributeValue::Null) | Some(AttributeValue::Derived) | None => None,
            Some(value) => Some(value),
        }
    }

    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(|v| v.as_str())
    }

    pub fn get_ref(&self, index: usize) -> Option<u32> {
        self.get(index).and_then(|v| v.as_entity_ref())
    }

    pub fn get_refs(&self, index: usize) -> Vec<u32> {
        self.get(index)
            .and_then(|v| v.as_list())
            .map(|items| items.iter().filter_map(|v| v.as_entity_ref()).collect())
            .unwrap_or_default()
    }

    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(|v| v.as_f64())
    }
}

/// A parsed IFC file: entity index over the source text, attributes decoded
/// on demand.
pub struct IfcDocument {
    content: String,
    index: FxHashMap<u32, RawEntity>,
    by_type: FxHashMap<String, Vec<u32>>,
    schema_version: Option<String>,
}

impl IfcDocument {
    pub fn parse(content: String) -> Result<Self, IfcError> {
        let entities = scan_entities(&content)?;
        let header = parse_header(&content);

        let mut index = FxHashMap::default();
        let mut by_type: FxHashMap<String, Vec<u32>> = FxHashMap::default();
        for entity in entities {
            by_type.entry(entity.type_name.clone()).or_default().push(entity.id);
            index.insert(entity.id, entity);
        }

        Ok(Self {
            content,
            index,
            by_type,
            schema_version: header.schema_version,
        })
    }

    /// Schema identifier from the header, e.g. `IFC4`.
    pub fn schema_version(&self) -> &str {
        self.schema_version.as_deref().unwrap_or("UNKNOWN")
    }

    pub fn entity_count(&self) -> usize {
        self.index.len()
    }

    /// Decode one entity. Returns `None` for unknown ids or attribute lists
    /// the tokenizer cannot make sense of.
    pub fn entity(&self, id: u32) -> Option<DecodedEntity> {
        let raw = self.index.get(&id)?;
        let attrs = parse_attributes(&self.content[raw.args.clone()])?;
        Some(DecodedEntity {
            id,
            type_name: raw.type_name.clone(),
            attrs,
        })
    }

    /// Ids of every instance of `type_name` (case-insensitive), in file order.
    pub fn ids_of_type(&self, type_name: &str) -> &[u32] {
        self.by_type
            .get(&type_name.to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Uppercased type name of an entity without decoding its attributes.
    pub fn type_name(&self, id: u32) -> Option<&str> {
        self.index.get(&id).map(|raw| raw.type_name.as_str())
    }

    /// All entity ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
