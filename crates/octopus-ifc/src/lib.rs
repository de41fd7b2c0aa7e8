//! IFC/STEP reading and element property extraction.
//!
//! This crate knows nothing about HTTP, storage, or persistence. It takes the
//! text of an IFC file (the STEP physical file format), builds a lazy entity
//! index over the `DATA;` section, and extracts per-element property sets and
//! quantity sets into a serializable document.
//!
//! The decoding path is deliberately narrow: only the attribute shapes that
//! property and quantity extraction touch are interpreted. Geometry is never
//! decoded here.

mod document;
mod error;
mod extract;
mod scanner;
mod schema;
mod tokenizer;
mod value;

pub use document::{DecodedEntity, IfcDocument};
pub use error::IfcError;
pub use extract::extract_properties;
pub use schema::{
    ElementProperties, PropertyData, PropertyDocument, PropertySetData, QuantityData,
    QuantitySetData, ValueType, PROPERTY_DOCUMENT_SCHEMA_VERSION,
};
pub use value::AttributeValue;
