//! The properties artifact document.
//!
//! This is the wire format consumed by viewers, so field names are camelCase
//! and stable. Bump [`PROPERTY_DOCUMENT_SCHEMA_VERSION`] on breaking changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROPERTY_DOCUMENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Double,
    Boolean,
    Enumeration,
    Range,
    List,
    Table,
    Complex,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySetData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    pub is_type_property: bool,
    pub properties: Vec<PropertyData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantitySetData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    pub quantities: Vec<QuantityData>,
}

/// One building product and everything attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementProperties {
    /// STEP instance label (`#entityLabel`).
    pub entity_label: u32,
    pub global_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// IFC class of the occurrence, e.g. `IfcWall`.
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_object_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_object_type: Option<String>,
    pub property_sets: Vec<PropertySetData>,
    pub quantity_sets: Vec<QuantitySetData>,
    pub type_property_sets: Vec<PropertySetData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDocument {
    pub schema_version: u32,
    pub extracted_at: DateTime<Utc>,
    pub total_elements: usize,
    pub elements: Vec<ElementProperties>,
}
