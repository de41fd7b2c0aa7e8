//! Decoded STEP attribute values.

/// One attribute of a STEP entity instance, decoded from its textual form.
///
/// `Typed` wraps a defined-type value such as `IFCLABEL('Wall')`; most
/// consumers want the payload, see [`AttributeValue::unwrap_typed`].
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// `$` — attribute not provided.
    Null,
    /// `*` — attribute derived elsewhere in the schema.
    Derived,
    /// `#123`
    EntityRef(u32),
    Integer(i64),
    Float(f64),
    String(String),
    /// `.NOTDEFINED.`
    Enum(String),
    List(Vec<AttributeValue>),
    /// `IFCBOOLEAN(.T.)` — type name is stored uppercased.
    Typed(String, Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn as_entity_ref(&self) -> Option<u32> {
        match self {
            AttributeValue::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_typed() {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.unwrap_typed() {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Drill through single-argument defined types: `IFCLABEL('x')` -> `'x'`.
    pub fn unwrap_typed(&self) -> &AttributeValue {
        match self {
            AttributeValue::Typed(_, args) if args.len() == 1 => args[0].unwrap_typed(),
            other => other,
        }
    }

    /// The defined-type name, if this is a typed value.
    pub fn type_tag(&self) -> Option<&str> {
        match self {
            AttributeValue::Typed(name, _) => Some(name),
            _ => None,
        }
    }
}
