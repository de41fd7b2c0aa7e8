use thiserror::Error;

#[derive(Debug, Error)]
pub enum IfcError {
    #[error("not a STEP file: missing ISO-10303-21 header")]
    NotStep,
    #[error("missing DATA section")]
    MissingDataSection,
    #[error("malformed entity near offset {0}")]
    MalformedEntity(usize),
    #[error("failed to decode attributes of #{0}")]
    Decode(u32),
}
