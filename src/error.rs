use thiserror::Error;
use uuid::Uuid;

/// Failures a caller of the pipeline is expected to tell apart.
///
/// Parse degradation is deliberately absent: it is carried by
/// [`crate::parser::ParsedResponse`] instead of being raised.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Model endpoint unreachable or its payload had no text field.
    #[error("model endpoint transport failure: {0}")]
    Transport(String),

    /// Identifier rejected before entering the pipeline.
    #[error("invalid {field} '{value}': {reason}")]
    Validation {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
}

pub fn parse_id(field: &'static str, value: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(value.trim()).map_err(|e| PipelineError::Validation {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
