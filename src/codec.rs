//! Wire encoding for orders and reports
//!
//! Orders and reports travel as single-line XML documents. Intake also
//! accepts JSON objects for orders, which is handy when feeding the line by
//! hand (`echo '{"id":"MO-1"}' | assembly-line-sim --stdin`).

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::types::{MachineOrder, Report};

/// Encode/decode errors. Always a malformed-input problem, never retried.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("XML encode error: {0}")]
    XmlEncode(String),

    #[error("XML decode error: {0}")]
    XmlDecode(String),

    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    #[error("Empty message")]
    Empty,
}

pub fn encode_report(report: &Report) -> Result<String, CodecError> {
    to_xml(report)
}

pub fn decode_report(payload: &str) -> Result<Report, CodecError> {
    from_xml(payload)
}

pub fn encode_order(order: &MachineOrder) -> Result<String, CodecError> {
    to_xml(order)
}

/// Decode a machine order from XML or, if the payload is a JSON object, JSON.
pub fn decode_order(payload: &str) -> Result<MachineOrder, CodecError> {
    let trimmed = payload.trim();
    match trimmed.chars().next() {
        None => Err(CodecError::Empty),
        Some('{') => Ok(serde_json::from_str(trimmed)?),
        Some(_) => from_xml(trimmed),
    }
}

fn to_xml<T: Serialize>(value: &T) -> Result<String, CodecError> {
    quick_xml::se::to_string(value).map_err(|e| CodecError::XmlEncode(e.to_string()))
}

fn from_xml<T: DeserializeOwned>(payload: &str) -> Result<T, CodecError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }
    quick_xml::de::from_str(trimmed).map_err(|e| CodecError::XmlDecode(e.to_string()))
}
