//! Machine order types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque order identifier used for correlation and logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A unit of work for the assembly line, delivered by the ERP side.
///
/// The line only reads the identifier. Any further fields an upstream
/// producer attaches are ignored on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "machineOrder")]
pub struct MachineOrder {
    pub id: OrderId,
}

impl MachineOrder {
    pub fn new(id: impl Into<OrderId>) -> Self {
        Self { id: id.into() }
    }
}
