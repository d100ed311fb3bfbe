//! IR serialization helpers.
//!
//! Serde already provides JSON serialization; these helpers keep the
//! formatting and error mapping in one place for clients and servers.

use crate::error::KyroError;
use crate::ir::operations::KyroIR;

/// Serialize an IR to pretty JSON.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn to_json_pretty(ir: &KyroIR) -> Result<String, KyroError> {
    serde_json::to_string_pretty(ir).map_err(|e| KyroError::internal(format!("serialize IR: {e}")))
}

/// Deserialize an IR from JSON.
///
/// Callers should then invoke `ir.validate()` before executing.
///
/// # Errors
///
/// Returns an internal error if the JSON does not describe an IR.
pub fn from_json(s: &str) -> Result<KyroIR, KyroError> {
    serde_json::from_str::<KyroIR>(s).map_err(|e| KyroError::internal(format!("deserialize IR: {e}")))
}
