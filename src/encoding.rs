use crate::error::TransportError;
use crate::user_operation::UserOperationHash;
use ethers::types::{Address, H256, U256};
use serde_json::Value;

type Result<T> = std::result::Result<T, TransportError>;

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn parse_u256_quantity(s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16)
        .map_err(|e| TransportError::malformed(format!("invalid quantity 0x{s}: {e}")))
}

pub fn parse_h256(s: &str) -> Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes =
        hex::decode(s).map_err(|e| TransportError::malformed(format!("invalid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(TransportError::malformed(format!(
            "expected 32-byte hex, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

/// Reads a hex quantity field. Absent, null or non-string values are errors,
/// never a default.
pub fn parse_u256_field(v: &Value, key: &str) -> Result<U256> {
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| TransportError::malformed(format!("missing or invalid field {key}")))?;
    parse_u256_quantity(s)
}

/// Like [`parse_u256_field`] but `None` when the key is absent or null.
pub fn parse_optional_u256_field(v: &Value, key: &str) -> Result<Option<U256>> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => parse_u256_field(v, key).map(Some),
    }
}

pub fn parse_userop_hash(res: &Value) -> Result<UserOperationHash> {
    // Plain string per ERC-4337; a few bundlers wrap it in an object.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(TransportError::malformed(format!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {res}"
        )));
    };

    parse_h256(hash_str).map(UserOperationHash::from)
}
