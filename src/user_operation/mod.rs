//! ERC-4337 user operations, one field set per entry point version.

pub mod v0_6;
pub mod v0_7;

use crate::encoding::fmt_h256;
use crate::entry_point::EntryPointVersion;
use crate::error::{BundlerError, TransportError};
use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, H256, U128, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

/// Hash binding a user operation to an entry point and chain.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserOperationHash(pub H256);

impl UserOperationHash {
    pub fn zero() -> Self {
        Self(H256::zero())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<H256> for UserOperationHash {
    fn from(value: H256) -> Self {
        Self(value)
    }
}

impl From<[u8; 32]> for UserOperationHash {
    fn from(value: [u8; 32]) -> Self {
        Self(H256::from(value))
    }
}

impl fmt::Display for UserOperationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fmt_h256(self.0))
    }
}

impl FromStr for UserOperationHash {
    type Err = <H256 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<H256>().map(Self)
    }
}

/// Gas limits returned by `eth_estimateUserOperationGas`.
///
/// The paymaster limits are only present for v0.7 operations that name a
/// paymaster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// A user operation in the field set of its entry point version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UserOperation {
    V0_6(v0_6::UserOperation),
    V0_7(v0_7::UserOperation),
}

impl UserOperation {
    pub fn version(&self) -> EntryPointVersion {
        match self {
            Self::V0_6(_) => EntryPointVersion::V0_6,
            Self::V0_7(_) => EntryPointVersion::V0_7,
        }
    }

    pub fn sender(&self) -> Address {
        match self {
            Self::V0_6(op) => op.sender,
            Self::V0_7(op) => op.sender,
        }
    }

    pub fn nonce(&self) -> U256 {
        match self {
            Self::V0_6(op) => op.nonce,
            Self::V0_7(op) => op.nonce,
        }
    }

    pub fn signature(&self) -> &Bytes {
        match self {
            Self::V0_6(op) => &op.signature,
            Self::V0_7(op) => &op.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Bytes) {
        match self {
            Self::V0_6(op) => op.signature = signature,
            Self::V0_7(op) => op.signature = signature,
        }
    }

    /// Whether the paymaster gas limits belong to this operation's field set.
    pub fn requires_paymaster_gas(&self) -> bool {
        match self {
            Self::V0_6(_) => false,
            Self::V0_7(op) => op.paymaster.is_some(),
        }
    }

    /// Deterministic hash over the canonical packing. Excludes the signature.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> UserOperationHash {
        let packed = match self {
            Self::V0_6(op) => op.pack_for_hash(),
            Self::V0_7(op) => op.pack_for_hash(),
        };
        hash_packed(&packed, entry_point, chain_id)
    }

    /// Field combinations the hash cannot represent. Such an operation is
    /// never estimated or submitted, since two different payloads would
    /// share one hash.
    pub fn inconsistent_fields(&self) -> Vec<&'static str> {
        match self {
            Self::V0_6(op) => op.inconsistent_fields(),
            Self::V0_7(op) => op.inconsistent_fields(),
        }
    }

    /// Everything preventing submission, empty when the operation is complete.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        match self {
            Self::V0_6(op) => op.missing_fields(),
            Self::V0_7(op) => op.missing_fields(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Names of the fields that differ from `other`.
    pub fn mismatched_fields(&self, other: &Self) -> Vec<&'static str> {
        match (self, other) {
            (Self::V0_6(a), Self::V0_6(b)) => a.mismatched_fields(b),
            (Self::V0_7(a), Self::V0_7(b)) => a.mismatched_fields(b),
            _ => vec!["version"],
        }
    }

    pub fn apply_gas_estimate(&mut self, estimate: &GasEstimate) -> Result<(), BundlerError> {
        match self {
            Self::V0_6(op) => {
                op.call_gas_limit = estimate.call_gas_limit;
                op.verification_gas_limit = estimate.verification_gas_limit;
                op.pre_verification_gas = estimate.pre_verification_gas;
            }
            Self::V0_7(op) => {
                op.call_gas_limit = to_u128(estimate.call_gas_limit, "callGasLimit")?;
                op.verification_gas_limit =
                    to_u128(estimate.verification_gas_limit, "verificationGasLimit")?;
                op.pre_verification_gas = estimate.pre_verification_gas;
                if op.paymaster.is_some() {
                    if let Some(v) = estimate.paymaster_verification_gas_limit {
                        op.paymaster_verification_gas_limit =
                            to_u128(v, "paymasterVerificationGasLimit")?;
                    }
                    if let Some(v) = estimate.paymaster_post_op_gas_limit {
                        op.paymaster_post_op_gas_limit = to_u128(v, "paymasterPostOpGasLimit")?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Decodes the RPC wire form of `version`.
    pub fn from_json(value: Value, version: EntryPointVersion) -> serde_json::Result<Self> {
        match version {
            EntryPointVersion::V0_6 => serde_json::from_value(value).map(Self::V0_6),
            EntryPointVersion::V0_7 => serde_json::from_value(value).map(Self::V0_7),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl From<v0_6::UserOperation> for UserOperation {
    fn from(op: v0_6::UserOperation) -> Self {
        Self::V0_6(op)
    }
}

impl From<v0_7::UserOperation> for UserOperation {
    fn from(op: v0_7::UserOperation) -> Self {
        Self::V0_7(op)
    }
}

/// `keccak256(abi.encode(keccak256(packed), entryPoint, chainId))`
fn hash_packed(packed: &[u8], entry_point: Address, chain_id: u64) -> UserOperationHash {
    keccak256(encode(&[
        Token::FixedBytes(keccak256(packed).to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]))
    .into()
}

fn to_u128(value: U256, field: &str) -> Result<U128, BundlerError> {
    if value.bits() > 128 {
        return Err(TransportError::malformed(format!("{field} {value} exceeds 128 bits")).into());
    }
    Ok(U128::from(value.low_u128()))
}
