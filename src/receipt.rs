use crate::entry_point::EntryPointRegistry;
use crate::error::TransportError;
use crate::user_operation::{UserOperation, UserOperationHash};
use ethers::types::{Address, Log, H256, U256, U64};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Receipt of an included user operation (`eth_getUserOperationReceipt`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: UserOperationHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<Address>,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    pub receipt: SettlementReceipt,
}

impl UserOperationReceipt {
    /// Hash of the bundle transaction that included the operation.
    pub fn transaction_hash(&self) -> H256 {
        self.receipt.transaction_hash
    }
}

/// The bundle transaction's receipt, reduced to what links it back to a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub transaction_hash: H256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<U256>,
}

/// Result of `eth_getUserOperationByHash`. The settlement fields stay empty
/// while the operation is only in the mempool.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationByHash {
    pub user_operation: UserOperation,
    pub entry_point: Address,
    pub transaction_hash: Option<H256>,
    pub block_hash: Option<H256>,
    pub block_number: Option<U64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUserOperationByHash {
    user_operation: Value,
    entry_point: Address,
    #[serde(default)]
    transaction_hash: Option<H256>,
    #[serde(default)]
    block_hash: Option<H256>,
    #[serde(default)]
    block_number: Option<U64>,
}

impl UserOperationByHash {
    /// Decodes the operation in the field set of the entry point it names.
    pub fn from_response(
        res: Value,
        registry: &EntryPointRegistry,
    ) -> Result<Self, TransportError> {
        let raw: RawUserOperationByHash = serde_json::from_value(res).map_err(|e| {
            TransportError::malformed(format!("invalid eth_getUserOperationByHash result: {e}"))
        })?;

        let version = registry
            .get(raw.entry_point)
            .and_then(|ep| ep.version)
            .ok_or_else(|| {
                TransportError::malformed(format!(
                    "operation targets entry point {:?} with no known version",
                    raw.entry_point
                ))
            })?;

        let user_operation = UserOperation::from_json(raw.user_operation, version)
            .map_err(|e| TransportError::malformed(format!("invalid userOperation: {e}")))?;

        Ok(Self {
            user_operation,
            entry_point: raw.entry_point,
            transaction_hash: raw.transaction_hash,
            block_hash: raw.block_hash,
            block_number: raw.block_number,
        })
    }

    pub fn is_mined(&self) -> bool {
        self.transaction_hash.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry_point::{ENTRY_POINT_V0_6, ENTRY_POINT_V0_7};
    use crate::user_operation::v0_7;
    use serde_json::json;
    use std::collections::HashMap;

    fn registry() -> EntryPointRegistry {
        EntryPointRegistry::new(1, [ENTRY_POINT_V0_7], &HashMap::new()).unwrap()
    }

    #[test]
    fn receipt_decodes_bundler_shape() {
        let res = json!({
            "userOpHash": format!("0x{}", "aa".repeat(32)),
            "entryPoint": "0x0000000071727De22E5E9d8BAf0edAc6f37da032",
            "sender": "0x1306b01bc3e4ad202612d3843387e94737673f53",
            "nonce": "0x5",
            "paymaster": null,
            "actualGasCost": "0x2386f26fc10000",
            "actualGasUsed": "0x1d4c0",
            "success": true,
            "reason": "",
            "logs": [{
                "address": "0x0000000071727De22E5E9d8BAf0edAc6f37da032",
                "topics": [format!("0x{}", "49".repeat(32))],
                "data": "0x",
            }],
            "receipt": {
                "transactionHash": format!("0x{}", "bb".repeat(32)),
                "blockHash": format!("0x{}", "cc".repeat(32)),
                "blockNumber": "0x10",
                "status": "0x1",
                "from": "0x1306b01bc3e4ad202612d3843387e94737673f53",
                "logsBloom": format!("0x{}", "00".repeat(256)),
            },
        });

        let receipt: UserOperationReceipt = serde_json::from_value(res).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.entry_point, Some(ENTRY_POINT_V0_7));
        assert_eq!(receipt.transaction_hash(), H256::repeat_byte(0xbb));
        assert_eq!(receipt.receipt.block_number, Some(U64::from(16)));
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.user_op_hash, UserOperationHash::from([0xaa; 32]));
    }

    #[test]
    fn lookup_decodes_by_entry_point_version() {
        let op = v0_7::UserOperation {
            sender: Address::repeat_byte(0x11),
            nonce: 3.into(),
            call_data: vec![1, 2, 3].into(),
            signature: vec![9; 65].into(),
            ..Default::default()
        };
        let res = json!({
            "userOperation": serde_json::to_value(&op).unwrap(),
            "entryPoint": "0x0000000071727De22E5E9d8BAf0edAc6f37da032",
            "transactionHash": null,
            "blockHash": null,
            "blockNumber": null,
        });

        let found = UserOperationByHash::from_response(res, &registry()).unwrap();
        assert_eq!(found.user_operation, UserOperation::V0_7(op));
        assert!(!found.is_mined());
    }

    #[test]
    fn lookup_rejects_unknown_entry_point() {
        let res = json!({
            "userOperation": {},
            "entryPoint": format!("{:?}", ENTRY_POINT_V0_6),
        });
        assert!(matches!(
            UserOperationByHash::from_response(res, &registry()),
            Err(TransportError::Malformed(_))
        ));
    }
}
