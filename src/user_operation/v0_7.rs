use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, U128, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};

/// ERC-4337 UserOperation (EntryPoint v0.7), unpacked as it travels over RPC.
///
/// Limits and fees that the entry point packs into 128-bit halves are typed
/// `U128`, so packing never truncates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RpcUserOperation", into = "RpcUserOperation")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub factory: Option<Address>,
    pub factory_data: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U128,
    pub verification_gas_limit: U128,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U128,
    pub max_priority_fee_per_gas: U128,
    pub paymaster: Option<Address>,
    pub paymaster_verification_gas_limit: U128,
    pub paymaster_post_op_gas_limit: U128,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// `factory ‖ factoryData`, empty without a factory.
    pub fn init_code(&self) -> Bytes {
        match self.factory {
            Some(factory) => {
                let mut init_code = factory.as_bytes().to_vec();
                init_code.extend_from_slice(&self.factory_data);
                init_code.into()
            }
            None => Bytes::new(),
        }
    }

    /// `paymaster ‖ verificationGas ‖ postOpGas ‖ paymasterData`, empty without a paymaster.
    pub fn paymaster_and_data(&self) -> Bytes {
        match self.paymaster {
            Some(paymaster) => {
                let mut out = paymaster.as_bytes().to_vec();
                out.extend_from_slice(&self.paymaster_verification_gas_limit.as_u128().to_be_bytes());
                out.extend_from_slice(&self.paymaster_post_op_gas_limit.as_u128().to_be_bytes());
                out.extend_from_slice(&self.paymaster_data);
                out.into()
            }
            None => Bytes::new(),
        }
    }

    pub fn account_gas_limits(&self) -> [u8; 32] {
        concat_128(self.verification_gas_limit, self.call_gas_limit)
    }

    pub fn gas_fees(&self) -> [u8; 32] {
        concat_128(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    pub fn pack_for_hash(&self) -> Bytes {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(self.init_code()).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::FixedBytes(self.account_gas_limits().to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees().to_vec()),
            Token::FixedBytes(keccak256(self.paymaster_and_data()).to_vec()),
        ])
        .into()
    }

    /// Fields that travel on the wire but that the packing drops, because
    /// the factory or paymaster they belong to is unset.
    pub(super) fn inconsistent_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.factory.is_none() && !self.factory_data.is_empty() {
            out.push("factoryData without factory");
        }
        if self.paymaster.is_none()
            && (!self.paymaster_verification_gas_limit.is_zero()
                || !self.paymaster_post_op_gas_limit.is_zero()
                || !self.paymaster_data.is_empty())
        {
            out.push("paymaster fields without paymaster");
        }
        out
    }

    pub(super) fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = self.inconsistent_fields();
        if self.signature.is_empty() {
            missing.push("signature");
        }
        if self.call_gas_limit.is_zero() {
            missing.push("callGasLimit");
        }
        if self.verification_gas_limit.is_zero() {
            missing.push("verificationGasLimit");
        }
        if self.pre_verification_gas.is_zero() {
            missing.push("preVerificationGas");
        }
        if self.paymaster.is_some() {
            if self.paymaster_verification_gas_limit.is_zero() {
                missing.push("paymasterVerificationGasLimit");
            }
            if self.paymaster_post_op_gas_limit.is_zero() {
                missing.push("paymasterPostOpGasLimit");
            }
        }
        missing
    }

    pub(super) fn mismatched_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut out = Vec::new();
        macro_rules! compare {
            ($($field:ident => $name:literal),* $(,)?) => {
                $(if self.$field != other.$field {
                    out.push($name);
                })*
            };
        }
        compare!(
            sender => "sender",
            nonce => "nonce",
            factory => "factory",
            factory_data => "factoryData",
            call_data => "callData",
            call_gas_limit => "callGasLimit",
            verification_gas_limit => "verificationGasLimit",
            pre_verification_gas => "preVerificationGas",
            max_fee_per_gas => "maxFeePerGas",
            max_priority_fee_per_gas => "maxPriorityFeePerGas",
            paymaster => "paymaster",
            paymaster_verification_gas_limit => "paymasterVerificationGasLimit",
            paymaster_post_op_gas_limit => "paymasterPostOpGasLimit",
            paymaster_data => "paymasterData",
            signature => "signature",
        );
        out
    }
}

fn concat_128(high: U128, low: U128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&high.as_u128().to_be_bytes());
    out[16..].copy_from_slice(&low.as_u128().to_be_bytes());
    out
}

/// Wire form: factory and paymaster groups are omitted when unset, and
/// accepted as either absent or null.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcUserOperation {
    sender: Address,
    nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    factory_data: Option<Bytes>,
    call_data: Bytes,
    call_gas_limit: U128,
    verification_gas_limit: U128,
    pre_verification_gas: U256,
    max_fee_per_gas: U128,
    max_priority_fee_per_gas: U128,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paymaster_verification_gas_limit: Option<U128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paymaster_post_op_gas_limit: Option<U128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paymaster_data: Option<Bytes>,
    signature: Bytes,
}

impl From<RpcUserOperation> for UserOperation {
    fn from(rpc: RpcUserOperation) -> Self {
        Self {
            sender: rpc.sender,
            nonce: rpc.nonce,
            factory: rpc.factory,
            factory_data: rpc.factory_data.unwrap_or_default(),
            call_data: rpc.call_data,
            call_gas_limit: rpc.call_gas_limit,
            verification_gas_limit: rpc.verification_gas_limit,
            pre_verification_gas: rpc.pre_verification_gas,
            max_fee_per_gas: rpc.max_fee_per_gas,
            max_priority_fee_per_gas: rpc.max_priority_fee_per_gas,
            paymaster: rpc.paymaster,
            paymaster_verification_gas_limit: rpc.paymaster_verification_gas_limit.unwrap_or_default(),
            paymaster_post_op_gas_limit: rpc.paymaster_post_op_gas_limit.unwrap_or_default(),
            paymaster_data: rpc.paymaster_data.unwrap_or_default(),
            signature: rpc.signature,
        }
    }
}

impl From<UserOperation> for RpcUserOperation {
    fn from(op: UserOperation) -> Self {
        let with_factory = op.factory.is_some() || !op.factory_data.is_empty();
        let with_paymaster = op.paymaster.is_some()
            || !op.paymaster_verification_gas_limit.is_zero()
            || !op.paymaster_post_op_gas_limit.is_zero()
            || !op.paymaster_data.is_empty();
        Self {
            sender: op.sender,
            nonce: op.nonce,
            factory: op.factory,
            factory_data: with_factory.then_some(op.factory_data),
            call_data: op.call_data,
            call_gas_limit: op.call_gas_limit,
            verification_gas_limit: op.verification_gas_limit,
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas: op.max_fee_per_gas,
            max_priority_fee_per_gas: op.max_priority_fee_per_gas,
            paymaster: op.paymaster,
            paymaster_verification_gas_limit: with_paymaster
                .then_some(op.paymaster_verification_gas_limit),
            paymaster_post_op_gas_limit: with_paymaster.then_some(op.paymaster_post_op_gas_limit),
            paymaster_data: with_paymaster.then_some(op.paymaster_data),
            signature: op.signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_operation::UserOperation as AnyUserOperation;
    use ethers::types::H256;
    use serde_json::json;

    const SEPOLIA: u64 = 11_155_111;

    fn entry_point() -> Address {
        "0x0000000071727De22E5E9d8BAf0edAc6f37da032".parse().unwrap()
    }

    fn sponsored_op() -> UserOperation {
        UserOperation {
            sender: "0x1306b01bC3e4AD202612D3843387e94737673F53".parse().unwrap(),
            nonce: 5.into(),
            factory: Some("0x9406Cc6185a346906296840746125a0E44976454".parse().unwrap()),
            factory_data: "0x5fbfb9cf000000000000000000000000ce0fefa6f7979c4c9b5373e0f5105b7259092c6d0000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_data: "0xb61d27f6".parse().unwrap(),
            call_gas_limit: 100_000.into(),
            verification_gas_limit: 200_000.into(),
            pre_verification_gas: 48_000.into(),
            max_fee_per_gas: 2_000_000_000u64.into(),
            max_priority_fee_per_gas: 1_000_000_000u64.into(),
            paymaster: Some("0x0e9f0e31d4b2a4d5f7bf3f19ac6c0c3c7f4a4a9d".parse().unwrap()),
            paymaster_verification_gas_limit: 60_000.into(),
            paymaster_post_op_gas_limit: 15_000.into(),
            paymaster_data: "0xdeadbeef".parse().unwrap(),
            signature: Bytes::from(vec![0x11; 65]),
        }
    }

    fn plain_op() -> UserOperation {
        UserOperation {
            factory: None,
            factory_data: Bytes::new(),
            paymaster: None,
            paymaster_verification_gas_limit: U128::zero(),
            paymaster_post_op_gas_limit: U128::zero(),
            paymaster_data: Bytes::new(),
            ..sponsored_op()
        }
    }

    fn h256(s: &str) -> H256 {
        s.parse().unwrap()
    }

    #[test]
    fn hash_matches_reference_vector() {
        let op = UserOperation {
            sender: "0xb292Cf4a8E1fF21Ac27C4f94071Cd02C022C414b".parse().unwrap(),
            nonce: U256::from_str_radix(
                "F83D07238A7C8814A48535035602123AD6DBFA63000000000000000000000001",
                16,
            )
            .unwrap(),
            call_data: "0xe9ae5c530000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000004000000000000000000000000000000000000000000000000000000000000001d8b292cf4a8e1ff21ac27c4f94071cd02c022c414b00000000000000000000000000000000000000000000000000000000000000009517e29f0000000000000000000000000000000000000000000000000000000000000002000000000000000000000000ad6330089d9a1fe89f4020292e1afe9969a5a2fc00000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000120000000000000000000000000000000000000000000000000000000000001518000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000018e2fbe8980000000000000000000000000000000000000000000000000000000000000008000000000000000000000000000000000000000000000000000000000000000800000000000000000000000002372912728f93ab3daaaebea4f87e6e28476d987000000000000000000000000000000000000000000000000002386f26fc10000000000000000000000000000000000000000000000000000000000000000006000000000000000000000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_gas_limit: 1_231_285.into(),
            verification_gas_limit: 70_908.into(),
            pre_verification_gas: 48_916.into(),
            max_fee_per_gas: 71_308_035_098u64.into(),
            max_priority_fee_per_gas: 1_380_000_000u64.into(),
            signature: "0x3c7bfe22c9c2ef8994a9637bcc4df1741c5dc0c25b209545a7aeb20f7770f351479b683bd17c4d55bc32e2a649c8d2dff49dcfcc1f3fd837bcd88d1e69a434cf1c".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(
            AnyUserOperation::V0_7(op).hash(entry_point(), SEPOLIA).0,
            h256("0xe486401370d145766c3cf7ba089553214a1230d38662ae532c9b62eb6dadcf7e")
        );
    }

    #[test]
    fn hash_covers_factory_and_paymaster_packing() {
        assert_eq!(
            AnyUserOperation::V0_7(sponsored_op()).hash(entry_point(), SEPOLIA).0,
            h256("0x51aa7ff29a52e79e5dfcdc176f4710b18b04a52a99871b8aed810784be388fb7")
        );
        assert_eq!(
            AnyUserOperation::V0_7(plain_op()).hash(entry_point(), SEPOLIA).0,
            h256("0xa4f9121424cda19d437c6e360443f246b713c8c2dc44a130aef7637febe03f0e")
        );
    }

    #[test]
    fn packs_gas_limits_big_endian() {
        let op = sponsored_op();
        let limits = op.account_gas_limits();
        assert_eq!(&limits[..16], &200_000u128.to_be_bytes());
        assert_eq!(&limits[16..], &100_000u128.to_be_bytes());

        let pmd = op.paymaster_and_data();
        assert_eq!(pmd.len(), 20 + 16 + 16 + 4);
        assert_eq!(&pmd[..20], op.paymaster.unwrap().as_bytes());
        assert_eq!(&pmd[20..36], &60_000u128.to_be_bytes());
        assert_eq!(&pmd[36..52], &15_000u128.to_be_bytes());

        assert_eq!(op.init_code().len(), 20 + op.factory_data.len());
        assert!(plain_op().init_code().is_empty());
        assert!(plain_op().paymaster_and_data().is_empty());
    }

    #[test]
    fn wire_form_omits_unset_groups() {
        let v = serde_json::to_value(plain_op()).unwrap();
        for key in [
            "factory",
            "factoryData",
            "paymaster",
            "paymasterVerificationGasLimit",
            "paymasterPostOpGasLimit",
            "paymasterData",
        ] {
            assert!(v.get(key).is_none(), "{key} should be omitted");
        }
        assert_eq!(v["callGasLimit"], json!("0x186a0"));

        let v = serde_json::to_value(sponsored_op()).unwrap();
        assert_eq!(v["paymasterVerificationGasLimit"], json!("0xea60"));
        assert_eq!(v["paymasterData"], json!("0xdeadbeef"));
    }

    #[test]
    fn decodes_nulls_as_unset() {
        let mut v = serde_json::to_value(plain_op()).unwrap();
        let obj = v.as_object_mut().unwrap();
        obj.insert("factory".into(), json!(null));
        obj.insert("factoryData".into(), json!(null));
        obj.insert("paymaster".into(), json!(null));
        obj.insert("paymasterData".into(), json!(null));

        let back: UserOperation = serde_json::from_value(v).unwrap();
        assert_eq!(back, plain_op());
    }

    #[test]
    fn json_roundtrip_preserves_every_field() {
        let op = sponsored_op();
        let back: UserOperation = serde_json::from_value(serde_json::to_value(&op).unwrap()).unwrap();
        assert!(op.mismatched_fields(&back).is_empty());
        assert_eq!(back, op);
    }

    #[test]
    fn paymaster_limits_required_only_with_paymaster() {
        let mut op = sponsored_op();
        op.paymaster_post_op_gas_limit = U128::zero();
        assert_eq!(op.missing_fields(), vec!["paymasterPostOpGasLimit"]);
        assert!(plain_op().missing_fields().is_empty());
    }

    #[test]
    fn orphan_factory_and_paymaster_data_is_inconsistent() {
        let mut op = plain_op();
        op.factory_data = "0x01".parse().unwrap();
        assert_eq!(op.inconsistent_fields(), vec!["factoryData without factory"]);
        assert!(op.missing_fields().contains(&"factoryData without factory"));

        for orphan in [
            UserOperation { paymaster_data: "0xdeadbeef".parse().unwrap(), ..plain_op() },
            UserOperation { paymaster_post_op_gas_limit: 1.into(), ..plain_op() },
            UserOperation { paymaster_verification_gas_limit: 1.into(), ..plain_op() },
        ] {
            // dropped by the packing, so the hash cannot tell them apart
            assert_eq!(orphan.pack_for_hash(), plain_op().pack_for_hash());
            assert_eq!(
                orphan.inconsistent_fields(),
                vec!["paymaster fields without paymaster"]
            );
        }

        assert!(plain_op().inconsistent_fields().is_empty());
        assert!(sponsored_op().inconsistent_fields().is_empty());
    }
}
