use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// ABI encoding of every field but the signature, with the dynamic byte
    /// fields replaced by their keccak256.
    pub fn pack_for_hash(&self) -> Bytes {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
        .into()
    }

    /// Every v0.6 field is packed, so there is nothing to cross-check.
    pub(super) fn inconsistent_fields(&self) -> Vec<&'static str> {
        Vec::new()
    }

    pub(super) fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
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
            init_code => "initCode",
            call_data => "callData",
            call_gas_limit => "callGasLimit",
            verification_gas_limit => "verificationGasLimit",
            pre_verification_gas => "preVerificationGas",
            max_fee_per_gas => "maxFeePerGas",
            max_priority_fee_per_gas => "maxPriorityFeePerGas",
            paymaster_and_data => "paymasterAndData",
            signature => "signature",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_operation::UserOperation as AnyUserOperation;
    use ethers::types::H256;
    use serde_json::json;

    const ENTRY_POINT: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

    fn entry_point() -> Address {
        ENTRY_POINT.parse().unwrap()
    }

    fn signed_op() -> UserOperation {
        UserOperation {
            sender: "0x9c5754De1443984659E1b3a8d1931D83475ba29C".parse().unwrap(),
            nonce: U256::zero(),
            init_code: "0x9406cc6185a346906296840746125a0e449764545fbfb9cf000000000000000000000000ce0fefa6f7979c4c9b5373e0f5105b7259092c6d0000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_data: "0xb61d27f60000000000000000000000009c5754de1443984659e1b3a8d1931d83475ba29c00000000000000000000000000000000000000000000000000005af3107a400000000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_gas_limit: 33_100.into(),
            verification_gas_limit: 361_460.into(),
            pre_verification_gas: 44_980.into(),
            max_fee_per_gas: 1_695_000_030_u64.into(),
            max_priority_fee_per_gas: 1_695_000_000.into(),
            paymaster_and_data: Bytes::default(),
            signature: "0xebfd4657afe1f1c05c1ec65f3f9cc992a3ac083c424454ba61eab93152195e1400d74df01fc9fa53caadcb83a891d478b713016bcc0c64307c1ad3d7ea2e2d921b".parse().unwrap(),
        }
    }

    #[test]
    fn hash_matches_reference_vectors() {
        let unsigned = AnyUserOperation::V0_6(UserOperation {
            verification_gas_limit: 100_000.into(),
            pre_verification_gas: 21_000.into(),
            max_priority_fee_per_gas: 1_000_000_000.into(),
            ..Default::default()
        });
        assert_eq!(
            unsigned.hash(entry_point(), 80_001).0,
            "0x95418c07086df02ff6bc9e8bdc150b380cb761beecc098630440bcec6e862702"
                .parse::<H256>()
                .unwrap()
        );

        let signed = AnyUserOperation::V0_6(signed_op());
        assert_eq!(
            signed.hash(entry_point(), 80_001).0,
            "0x7c1b8c9df49a9e09ecef0f0fe6841d895850d29820f9a4b494097764085dcd7e"
                .parse::<H256>()
                .unwrap()
        );
    }

    #[test]
    fn signature_does_not_affect_hash() {
        let a = AnyUserOperation::V0_6(signed_op());
        let mut b = a.clone();
        b.set_signature(Bytes::from(vec![0u8; 65]));
        assert_eq!(a.hash(entry_point(), 1), b.hash(entry_point(), 1));
    }

    #[test]
    fn json_wire_form_is_camel_case() {
        let op = signed_op();
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["callGasLimit"], json!("0x814c"));
        assert_eq!(v["paymasterAndData"], json!("0x"));
        assert!(v.get("initCode").is_some());

        let back: UserOperation = serde_json::from_value(v).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn mismatched_fields_names_each_difference() {
        let a = signed_op();
        let mut b = a.clone();
        b.nonce = 7.into();
        b.paymaster_and_data = Bytes::from(vec![1, 2, 3]);
        assert_eq!(a.mismatched_fields(&b), vec!["nonce", "paymasterAndData"]);
        assert!(a.mismatched_fields(&a.clone()).is_empty());
    }
}
