use crate::error::{BundlerError, Result};
use crate::user_operation::{UserOperation, UserOperationHash};
use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, Signature},
};
use std::str::FromStr;

/// Produces the signature the account's validation expects.
#[async_trait]
pub trait UserOperationSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<Bytes>;
}

/// EOA owner signing the EIP-191 prefixed user operation hash, which is what
/// simple accounts verify.
#[derive(Debug, Clone)]
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

impl FromStr for WalletSigner {
    type Err = BundlerError;

    fn from_str(private_key: &str) -> Result<Self> {
        let key = private_key.trim().trim_start_matches("0x");
        LocalWallet::from_str(key)
            .map(Self::new)
            .map_err(|e| BundlerError::Signer(format!("invalid private key: {e}")))
    }
}

#[async_trait]
impl UserOperationSigner for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<Bytes> {
        let hash = op.hash(entry_point, chain_id);
        let sig = self
            .wallet
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| BundlerError::Signer(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }
}

/// Hashes `op` locally and stores the signature on it. Gas fields must be
/// final, since the hash covers them.
pub async fn sign_user_operation<S: UserOperationSigner + ?Sized>(
    signer: &S,
    op: &mut UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> Result<UserOperationHash> {
    let signature = signer.sign(op, entry_point, chain_id).await?;
    op.set_signature(signature);
    let hash = op.hash(entry_point, chain_id);
    tracing::debug!(%hash, signer = ?signer.address(), "user operation signed");
    Ok(hash)
}

/// Address that produced the operation's EIP-191 signature.
pub fn recover_signer(op: &UserOperation, entry_point: Address, chain_id: u64) -> Result<Address> {
    let hash = op.hash(entry_point, chain_id);
    let sig = Signature::try_from(op.signature().as_ref())
        .map_err(|e| BundlerError::Signer(format!("invalid signature: {e}")))?;
    sig.recover(hash.as_bytes().to_vec())
        .map_err(|e| BundlerError::Signer(format!("recovery failed: {e}")))
}
