use crate::config::ClientOptions;
use crate::encoding::{
    fmt_address, parse_optional_u256_field, parse_u256_field, parse_u256_quantity,
    parse_userop_hash,
};
use crate::entry_point::{EntryPoint, EntryPointRegistry};
use crate::error::{BundlerError, Result, TransportError};
use crate::poller::{query_receipt, ReceiptPoller};
use crate::receipt::{UserOperationByHash, UserOperationReceipt};
use crate::transport::{HttpTransport, Transport};
use crate::user_operation::{GasEstimate, UserOperation, UserOperationHash};
use ethers::types::{Address, U256};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

pub const METHOD_SUPPORTED_ENTRY_POINTS: &str = "eth_supportedEntryPoints";
pub const METHOD_CHAIN_ID: &str = "eth_chainId";
pub const METHOD_ESTIMATE_GAS: &str = "eth_estimateUserOperationGas";
pub const METHOD_SEND: &str = "eth_sendUserOperation";
pub const METHOD_GET_BY_HASH: &str = "eth_getUserOperationByHash";

/// ERC-4337 bundler client bound to one endpoint.
///
/// The chain id and supported entry points are read once in
/// [`BundlerClient::connect`] and never change afterwards; every other call
/// is independent, so clones can be used from concurrent tasks.
#[derive(Debug)]
pub struct BundlerClient<T: Transport = HttpTransport> {
    transport: Arc<T>,
    registry: Arc<EntryPointRegistry>,
    options: ClientOptions,
}

impl<T: Transport> Clone for BundlerClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            options: self.options.clone(),
        }
    }
}

impl BundlerClient<HttpTransport> {
    pub async fn connect_http(
        url: String,
        request_timeout: Duration,
        options: ClientOptions,
    ) -> Result<Self> {
        let transport = HttpTransport::with_timeout(url, request_timeout)?;
        Self::connect(transport, options).await
    }
}

impl<T: Transport> BundlerClient<T> {
    /// Reads the endpoint's chain id and entry points.
    pub async fn connect(transport: T, options: ClientOptions) -> Result<Self> {
        let chain_id = fetch_chain_id(&transport).await?;
        if let Some(expected) = options.expected_chain_id {
            if expected != chain_id {
                return Err(BundlerError::precondition(format!(
                    "bundler serves chain {chain_id}, expected {expected}"
                )));
            }
        }

        let addresses = fetch_supported_entry_points(&transport).await?;
        let registry = EntryPointRegistry::new(chain_id, addresses, &options.entry_point_versions)?;

        tracing::info!(
            chain_id,
            entry_points = registry.entry_points().len(),
            "connected to bundler"
        );
        for ep in registry.entry_points() {
            tracing::debug!(entry_point = %ep, "supported entry point");
        }

        Ok(Self {
            transport: Arc::new(transport),
            registry: Arc::new(registry),
            options,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &EntryPointRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn chain_id(&self) -> u64 {
        self.registry.chain_id()
    }

    pub fn supported_entry_points(&self) -> &[EntryPoint] {
        self.registry.entry_points()
    }

    /// Local hash of `op` for `entry_point` on this client's chain. No round trip.
    pub fn user_operation_hash(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<UserOperationHash> {
        self.check_entry_point(op, entry_point)?;
        Ok(op.hash(entry_point, self.chain_id()))
    }

    fn check_entry_point(&self, op: &UserOperation, entry_point: Address) -> Result<()> {
        let version = self.registry.version_of(entry_point)?;
        if version != op.version() {
            return Err(BundlerError::precondition(format!(
                "{} user operation cannot target {version} entry point {}",
                op.version(),
                fmt_address(entry_point)
            )));
        }
        Ok(())
    }

    /// Estimates gas for a draft. The signature may be empty or a dummy.
    pub async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate> {
        self.check_entry_point(op, entry_point)?;
        if op.sender().is_zero() {
            return Err(BundlerError::precondition("draft user operation has no sender"));
        }
        let inconsistent = op.inconsistent_fields();
        if !inconsistent.is_empty() {
            return Err(BundlerError::precondition(format!(
                "user operation is inconsistent: {}",
                inconsistent.join(", ")
            )));
        }

        let params = json!([op, fmt_address(entry_point)]);
        let res = self.transport.call(METHOD_ESTIMATE_GAS, params).await?;
        let estimate = parse_gas_estimate(&res, op.requires_paymaster_gas())?;

        tracing::debug!(
            sender = ?op.sender(),
            call_gas_limit = %estimate.call_gas_limit,
            verification_gas_limit = %estimate.verification_gas_limit,
            pre_verification_gas = %estimate.pre_verification_gas,
            "gas estimated"
        );
        Ok(estimate)
    }

    /// Estimates and writes the gas fields into `op`.
    pub async fn prepare(
        &self,
        op: &mut UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate> {
        let estimate = self.estimate_user_operation_gas(op, entry_point).await?;
        op.apply_gas_estimate(&estimate)?;
        Ok(estimate)
    }

    /// Submits a complete, signed operation. Returns the local hash after
    /// checking that the bundler reported the same one.
    ///
    /// An incomplete operation fails before any request is made. A bundler
    /// that already holds the operation yields [`BundlerError::Duplicate`]
    /// carrying the same hash.
    pub async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<UserOperationHash> {
        self.check_entry_point(op, entry_point)?;
        let missing = op.missing_fields();
        if !missing.is_empty() {
            return Err(BundlerError::precondition(format!(
                "user operation is incomplete: missing {}",
                missing.join(", ")
            )));
        }

        let local = op.hash(entry_point, self.chain_id());
        let params = json!([op, fmt_address(entry_point)]);
        let res = match self.transport.call(METHOD_SEND, params).await {
            Ok(res) => res,
            Err(TransportError::Rpc(err)) if err.is_duplicate() => {
                tracing::info!(hash = %local, error = %err, "user operation already known");
                return Err(BundlerError::Duplicate { hash: local });
            }
            Err(err) => return Err(err.into()),
        };

        let remote = parse_userop_hash(&res)?;
        if remote != local {
            return Err(BundlerError::HashMismatch { local, remote });
        }

        tracing::info!(hash = %local, sender = ?op.sender(), nonce = %op.nonce(), "user operation submitted");
        Ok(local)
    }

    /// One receipt query; `None` while the operation is not included.
    pub async fn get_user_operation_receipt(
        &self,
        hash: UserOperationHash,
    ) -> Result<Option<UserOperationReceipt>> {
        Ok(query_receipt(self.transport.as_ref(), hash).await?)
    }

    /// A poller using this client's interval; `None` uses the configured
    /// receipt timeout.
    pub fn receipt_poller(
        &self,
        hash: UserOperationHash,
        timeout: Option<Duration>,
    ) -> ReceiptPoller<'_, T> {
        ReceiptPoller::new(
            self.transport.as_ref(),
            hash,
            timeout.unwrap_or(self.options.receipt_timeout),
            self.options.poll_interval,
        )
    }

    /// Waits until the receipt appears, the timeout expires or a query fails.
    pub async fn wait_for_receipt(
        &self,
        hash: UserOperationHash,
        timeout: Option<Duration>,
    ) -> Result<UserOperationReceipt> {
        self.receipt_poller(hash, timeout).wait().await
    }

    /// Resolves a hash to the submitted operation. Unknown and not yet
    /// propagated hashes both give [`BundlerError::NotFound`].
    pub async fn get_user_operation_by_hash(
        &self,
        hash: UserOperationHash,
    ) -> Result<UserOperationByHash> {
        let res = self.transport.call(METHOD_GET_BY_HASH, json!([hash])).await?;
        if res.is_null() {
            return Err(BundlerError::NotFound(hash));
        }
        Ok(UserOperationByHash::from_response(res, &self.registry)?)
    }
}

pub async fn fetch_chain_id<T: Transport + ?Sized>(transport: &T) -> Result<u64, TransportError> {
    let res = transport.call(METHOD_CHAIN_ID, json!([])).await?;
    let chain_id = match &res {
        Value::String(s) => parse_u256_quantity(s)?,
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| TransportError::malformed(format!("invalid chain id {n}")))?,
        other => {
            return Err(TransportError::malformed(format!(
                "unexpected eth_chainId result: {other}"
            )))
        }
    };
    if chain_id.bits() > 64 {
        return Err(TransportError::malformed(format!(
            "chain id {chain_id} exceeds 64 bits"
        )));
    }
    Ok(chain_id.as_u64())
}

pub async fn fetch_supported_entry_points<T: Transport + ?Sized>(
    transport: &T,
) -> Result<Vec<Address>, TransportError> {
    let res = transport.call(METHOD_SUPPORTED_ENTRY_POINTS, json!([])).await?;
    serde_json::from_value(res)
        .map_err(|e| TransportError::malformed(format!("invalid entry point list: {e}")))
}

fn positive_u256_field(res: &Value, key: &str) -> Result<U256, TransportError> {
    let v = parse_u256_field(res, key)?;
    if v.is_zero() {
        return Err(TransportError::malformed(format!("{key} estimated as zero")));
    }
    Ok(v)
}

/// Mandatory fields must be present and positive; nothing is defaulted.
fn parse_gas_estimate(
    res: &Value,
    paymaster_gas_required: bool,
) -> Result<GasEstimate, TransportError> {
    let call_gas_limit = positive_u256_field(res, "callGasLimit")?;
    let verification_gas_limit = positive_u256_field(res, "verificationGasLimit")?;
    let pre_verification_gas = positive_u256_field(res, "preVerificationGas")?;

    let (paymaster_verification_gas_limit, paymaster_post_op_gas_limit) =
        if paymaster_gas_required {
            (
                Some(positive_u256_field(res, "paymasterVerificationGasLimit")?),
                Some(positive_u256_field(res, "paymasterPostOpGasLimit")?),
            )
        } else {
            (
                parse_optional_u256_field(res, "paymasterVerificationGasLimit")?,
                parse_optional_u256_field(res, "paymasterPostOpGasLimit")?,
            )
        };

    Ok(GasEstimate {
        pre_verification_gas,
        verification_gas_limit,
        call_gas_limit,
        paymaster_verification_gas_limit,
        paymaster_post_op_gas_limit,
    })
}
