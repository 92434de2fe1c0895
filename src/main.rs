use aa_bundler_client::{
    config::{load_network, NetworkConfig},
    encoding::{fmt_address, fmt_u256},
    signer::sign_user_operation,
    BundlerClient, BundlerError, EntryPointVersion, GasEstimate, UserOperation, UserOperationHash,
    UserOperationReceipt, UserOperationSigner, WalletSigner,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::Address;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Helper: with --json, stdout carries exactly one JSON document, so all
// human-readable output goes to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "aa-bundler", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the bundler's chain id and supported entry points.
    EntryPoints(EntryPointsArgs),

    /// Print the hash of a user operation file (no network access).
    Hash(HashArgs),

    /// Estimate gas for a draft user operation.
    Estimate(EstimateArgs),

    /// Sign a user operation file with the owner key.
    Sign(SignArgs),

    /// Submit a signed user operation and wait for its receipt.
    Send(SendArgs),

    /// Query (or wait for) a user operation receipt.
    Receipt(ReceiptArgs),

    /// Fetch a submitted user operation by hash.
    Lookup(LookupArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Network artifact (chain id, bundler URL, entry point).
    #[arg(long, env = "AA_BUNDLER_NETWORK", default_value = "networks/sepolia.json")]
    network: PathBuf,

    /// Override the bundler URL (otherwise uses the network JSON).
    #[arg(long, env = "AA_BUNDLER_URL")]
    bundler: Option<String>,

    /// Override the entry point from the network JSON.
    #[arg(long, env = "AA_BUNDLER_ENTRYPOINT")]
    entry_point: Option<String>,

    /// Print a single JSON document to stdout. All other output goes to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct EntryPointsArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct HashArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// User operation JSON, in the wire form of the entry point's version.
    op: PathBuf,
}

#[derive(Args, Debug)]
struct EstimateArgs {
    #[command(flatten)]
    common: CommonArgs,

    op: PathBuf,

    /// Write the operation with the estimated gas fields filled in.
    #[arg(long)]
    write: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SignArgs {
    #[command(flatten)]
    common: CommonArgs,

    op: PathBuf,

    /// Owner private key.
    ///
    /// Recommended: set via env var AA_BUNDLER_OWNER_PRIVATE_KEY.
    #[arg(long, env = "AA_BUNDLER_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: String,

    /// Output path; defaults to rewriting the input file.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    op: PathBuf,

    /// Check and hash the operation, but do not submit it.
    #[arg(long)]
    dry_run: bool,

    /// Do not wait for the userOp receipt.
    #[arg(long)]
    no_wait: bool,

    /// Max seconds to wait for the userOp receipt.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,
}

#[derive(Args, Debug)]
struct ReceiptArgs {
    #[command(flatten)]
    common: CommonArgs,

    hash: String,

    /// Poll up to this many seconds instead of querying once.
    #[arg(long)]
    wait_seconds: Option<u64>,
}

#[derive(Args, Debug)]
struct LookupArgs {
    #[command(flatten)]
    common: CommonArgs,

    hash: String,

    /// Fail unless the bundler's copy equals this operation field for field.
    #[arg(long)]
    expect: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Always write logs to stderr so stdout can be used for script-friendly outputs.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::EntryPoints(args) => cmd_entry_points(args).await,
        Command::Hash(args) => cmd_hash(args),
        Command::Estimate(args) => cmd_estimate(args).await,
        Command::Sign(args) => cmd_sign(args).await,
        Command::Send(args) => cmd_send(args).await,
        Command::Receipt(args) => cmd_receipt(args).await,
        Command::Lookup(args) => cmd_lookup(args).await,
    }
}

async fn cmd_entry_points(args: EntryPointsArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (client, _) = connect(&args.common).await?;

    let entry_points: Vec<Value> = client
        .supported_entry_points()
        .iter()
        .map(|ep| {
            json!({
                "address": fmt_address(ep.address),
                "version": ep.version.map(|v| v.to_string()),
            })
        })
        .collect();

    if machine_mode {
        print_json(&json!({ "chainId": client.chain_id(), "entryPoints": entry_points }))?;
    } else {
        outln!(machine_mode, "chainId: {}", client.chain_id());
        for ep in client.supported_entry_points() {
            outln!(machine_mode, "entryPoint: {ep}");
        }
    }
    Ok(())
}

fn cmd_hash(args: HashArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let network = resolve_network(&args.common)?;
    let version = network
        .entry_point_version()
        .ok_or_else(|| anyhow!("unknown entry point version; set entryPointVersion in the network JSON"))?;
    let op = read_user_op(&args.op, version)?;

    let hash = op.hash(network.entry_point, network.chain_id);
    if machine_mode {
        print_json(&json!({
            "userOpHash": hash,
            "entryPoint": fmt_address(network.entry_point),
            "chainId": network.chain_id,
            "missing": op.missing_fields(),
        }))?;
    } else {
        outln!(machine_mode, "userOpHash: {hash}");
        let missing = op.missing_fields();
        if !missing.is_empty() {
            outln!(machine_mode, "not ready to send, missing: {}", missing.join(", "));
        }
    }
    Ok(())
}

async fn cmd_estimate(args: EstimateArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (client, entry_point) = connect(&args.common).await?;
    let version = client.registry().version_of(entry_point)?;
    let mut op = read_user_op(&args.op, version)?;

    outln!(machine_mode, "estimating gas (eth_estimateUserOperationGas)...");
    let estimate = client
        .prepare(&mut op, entry_point)
        .await
        .context("bundler gas estimation failed")?;

    if let Some(path) = &args.write {
        write_user_op(path, &op)?;
        outln!(machine_mode, "wrote prepared user operation to {}", path.display());
    }

    if machine_mode {
        print_json(&estimate_json(&estimate))?;
    } else {
        outln!(
            machine_mode,
            "\nGas estimate:\n{}",
            serde_json::to_string_pretty(&estimate_json(&estimate))?
        );
        let missing = op.missing_fields();
        if !missing.is_empty() {
            outln!(machine_mode, "still missing: {}", missing.join(", "));
        }
    }
    Ok(())
}

async fn cmd_sign(args: SignArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let network = resolve_network(&args.common)?;
    let version = network
        .entry_point_version()
        .ok_or_else(|| anyhow!("unknown entry point version; set entryPointVersion in the network JSON"))?;
    let mut op = read_user_op(&args.op, version)?;

    let signer: WalletSigner = args
        .owner_private_key
        .parse()
        .context("invalid owner private key")?;
    let hash = sign_user_operation(&signer, &mut op, network.entry_point, network.chain_id).await?;

    let out = args.out.as_deref().unwrap_or(&args.op);
    write_user_op(out, &op)?;

    if machine_mode {
        print_json(&json!({
            "userOpHash": hash,
            "signer": fmt_address(signer.address()),
            "path": out.display().to_string(),
        }))?;
    } else {
        outln!(machine_mode, "signer: {}", fmt_address(signer.address()));
        outln!(machine_mode, "userOpHash: {hash}");
        outln!(machine_mode, "wrote signed user operation to {}", out.display());
    }
    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (client, entry_point) = connect(&args.common).await?;
    let version = client.registry().version_of(entry_point)?;
    let op = read_user_op(&args.op, version)?;

    let local = client.user_operation_hash(&op, entry_point)?;
    outln!(
        machine_mode,
        "\nUserOperation:\n{}",
        serde_json::to_string_pretty(&op)?
    );

    if args.dry_run {
        let missing = op.missing_fields();
        outln!(machine_mode, "\n--dry-run set: not sending user operation.");
        if machine_mode {
            print_json(&json!({ "userOpHash": local, "sent": false, "missing": missing }))?;
        } else {
            outln!(machine_mode, "userOpHash: {local}");
            if !missing.is_empty() {
                outln!(machine_mode, "missing: {}", missing.join(", "));
            }
        }
        return Ok(());
    }

    let user_op_hash = match client.send_user_operation(&op, entry_point).await {
        Ok(hash) => hash,
        Err(BundlerError::Duplicate { hash }) => {
            outln!(machine_mode, "bundler already holds this user operation");
            hash
        }
        Err(err) => return Err(err).context("bundler send failed"),
    };
    outln!(machine_mode, "\nuserOpHash: {user_op_hash}");

    if args.no_wait {
        outln!(machine_mode, "--no-wait set: not waiting for receipt.");
        if machine_mode {
            print_json(&json!({ "userOpHash": user_op_hash, "receipt": null }))?;
        }
        return Ok(());
    }

    let receipt = client
        .wait_for_receipt(user_op_hash, Some(Duration::from_secs(args.max_wait_seconds)))
        .await
        .context("failed waiting for userOp receipt")?;

    report_receipt(machine_mode, user_op_hash, Some(&receipt))?;
    if !receipt.success {
        bail!(
            "user operation reverted: {}",
            receipt.reason.as_deref().unwrap_or("no reason given")
        );
    }
    Ok(())
}

async fn cmd_receipt(args: ReceiptArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let hash = parse_hash(&args.hash)?;
    let (client, _) = connect(&args.common).await?;

    let receipt = match args.wait_seconds {
        Some(secs) => Some(
            client
                .wait_for_receipt(hash, Some(Duration::from_secs(secs)))
                .await
                .context("failed waiting for userOp receipt")?,
        ),
        None => client
            .get_user_operation_receipt(hash)
            .await
            .context("receipt query failed")?,
    };

    report_receipt(machine_mode, hash, receipt.as_ref())
}

async fn cmd_lookup(args: LookupArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let hash = parse_hash(&args.hash)?;
    let (client, _) = connect(&args.common).await?;

    let found = client
        .get_user_operation_by_hash(hash)
        .await
        .context("lookup failed")?;

    if machine_mode {
        print_json(&serde_json::to_value(&found)?)?;
    } else {
        outln!(
            machine_mode,
            "UserOperation (entryPoint {}):\n{}",
            fmt_address(found.entry_point),
            serde_json::to_string_pretty(&found.user_operation)?
        );
        match found.transaction_hash {
            Some(tx) => outln!(machine_mode, "included in tx {tx:?}"),
            None => outln!(machine_mode, "not yet included"),
        }
    }

    if let Some(path) = &args.expect {
        let version = found.user_operation.version();
        let expected = read_user_op(path, version)?;
        let mismatched = found.user_operation.mismatched_fields(&expected);
        if !mismatched.is_empty() {
            bail!(
                "bundler copy differs from {}: {}",
                path.display(),
                mismatched.join(", ")
            );
        }
        outln!(machine_mode, "matches {}", path.display());
    }
    Ok(())
}

fn resolve_network(common: &CommonArgs) -> Result<NetworkConfig> {
    let mut network = load_network(&common.network, common.bundler.clone())?;
    if let Some(ep) = &common.entry_point {
        let address: Address = ep
            .parse()
            .map_err(|e| anyhow!("invalid entry point address {ep}: {e}"))?;
        if address != network.entry_point {
            network.entry_point = address;
            network.entry_point_version = EntryPointVersion::from_canonical_address(address);
        }
    }
    Ok(network)
}

async fn connect(common: &CommonArgs) -> Result<(BundlerClient, Address)> {
    let network = resolve_network(common)?;
    let client = BundlerClient::connect_http(
        network.bundler_url.clone(),
        network.request_timeout,
        network.client_options(),
    )
    .await
    .context("failed to connect to bundler")?;

    if !client.registry().contains(network.entry_point) {
        bail!(
            "bundler does not support entry point {} on chain {}",
            fmt_address(network.entry_point),
            client.chain_id()
        );
    }
    Ok((client, network.entry_point))
}

fn read_user_op(path: &Path, version: EntryPointVersion) -> Result<UserOperation> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read user operation at {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse user operation at {}", path.display()))?;
    UserOperation::from_json(value, version)
        .with_context(|| format!("{} is not a {version} user operation", path.display()))
}

fn write_user_op(path: &Path, op: &UserOperation) -> Result<()> {
    let text = serde_json::to_string_pretty(op)?;
    fs::write(path, text + "\n").with_context(|| format!("failed to write {}", path.display()))
}

fn parse_hash(s: &str) -> Result<UserOperationHash> {
    s.parse()
        .map_err(|e| anyhow!("invalid user operation hash {s}: {e}"))
}

fn estimate_json(estimate: &GasEstimate) -> Value {
    let mut out = json!({
        "preVerificationGas": fmt_u256(estimate.pre_verification_gas),
        "verificationGasLimit": fmt_u256(estimate.verification_gas_limit),
        "callGasLimit": fmt_u256(estimate.call_gas_limit),
    });
    if let Some(v) = estimate.paymaster_verification_gas_limit {
        out["paymasterVerificationGasLimit"] = json!(fmt_u256(v));
    }
    if let Some(v) = estimate.paymaster_post_op_gas_limit {
        out["paymasterPostOpGasLimit"] = json!(fmt_u256(v));
    }
    out
}

fn report_receipt(
    machine_mode: bool,
    hash: UserOperationHash,
    receipt: Option<&UserOperationReceipt>,
) -> Result<()> {
    if machine_mode {
        return print_json(&json!({ "userOpHash": hash, "receipt": receipt }));
    }
    match receipt {
        Some(receipt) => {
            outln!(
                machine_mode,
                "\nUserOp receipt:\n{}",
                serde_json::to_string_pretty(receipt)?
            );
            outln!(
                machine_mode,
                "success: {} (tx {:?})",
                receipt.success,
                receipt.transaction_hash()
            );
        }
        None => outln!(machine_mode, "no receipt yet for {hash}"),
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
