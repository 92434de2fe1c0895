use crate::entry_point::EntryPointVersion;
use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{collections::HashMap, env, fs, path::Path, time::Duration};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Client behaviour that does not depend on the transport.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Fail `connect` when the endpoint serves a different chain.
    pub expected_chain_id: Option<u64>,
    pub poll_interval: Duration,
    /// Used by `wait_for_receipt` when the caller passes no timeout.
    pub receipt_timeout: Duration,
    /// Versions for entry points at non-canonical addresses.
    pub entry_point_versions: HashMap<Address, EntryPointVersion>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            expected_chain_id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            entry_point_versions: HashMap::new(),
        }
    }
}

impl ClientOptions {
    pub fn with_expected_chain_id(mut self, chain_id: u64) -> Self {
        self.expected_chain_id = Some(chain_id);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn with_entry_point_version(mut self, address: Address, version: EntryPointVersion) -> Self {
        self.entry_point_versions.insert(address, version);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRaw {
    pub chain_id: u64,
    pub bundler_url: String,
    #[serde(default)]
    pub bundler_url_env_var: Option<String>,
    pub entry_point: String,
    #[serde(default)]
    pub entry_point_version: Option<EntryPointVersion>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub receipt_timeout_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// One bundler deployment: endpoint, chain and the entry point to target.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub bundler_url: String,
    pub entry_point: Address,
    pub entry_point_version: Option<EntryPointVersion>,
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub request_timeout: Duration,
}

impl NetworkConfig {
    /// Configured version, else the canonical one for the address.
    pub fn entry_point_version(&self) -> Option<EntryPointVersion> {
        self.entry_point_version
            .or_else(|| EntryPointVersion::from_canonical_address(self.entry_point))
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default()
            .with_expected_chain_id(self.chain_id)
            .with_poll_interval(self.poll_interval)
            .with_receipt_timeout(self.receipt_timeout);
        if let Some(version) = self.entry_point_version {
            options = options.with_entry_point_version(self.entry_point, version);
        }
        options
    }
}

/// Reads a network JSON file. The bundler URL comes from `url_override`,
/// then the env var the file names, then the file itself.
pub fn load_network(path: &Path, url_override: Option<String>) -> Result<NetworkConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read network json at {}", path.display()))?;
    let raw: NetworkRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse network json at {}", path.display()))?;

    let bundler_url = if let Some(url) = url_override {
        url
    } else if let Some(env_var) = raw.bundler_url_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.bundler_url.clone())
    } else {
        raw.bundler_url.clone()
    };

    if bundler_url.contains("alchemy.com/v2/")
        || bundler_url.contains("pimlico.io/v2/")
        || bundler_url.contains("apikey=")
    {
        tracing::warn!("bundler URL looks like it contains an API key; prefer setting it via env");
    }

    let entry_point = parse_addr(&raw.entry_point).context("invalid entryPoint address")?;

    Ok(NetworkConfig {
        chain_id: raw.chain_id,
        bundler_url,
        entry_point,
        entry_point_version: raw.entry_point_version,
        poll_interval: raw
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
            .max(MIN_POLL_INTERVAL),
        receipt_timeout: raw
            .receipt_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECEIPT_TIMEOUT),
        request_timeout: raw
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
