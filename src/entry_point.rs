use crate::encoding::fmt_address;
use crate::error::BundlerError;
use ethers::types::{Address, H160};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

/// Canonical EntryPoint v0.6 deployment.
pub const ENTRY_POINT_V0_6: Address = H160([
    0x5f, 0xf1, 0x37, 0xd4, 0xb0, 0xfd, 0xcd, 0x49, 0xdc, 0xa3, 0x0c, 0x7c, 0xf5, 0x7e, 0x57, 0x8a,
    0x02, 0x6d, 0x27, 0x89,
]);

/// Canonical EntryPoint v0.7 deployment.
pub const ENTRY_POINT_V0_7: Address = H160([
    0x00, 0x00, 0x00, 0x00, 0x71, 0x72, 0x7d, 0xe2, 0x2e, 0x5e, 0x9d, 0x8b, 0xaf, 0x0e, 0xda, 0xc6,
    0xf3, 0x7d, 0xa0, 0x32,
]);

/// Selects the user operation field set and hash packing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryPointVersion {
    #[serde(rename = "v0.6")]
    V0_6,
    #[serde(rename = "v0.7")]
    V0_7,
}

impl EntryPointVersion {
    pub fn canonical_address(self) -> Address {
        match self {
            Self::V0_6 => ENTRY_POINT_V0_6,
            Self::V0_7 => ENTRY_POINT_V0_7,
        }
    }

    pub fn from_canonical_address(address: Address) -> Option<Self> {
        [Self::V0_6, Self::V0_7]
            .into_iter()
            .find(|v| v.canonical_address() == address)
    }
}

impl fmt::Display for EntryPointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V0_6 => f.write_str("v0.6"),
            Self::V0_7 => f.write_str("v0.7"),
        }
    }
}

impl FromStr for EntryPointVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('v') {
            "0.6" => Ok(Self::V0_6),
            "0.7" => Ok(Self::V0_7),
            _ => Err(format!("unsupported entry point version {s} (expected v0.6 or v0.7)")),
        }
    }
}

/// An entry point advertised by a bundler. The version is `None` when the
/// address is neither canonical nor configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub address: Address,
    pub version: Option<EntryPointVersion>,
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{} ({v})", fmt_address(self.address)),
            None => write!(f, "{} (unknown version)", fmt_address(self.address)),
        }
    }
}

/// Chain id and entry points served by one bundler endpoint. Fixed once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPointRegistry {
    chain_id: u64,
    entry_points: Vec<EntryPoint>,
}

impl EntryPointRegistry {
    pub fn new(
        chain_id: u64,
        addresses: impl IntoIterator<Item = Address>,
        overrides: &HashMap<Address, EntryPointVersion>,
    ) -> Result<Self, BundlerError> {
        let entry_points: Vec<EntryPoint> = addresses
            .into_iter()
            .map(|address| EntryPoint {
                address,
                version: overrides
                    .get(&address)
                    .copied()
                    .or_else(|| EntryPointVersion::from_canonical_address(address)),
            })
            .collect();

        if entry_points.is_empty() {
            return Err(BundlerError::precondition(
                "bundler reports no supported entry points",
            ));
        }

        Ok(Self {
            chain_id,
            entry_points,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn get(&self, address: Address) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.address == address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.get(address).is_some()
    }

    /// Version of a supported entry point, failing locally when the bundler
    /// does not serve it or its version is unknown.
    pub fn version_of(&self, address: Address) -> Result<EntryPointVersion, BundlerError> {
        let ep = self.get(address).ok_or_else(|| {
            BundlerError::precondition(format!(
                "entry point {} is not supported by this bundler",
                fmt_address(address)
            ))
        })?;
        ep.version.ok_or_else(|| {
            BundlerError::precondition(format!(
                "entry point {} has no known version; configure one",
                fmt_address(address)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_addresses() {
        assert_eq!(
            ENTRY_POINT_V0_6,
            "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789"
                .parse::<Address>()
                .unwrap()
        );
        assert_eq!(
            ENTRY_POINT_V0_7,
            "0x0000000071727De22E5E9d8BAf0edAc6f37da032"
                .parse::<Address>()
                .unwrap()
        );
        assert_eq!(
            EntryPointVersion::from_canonical_address(ENTRY_POINT_V0_7),
            Some(EntryPointVersion::V0_7)
        );
        assert_eq!(
            EntryPointVersion::from_canonical_address(Address::repeat_byte(1)),
            None
        );
    }

    #[test]
    fn version_parsing() {
        assert_eq!("v0.6".parse::<EntryPointVersion>(), Ok(EntryPointVersion::V0_6));
        assert_eq!("0.7".parse::<EntryPointVersion>(), Ok(EntryPointVersion::V0_7));
        assert!("v0.8".parse::<EntryPointVersion>().is_err());
        assert_eq!(
            serde_json::from_str::<EntryPointVersion>("\"v0.7\"").unwrap(),
            EntryPointVersion::V0_7
        );
    }

    #[test]
    fn registry_resolves_versions() {
        let custom = Address::repeat_byte(0x07);
        let unknown = Address::repeat_byte(0x08);
        let overrides = HashMap::from([(custom, EntryPointVersion::V0_6)]);
        let registry =
            EntryPointRegistry::new(1, [ENTRY_POINT_V0_7, custom, unknown], &overrides).unwrap();

        assert_eq!(registry.entry_points().len(), 3);
        assert_eq!(
            registry.version_of(ENTRY_POINT_V0_7).unwrap(),
            EntryPointVersion::V0_7
        );
        assert_eq!(registry.version_of(custom).unwrap(), EntryPointVersion::V0_6);
        assert!(matches!(
            registry.version_of(unknown),
            Err(BundlerError::Precondition(_))
        ));
        assert!(!registry.contains(ENTRY_POINT_V0_6));
        assert!(matches!(
            registry.version_of(ENTRY_POINT_V0_6),
            Err(BundlerError::Precondition(_))
        ));
    }

    #[test]
    fn empty_registry_is_rejected() {
        assert!(EntryPointRegistry::new(1, Vec::new(), &HashMap::new()).is_err());
    }
}
