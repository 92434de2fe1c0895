//! Client core for ERC-4337 bundlers: build and hash user operations,
//! estimate their gas, submit them, wait for inclusion and look them up.

pub mod bundler;
pub mod config;
pub mod encoding;
pub mod entry_point;
pub mod error;
pub mod poller;
pub mod receipt;
pub mod signer;
pub mod transport;
pub mod user_operation;

pub use bundler::BundlerClient;
pub use config::{ClientOptions, NetworkConfig};
pub use entry_point::{EntryPoint, EntryPointRegistry, EntryPointVersion};
pub use error::{BundlerError, Result, RpcError, TransportError};
pub use poller::{PollState, ReceiptPoller};
pub use receipt::{UserOperationByHash, UserOperationReceipt};
pub use signer::{UserOperationSigner, WalletSigner};
pub use transport::{HttpTransport, Transport};
pub use user_operation::{GasEstimate, UserOperation, UserOperationHash};
