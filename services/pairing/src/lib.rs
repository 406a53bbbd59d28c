//! tc-pairing：本机确认后，通过加密信封把 Wi-Fi 凭证发送给已配对的对端。

pub mod api;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod service;
pub mod transport;

pub use config::{PairingConfig, TransportConfig};
pub use error::{PairingError, PairingResult};
pub use service::{PairingService, SendOptions, Subscription};
