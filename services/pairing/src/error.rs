//! pairing service 错误类型。

use std::time::Duration;

use tc_shared_protocol::SchemaError;
use thiserror::Error;

/// Result 别名。
pub type PairingResult<T> = Result<T, PairingError>;

/// 会话密钥派生失败：没有可用的密钥材料。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a pairing secret or user secret is required")]
pub struct KeyDerivationError;

/// 解密失败。所有分支都不暴露任何明文。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("invalid envelope: {0}")]
    Envelope(String),
    #[error("authentication failed")]
    Authentication,
    #[error("decrypted payload rejected: {0}")]
    Payload(#[from] SchemaError),
}

/// 传输层错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error("transport io failed: {0}")]
    Io(String),
    #[error("operation not supported by {0} adapter")]
    Unsupported(&'static str),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// pairing service 对外暴露的错误。
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("invalid credential payload: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    #[error("local confirmation required before opening pairing channels")]
    ApprovalRequired,

    #[error("unable to open pairing channel: {0}")]
    ChannelUnavailable(String),

    #[error("pairing send timed out after {}ms", .0.as_millis())]
    SendTimeout(Duration),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error("pairing adapter cannot start advertising")]
    AdvertiseUnsupported,

    #[error("encryption failed")]
    Encrypt,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PairingError {
    /// 稳定错误码，供控制 API 与日志使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Schema(_) => "SCHEMA_INVALID",
            Self::KeyDerivation(_) => "KEY_DERIVATION_FAILED",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::ChannelUnavailable(_) => "CHANNEL_UNAVAILABLE",
            Self::SendTimeout(_) => "SEND_TIMEOUT",
            Self::Decrypt(_) => "DECRYPT_FAILED",
            Self::AdvertiseUnsupported => "ADVERTISE_UNSUPPORTED",
            Self::Encrypt => "ENCRYPT_FAILED",
            Self::Transport(_) => "TRANSPORT_FAILED",
        }
    }
}
