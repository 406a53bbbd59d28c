//! 会话密钥派生与 AES-GCM 信封。

pub mod envelope;
pub mod keys;

pub use envelope::{Envelope, IV_LEN, TAG_LEN, decrypt, encrypt};
pub use keys::{KEY_LEN, SessionInfo, SessionKey, derive_key};
