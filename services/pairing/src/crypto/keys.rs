//! 会话密钥派生：HKDF-SHA256(salt = SHA-256(deviceId), ikm = secrets)。

use std::fmt;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::KeyDerivationError;

/// 派生密钥长度（AES-256）。
pub const KEY_LEN: usize = 32;
/// 多段密钥材料的拼接分隔符。
const SECRET_SEPARATOR: &str = ":";
/// 未提供 deviceId 时使用的盐值来源。
const DEFAULT_DEVICE_ID: &str = "default-device";
/// HKDF info：把密钥绑定到本应用。
const HKDF_INFO: &[u8] = b"termichemti-bluetooth";

/// 会话密钥材料。两端需要在首条消息前线下约定一致。
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub pairing_secret: Option<String>,
    #[serde(default)]
    pub user_secret: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl SessionInfo {
    pub fn with_pairing_secret(secret: impl Into<String>) -> Self {
        Self {
            pairing_secret: Some(secret.into()),
            ..Self::default()
        }
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// 逐字段合并：本次值优先，缺失时回退到 `fallback`。
    pub fn merged_with(&self, fallback: Option<&SessionInfo>) -> SessionInfo {
        let Some(fallback) = fallback else {
            return self.clone();
        };
        SessionInfo {
            pairing_secret: non_empty(&self.pairing_secret)
                .or_else(|| non_empty(&fallback.pairing_secret)),
            user_secret: non_empty(&self.user_secret).or_else(|| non_empty(&fallback.user_secret)),
            device_id: non_empty(&self.device_id).or_else(|| non_empty(&fallback.device_id)),
        }
    }

    fn key_material(&self) -> Option<String> {
        let parts = [&self.pairing_secret, &self.user_secret]
            .into_iter()
            .filter_map(non_empty)
            .collect::<Vec<String>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(SECRET_SEPARATOR))
        }
    }
}

impl fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInfo")
            .field("pairing_secret", &self.pairing_secret.as_ref().map(|_| "***"))
            .field("user_secret", &self.user_secret.as_ref().map(|_| "***"))
            .field("device_id", &self.device_id)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// 32 字节会话密钥，析构时清零。
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(***)")
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// 从会话信息派生确定性密钥：相同输入在任何进程中都得到相同密钥。
pub fn derive_key(session: &SessionInfo) -> Result<SessionKey, KeyDerivationError> {
    let mut material = session.key_material().ok_or(KeyDerivationError)?;

    let device_id = non_empty(&session.device_id);
    let salt = Sha256::digest(device_id.as_deref().unwrap_or(DEFAULT_DEVICE_ID).as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), material.as_bytes());
    let mut okm = [0u8; KEY_LEN];
    let expanded = hk.expand(HKDF_INFO, &mut okm);
    material.zeroize();
    expanded.map_err(|_| KeyDerivationError)?;
    Ok(SessionKey(okm))
}
