//! AES-256-GCM 信封：每次加密生成新的 12 字节随机 IV，认证标签独立存放。

use aes_gcm::{
    Aes256Gcm, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::{RngCore, rngs::OsRng};
use tc_shared_protocol::{CredentialPayload, WireEnvelope, decode_payload, encode_payload};
use zeroize::Zeroize;

use crate::{
    crypto::keys::SessionKey,
    error::{DecryptError, PairingError, PairingResult},
};

/// GCM IV 长度。
pub const IV_LEN: usize = 12;
/// GCM 认证标签长度。
pub const TAG_LEN: usize = 16;

/// 已加密的凭证。按次创建、按次消费，不落盘。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// 转为线上格式（base64 字段）。
    pub fn to_wire(&self) -> WireEnvelope {
        WireEnvelope {
            iv: STANDARD.encode(self.iv),
            tag: STANDARD.encode(self.tag),
            data: STANDARD.encode(&self.ciphertext),
        }
    }

    /// 从线上格式还原，长度或编码不符直接拒绝。
    pub fn from_wire(wire: &WireEnvelope) -> Result<Self, DecryptError> {
        let iv = decode_fixed::<IV_LEN>("iv", &wire.iv)?;
        let tag = decode_fixed::<TAG_LEN>("tag", &wire.tag)?;
        let ciphertext = STANDARD
            .decode(wire.data.as_bytes())
            .map_err(|err| DecryptError::Envelope(format!("data: {err}")))?;
        Ok(Self {
            iv,
            tag,
            ciphertext,
        })
    }

    /// 编码为单帧 JSON 字节。
    pub fn encode_frame(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.to_wire())
    }
}

fn decode_fixed<const N: usize>(field: &str, raw: &str) -> Result<[u8; N], DecryptError> {
    let bytes = STANDARD
        .decode(raw.as_bytes())
        .map_err(|err| DecryptError::Envelope(format!("{field}: {err}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        DecryptError::Envelope(format!("{field}: expected {N} bytes, got {}", bytes.len()))
    })
}

fn cipher_for(key: &SessionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// 校验并加密凭证负载。
pub fn encrypt(payload: &CredentialPayload, key: &SessionKey) -> PairingResult<Envelope> {
    let mut buffer = encode_payload(payload)?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let tag = cipher_for(key)
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| {
            buffer.zeroize();
            PairingError::Encrypt
        })?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok(Envelope {
        iv,
        tag: tag_bytes,
        ciphertext: buffer,
    })
}

/// 解密并校验负载。认证失败时不返回任何明文。
pub fn decrypt(envelope: &Envelope, key: &SessionKey) -> Result<CredentialPayload, DecryptError> {
    let mut buffer = envelope.ciphertext.clone();
    cipher_for(key)
        .decrypt_in_place_detached(
            Nonce::from_slice(&envelope.iv),
            b"",
            &mut buffer,
            Tag::from_slice(&envelope.tag),
        )
        .map_err(|_| DecryptError::Authentication)?;

    let decoded = decode_payload(&buffer);
    buffer.zeroize();
    Ok(decoded?)
}
