//! 凭证负载 schema 校验与编解码。
//!
//! 出站负载在加密前校验，入站负载在解密后再次校验：解密成功不代表内容可信。

use serde_json::Value;
use thiserror::Error;

use crate::CredentialPayload;

/// 负载 schema 错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload must be an object")]
    NotObject,
    #[error("SSID is required")]
    MissingSsid,
    #[error("security type is required")]
    MissingSecurityType,
    #[error("password must be a string")]
    PasswordNotString,
    #[error("flags must be an object when provided")]
    FlagsNotObject,
}

/// 校验已构造的负载。
pub fn validate_payload(payload: &CredentialPayload) -> Result<(), SchemaError> {
    if payload.ssid.trim().is_empty() {
        return Err(SchemaError::MissingSsid);
    }
    if payload.security_type.trim().is_empty() {
        return Err(SchemaError::MissingSecurityType);
    }
    Ok(())
}

/// 从任意 JSON 值解析负载，字段类型不符时直接拒绝，不做隐式转换。
pub fn payload_from_value(value: &Value) -> Result<CredentialPayload, SchemaError> {
    let obj = value.as_object().ok_or(SchemaError::NotObject)?;

    let ssid = obj
        .get("ssid")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingSsid)?;
    let security_type = obj
        .get("securityType")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingSecurityType)?;
    let password = obj
        .get("password")
        .and_then(Value::as_str)
        .ok_or(SchemaError::PasswordNotString)?;
    let flags = match obj.get("flags") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(SchemaError::FlagsNotObject),
    };

    let payload = CredentialPayload {
        ssid: ssid.to_string(),
        security_type: security_type.to_string(),
        password: password.to_string(),
        flags,
    };
    validate_payload(&payload)?;
    Ok(payload)
}

/// 从原始字节解码并校验负载。
pub fn decode_payload(raw: &[u8]) -> Result<CredentialPayload, SchemaError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|err| SchemaError::Json(err.to_string()))?;
    payload_from_value(&value)
}

/// 校验后编码为规范 JSON 字节（字段顺序固定）。
pub fn encode_payload(payload: &CredentialPayload) -> Result<Vec<u8>, SchemaError> {
    validate_payload(payload)?;
    serde_json::to_vec(payload).map_err(|err| SchemaError::Json(err.to_string()))
}

/// 生成标准 Wi-Fi 二维码文本：`WIFI:T:<sec>;S:<ssid>;P:<pwd>;;`。
pub fn wifi_qr_string(payload: &CredentialPayload) -> String {
    let security = payload.security_type.trim();
    let sec = if security.is_empty() || security.eq_ignore_ascii_case("open") {
        "nopass"
    } else {
        security
    };
    let mut out = format!("WIFI:T:{sec};S:{};", escape_qr_field(&payload.ssid));
    if !payload.password.is_empty() {
        out.push_str(&format!("P:{};", escape_qr_field(&payload.password)));
    }
    out.push(';');
    out
}

fn escape_qr_field(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | ';' | ',' | ':') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
