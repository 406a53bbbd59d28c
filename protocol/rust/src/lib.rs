// 文件职责：
// 1) 定义两端 pairing service 共用的线上数据结构（凭证负载、加密信封、事件）。
// 2) 提供凭证负载的 schema 校验与规范化编解码，两端必须使用同一份实现。
// 3) 提供时间戳、Wi-Fi 二维码文本等跨端一致的基础函数。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

mod codec;

pub use codec::{
    SchemaError, decode_payload, encode_payload, payload_from_value, validate_payload,
    wifi_qr_string,
};

/// 收到格式错误的信封（非 JSON 或字段缺失）。
pub const ERROR_CODE_INVALID_ENVELOPE: &str = "invalid-envelope";
/// 尚未绑定会话，无法解密首个来包。
pub const ERROR_CODE_NO_SESSION: &str = "no-session";
/// 解密、认证或负载校验失败。
pub const ERROR_CODE_DECRYPT_FAILED: &str = "decrypt-failed";

/// Wi-Fi 凭证负载。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    // 网络名称（去空白后非空）。
    pub ssid: String,
    // 安全类型，如 WPA2 / WPA3 / OPEN。
    pub security_type: String,
    // 密码；开放网络为空字符串。
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    // 附加标记（可选，必须是对象）。
    pub flags: Option<Map<String, Value>>,
}

impl CredentialPayload {
    /// 构造不带 flags 的负载。
    pub fn new(
        ssid: impl Into<String>,
        security_type: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            security_type: security_type.into(),
            password: password.into(),
            flags: None,
        }
    }
}

/// 信封线上格式：三个字段均为标准 base64。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    // 12 字节随机 IV。
    pub iv: String,
    // 16 字节 GCM 认证标签。
    pub tag: String,
    // 密文。
    pub data: String,
}

/// 收到并校验通过的凭证。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedCredentialPayload {
    pub payload: CredentialPayload,
    // 接收时间（RFC3339）。
    pub received_at: String,
}

/// 接收链路错误事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingErrorPayload {
    pub code: String,
    pub message: String,
}

/// 降级或环境告警事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingWarningPayload {
    pub scope: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// 事件主体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum PairingEventBody {
    Message(ReceivedCredentialPayload),
    Error(PairingErrorPayload),
    Warning(PairingWarningPayload),
}

/// 推送给 UI 层的事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingEvent {
    // 事件唯一 ID。
    pub event_id: String,
    // 事件时间（RFC3339）。
    pub ts: String,
    #[serde(flatten)]
    pub body: PairingEventBody,
}

impl PairingEvent {
    /// 构造事件：自动填充 eventId 与 ts。
    pub fn new(body: PairingEventBody) -> Self {
        Self {
            event_id: format!("evt_{}", Uuid::new_v4()),
            ts: now_rfc3339_nanos(),
            body,
        }
    }

    pub fn message(payload: CredentialPayload) -> Self {
        Self::new(PairingEventBody::Message(ReceivedCredentialPayload {
            payload,
            received_at: now_rfc3339_nanos(),
        }))
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(PairingEventBody::Error(PairingErrorPayload {
            code: code.into(),
            message: message.into(),
        }))
    }

    pub fn warning(
        scope: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self::new(PairingEventBody::Warning(PairingWarningPayload {
            scope: scope.into(),
            message: message.into(),
            details,
        }))
    }

    /// 事件类型名，用于日志。
    pub fn kind(&self) -> &'static str {
        match self.body {
            PairingEventBody::Message(_) => "message",
            PairingEventBody::Error(_) => "error",
            PairingEventBody::Warning(_) => "warning",
        }
    }
}

/// 生成纳秒精度 UTC 时间戳（RFC3339）。
pub fn now_rfc3339_nanos() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}
