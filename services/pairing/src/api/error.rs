//! API 错误定义与响应转换。

use axum::{Json, http::StatusCode};
use serde::Serialize;

use super::response::{ApiEnvelope, ApiReply};
use crate::error::PairingError;

/// 控制接口错误。
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
    pub(crate) suggestion: &'static str,
}

impl ApiError {
    /// 构造统一 API 错误。
    pub(crate) fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        suggestion: &'static str,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            suggestion,
        }
    }

    /// 转换为任意 data 类型的失败响应（data 恒为空）。
    pub(crate) fn into_reply<T: Serialize>(self) -> ApiReply<T> {
        (
            self.status,
            Json(ApiEnvelope {
                ok: false,
                code: self.code.to_string(),
                message: self.message,
                suggestion: self.suggestion.to_string(),
                data: None,
            }),
        )
    }
}

impl From<PairingError> for ApiError {
    fn from(err: PairingError) -> Self {
        let code = err.code();
        let (status, message, suggestion) = match &err {
            PairingError::Schema(_) => (
                StatusCode::BAD_REQUEST,
                "凭证内容不合法",
                "请检查 SSID、加密类型与密码字段",
            ),
            PairingError::KeyDerivation(_) => (
                StatusCode::BAD_REQUEST,
                "缺少配对密钥",
                "请提供 pairingSecret 或 userSecret",
            ),
            PairingError::ApprovalRequired => (
                StatusCode::FORBIDDEN,
                "尚未在本机确认配对",
                "请先在本机确认，授权窗口过期后需要重新确认",
            ),
            PairingError::ChannelUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "无法打开配对通道",
                "请确认对端在线并处于广播状态",
            ),
            PairingError::SendTimeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "发送超时",
                "请确认对端仍在连接范围内后重试",
            ),
            PairingError::AdvertiseUnsupported => (
                StatusCode::NOT_IMPLEMENTED,
                "当前后端不支持广播",
                "请配置可用的传输后端",
            ),
            PairingError::Transport(_) => (
                StatusCode::BAD_GATEWAY,
                "传输失败",
                "通道已重置，请重试",
            ),
            PairingError::Decrypt(_) | PairingError::Encrypt => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "加解密失败",
                "请确认两端使用相同的配对密钥",
            ),
        };
        Self::new(status, code, format!("{message}: {err}"), suggestion)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn pairing_errors_map_to_http_status() {
        let cases = [
            (PairingError::ApprovalRequired, StatusCode::FORBIDDEN),
            (
                PairingError::SendTimeout(Duration::from_millis(50)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                PairingError::ChannelUnavailable("down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (PairingError::AdvertiseUnsupported, StatusCode::NOT_IMPLEMENTED),
        ];
        for (err, status) in cases {
            let code = err.code();
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn error_reply_carries_no_data() {
        let (status, body) = ApiError::from(PairingError::ApprovalRequired).into_reply::<()>();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.0.ok);
        assert_eq!(body.0.code, "APPROVAL_REQUIRED");
        assert!(body.0.data.is_none());
    }
}
