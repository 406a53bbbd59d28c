//! 控制接口处理。

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::Value;
use tc_shared_protocol::{PairingEvent, payload_from_value};

use super::{
    error::ApiError,
    response::{ApiReply, ok_response},
};
use crate::{
    error::PairingError,
    service::{
        AdvertiseOptions, AdvertiseStatus, ApprovalStatus, BackendState, PairingService, PeerScan,
        SendOptions, SendReceipt,
    },
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApprovalRequest {
    pub(crate) approved: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendRequest {
    /// 原始 JSON，交给共享 codec 做严格形状校验。
    pub(crate) payload: Value,
    #[serde(default)]
    pub(crate) options: SendOptions,
}

/// 健康检查接口。
pub(crate) async fn healthz() -> &'static str {
    "ok"
}

/// 后端状态。
pub(crate) async fn state_handler(State(service): State<PairingService>) -> ApiReply<BackendState> {
    let state = service.backend_state().await;
    let suggestion = if state.mock {
        "当前为 loopback 替身，仅适合本机调试"
    } else {
        "传输后端可用"
    };
    ok_response("配对服务状态", suggestion, state)
}

/// 本机确认 / 撤销。
pub(crate) async fn approval_handler(
    State(service): State<PairingService>,
    Json(req): Json<ApprovalRequest>,
) -> ApiReply<ApprovalStatus> {
    let status = service.set_approval(req.approved).await;
    if status.approved {
        ok_response("已确认配对", "请在授权窗口内开始广播或发送", status)
    } else {
        ok_response("已撤销配对确认", "新的通道需要重新确认", status)
    }
}

/// 开始广播。
pub(crate) async fn advertise_start_handler(
    State(service): State<PairingService>,
    Json(options): Json<AdvertiseOptions>,
) -> ApiReply<AdvertiseStatus> {
    match service.start_advertising(options).await {
        Ok(status) => ok_response("已开始广播", "等待对端连接", status),
        Err(err) => ApiError::from(err).into_reply(),
    }
}

/// 停止广播。
pub(crate) async fn advertise_stop_handler(
    State(service): State<PairingService>,
) -> ApiReply<AdvertiseStatus> {
    let status = service.stop_advertising().await;
    ok_response("已停止广播", "", status)
}

/// 加密发送一条凭证。
pub(crate) async fn send_handler(
    State(service): State<PairingService>,
    Json(req): Json<SendRequest>,
) -> ApiReply<SendReceipt> {
    let payload = match payload_from_value(&req.payload) {
        Ok(payload) => payload,
        Err(err) => return ApiError::from(PairingError::from(err)).into_reply(),
    };
    match service.send_secure_payload(payload, req.options).await {
        Ok(receipt) => ok_response("凭证已发送", "等待对端确认收到", receipt),
        Err(err) => ApiError::from(err).into_reply(),
    }
}

/// 扫描对端。
pub(crate) async fn peers_handler(State(service): State<PairingService>) -> ApiReply<PeerScan> {
    let scan = service.scan_peers().await;
    let message = scan.message.clone();
    ok_response(message, "", scan)
}

/// 最近事件（最新在后）。
pub(crate) async fn events_handler(
    State(service): State<PairingService>,
) -> ApiReply<Vec<PairingEvent>> {
    let events = service.recent_events().await;
    ok_response("最近事件", "", events)
}
