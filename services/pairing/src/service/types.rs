//! pairing service 的入参与返回结构（同时也是控制 API 的 JSON 形状）。

use serde::{Deserialize, Serialize};

use crate::{
    crypto::SessionInfo,
    transport::{ChannelOptions, DiscoveredDevice},
};

/// 开始广播的参数。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvertiseOptions {
    /// 广播显示名；缺省使用配置中的名称。
    pub name: Option<String>,
    #[serde(alias = "serviceUuids")]
    pub service_ids: Vec<String>,
    /// 随广播一并绑定的会话材料。
    pub session: Option<SessionInfo>,
}

/// 单次发送的参数。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendOptions {
    /// 本次发送携带的密钥材料（pairingSecret / userSecret / deviceId）。
    #[serde(flatten)]
    pub session: SessionInfo,
    /// 覆盖默认发送超时（毫秒）。
    pub timeout_ms: Option<u64>,
    pub channel_options: ChannelOptions,
}

impl SendOptions {
    pub fn with_session(session: SessionInfo) -> Self {
        Self {
            session,
            ..Self::default()
        }
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStatus {
    pub approved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertiseStatus {
    pub advertising: bool,
    /// 当前是否运行在 loopback 替身上。
    pub mock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub sent: bool,
}

/// 后端状态快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendState {
    /// 是否有真实后端可用。
    pub supported: bool,
    pub mock: bool,
    /// 后端种类（`loopback` / `tcp`）。
    pub backend: &'static str,
    pub advertising: bool,
    pub channel_open: bool,
    pub approved: bool,
    pub session_bound: bool,
}

/// 扫描到的对端。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
    /// 0-100 的信号强度；对端未报告 RSSI 时缺省。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<u8>,
}

impl PeerInfo {
    /// 规范化发现结果：名称缺省回退到 id，RSSI 线性映射到 0-100。
    pub fn from_discovered(device: DiscoveredDevice) -> Self {
        let name = device
            .name
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| device.id.clone());
        Self {
            id: device.id,
            name,
            strength: device.rssi.map(rssi_to_strength),
        }
    }
}

/// `clamp(2 * (rssi + 100), 0, 100)`。
pub fn rssi_to_strength(rssi: i32) -> u8 {
    let scaled = 2_i64 * (i64::from(rssi) + 100);
    scaled.clamp(0, 100) as u8
}

/// 扫描结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerScan {
    pub success: bool,
    pub peers: Vec<PeerInfo>,
    pub mock: bool,
    pub message: String,
}
