//! 传输适配层：固定能力集合 + 两种实现（loopback 替身、TCP 后端）。
//!
//! 适配器只负责搬运字节，加解密与授权都在 pairing service 内完成。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{config::TransportConfig, error::TransportError};

pub mod loopback;
pub mod tcp;

pub use loopback::LoopbackAdapter;
pub use tcp::TcpAdapter;

/// 适配器收到的原始帧投递到这里。
pub type InboundSink = mpsc::UnboundedSender<Vec<u8>>;

/// 适配器能力。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Advertise,
    OpenChannel,
    Discover,
}

/// 适配器种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdapterKind {
    /// 本地回环替身，不提供真实链路保证。
    Loopback,
    /// TCP 后端。
    Tcp,
}

impl AdapterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loopback => "loopback",
            Self::Tcp => "tcp",
        }
    }

    /// 是否为替身实现。
    pub fn is_mock(self) -> bool {
        matches!(self, Self::Loopback)
    }
}

/// 广播参数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementRequest {
    pub name: String,
    pub service_ids: Vec<String>,
    pub connectable: bool,
}

/// 打开通道的参数。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelOptions {
    /// 覆盖默认对端地址（仅 TCP 后端使用）。
    pub peer_addr: Option<String>,
}

/// 发现到的设备原始信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i32>,
}

/// 单条出站通道。
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// 写入一帧；返回即表示对端已接收或已交给内核。
    async fn write(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    async fn close(&self);

    fn is_writable(&self) -> bool;
}

/// 传输适配器。
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    fn capabilities(&self) -> &'static [Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// 注册入站数据接收端；重复调用会替换旧接收端。
    fn attach(&self, sink: InboundSink);

    fn is_advertising(&self) -> bool;

    async fn start_advertising(&self, request: &AdvertisementRequest)
    -> Result<(), TransportError>;

    async fn stop_advertising(&self) -> Result<(), TransportError>;

    async fn open_channel(
        &self,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn TransportChannel>, TransportError>;

    async fn discover(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Err(TransportError::Unsupported(self.kind().as_str()))
    }
}

/// 按配置构建真实后端；未配置或配置无效时返回原因，由调用方回退到 loopback。
pub fn probe_backend(config: &TransportConfig) -> Result<Arc<dyn TransportAdapter>, String> {
    let Some(peer_addr) = config.peer_addr.as_deref() else {
        return Err("no pairing peer configured; using loopback adapter".to_string());
    };
    let adapter = TcpAdapter::new(&config.listen_addr, peer_addr)
        .map_err(|err| format!("tcp backend unavailable: {err}"))?;
    Ok(Arc::new(adapter))
}
