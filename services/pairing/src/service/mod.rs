//! pairing service 模块职责：
//! 1. 本机授权窗口与广播生命周期。
//! 2. 出站：校验 → 派生密钥 → 加密 → 复用/打开通道 → 带超时写入。
//! 3. 入站：解析信封 → 解密 → 校验 → 以事件形式交给订阅者。

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
    time::{Duration, Instant},
};

use tc_shared_protocol::{
    CredentialPayload, ERROR_CODE_DECRYPT_FAILED, ERROR_CODE_INVALID_ENVELOPE,
    ERROR_CODE_NO_SESSION, PairingEvent, WireEnvelope, validate_payload,
};
use tokio::{
    sync::{Mutex, OnceCell, RwLock, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{PairingConfig, normalize_display_name},
    crypto::{Envelope, SessionInfo, decrypt, derive_key, encrypt},
    error::{KeyDerivationError, PairingError, PairingResult, TransportError},
    transport::{
        AdvertisementRequest, Capability, ChannelOptions, LoopbackAdapter, TransportAdapter,
        TransportChannel, probe_backend,
    },
};

mod approval;
mod events;
mod types;

use approval::ApprovalWindow;
use events::EventHub;

pub use events::Subscription;
pub use types::{
    AdvertiseOptions, AdvertiseStatus, ApprovalStatus, BackendState, PeerInfo, PeerScan,
    SendOptions, SendReceipt, rssi_to_strength,
};

/// 后端回退告警的 scope。
pub const WARNING_SCOPE_BACKEND: &str = "transport-backend";

/// pairing service 句柄；克隆共享同一会话。
#[derive(Clone)]
pub struct PairingService {
    inner: Arc<Inner>,
}

struct Inner {
    config: PairingConfig,
    adapter: OnceCell<Arc<dyn TransportAdapter>>,
    /// 外部注入、尚未初始化的适配器。
    injected: StdMutex<Option<Arc<dyn TransportAdapter>>>,
    approval: RwLock<ApprovalWindow>,
    session: RwLock<Option<SessionInfo>>,
    channel: Mutex<Option<Arc<dyn TransportChannel>>>,
    events: EventHub,
    inbound_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self
            .inbound_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl PairingService {
    /// 按配置构建；后端在首次使用时探测。
    pub fn new(config: PairingConfig) -> Self {
        Self::build(config, None)
    }

    /// 使用指定适配器构建（测试或嵌入场景）。
    pub fn with_adapter(config: PairingConfig, adapter: Arc<dyn TransportAdapter>) -> Self {
        Self::build(config, Some(adapter))
    }

    fn build(config: PairingConfig, injected: Option<Arc<dyn TransportAdapter>>) -> Self {
        let approval = ApprovalWindow::new(config.confirm_window);
        let events = EventHub::new(config.event_history);
        Self {
            inner: Arc::new(Inner {
                config,
                adapter: OnceCell::new(),
                injected: StdMutex::new(injected),
                approval: RwLock::new(approval),
                session: RwLock::new(None),
                channel: Mutex::new(None),
                events,
                inbound_task: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PairingConfig {
        &self.inner.config
    }

    /// 等待后端就绪；并发调用共享同一次初始化。
    pub async fn adapter(&self) -> Arc<dyn TransportAdapter> {
        let adapter = self
            .inner
            .adapter
            .get_or_init(|| async { self.init_adapter().await })
            .await;
        Arc::clone(adapter)
    }

    async fn init_adapter(&self) -> Arc<dyn TransportAdapter> {
        let injected = self
            .inner
            .injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let adapter = match injected {
            Some(adapter) => adapter,
            None => match probe_backend(&self.inner.config.transport) {
                Ok(adapter) => adapter,
                Err(reason) => {
                    warn!("pairing backend unavailable, falling back to loopback: {reason}");
                    self.inner
                        .events
                        .publish(PairingEvent::warning(
                            WARNING_SCOPE_BACKEND,
                            "real transport backend unavailable; using loopback adapter",
                            Some(reason),
                        ))
                        .await;
                    Arc::new(LoopbackAdapter::default())
                }
            },
        };
        self.spawn_inbound(&adapter);
        info!(
            "pairing backend ready kind={} capabilities={:?}",
            adapter.kind().as_str(),
            adapter.capabilities()
        );
        adapter
    }

    /// 把适配器的入站数据接到 `handle_incoming_data`。任务只持有弱引用。
    fn spawn_inbound(&self, adapter: &Arc<dyn TransportAdapter>) {
        let (sink, mut frames) = mpsc::unbounded_channel::<Vec<u8>>();
        adapter.attach(sink);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                PairingService { inner }.handle_incoming_data(&frame).await;
            }
            debug!("pairing inbound task finished");
        });
        let previous = self
            .inner
            .inbound_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// 设置或撤销本机授权。
    pub async fn set_approval(&self, approved: bool) -> ApprovalStatus {
        let mut window = self.inner.approval.write().await;
        let now = Instant::now();
        if approved {
            window.grant(now);
            info!(
                "pairing approval granted window_ms={}",
                self.inner.config.confirm_window.as_millis()
            );
        } else {
            window.revoke();
            info!("pairing approval revoked");
        }
        ApprovalStatus {
            approved: window.is_active_at(now),
        }
    }

    pub async fn has_approval(&self) -> bool {
        self.inner.approval.read().await.is_active_at(Instant::now())
    }

    async fn require_approval(&self) -> PairingResult<()> {
        if self.has_approval().await {
            Ok(())
        } else {
            Err(PairingError::ApprovalRequired)
        }
    }

    /// 一次性绑定会话材料。已绑定时忽略新材料并记录告警。
    pub async fn bind_session(&self, session: &SessionInfo) -> Result<(), KeyDerivationError> {
        derive_key(session)?;
        let mut guard = self.inner.session.write().await;
        match guard.as_ref() {
            None => {
                *guard = Some(session.clone());
                info!("pairing session bound");
            }
            Some(bound) if bound == session => {}
            Some(_) => warn!("pairing session already bound; ignoring new session material"),
        }
        Ok(())
    }

    pub async fn is_session_bound(&self) -> bool {
        self.inner.session.read().await.is_some()
    }

    /// 开始广播。需要授权。
    pub async fn start_advertising(
        &self,
        options: AdvertiseOptions,
    ) -> PairingResult<AdvertiseStatus> {
        self.require_approval().await?;
        let adapter = self.adapter().await;

        if let Some(session) = options.session.as_ref() {
            self.bind_session(session).await?;
        }
        if !adapter.supports(Capability::Advertise) {
            return Err(PairingError::AdvertiseUnsupported);
        }

        let name = options
            .name
            .as_deref()
            .map(normalize_display_name)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.inner.config.display_name.clone());
        let request = AdvertisementRequest {
            name,
            service_ids: options.service_ids,
            connectable: true,
        };
        adapter.start_advertising(&request).await?;
        info!(
            "pairing advertising started name={} backend={}",
            request.name,
            adapter.kind().as_str()
        );
        Ok(AdvertiseStatus {
            advertising: true,
            mock: adapter.kind().is_mock(),
        })
    }

    /// 停止广播；失败只记录日志。
    pub async fn stop_advertising(&self) -> AdvertiseStatus {
        let adapter = self.adapter().await;
        if let Err(err) = adapter.stop_advertising().await {
            warn!("pairing stop advertising failed: {err}");
        }
        AdvertiseStatus {
            advertising: false,
            mock: adapter.kind().is_mock(),
        }
    }

    /// 返回缓存的可写通道，或在授权有效时打开新通道。
    pub async fn ensure_channel(
        &self,
        options: &ChannelOptions,
    ) -> PairingResult<Arc<dyn TransportChannel>> {
        let mut guard = self.inner.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            if channel.is_writable() {
                return Ok(Arc::clone(channel));
            }
        }
        if let Some(stale) = guard.take() {
            debug!("pairing channel no longer writable; reopening");
            stale.close().await;
        }

        self.require_approval().await?;
        let adapter = self.adapter().await;
        if !adapter.supports(Capability::OpenChannel) {
            return Err(PairingError::ChannelUnavailable(format!(
                "{} adapter cannot open channels",
                adapter.kind().as_str()
            )));
        }
        let channel = adapter
            .open_channel(options)
            .await
            .map_err(|err| PairingError::ChannelUnavailable(err.to_string()))?;
        if !channel.is_writable() {
            return Err(PairingError::ChannelUnavailable(
                "opened channel is not writable".to_string(),
            ));
        }
        info!("pairing channel opened backend={}", adapter.kind().as_str());
        *guard = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// 加密并发送一条凭证。写入与超时竞争，超时后写入结果被忽略。
    pub async fn send_secure_payload(
        &self,
        payload: CredentialPayload,
        options: SendOptions,
    ) -> PairingResult<SendReceipt> {
        self.require_approval().await?;
        validate_payload(&payload)?;

        let bound = self.inner.session.read().await.clone();
        let session = options.session.merged_with(bound.as_ref());
        let key = derive_key(&session)?;
        if bound.is_none() {
            self.bind_session(&session).await?;
        }

        let frame = encrypt(&payload, &key)?
            .encode_frame()
            .map_err(|_| PairingError::Encrypt)?;
        let channel = self.ensure_channel(&options.channel_options).await?;

        let timeout = options
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.inner.config.send_timeout);
        let frame_len = frame.len();
        let writer = Arc::clone(&channel);
        let write = tokio::spawn(async move { writer.write(frame).await });

        match tokio::time::timeout(timeout, write).await {
            Err(_) => {
                warn!(
                    "pairing send timed out timeout_ms={}",
                    timeout.as_millis()
                );
                Err(PairingError::SendTimeout(timeout))
            }
            Ok(Err(join_err)) => Err(PairingError::Transport(TransportError::Io(format!(
                "write task failed: {join_err}"
            )))),
            Ok(Ok(Err(err))) => {
                warn!("pairing write failed, dropping channel: {err}");
                self.discard_channel(&channel).await;
                Err(PairingError::Transport(err))
            }
            Ok(Ok(Ok(()))) => {
                info!("pairing payload sent bytes={frame_len}");
                Ok(SendReceipt { sent: true })
            }
        }
    }

    async fn discard_channel(&self, channel: &Arc<dyn TransportChannel>) {
        {
            let mut guard = self.inner.channel.lock().await;
            if guard
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, channel))
            {
                guard.take();
            }
        }
        channel.close().await;
    }

    /// 处理一帧入站数据。所有失败都转成 `error` 事件，不向上传播。
    pub async fn handle_incoming_data(&self, raw: &[u8]) {
        let wire = match serde_json::from_slice::<WireEnvelope>(raw) {
            Ok(wire) => wire,
            Err(err) => {
                debug!("pairing inbound frame rejected: {err}");
                self.emit(PairingEvent::error(
                    ERROR_CODE_INVALID_ENVELOPE,
                    "received data is not a valid pairing envelope",
                ))
                .await;
                return;
            }
        };

        let Some(session) = self.inner.session.read().await.clone() else {
            self.emit(PairingEvent::error(
                ERROR_CODE_NO_SESSION,
                "no pairing session is bound; cannot decrypt incoming data",
            ))
            .await;
            return;
        };

        let result = derive_key(&session)
            .map_err(|err| err.to_string())
            .and_then(|key| {
                Envelope::from_wire(&wire)
                    .and_then(|envelope| decrypt(&envelope, &key))
                    .map_err(|err| err.to_string())
            });
        match result {
            Ok(payload) => {
                info!("pairing payload received");
                self.emit(PairingEvent::message(payload)).await;
            }
            Err(reason) => {
                warn!("pairing inbound decrypt failed: {reason}");
                self.emit(PairingEvent::error(
                    ERROR_CODE_DECRYPT_FAILED,
                    format!("failed to decrypt incoming payload: {reason}"),
                ))
                .await;
            }
        }
    }

    async fn emit(&self, event: PairingEvent) {
        self.inner.events.publish(event).await;
    }

    pub async fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe().await
    }

    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        self.inner.events.unsubscribe(id).await
    }

    /// 最近的事件（最新在后）。
    pub async fn recent_events(&self) -> Vec<PairingEvent> {
        self.inner.events.recent().await
    }

    /// 后端状态快照。
    pub async fn backend_state(&self) -> BackendState {
        let adapter = self.adapter().await;
        let kind = adapter.kind();
        let channel_open = self
            .inner
            .channel
            .lock()
            .await
            .as_ref()
            .is_some_and(|channel| channel.is_writable());
        BackendState {
            supported: !kind.is_mock(),
            mock: kind.is_mock(),
            backend: kind.as_str(),
            advertising: adapter.is_advertising(),
            channel_open,
            approved: self.has_approval().await,
            session_bound: self.is_session_bound().await,
        }
    }

    /// 扫描附近的对端；适配器不支持发现时返回空列表并标记 mock。
    pub async fn scan_peers(&self) -> PeerScan {
        let adapter = self.adapter().await;
        if !adapter.supports(Capability::Discover) {
            return PeerScan {
                success: true,
                peers: Vec::new(),
                mock: true,
                message: format!(
                    "peer discovery not available on {} adapter",
                    adapter.kind().as_str()
                ),
            };
        }
        match adapter.discover().await {
            Ok(devices) => {
                let peers = devices
                    .into_iter()
                    .map(PeerInfo::from_discovered)
                    .collect::<Vec<_>>();
                let message = if peers.is_empty() {
                    "no devices found".to_string()
                } else {
                    format!("found {} device(s)", peers.len())
                };
                PeerScan {
                    success: true,
                    peers,
                    mock: adapter.kind().is_mock(),
                    message,
                }
            }
            Err(err) => {
                warn!("pairing peer scan failed: {err}");
                PeerScan {
                    success: false,
                    peers: Vec::new(),
                    mock: adapter.kind().is_mock(),
                    message: format!("peer scan failed: {err}"),
                }
            }
        }
    }

    /// 停止广播、关闭通道、清空会话与授权。
    pub async fn shutdown(&self) {
        if let Some(adapter) = self.inner.adapter.get() {
            if let Err(err) = adapter.stop_advertising().await {
                warn!("pairing stop advertising on shutdown failed: {err}");
            }
        }
        let channel = self.inner.channel.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.inner.session.write().await.take();
        self.inner.approval.write().await.revoke();
        info!("pairing service shut down");
    }
}
