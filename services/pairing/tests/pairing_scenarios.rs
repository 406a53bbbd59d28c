//! 端到端配对场景：授权、收发、超时、后端回退。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tc_pairing::{
    PairingConfig, PairingError, PairingService, SendOptions, Subscription, TransportConfig,
    crypto::{SessionInfo, derive_key, encrypt},
    error::TransportError,
    service::{AdvertiseOptions, WARNING_SCOPE_BACKEND},
    transport::{
        AdapterKind, AdvertisementRequest, Capability, ChannelOptions, InboundSink,
        LoopbackAdapter, TransportAdapter, TransportChannel,
    },
};
use tc_shared_protocol::{CredentialPayload, PairingEvent, PairingEventBody};

fn home_network() -> CredentialPayload {
    CredentialPayload::new("Home", "WPA2", "secret123")
}

fn abc_session() -> SessionInfo {
    SessionInfo::with_pairing_secret("abc").device_id("dev1")
}

fn loopback_service() -> PairingService {
    PairingService::with_adapter(
        PairingConfig::default(),
        Arc::new(LoopbackAdapter::default()),
    )
}

async fn next_event(subscription: &mut Subscription) -> PairingEvent {
    tokio::time::timeout(Duration::from_secs(3), subscription.recv())
        .await
        .expect("event in time")
        .expect("event stream open")
}

fn error_code(event: &PairingEvent) -> Option<&str> {
    match &event.body {
        PairingEventBody::Error(payload) => Some(payload.code.as_str()),
        _ => None,
    }
}

/// 统计 open_channel 次数的 loopback 包装。
struct CountingAdapter {
    inner: LoopbackAdapter,
    opened: AtomicUsize,
}

impl CountingAdapter {
    fn new() -> Self {
        Self {
            inner: LoopbackAdapter::default(),
            opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TransportAdapter for CountingAdapter {
    fn kind(&self) -> AdapterKind {
        self.inner.kind()
    }

    fn capabilities(&self) -> &'static [Capability] {
        self.inner.capabilities()
    }

    fn attach(&self, sink: InboundSink) {
        self.inner.attach(sink);
    }

    fn is_advertising(&self) -> bool {
        self.inner.is_advertising()
    }

    async fn start_advertising(
        &self,
        request: &AdvertisementRequest,
    ) -> Result<(), TransportError> {
        self.inner.start_advertising(request).await
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        self.inner.stop_advertising().await
    }

    async fn open_channel(
        &self,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn TransportChannel>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open_channel(options).await
    }
}

/// 写入永不完成的适配器。
struct StalledAdapter;

struct StalledChannel;

#[async_trait]
impl TransportChannel for StalledChannel {
    async fn write(&self, _frame: Vec<u8>) -> Result<(), TransportError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn close(&self) {}

    fn is_writable(&self) -> bool {
        true
    }
}

#[async_trait]
impl TransportAdapter for StalledAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Loopback
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::OpenChannel]
    }

    fn attach(&self, _sink: InboundSink) {}

    fn is_advertising(&self) -> bool {
        false
    }

    async fn start_advertising(
        &self,
        _request: &AdvertisementRequest,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("stalled"))
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn open_channel(
        &self,
        _options: &ChannelOptions,
    ) -> Result<Arc<dyn TransportChannel>, TransportError> {
        Ok(Arc::new(StalledChannel))
    }
}

#[derive(Clone, Copy)]
enum Script {
    NoChannelCapability,
    OpenFails,
    NotWritable,
    FirstWriteFails,
}

/// 按脚本制造通道故障的适配器。
struct ScriptedAdapter {
    script: Script,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    fn new(script: Script) -> Self {
        Self {
            script,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct ScriptedChannel {
    fail_writes: bool,
    writable: AtomicBool,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportChannel for ScriptedChannel {
    async fn write(&self, _frame: Vec<u8>) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Io("connection reset".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.writable.store(false, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportAdapter for ScriptedAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Loopback
    }

    fn capabilities(&self) -> &'static [Capability] {
        match self.script {
            Script::NoChannelCapability => &[],
            _ => &[Capability::OpenChannel],
        }
    }

    fn attach(&self, _sink: InboundSink) {}

    fn is_advertising(&self) -> bool {
        false
    }

    async fn start_advertising(
        &self,
        _request: &AdvertisementRequest,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("scripted"))
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn open_channel(
        &self,
        _options: &ChannelOptions,
    ) -> Result<Arc<dyn TransportChannel>, TransportError> {
        let attempt = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.script, Script::OpenFails) {
            return Err(TransportError::Io("peer refused".to_string()));
        }
        Ok(Arc::new(ScriptedChannel {
            fail_writes: matches!(self.script, Script::FirstWriteFails) && attempt == 1,
            writable: AtomicBool::new(!matches!(self.script, Script::NotWritable)),
            closed: Arc::clone(&self.closed),
        }))
    }
}

async fn approved_service(adapter: Arc<ScriptedAdapter>) -> PairingService {
    let service = PairingService::with_adapter(PairingConfig::default(), adapter);
    service.set_approval(true).await;
    service
}

#[tokio::test]
async fn channel_and_advertising_require_local_approval() {
    let service = loopback_service();
    assert!(!service.has_approval().await);

    let err = service
        .ensure_channel(&ChannelOptions::default())
        .await
        .err()
        .expect("approval required");
    assert!(matches!(err, PairingError::ApprovalRequired));

    let err = service
        .start_advertising(AdvertiseOptions::default())
        .await
        .expect_err("approval required");
    assert!(matches!(err, PairingError::ApprovalRequired));

    assert!(service.set_approval(true).await.approved);
    assert!(service.has_approval().await);
    assert!(service.ensure_channel(&ChannelOptions::default()).await.is_ok());
}

#[tokio::test]
async fn revoked_approval_blocks_send() {
    let service = loopback_service();
    service.set_approval(true).await;
    assert!(!service.set_approval(false).await.approved);

    let err = service
        .send_secure_payload(home_network(), SendOptions::with_session(abc_session()))
        .await
        .expect_err("revoked");
    assert!(matches!(err, PairingError::ApprovalRequired));
}

#[tokio::test]
async fn approval_expires_after_confirm_window() {
    let config = PairingConfig {
        confirm_window: Duration::from_millis(30),
        ..PairingConfig::default()
    };
    let service = PairingService::with_adapter(config, Arc::new(LoopbackAdapter::default()));
    service.set_approval(true).await;
    assert!(service.has_approval().await);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!service.has_approval().await);
}

#[tokio::test]
async fn tcp_peers_exchange_credentials() {
    let reserved_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("reserve a");
    let reserved_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("reserve b");
    let addr_a = reserved_a.local_addr().expect("addr a").to_string();
    let addr_b = reserved_b.local_addr().expect("addr b").to_string();
    drop(reserved_a);
    drop(reserved_b);

    let sender = PairingService::new(PairingConfig {
        transport: TransportConfig {
            peer_addr: Some(addr_b.clone()),
            listen_addr: addr_a.clone(),
        },
        ..PairingConfig::default()
    });
    let receiver = PairingService::new(PairingConfig {
        transport: TransportConfig {
            peer_addr: Some(addr_a),
            listen_addr: addr_b,
        },
        ..PairingConfig::default()
    });

    receiver.set_approval(true).await;
    let mut inbox = receiver.subscribe().await;
    let status = receiver
        .start_advertising(AdvertiseOptions {
            session: Some(abc_session()),
            ..AdvertiseOptions::default()
        })
        .await
        .expect("advertise");
    assert!(status.advertising);
    assert!(!status.mock);

    sender.set_approval(true).await;
    let receipt = sender
        .send_secure_payload(home_network(), SendOptions::with_session(abc_session()))
        .await
        .expect("send");
    assert!(receipt.sent);

    let event = next_event(&mut inbox).await;
    match event.body {
        PairingEventBody::Message(received) => assert_eq!(received.payload, home_network()),
        other => panic!("unexpected event: {other:?}"),
    }

    sender.shutdown().await;
    receiver.shutdown().await;
}

#[tokio::test]
async fn zero_confirm_window_reports_no_approval() {
    let config = PairingConfig {
        confirm_window: Duration::ZERO,
        ..PairingConfig::default()
    };
    let service = PairingService::with_adapter(config, Arc::new(LoopbackAdapter::default()));
    assert!(!service.set_approval(true).await.approved);
    assert!(!service.has_approval().await);
}

#[tokio::test]
async fn tcp_frames_that_are_not_envelopes_raise_invalid_envelope() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("reserve");
    let listen_addr = listener.local_addr().expect("listen addr").to_string();
    drop(listener);

    let receiver = PairingService::new(PairingConfig {
        transport: TransportConfig {
            peer_addr: Some("127.0.0.1:9".to_string()),
            listen_addr: listen_addr.clone(),
        },
        ..PairingConfig::default()
    });
    receiver.set_approval(true).await;
    let mut inbox = receiver.subscribe().await;
    receiver
        .start_advertising(AdvertiseOptions {
            session: Some(abc_session()),
            ..AdvertiseOptions::default()
        })
        .await
        .expect("advertise");

    let mut peer = tokio::net::TcpStream::connect(&listen_addr)
        .await
        .expect("connect");
    peer.write_all(b"\xff\xfe\x00 binary noise\n")
        .await
        .expect("write binary");
    peer.write_all(b"not json\n").await.expect("write text");
    peer.flush().await.expect("flush");

    for _ in 0..2 {
        let event = next_event(&mut inbox).await;
        assert_eq!(error_code(&event), Some("invalid-envelope"));
    }

    receiver.shutdown().await;
}

#[tokio::test]
async fn non_json_frame_raises_invalid_envelope() {
    let service = loopback_service();
    let mut events = service.subscribe().await;
    service.handle_incoming_data(b"definitely not json").await;
    let event = next_event(&mut events).await;
    assert_eq!(error_code(&event), Some("invalid-envelope"));
}

#[tokio::test]
async fn empty_frame_raises_invalid_envelope() {
    let service = loopback_service();
    let mut events = service.subscribe().await;
    service.handle_incoming_data(b"").await;
    service.handle_incoming_data(b"   ").await;
    for _ in 0..2 {
        let event = next_event(&mut events).await;
        assert_eq!(error_code(&event), Some("invalid-envelope"));
    }
}

#[tokio::test]
async fn frame_without_bound_session_raises_no_session() {
    let service = loopback_service();
    let mut events = service.subscribe().await;

    let key = derive_key(&abc_session()).expect("derive");
    let frame = encrypt(&home_network(), &key)
        .expect("encrypt")
        .encode_frame()
        .expect("frame");
    service.handle_incoming_data(&frame).await;

    let event = next_event(&mut events).await;
    assert_eq!(error_code(&event), Some("no-session"));
}

#[tokio::test]
async fn frame_under_other_key_raises_decrypt_failed() {
    let service = loopback_service();
    service
        .bind_session(&SessionInfo::with_pairing_secret("other").device_id("dev1"))
        .await
        .expect("bind");
    let mut events = service.subscribe().await;

    let key = derive_key(&abc_session()).expect("derive");
    let frame = encrypt(&home_network(), &key)
        .expect("encrypt")
        .encode_frame()
        .expect("frame");
    service.handle_incoming_data(&frame).await;

    let event = next_event(&mut events).await;
    assert_eq!(error_code(&event), Some("decrypt-failed"));
}

#[tokio::test]
async fn stalled_write_times_out() {
    let service = PairingService::with_adapter(PairingConfig::default(), Arc::new(StalledAdapter));
    service.set_approval(true).await;

    let started = Instant::now();
    let err = service
        .send_secure_payload(
            home_network(),
            SendOptions::with_session(abc_session()).timeout_ms(50),
        )
        .await
        .expect_err("timeout");
    assert!(matches!(err, PairingError::SendTimeout(timeout) if timeout == Duration::from_millis(50)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn writable_channel_is_reused_and_closed_channel_reopened() {
    let adapter = Arc::new(CountingAdapter::new());
    let service = PairingService::with_adapter(PairingConfig::default(), adapter.clone());
    service.set_approval(true).await;

    for _ in 0..2 {
        service
            .send_secure_payload(home_network(), SendOptions::with_session(abc_session()))
            .await
            .expect("send");
    }
    assert_eq!(adapter.opened.load(Ordering::SeqCst), 1);

    let channel = service
        .ensure_channel(&ChannelOptions::default())
        .await
        .expect("cached channel");
    channel.close().await;
    service
        .send_secure_payload(home_network(), SendOptions::with_session(abc_session()))
        .await
        .expect("send after close");
    assert_eq!(adapter.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_backend_falls_back_to_loopback_with_warning() {
    let service = PairingService::new(PairingConfig::default());
    let state = service.backend_state().await;
    assert!(state.mock);
    assert!(!state.supported);

    let warned = service.recent_events().await.into_iter().any(|event| {
        matches!(&event.body, PairingEventBody::Warning(warning) if warning.scope == WARNING_SCOPE_BACKEND)
    });
    assert!(warned);
}

#[tokio::test]
async fn adapter_without_channel_capability_is_unavailable() {
    let adapter = Arc::new(ScriptedAdapter::new(Script::NoChannelCapability));
    let service = approved_service(adapter.clone()).await;

    let err = service
        .ensure_channel(&ChannelOptions::default())
        .await
        .err()
        .expect("no channel");
    assert!(matches!(err, PairingError::ChannelUnavailable(_)));
    assert_eq!(adapter.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_open_is_reported_as_unavailable() {
    let service = approved_service(Arc::new(ScriptedAdapter::new(Script::OpenFails))).await;

    let err = service
        .send_secure_payload(home_network(), SendOptions::with_session(abc_session()))
        .await
        .expect_err("open fails");
    match err {
        PairingError::ChannelUnavailable(reason) => assert!(reason.contains("peer refused")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn channel_opened_unwritable_is_unavailable() {
    let adapter = Arc::new(ScriptedAdapter::new(Script::NotWritable));
    let service = approved_service(adapter.clone()).await;

    let err = service
        .ensure_channel(&ChannelOptions::default())
        .await
        .err()
        .expect("not writable");
    assert!(matches!(err, PairingError::ChannelUnavailable(_)));

    // 未缓存：下一次仍会重新打开。
    assert!(service.ensure_channel(&ChannelOptions::default()).await.is_err());
    assert_eq!(adapter.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn write_error_drops_channel_and_next_send_reopens() {
    let adapter = Arc::new(ScriptedAdapter::new(Script::FirstWriteFails));
    let service = approved_service(adapter.clone()).await;

    let err = service
        .send_secure_payload(home_network(), SendOptions::with_session(abc_session()))
        .await
        .expect_err("first write fails");
    assert!(matches!(err, PairingError::Transport(TransportError::Io(_))));
    assert_eq!(adapter.closed.load(Ordering::SeqCst), 1);

    let receipt = service
        .send_secure_payload(home_network(), SendOptions::with_session(abc_session()))
        .await
        .expect("send after reopen");
    assert!(receipt.sent);
    assert_eq!(adapter.opened.load(Ordering::SeqCst), 2);
}
