//! Loopback 替身：写入的帧在固定延迟后原样作为入站数据回送。

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tracing::debug;

use super::{
    AdapterKind, AdvertisementRequest, Capability, ChannelOptions, InboundSink, TransportAdapter,
    TransportChannel,
};
use crate::error::TransportError;

/// 回送延迟。
pub const LOOPBACK_DELIVERY_DELAY: Duration = Duration::from_millis(10);

const LOOPBACK_CAPABILITIES: &[Capability] = &[Capability::Advertise, Capability::OpenChannel];

type SharedSink = Arc<Mutex<Option<InboundSink>>>;

/// 无真实后端时使用的确定性替身。
pub struct LoopbackAdapter {
    advertising: AtomicBool,
    sink: SharedSink,
    delay: Duration,
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::with_delay(LOOPBACK_DELIVERY_DELAY)
    }
}

impl LoopbackAdapter {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            advertising: AtomicBool::new(false),
            sink: Arc::new(Mutex::new(None)),
            delay,
        }
    }
}

#[async_trait]
impl TransportAdapter for LoopbackAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Loopback
    }

    fn capabilities(&self) -> &'static [Capability] {
        LOOPBACK_CAPABILITIES
    }

    fn attach(&self, sink: InboundSink) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    async fn start_advertising(
        &self,
        request: &AdvertisementRequest,
    ) -> Result<(), TransportError> {
        self.advertising.store(true, Ordering::SeqCst);
        debug!(
            "loopback advertising started name={} services={}",
            request.name,
            request.service_ids.len()
        );
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        if self.advertising.swap(false, Ordering::SeqCst) {
            debug!("loopback advertising stopped");
        }
        Ok(())
    }

    async fn open_channel(
        &self,
        _options: &ChannelOptions,
    ) -> Result<Arc<dyn TransportChannel>, TransportError> {
        Ok(Arc::new(LoopbackChannel {
            sink: Arc::clone(&self.sink),
            closed: AtomicBool::new(false),
            delay: self.delay,
        }))
    }
}

struct LoopbackChannel {
    sink: SharedSink,
    closed: AtomicBool,
    delay: Duration,
}

#[async_trait]
impl TransportChannel for LoopbackChannel {
    async fn write(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        tokio::time::sleep(self.delay).await;
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // 没有接收端时帧被丢弃，与未监听 data 事件的行为一致。
        if let Some(sink) = sink {
            let _ = sink.send(frame);
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("loopback channel closed");
        }
    }

    fn is_writable(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
