//! TCP 后端：广播即监听本地端口，通道即连接对端；帧以换行分隔。

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    AdapterKind, AdvertisementRequest, Capability, ChannelOptions, DiscoveredDevice, InboundSink,
    TransportAdapter, TransportChannel,
};
use crate::error::TransportError;

const TCP_CAPABILITIES: &[Capability] = &[
    Capability::Advertise,
    Capability::OpenChannel,
    Capability::Discover,
];

/// 单帧最大字节数。
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// accept 失败后的重试间隔。
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type SharedSink = Arc<Mutex<Option<InboundSink>>>;

/// 基于 TCP 的真实后端。
pub struct TcpAdapter {
    listen_addr: SocketAddr,
    peer_addr: SocketAddr,
    sink: SharedSink,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TcpAdapter {
    pub fn new(listen_addr: &str, peer_addr: &str) -> Result<Self, TransportError> {
        Ok(Self {
            listen_addr: parse_addr(listen_addr)?,
            peer_addr: parse_addr(peer_addr)?,
            sink: Arc::new(Mutex::new(None)),
            listener: Mutex::new(None),
        })
    }

    fn listener_guard(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_addr(raw: &str) -> Result<SocketAddr, TransportError> {
    raw.trim()
        .parse::<SocketAddr>()
        .map_err(|err| TransportError::Io(format!("invalid socket address {raw}: {err}")))
}

impl Drop for TcpAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.listener_guard().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl TransportAdapter for TcpAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Tcp
    }

    fn capabilities(&self) -> &'static [Capability] {
        TCP_CAPABILITIES
    }

    fn attach(&self, sink: InboundSink) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn is_advertising(&self) -> bool {
        self.listener_guard()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    async fn start_advertising(
        &self,
        request: &AdvertisementRequest,
    ) -> Result<(), TransportError> {
        if self.is_advertising() {
            return Ok(());
        }
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!(
            "tcp pairing listener ready addr={} name={}",
            self.listen_addr, request.name
        );
        let sink = Arc::clone(&self.sink);
        let task = tokio::spawn(accept_loop(listener, sink));
        *self.listener_guard() = Some(task);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        if let Some(task) = self.listener_guard().take() {
            task.abort();
            info!("tcp pairing listener stopped addr={}", self.listen_addr);
        }
        Ok(())
    }

    async fn open_channel(
        &self,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn TransportChannel>, TransportError> {
        let addr = match options.peer_addr.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_addr(raw)?,
            _ => self.peer_addr,
        };
        let stream = TcpStream::connect(addr).await?;
        debug!("tcp pairing channel connected peer={addr}");
        Ok(Arc::new(TcpChannel {
            stream: tokio::sync::Mutex::new(Some(stream)),
            open: AtomicBool::new(true),
        }))
    }

    async fn discover(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Ok(vec![DiscoveredDevice {
            id: self.peer_addr.to_string(),
            name: None,
            rssi: None,
        }])
    }
}

/// 接受对端连接，每个连接独立读取换行分隔的帧。
async fn accept_loop(listener: TcpListener, sink: SharedSink) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("tcp pairing accept failed: {err}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        debug!("tcp pairing peer connected remote={remote}");
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            if let Err(err) = forward_frames(BufReader::new(stream), &sink).await {
                warn!("tcp pairing read failed remote={remote}: {err}");
            }
            debug!("tcp pairing peer disconnected remote={remote}");
        });
    }
}

/// 按行切帧并原样投递字节，不要求 UTF-8；合法性由 pairing service 判断。
/// 超长的行只保留前 `MAX_FRAME_LEN` 字节，其余部分丢弃，连接保持。
async fn forward_frames<R>(mut reader: R, sink: &SharedSink) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    loop {
        frame.clear();
        let read = (&mut reader)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_until(b'\n', &mut frame)
            .await?;
        if read == 0 {
            return Ok(());
        }

        if frame.last() == Some(&b'\n') {
            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
        } else if frame.len() > MAX_FRAME_LEN {
            warn!("tcp pairing frame exceeds {MAX_FRAME_LEN} bytes; truncating");
            frame.truncate(MAX_FRAME_LEN);
            discard_line(&mut reader).await?;
        }

        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let target = sink.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(target) = target {
            let _ = target.send(frame.clone());
        }
    }
}

/// 丢弃当前行剩余内容（含换行符）。
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let read = (&mut *reader)
            .take(MAX_FRAME_LEN as u64)
            .read_until(b'\n', &mut scratch)
            .await?;
        if read == 0 || scratch.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

struct TcpChannel {
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    open: AtomicBool,
}

#[async_trait]
impl TransportChannel for TcpChannel {
    async fn write(&self, mut frame: Vec<u8>) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };
        frame.push(b'\n');
        if let Err(err) = stream.write_all(&frame).await {
            self.open.store(false, Ordering::SeqCst);
            guard.take();
            return Err(err.into());
        }
        stream.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn is_writable(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
