//! tc-pairing 二进制入口：CLI 分发 → 日志 → 服务 → 控制接口。

use tc_pairing::{PairingConfig, PairingService, api, cli, logging};
use tracing::info;

#[tokio::main]
/// 启动 pairing service。
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    match cli::dispatch(&args)? {
        cli::CliDispatch::Run => {}
        cli::CliDispatch::Exit => return Ok(()),
    }

    let _log_runtime = logging::init("pairing")?;
    let config = PairingConfig::from_env()?;
    info!(
        "tc-pairing starting api={} peer={} confirm_window_ms={} send_timeout_ms={}",
        config.api_addr,
        config.transport.peer_addr.as_deref().unwrap_or("-"),
        config.confirm_window.as_millis(),
        config.send_timeout.as_millis()
    );

    let service = PairingService::new(config.clone());
    let backend = service.backend_state().await;
    info!(
        "tc-pairing backend ready kind={} mock={}",
        backend.backend, backend.mock
    );

    let result = api::serve(&config.api_addr, service.clone()).await;
    service.shutdown().await;
    result
}
