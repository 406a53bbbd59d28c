//! 配置模块职责：
//! 1. 读取 pairing service 运行所需的环境变量，并提供默认值。
//! 2. 校验监听地址与对端地址格式。
//! 3. 提供布尔/时长/数值等通用解析能力。

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;

/// 本机授权窗口默认时长（毫秒）。
pub const DEFAULT_CONFIRM_WINDOW_MS: u64 = 30_000;
/// 单次发送默认超时（毫秒）。
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 15_000;
/// 默认广播显示名。
pub const DEFAULT_DISPLAY_NAME: &str = "Termichemti";
/// TCP 后端默认监听地址。
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:18090";
/// 本地控制 API 默认监听地址。
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:18091";
/// 事件历史默认保留条数。
pub const DEFAULT_EVENT_HISTORY: usize = 64;

/// 传输后端配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// 对端地址；为空时使用 loopback 替身。
    pub peer_addr: Option<String>,
    /// 广播时的本地监听地址。
    pub listen_addr: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            peer_addr: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

/// pairing service 运行时配置。
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// 本机授权有效期。
    pub confirm_window: Duration,
    /// 发送超时。
    pub send_timeout: Duration,
    /// 广播显示名。
    pub display_name: String,
    /// 传输后端。
    pub transport: TransportConfig,
    /// 控制 API 监听地址。
    pub api_addr: String,
    /// 事件历史条数。
    pub event_history: usize,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            confirm_window: Duration::from_millis(DEFAULT_CONFIRM_WINDOW_MS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            transport: TransportConfig::default(),
            api_addr: DEFAULT_API_ADDR.to_string(),
            event_history: DEFAULT_EVENT_HISTORY,
        }
    }
}

impl PairingConfig {
    /// 从环境变量构建配置，并校验地址格式。
    pub fn from_env() -> anyhow::Result<Self> {
        let peer_addr = string_from_env("TC_PAIR_PEER_ADDR");
        if let Some(raw) = peer_addr.as_deref() {
            raw.parse::<SocketAddr>()
                .with_context(|| format!("invalid TC_PAIR_PEER_ADDR: {raw}"))?;
        }

        let listen_addr = env_or_default("TC_PAIR_LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid TC_PAIR_LISTEN_ADDR: {listen_addr}"))?;

        let api_addr = env_or_default("TC_PAIR_API_ADDR", DEFAULT_API_ADDR);
        api_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid TC_PAIR_API_ADDR: {api_addr}"))?;

        Ok(Self {
            confirm_window: duration_from_env_millis(
                "TC_PAIR_CONFIRM_WINDOW_MS",
                DEFAULT_CONFIRM_WINDOW_MS,
            ),
            send_timeout: duration_from_env_millis(
                "TC_PAIR_SEND_TIMEOUT_MS",
                DEFAULT_SEND_TIMEOUT_MS,
            ),
            display_name: string_from_env("TC_PAIR_DISPLAY_NAME")
                .map(|raw| normalize_display_name(&raw))
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            transport: TransportConfig {
                peer_addr,
                listen_addr,
            },
            api_addr,
            event_history: usize_from_env("TC_PAIR_EVENT_HISTORY", DEFAULT_EVENT_HISTORY),
        })
    }
}

/// 规范化广播显示名：去掉空白，长度限制到 32 字符。
pub fn normalize_display_name(raw: &str) -> String {
    raw.trim().chars().take(32).collect::<String>()
}

/// 读取非空环境变量。
fn string_from_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// 读取环境变量；不存在时返回默认值。
fn env_or_default(key: &str, fallback: &str) -> String {
    string_from_env(key).unwrap_or_else(|| fallback.to_string())
}

/// 读取毫秒级时长配置，非法值回退到默认毫秒数。
fn duration_from_env_millis(key: &str, fallback_ms: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(fallback_ms))
}

/// 读取 usize 配置，非法值回退到默认值。
fn usize_from_env(key: &str, fallback: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PairingConfig::default();
        assert_eq!(cfg.confirm_window, Duration::from_secs(30));
        assert_eq!(cfg.send_timeout, Duration::from_secs(15));
        assert_eq!(cfg.display_name, "Termichemti");
        assert!(cfg.transport.peer_addr.is_none());
    }

    #[test]
    fn display_name_is_trimmed_and_capped() {
        assert_eq!(normalize_display_name("  Living Room  "), "Living Room");
        assert_eq!(normalize_display_name(&"x".repeat(40)).len(), 32);
    }

    #[test]
    fn unset_numeric_env_falls_back() {
        assert_eq!(
            duration_from_env_millis("TC_PAIR_TEST_UNSET_DURATION", 250),
            Duration::from_millis(250)
        );
        assert_eq!(usize_from_env("TC_PAIR_TEST_UNSET_USIZE", 7), 7);
    }
}
