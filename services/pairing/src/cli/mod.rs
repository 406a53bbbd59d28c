//! tc-pairing CLI 分发：`run`、`qr`、`version`、`help`。

use anyhow::{Context, anyhow};
use tc_shared_protocol::{CredentialPayload, validate_payload, wifi_qr_string};

/// CLI 分发结果。
#[derive(Debug, PartialEq, Eq)]
pub enum CliDispatch {
    /// 继续启动 pairing service 与控制接口。
    Run,
    /// 命令已处理完成，主程序应退出。
    Exit,
}

/// 解析并执行 CLI。
pub fn dispatch(args: &[String]) -> anyhow::Result<CliDispatch> {
    let Some(cmd) = args.first().map(|raw| raw.trim()) else {
        return Ok(CliDispatch::Run);
    };
    if cmd.is_empty() || cmd == "run" {
        return Ok(CliDispatch::Run);
    }

    match cmd {
        "-h" | "--help" | "help" => {
            print_root_help();
            Ok(CliDispatch::Exit)
        }
        "version" | "--version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(CliDispatch::Exit)
        }
        "qr" => {
            println!("{}", qr_command(&args[1..])?);
            Ok(CliDispatch::Exit)
        }
        other => Err(anyhow!(
            "unknown command: {other}; run `tc-pairing --help` for usage"
        )),
    }
}

/// `qr <ssid> <security> [password]`：输出 Wi-Fi 二维码字符串。
fn qr_command(args: &[String]) -> anyhow::Result<String> {
    let (ssid, security, password) = match args {
        [ssid, security] => (ssid, security, ""),
        [ssid, security, password] => (ssid, security, password.as_str()),
        _ => return Err(anyhow!("usage: tc-pairing qr <ssid> <security> [password]")),
    };
    let payload = CredentialPayload::new(ssid.as_str(), security.as_str(), password);
    validate_payload(&payload).context("invalid network for qr")?;
    Ok(wifi_qr_string(&payload))
}

fn print_root_help() {
    println!("tc-pairing {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("usage:");
    println!("  tc-pairing [run]                          start pairing service and control api");
    println!("  tc-pairing qr <ssid> <security> [pass]    print Wi-Fi QR string");
    println!("  tc-pairing version                        print version");
    println!();
    println!("env:");
    println!("  TC_PAIR_API_ADDR           control api address (default 127.0.0.1:18091)");
    println!("  TC_PAIR_PEER_ADDR          tcp peer; unset uses the loopback adapter");
    println!("  TC_PAIR_LISTEN_ADDR        tcp listen address (default 127.0.0.1:18090)");
    println!("  TC_PAIR_CONFIRM_WINDOW_MS  local approval window (default 30000)");
    println!("  TC_PAIR_SEND_TIMEOUT_MS    send timeout (default 15000)");
    println!("  TC_PAIR_DISPLAY_NAME       advertised name (default Termichemti)");
    println!("  TC_LOG_DIR / RUST_LOG / TC_FILE_LOG_LEVEL");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn empty_args_run_service() {
        assert_eq!(dispatch(&[]).expect("dispatch"), CliDispatch::Run);
        assert_eq!(dispatch(&args(&["run"])).expect("dispatch"), CliDispatch::Run);
    }

    #[test]
    fn qr_builds_escaped_string() {
        let qr = qr_command(&args(&["Cafe;1", "WPA2", "p:w"])).expect("qr");
        assert_eq!(qr, "WIFI:T:WPA2;S:Cafe\\;1;P:p\\:w;;");
    }

    #[test]
    fn qr_rejects_missing_security() {
        assert!(qr_command(&args(&["Home"])).is_err());
        assert!(qr_command(&args(&["Home", " "])).is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(dispatch(&args(&["frobnicate"])).is_err());
    }
}
