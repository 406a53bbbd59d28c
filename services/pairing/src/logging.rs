//! 日志系统模块职责：
//! 1. 初始化 stdout + 文件双通道 tracing 日志。
//! 2. 文件日志按天写入 `<TC_LOG_DIR>/raw`。
//! 3. 已结束日期的日志打包成 `<TC_LOG_DIR>/archive/<YYYY-MM-DD>.7z`。
//!
//! 日志内容不包含任何密钥或明文凭证。

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use sevenz_rust::compress_to_path;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

const LOG_DIR_ENV: &str = "TC_LOG_DIR";
/// 文件日志级别（独立于 `RUST_LOG`）。
const FILE_LOG_LEVEL_ENV: &str = "TC_FILE_LOG_LEVEL";
const ARCHIVE_INTERVAL_ENV: &str = "TC_LOG_ARCHIVE_INTERVAL_SEC";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_STDOUT_FILTER: &str = "info";
const DEFAULT_ARCHIVE_INTERVAL_SEC: u64 = 3600;

/// 日志目录布局。
#[derive(Debug, Clone)]
struct LogLayout {
    root: PathBuf,
}

impl LogLayout {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn raw(&self) -> PathBuf {
        self.root.join("raw")
    }

    fn archive(&self) -> PathBuf {
        self.root.join("archive")
    }

    fn stage(&self, day: &str) -> PathBuf {
        self.root.join(".archive-tmp").join(day)
    }

    fn lock(&self) -> PathBuf {
        self.root.join(".archive-lock")
    }

    fn ensure(&self) -> Result<()> {
        for dir in [self.raw(), self.archive()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create log dir: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// 日志运行时守卫；析构前 non-blocking writer 会刷盘。
pub struct LogRuntime {
    _stdout_guard: WorkerGuard,
    _file_guard: WorkerGuard,
    _archiver: JoinHandle<()>,
}

/// 初始化日志并启动归档任务。需要在 tokio runtime 内调用。
pub fn init(service_name: &str) -> Result<LogRuntime> {
    let layout = LogLayout::new(resolve_log_root());
    layout.ensure()?;
    if let Err(err) = archive_completed_days(&layout) {
        eprintln!("archive logs failed: {err:#}");
    }

    let file_appender = tracing_appender::rolling::daily(layout.raw(), format!("{service_name}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(stdout_writer)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(stdout_filter());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(file_level());

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LogRuntime {
        _stdout_guard: stdout_guard,
        _file_guard: file_guard,
        _archiver: spawn_archiver(layout),
    })
}

/// stdout 过滤：优先 `RUST_LOG`。
fn stdout_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDOUT_FILTER))
}

/// 文件级别默认 `debug`，便于事后回放配对过程。
fn file_level() -> LevelFilter {
    std::env::var(FILE_LOG_LEVEL_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::DEBUG)
}

fn resolve_log_root() -> PathBuf {
    let path = std::env::var(LOG_DIR_ENV)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|dir| dir.join(&path))
        .unwrap_or(path)
}

fn archive_interval() -> Duration {
    let sec = std::env::var(ARCHIVE_INTERVAL_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_ARCHIVE_INTERVAL_SEC);
    Duration::from_secs(sec)
}

fn spawn_archiver(layout: LogLayout) -> JoinHandle<()> {
    let interval = archive_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let layout = layout.clone();
            match tokio::task::spawn_blocking(move || archive_completed_days(&layout)).await {
                Ok(Ok(archived)) if archived > 0 => debug!("log archive done days={archived}"),
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!("archive logs failed: {err:#}"),
                Err(err) => warn!("archive task panicked: {err}"),
            }
        }
    })
}

/// 归档今天以前的日志，返回新生成的归档数量。
fn archive_completed_days(layout: &LogLayout) -> Result<usize> {
    let raw_dir = layout.raw();
    if !raw_dir.exists() {
        return Ok(0);
    }
    let Some(_lock) = ArchiveLock::acquire(&layout.lock())? else {
        return Ok(0);
    };

    let today = Local::now().date_naive();
    let mut archived = 0;
    for (day, files) in completed_log_days(&raw_dir, today)? {
        if archive_day(layout, &day, &files)? {
            archived += 1;
        }
    }
    Ok(archived)
}

/// 按日期分组 raw 目录中早于 `today` 的日志文件。
fn completed_log_days(raw_dir: &Path, today: NaiveDate) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let entries =
        fs::read_dir(raw_dir).with_context(|| format!("read raw logs: {}", raw_dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("read entry under {}", raw_dir.display()))?
            .path();
        if !path.is_file() {
            continue;
        }
        let Some(day) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(log_day)
        else {
            continue;
        };
        if day < today {
            grouped
                .entry(day.format("%Y-%m-%d").to_string())
                .or_default()
                .push(path);
        }
    }
    for files in grouped.values_mut() {
        files.sort();
    }
    Ok(grouped)
}

/// 压缩一天的日志；成功或已有归档时删除原文件。返回是否新生成了归档。
fn archive_day(layout: &LogLayout, day: &str, files: &[PathBuf]) -> Result<bool> {
    let archive_dir = layout.archive();
    let archive_path = archive_dir.join(format!("{day}.7z"));
    if archive_path.exists() {
        remove_all(files);
        return Ok(false);
    }

    let stage_dir = layout.stage(day);
    if stage_dir.exists() {
        let _ = fs::remove_dir_all(&stage_dir);
    }
    fs::create_dir_all(&stage_dir)
        .with_context(|| format!("create archive stage dir: {}", stage_dir.display()))?;
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = stage_dir.join(name);
        fs::copy(file, &target).with_context(|| {
            format!("stage log {} -> {}", file.display(), target.display())
        })?;
    }

    let archive_tmp = archive_dir.join(format!("{day}.7z.tmp"));
    let _ = fs::remove_file(&archive_tmp);
    compress_to_path(&stage_dir, &archive_tmp)
        .with_context(|| format!("compress logs to {}", archive_tmp.display()))?;
    fs::rename(&archive_tmp, &archive_path)
        .with_context(|| format!("finalize archive {}", archive_path.display()))?;

    remove_all(files);
    let _ = fs::remove_dir_all(&stage_dir);
    Ok(true)
}

fn remove_all(files: &[PathBuf]) {
    for file in files {
        let _ = fs::remove_file(file);
    }
}

/// 日志文件名形如 `pairing.log.2026-10-17`，取最后一段日期。
fn log_day(file_name: &str) -> Option<NaiveDate> {
    let day = file_name.rsplit('.').next()?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// 目录锁：多个进程共用日志目录时只有一个执行归档。
struct ArchiveLock {
    dir: PathBuf,
}

impl ArchiveLock {
    fn acquire(dir: &Path) -> Result<Option<Self>> {
        match fs::create_dir(dir) {
            Ok(()) => Ok(Some(Self {
                dir: dir.to_path_buf(),
            })),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err).with_context(|| format!("create archive lock: {}", dir.display())),
        }
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = fs::remove_dir(&self.dir);
    }
}
