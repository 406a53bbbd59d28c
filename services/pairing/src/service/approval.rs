//! 本机授权窗口：只由 approve/revoke 设置或清除，过期只靠时间比较。

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) struct ApprovalWindow {
    window: Duration,
    expires_at: Option<Instant>,
}

impl ApprovalWindow {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            expires_at: None,
        }
    }

    pub(crate) fn grant(&mut self, now: Instant) {
        self.expires_at = Some(now + self.window);
    }

    pub(crate) fn revoke(&mut self) {
        self.expires_at = None;
    }

    /// 严格比较：到期时刻本身视为已过期。
    pub(crate) fn is_active_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at > now)
    }
}
