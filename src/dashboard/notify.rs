//! User-facing toasts.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

const SUCCESS_TTL: Duration = Duration::from_secs(3);
const ERROR_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self::with_ttl(ToastLevel::Success, message.into(), SUCCESS_TTL)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_ttl(ToastLevel::Error, message.into(), ERROR_TTL)
    }

    fn with_ttl(level: ToastLevel, message: String, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(3));
        Self {
            level,
            message,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Receives toasts raised by the controller.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Writes toasts to the log and nowhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, toast: Toast) {
        log_toast(&toast);
    }
}

/// Keeps the most recent toasts so a front-end can poll them.
#[derive(Debug)]
pub struct ToastLog {
    toasts: Mutex<VecDeque<Toast>>,
    capacity: usize,
}

impl ToastLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            toasts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Toasts that have not yet expired at `now`, oldest first.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Toast> {
        let toasts = self.toasts.lock().unwrap_or_else(|e| e.into_inner());
        toasts.iter().filter(|t| t.is_active(now)).cloned().collect()
    }

    pub fn all(&self) -> Vec<Toast> {
        let toasts = self.toasts.lock().unwrap_or_else(|e| e.into_inner());
        toasts.iter().cloned().collect()
    }
}

impl Default for ToastLog {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Notifier for ToastLog {
    fn notify(&self, toast: Toast) {
        log_toast(&toast);
        let mut toasts = self.toasts.lock().unwrap_or_else(|e| e.into_inner());
        while toasts.len() >= self.capacity {
            toasts.pop_front();
        }
        toasts.push_back(toast);
    }
}

fn log_toast(toast: &Toast) {
    match toast.level {
        ToastLevel::Success => info!(message = %toast.message, "notification"),
        ToastLevel::Error => warn!(message = %toast.message, "notification"),
    }
}
