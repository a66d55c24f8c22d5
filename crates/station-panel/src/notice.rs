//! Transient user-facing messages (rejections, failed commands, resyncs).

use std::fmt;

use chrono::{DateTime, Local};

use crate::error::SyncError;
use crate::gate::ControlId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn tag(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "ok",
            Severity::Warning => "warn",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    /// Control the notice is about, when there is one.
    pub control: Option<ControlId>,
    pub at: DateTime<Local>,
}

impl Notice {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            control: None,
            at: Local::now(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn with_control(mut self, control: ControlId) -> Self {
        self.control = Some(control);
        self
    }

    /// Notice for a command that did not go through.  Rejections show the
    /// backend's reason verbatim.
    pub fn command_failed(control: ControlId, action: &str, err: &SyncError) -> Self {
        let notice = match err {
            SyncError::Rejected { detail, .. } => Notice::error(detail.clone()),
            SyncError::Transport(e) => Notice::warning(format!("{} failed: {}", action, e)),
            other => Notice::error(format!("{} failed: {}", action, other)),
        };
        notice.with_control(control)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.at.format("%H:%M:%S"),
            self.severity.tag(),
            self.message
        )
    }
}
