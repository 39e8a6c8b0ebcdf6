//! Alert dispatch.
//!
//! Messages carry a [`Severity`]; the dispatcher forwards only those at or
//! above the configured threshold to the notification transport. Delivery is
//! fire-and-forget: alerts are queued on an unbounded channel and drained by a
//! single background task, so they arrive in dispatch order and a slow or
//! failing transport never holds up block processing.

pub mod telegram;

use async_trait::async_trait;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use telegram::TelegramTransport;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("alert transport is missing credentials")]
    NotConfigured,
}

/// Alert severity. Lower numeric level = more important (syslog ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical = 2,
    Error = 3,
    Warning = 4,
    Success = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Whether a message at this severity passes `threshold`.
    pub fn passes(self, threshold: Severity) -> bool {
        self.level() <= threshold.level()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Success => write!(f, "success"),
            Severity::Info => write!(f, "info"),
            Severity::Debug => write!(f, "debug"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "error" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            "success" => Ok(Severity::Success),
            "info" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A message ready for the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    pub text: String,
}

impl Alert {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }
}

/// External notification transport.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send_alert(&self, text: &str) -> Result<(), AlertError>;
}

/// Threshold filter in front of an optional transport.
#[derive(Clone)]
pub struct AlertDispatcher {
    threshold: Severity,
    tx: Option<mpsc::UnboundedSender<Alert>>,
}

impl AlertDispatcher {
    /// A dispatcher with no transport. Every dispatch is a no-op.
    pub fn disabled(threshold: Severity) -> Self {
        Self { threshold, tx: None }
    }

    /// Start the delivery task for `transport`. The task exits once every
    /// clone of the returned dispatcher has been dropped and the queue is
    /// drained.
    pub fn spawn(
        transport: Option<Arc<dyn AlertTransport>>,
        threshold: Severity,
    ) -> (Self, Option<tokio::task::JoinHandle<()>>) {
        let Some(transport) = transport else {
            return (Self::disabled(threshold), None);
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Alert>();
        let handle = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = transport.send_alert(&alert.text).await {
                    warn!(error = %e, severity = %alert.severity, "failed to deliver alert");
                }
            }
        });

        (
            Self {
                threshold,
                tx: Some(tx),
            },
            Some(handle),
        )
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `alert` if it passes the threshold. Returns whether it was queued.
    pub fn dispatch(&self, alert: Alert) -> bool {
        if !alert.severity.passes(self.threshold) {
            debug!(
                severity = %alert.severity,
                threshold = %self.threshold,
                "alert below threshold"
            );
            return false;
        }
        let Some(tx) = &self.tx else {
            return false;
        };
        if tx.send(alert).is_err() {
            warn!("alert delivery task has stopped, dropping alert");
            return false;
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every message it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<String>>,
        pub fail: bool,
    }

    #[async_trait]
    impl AlertTransport for RecordingTransport {
        async fn send_alert(&self, text: &str) -> Result<(), AlertError> {
            self.sent.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(AlertError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error.passes(Severity::Error));
        assert!(Severity::Error.passes(Severity::Success));
        assert!(!Severity::Success.passes(Severity::Error));
        assert!(Severity::Critical < Severity::Debug);
        assert_eq!(Severity::Success.level(), 5);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("ERROR".parse::<Severity>(), Ok(Severity::Error));
        assert_eq!("warn".parse::<Severity>(), Ok(Severity::Warning));
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn test_disabled_dispatch_is_noop() {
        let dispatcher = AlertDispatcher::disabled(Severity::Debug);
        assert!(!dispatcher.is_enabled());
        assert!(!dispatcher.dispatch(Alert::new(Severity::Critical, "pool insolvent")));
    }

    #[tokio::test]
    async fn test_spawn_without_transport() {
        let (dispatcher, handle) = AlertDispatcher::spawn(None, Severity::Debug);
        assert!(handle.is_none());
        assert!(!dispatcher.dispatch(Alert::new(Severity::Error, "x")));
    }

    #[tokio::test]
    async fn test_threshold_filters_and_order_is_kept() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, handle) = AlertDispatcher::spawn(
            Some(transport.clone() as Arc<dyn AlertTransport>),
            Severity::Error,
        );

        assert!(dispatcher.dispatch(Alert::new(Severity::Error, "first")));
        assert!(!dispatcher.dispatch(Alert::new(Severity::Success, "quiet")));
        assert!(dispatcher.dispatch(Alert::new(Severity::Critical, "second")));

        drop(dispatcher);
        handle.unwrap().await.unwrap();

        assert_eq!(*transport.sent.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_stop_delivery() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let (dispatcher, handle) = AlertDispatcher::spawn(
            Some(transport.clone() as Arc<dyn AlertTransport>),
            Severity::Debug,
        );

        assert!(dispatcher.dispatch(Alert::new(Severity::Error, "a")));
        assert!(dispatcher.dispatch(Alert::new(Severity::Info, "b")));

        drop(dispatcher);
        handle.unwrap().await.unwrap();

        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }
}
