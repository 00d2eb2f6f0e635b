//! Run-wide stop signal.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why the run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Every expected request was aggregated
    Completed,
    /// Ctrl-C or an external request to stop
    Interrupted,
    /// A worker aborted or crashed
    Fatal(String),
}

impl StopReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StopReason::Fatal(_))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::Fatal(cause) => write!(f, "fatal: {}", cause),
        }
    }
}

/// Cloneable stop signal; the first reason recorded wins
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns false when a stop was already requested.
    pub fn initiate(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason.clone()).is_ok();
        if first {
            match &reason {
                StopReason::Fatal(cause) => error!(cause = %cause, "Stopping benchmark"),
                StopReason::Interrupted => warn!("Stopping benchmark on interrupt"),
                StopReason::Completed => debug!("All requests aggregated"),
            }
        }
        self.token.cancel();
        first
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().cloned()
    }

    /// Turn the first Ctrl-C into an interrupt. The listener ends when the
    /// run stops for any other reason.
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Received Ctrl-C");
                        signal.initiate(StopReason::Interrupted);
                    }
                    Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
                },
                _ = signal.cancelled() => {}
            }
        })
    }
}
