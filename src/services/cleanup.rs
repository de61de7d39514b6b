use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::services::otp::OtpService;

/// Retry delay after a failed sweep.
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Periodic sweep of expired verification codes. Runs until the process
/// shuts down; the sweep itself is idempotent, so overlapping or repeated
/// runs are harmless.
pub struct CleanupWorker {
    otp: Arc<OtpService>,
    period: Duration,
}

impl CleanupWorker {
    pub fn new(otp: Arc<OtpService>, period: Duration) -> Self {
        CleanupWorker { otp, period }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!(
                "Code cleanup worker started (period: {}s)",
                self.period.as_secs()
            );
            loop {
                match self.otp.sweep().await {
                    Ok(_) => tokio::time::sleep(self.period).await,
                    Err(e) => {
                        log::error!("Code cleanup failed: {}", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        })
    }
}
