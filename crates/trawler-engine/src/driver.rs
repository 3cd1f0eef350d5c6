//! Outer supervision loop
//!
//! Trawl forever. Connectivity failures park the driver in a reconnect
//! probe loop; anything unclassified is fatal and handed back to the
//! process edge, where an external supervisor is responsible for restart.

use crate::cycle::Trawler;
use tokio::time::sleep;
use tracing::{debug, error, info};
use trawler_common::Result;

/// Two-state driver: Running while cycles succeed, Reconnecting while either
/// collaborator endpoint is unreachable.
pub struct RetryDriver {
    trawler: Trawler,
}

impl RetryDriver {
    pub fn new(trawler: Trawler) -> Self {
        Self { trawler }
    }

    /// Run cycles until an unclassified error occurs.
    ///
    /// Never returns Ok: either it loops forever or it surfaces the fatal
    /// error for the process edge to exit with.
    pub async fn run(self) -> Result<()> {
        let interval = self.trawler.config().sleep_interval;
        info!(
            "Trawling {} for products.",
            self.trawler.config().trawl_root.display()
        );

        loop {
            match self.trawler.run_cycle().await {
                Ok(0) => {
                    // Idle cycle; avoid hot polling.
                    debug!("Nothing uploaded, sleeping for {:?}.", interval);
                    sleep(interval).await;
                }
                Ok(bytes_uploaded) => {
                    debug!("Uploaded {} bytes this cycle.", bytes_uploaded);
                }
                Err(err) if err.is_connectivity() => {
                    error!(
                        "Connectivity failure while trawling: {}. Testing object store and \
                         catalog connections before continuing.",
                        err
                    );
                    self.reconnect().await;
                }
                Err(err) => {
                    // Partially-corrupted in-memory state is never silently
                    // continued; the supervisor restarts us clean.
                    error!("Unrecoverable error while trawling: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Probe both collaborators until they answer, sleeping between rounds.
    async fn reconnect(&self) {
        let interval = self.trawler.config().sleep_interval;
        loop {
            if self.trawler.probe_collaborators().await {
                info!("Object store and catalog reachable again, resuming.");
                return;
            }
            debug!("Probes failed, sleeping for {:?} before continuing.", interval);
            sleep(interval).await;
        }
    }
}
