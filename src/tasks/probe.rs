//! Connectivity Probe Task
//!
//! Periodically requests a probe URL and flips the connectivity state: any
//! response means online, no response means offline.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connectivity::Connectivity;
use crate::fetch::Fetcher;
use crate::http::FetchRequest;

/// Spawns the probe loop. The first probe runs immediately.
pub fn spawn_connectivity_probe(
    fetcher: Arc<dyn Fetcher>,
    connectivity: Connectivity,
    probe_url: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting connectivity probe of {} every {}ms",
            probe_url,
            interval.as_millis()
        );
        let mut ticker = tokio::time::interval(interval);
        let request = FetchRequest::get(probe_url);

        loop {
            ticker.tick().await;
            let online = match fetcher.fetch(&request).await {
                Ok(response) => {
                    debug!("Probe answered {}", response.status);
                    true
                }
                Err(err) => {
                    debug!("Probe failed: {}", err);
                    false
                }
            };
            connectivity.set_online(online);
        }
    })
}
