//! Periodic reachability sweep over every encoder and decoder.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use videowall_core::topology::DeviceStatus;

use crate::daemon::wall::Wall;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub online: usize,
    pub offline: usize,
}

/// Probe every device once, at most `concurrency` at a time, and record the
/// results. Probe failures only ever mark a device offline.
pub async fn sweep(wall: &Wall) -> SweepSummary {
    let targets = wall.probe_targets().await;
    let settings = wall.liveness().clone();
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let timeout = settings.probe_timeout();

    let mut probes = JoinSet::new();
    for target in targets {
        let semaphore = semaphore.clone();
        let resolver = wall.resolver().clone();
        probes.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let status = resolver.probe(target.address, &target.ports, timeout).await;
            (target.device, status)
        });
    }

    let mut summary = SweepSummary::default();
    while let Some(result) = probes.join_next().await {
        match result {
            Ok((device, status)) => {
                match status {
                    DeviceStatus::Online => summary.online += 1,
                    DeviceStatus::Offline => summary.offline += 1,
                }
                wall.apply_status(&device, status).await;
            }
            Err(e) => warn!("Probe task failed: {}", e),
        }
    }

    debug!(
        "Liveness sweep: {} online, {} offline",
        summary.online, summary.offline
    );
    summary
}

/// Sweep now and then every configured interval until the wall is dropped.
pub fn spawn_monitor(wall: &Arc<Wall>) -> JoinHandle<()> {
    let weak_wall = Arc::downgrade(wall);
    let period = wall.liveness().interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(wall) = weak_wall.upgrade() else {
                debug!("Wall dropped, liveness monitor exiting");
                break;
            };
            sweep(&wall).await;
        }
    })
}
