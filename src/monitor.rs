//! Periodic status reconciliation.
//!
//! One monitor task per supervisor polls every service on a fixed period:
//! exited children are reaped and classified (crash vs. expected exit),
//! children observed alive are promoted from Starting to Running, and a
//! snapshot is emitted on the event channel only when something actually
//! changed since the previous emission.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::SupervisorEvent;
use crate::state::ServiceSnapshot;
use crate::supervisor::{self, Supervisor};

/// Spawns the monitor task with the configured poll period.
pub fn spawn(sup: Supervisor) -> JoinHandle<()> {
    let period = sup.settings().poll;
    tokio::spawn(run(sup, period))
}

async fn run(sup: Supervisor, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Vec<Option<ServiceSnapshot>> = vec![None; sup.len()];
    loop {
        interval.tick().await;
        poll_once(&sup, &mut last).await;
    }
}

async fn poll_once(sup: &Supervisor, last: &mut [Option<ServiceSnapshot>]) {
    for id in 0..sup.len() {
        reconcile(sup, id);
        let Some(snap) = sup.snapshot_one(id) else {
            continue;
        };
        if last[id].as_ref() != Some(&snap) {
            debug!(service = %snap.name, status = %snap.status, "status changed");
            let _ = sup
                .event_tx()
                .send(SupervisorEvent::StatusChanged {
                    snapshot: snap.clone(),
                })
                .await;
            last[id] = Some(snap);
        }
    }
}

/// Reads the handle's liveness once and folds the result into the state.
fn reconcile(sup: &Supervisor, id: usize) {
    let cell = &sup.cells()[id];
    let mut st = cell.state.lock();
    if let Some(child) = st.child.as_mut() {
        match child.try_wait() {
            Ok(Some(status)) => supervisor::reap(&mut st, status),
            Ok(None) => {
                // Observed alive: the Starting window closes here.
                st.confirmed_running = true;
            }
            Err(err) => {
                st.log.append_line(&format!("failed to poll process: {err}"));
            }
        }
    }
}
