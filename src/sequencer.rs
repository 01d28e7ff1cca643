//! Ordered startup and shutdown across the whole registry.
//!
//! `start_all` is one asynchronous walk over the services in registration
//! order: the foundational service (position 0) is started first and given a
//! long warm-up, every other service follows with a short stagger. The waits
//! are blind delays, not readiness checks; that policy sits behind the
//! `ReadyWait` trait so a real readiness probe could replace it without
//! restructuring the sequencer. At most one sequence runs at a time.

use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::SequenceError;
use crate::events::SupervisorEvent;
use crate::supervisor::Supervisor;

/// Strategy deciding how long the sequence waits after starting a service
/// before moving on.
#[async_trait]
pub trait ReadyWait: Send + Sync {
    async fn wait_ready(&self, id: usize);
}

/// The documented policy: a fixed warm-up after the foundational service, a
/// fixed stagger after everyone else.
pub struct FixedDelay {
    pub warmup: Duration,
    pub stagger: Duration,
}

#[async_trait]
impl ReadyWait for FixedDelay {
    async fn wait_ready(&self, id: usize) {
        let delay = if id == 0 { self.warmup } else { self.stagger };
        tokio::time::sleep(delay).await;
    }
}

impl Supervisor {
    /// Runs the start-all sequence with the configured fixed delays.
    pub async fn start_all(&self) -> Result<(), SequenceError> {
        let strategy = FixedDelay {
            warmup: self.settings().warmup,
            stagger: self.settings().stagger,
        };
        self.start_all_with(&strategy).await
    }

    /// Runs the start-all sequence with a caller-provided ready-wait
    /// strategy. Rejects with `Busy` while another run is in flight.
    pub async fn start_all_with(&self, ready: &dyn ReadyWait) -> Result<(), SequenceError> {
        if self
            .sequencing()
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SequenceError::Busy);
        }
        let result = self.run_sequence(ready).await;
        self.sequencing().store(false, Ordering::SeqCst);
        result
    }

    async fn run_sequence(&self, ready: &dyn ReadyWait) -> Result<(), SequenceError> {
        info!("start-all sequence beginning");
        for id in 0..self.len() {
            if self.is_running(id) {
                continue;
            }
            let name = self.cells()[id].def.name.clone();
            // A failed start leaves that service in Error with its log
            // explaining why; the sequence keeps walking.
            if let Err(err) = self.start(id).await {
                warn!(service = %name, error = %err, "sequence start failed");
            }
            let _ = self
                .event_tx()
                .send(SupervisorEvent::SequenceStep { id, name })
                .await;
            ready.wait_ready(id).await;
        }
        let _ = self.event_tx().send(SupervisorEvent::SequenceFinished).await;
        info!("start-all sequence finished");
        Ok(())
    }

    /// Stops every service in registration order. Manual-stop flags are
    /// raised up front so no exit observed during the batch is classified as
    /// a crash; each individual stop is bounded by grace + kill.
    pub async fn stop_all(&self) {
        for cell in self.cells() {
            let mut st = cell.state.lock();
            if st.is_running() {
                st.manual_stop = true;
            }
        }
        for id in 0..self.len() {
            let _ = self.stop(id).await;
        }
    }
}
