//! Serialized install queue.
//!
//! Exactly one install job runs at a time system-wide; everything else
//! waits in FIFO order. The single-job cap is deliberate backpressure on
//! shared disk and network, not a technical limitation. Enqueueing a
//! package that is already active or already waiting is a no-op.

use crate::catalog::PackageDescriptor;
use crate::transport::CancelFlag;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Executes one install job to completion; returns success. The queue
/// injects this so the driver loop stays independent of the job
/// implementation.
pub type JobRunner =
    Arc<dyn Fn(PackageDescriptor, CancelFlag) -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PackageDescriptor>,
    active: Option<(String, CancelFlag)>,
    shutdown: bool,
}

impl QueueState {
    fn knows(&self, dlc_id: &str) -> bool {
        self.active.as_ref().is_some_and(|(id, _)| id == dlc_id)
            || self.pending.iter().any(|d| d.dlc_id == dlc_id)
    }
}

/// FIFO, one-at-a-time install queue.
pub struct InstallQueue {
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
}

impl InstallQueue {
    /// Create the queue and spawn its driver task.
    pub fn new(runner: JobRunner) -> Self {
        let state = Arc::new(Mutex::new(QueueState::default()));
        let wake = Arc::new(Notify::new());

        tokio::spawn(drive(state.clone(), wake.clone(), runner));

        Self { state, wake }
    }

    /// Add a package to the queue. Returns false (and does nothing) when
    /// the same `dlc_id` is already active or waiting.
    pub fn enqueue(&self, descriptor: PackageDescriptor) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.knows(&descriptor.dlc_id) {
            debug!("{} already queued or active, ignoring", descriptor.dlc_id);
            return false;
        }

        info!("Queued {}", descriptor.dlc_id);
        state.pending.push_back(descriptor);
        drop(state);

        self.wake.notify_one();
        true
    }

    /// Drop every waiting entry and cancel the active job cooperatively;
    /// the running transfer stops at the next chunk boundary.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap();
        let dropped = state.pending.len();
        state.pending.clear();
        if let Some((dlc_id, cancel)) = &state.active {
            info!("Cancelling active install of {}", dlc_id);
            cancel.cancel();
        }
        if dropped > 0 {
            info!("Dropped {} queued installs", dropped);
        }
    }

    /// Whether nothing is running or waiting.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.active.is_none() && state.pending.is_empty()
    }

    /// Wait until the queue drains.
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for InstallQueue {
    fn drop(&mut self) {
        self.state.lock().unwrap().shutdown = true;
        self.wake.notify_one();
    }
}

async fn drive(state: Arc<Mutex<QueueState>>, wake: Arc<Notify>, runner: JobRunner) {
    loop {
        let next = {
            let mut state = state.lock().unwrap();
            if state.shutdown {
                return;
            }
            match state.pending.pop_front() {
                Some(descriptor) => {
                    let cancel = CancelFlag::new();
                    state.active = Some((descriptor.dlc_id.clone(), cancel.clone()));
                    Some((descriptor, cancel))
                }
                None => None,
            }
        };

        match next {
            Some((descriptor, cancel)) => {
                let dlc_id = descriptor.dlc_id.clone();
                let success = runner(descriptor, cancel).await;
                debug!("Job {} finished (success: {})", dlc_id, success);
                state.lock().unwrap().active = None;
            }
            None => wake.notified().await,
        }
    }
}
