//! Device handle and transfer worker
//!
//! A [`DeviceHandle`] is an open, usable connection to a [`Device`]. It owns
//! the pending-transfer queue and a dedicated worker thread that pops and
//! executes transfers in submission order. Submission and cancellation are
//! non-blocking and may come from any thread; the worker is the only thread
//! that touches the raw device for I/O.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::lock;
use crate::transfer::{CompletionSink, Transfer};
use crate::types::{TransferOutcome, TransferRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Queue state shared between the handle and its worker.
struct TransferQueue {
    state: Mutex<QueueState>,
    /// Counting signal: the worker blocks here while the queue is empty.
    /// Queue depth is the signal count, kept consistent under `state`.
    available: Condvar,
}

struct QueueState {
    pending: VecDeque<Arc<Transfer>>,
    stopping: bool,
}

/// An open connection to a device, owning the transfer worker
///
/// Lifecycle: `open` starts the worker (Running); `shutdown` or `Drop`
/// requests a stop, joins the thread, and only then lets go of the device
/// reference, so no execution ever touches a released device.
pub struct DeviceHandle {
    device: Arc<Device>,
    queue: Arc<TransferQueue>,
    /// Interfaces claimed through this handle; Drop releases exactly these.
    claimed_interfaces: Mutex<u32>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    /// Opens a handle against `device` and starts its transfer worker.
    ///
    /// Fails with [`Error::Resource`] if the worker thread cannot be
    /// spawned; no half-started handle is ever returned.
    pub fn open(device: Arc<Device>) -> Result<Self> {
        let queue = Arc::new(TransferQueue {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                stopping: false,
            }),
            available: Condvar::new(),
        });

        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("usb-transfers".to_string())
            .spawn(move || transfer_worker(worker_queue))
            .map_err(|e| Error::Resource(format!("failed to spawn transfer worker: {}", e)))?;

        debug!("Opened device handle for {}", device.location());

        Ok(Self {
            device,
            queue,
            claimed_interfaces: Mutex::new(0),
            worker: Some(worker),
        })
    }

    /// Device this handle is attached to.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Interfaces claimed through this handle, as a bitmask.
    pub fn claimed_interfaces(&self) -> u32 {
        *lock(&self.claimed_interfaces)
    }

    /// Submits a transfer for execution.
    ///
    /// Appends to the pending queue and wakes the worker; never blocks the
    /// caller beyond the queue lock's critical section. The returned `Arc`
    /// is the cancellation token for [`DeviceHandle::cancel`]. Completions
    /// are delivered to `sink` in submission order, per handle.
    pub fn submit<S>(&self, request: TransferRequest, sink: S) -> Result<Arc<Transfer>>
    where
        S: CompletionSink + 'static,
    {
        let transfer = Arc::new(Transfer::new(
            request,
            Arc::clone(&self.device),
            Box::new(sink),
        ));

        {
            let mut state = lock(&self.queue.state);
            if state.stopping {
                return Err(Error::NotInitialized);
            }
            state.pending.push_back(Arc::clone(&transfer));
        }
        self.queue.available.notify_one();

        debug!("Submitted transfer {:?}", transfer.id());
        Ok(transfer)
    }

    /// Requests cancellation of a transfer and returns immediately.
    ///
    /// Best-effort: a transfer already mid-execution may still run to
    /// completion at the driver level, but its result is reported as
    /// `Cancelled` whenever the flag is observed before the report is made.
    /// A success that was already delivered is never revoked.
    pub fn cancel(&self, transfer: &Transfer) {
        transfer.mark_cancelled();
        debug!("Cancel requested for transfer {:?}", transfer.id());
    }

    /// Claims an interface, with handle-local bookkeeping.
    pub fn claim_interface(&self, interface: u8) -> Result<()> {
        self.device.claim_interface(interface)?;
        *lock(&self.claimed_interfaces) |= 1u32 << interface;
        Ok(())
    }

    /// Releases an interface claimed through this handle.
    pub fn release_interface(&self, interface: u8) -> Result<()> {
        self.device.release_interface(interface)?;
        *lock(&self.claimed_interfaces) &= !(1u32 << interface);
        Ok(())
    }

    /// Switches the device's active configuration.
    pub fn set_configuration(&self, index: usize) -> Result<()> {
        self.device.set_active_configuration(index)
    }

    /// Selects an alternate setting on an interface.
    pub fn set_alt_setting(&self, interface: u8, alt: u8) -> Result<()> {
        self.device.set_alt_setting(interface, alt)
    }

    /// Stops the worker and joins it.
    ///
    /// Submissions fail with [`Error::NotInitialized`] from this point on.
    /// Transfers still pending are reported as `Cancelled`, never silently
    /// dropped.
    pub fn shutdown(&mut self) {
        {
            let mut state = lock(&self.queue.state);
            state.stopping = true;
        }
        self.queue.available.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Transfer worker panicked during shutdown");
            }
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.shutdown();

        // Release only the interfaces this handle claimed; other handles on
        // the same device keep theirs.
        let claimed = *lock(&self.claimed_interfaces);
        for interface in 0..32u8 {
            if claimed & (1u32 << interface) != 0 {
                if let Err(e) = self.device.release_interface(interface) {
                    warn!("Failed to release interface {}: {}", interface, e);
                }
            }
        }
    }
}

/// Worker loop: blocks on the counting signal, executes transfers FIFO, and
/// re-checks cancellation on both sides of the raw I/O call.
fn transfer_worker(queue: Arc<TransferQueue>) {
    info!("Transfer worker started");

    loop {
        let next = {
            let mut state = lock(&queue.state);
            while state.pending.is_empty() && !state.stopping {
                state = queue
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            // A stop request wins over remaining work; what is still queued
            // gets drained below.
            if state.stopping {
                None
            } else {
                state.pending.pop_front()
            }
        };

        let Some(transfer) = next else { break };

        if transfer.is_cancelled() {
            debug!("Skipping cancelled transfer {:?}", transfer.id());
            transfer.report(TransferOutcome::Cancelled);
            continue;
        }

        let outcome = transfer.execute();

        // A cancellation that landed during execution suppresses the result,
        // whatever it was. A result reported before the cancel stands.
        if transfer.is_cancelled() {
            transfer.report(TransferOutcome::Cancelled);
        } else {
            transfer.report(outcome);
        }
    }

    let drained: Vec<Arc<Transfer>> = {
        let mut state = lock(&queue.state);
        state.pending.drain(..).collect()
    };
    if !drained.is_empty() {
        debug!("Draining {} pending transfers at shutdown", drained.len());
    }
    for transfer in drained {
        transfer.report(TransferOutcome::Cancelled);
    }

    info!("Transfer worker stopped");
}
