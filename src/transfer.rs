//! In-flight transfer state
//!
//! A [`Transfer`] pairs one submitted request with its completion sink and a
//! cancellation flag. The flag lives behind its own lock whose only job is
//! to make reads and writes atomic across the submitting thread and the
//! worker; nothing else on a transfer mutates after construction.

use crate::device::Device;
use crate::lock;
use crate::types::{Completion, RequestId, TransferOutcome, TransferRequest, TransferType};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Capability through which the engine reports a transfer's final outcome
///
/// The higher-level stack hands one in per submission; the engine calls it
/// exactly once, from the worker thread.
pub trait CompletionSink: Send + Sync {
    /// Deliver the final outcome for a submitted transfer.
    fn complete(&self, completion: Completion);
}

/// Channel senders work directly as sinks.
impl CompletionSink for std::sync::mpsc::Sender<Completion> {
    fn complete(&self, completion: Completion) {
        if self.send(completion).is_err() {
            warn!("Completion receiver dropped before delivery");
        }
    }
}

/// One in-flight I/O request
///
/// Created by [`crate::DeviceHandle::submit`], executed exactly once by the
/// worker, reported exactly once. The returned `Arc` doubles as the
/// cancellation token.
pub struct Transfer {
    id: RequestId,
    transfer: TransferType,
    device: Arc<Device>,
    sink: Box<dyn CompletionSink>,
    /// Status lock; the flag only ever transitions false -> true.
    cancelled: Mutex<bool>,
}

impl Transfer {
    pub(crate) fn new(
        request: TransferRequest,
        device: Arc<Device>,
        sink: Box<dyn CompletionSink>,
    ) -> Self {
        Self {
            id: request.id,
            transfer: request.transfer,
            device,
            sink,
            cancelled: Mutex::new(false),
        }
    }

    /// Caller-assigned request ID.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Device this transfer targets.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Sets the cancellation flag and returns immediately.
    ///
    /// In-flight raw I/O is not aborted; the worker suppresses the outcome
    /// instead when it observes the flag before reporting.
    pub fn mark_cancelled(&self) {
        *lock(&self.cancelled) = true;
    }

    /// Reads the cancellation flag.
    pub fn is_cancelled(&self) -> bool {
        *lock(&self.cancelled)
    }

    /// Executes the raw I/O synchronously and maps the result to an outcome.
    pub(crate) fn execute(&self) -> TransferOutcome {
        debug!(
            "Executing transfer {:?} on endpoint {:#04x}",
            self.id,
            self.transfer.endpoint()
        );
        match self.device.raw().submit_io(&self.transfer) {
            Ok(completion) => TransferOutcome::Success {
                data: completion.data,
                transferred: completion.transferred,
            },
            Err(error) => {
                warn!("Transfer {:?} failed: {}", self.id, error);
                TransferOutcome::Error { error }
            }
        }
    }

    /// Delivers the final outcome to the submitter's sink.
    pub(crate) fn report(&self, outcome: TransferOutcome) {
        self.sink.complete(Completion {
            id: self.id,
            outcome,
        });
    }
}
