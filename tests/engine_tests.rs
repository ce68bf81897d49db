//! Engine Integration Tests
//!
//! Covers the transfer execution engine end to end against the mock raw
//! driver:
//! - FIFO completion ordering per handle
//! - Cancellation races (before dequeue, during execution, after delivery)
//! - Concurrent submission from many threads
//! - Interface claim bookkeeping across handles
//! - Handle teardown with pending transfers
//!
//! Run with: `cargo test --test engine_tests`

use proptest::prelude::*;
use rawusb::test_utils::{
    DEFAULT_TEST_TIMEOUT, bulk_in_request, bulk_out_request, gated_device, mock_device,
};
use rawusb::{
    Completion, DeviceHandle, Error, RequestId, TransferOutcome, TransferRequest, TransferType,
    UsbError,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;

// ============================================================================
// Submission Ordering Tests
// ============================================================================

#[test]
fn test_completions_arrive_in_submission_order() {
    let (device, _raw) = mock_device();
    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    for i in 0..16 {
        handle
            .submit(bulk_out_request(i, 0x01, 64), tx.clone())
            .expect("submit accepted");
    }

    let ids: Vec<u64> = (0..16)
        .map(|_| {
            let completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
            assert!(completion.outcome.is_success());
            completion.id.0
        })
        .collect();

    assert_eq!(ids, (0..16).collect::<Vec<u64>>());
}

#[test]
fn test_mixed_direction_transfers_stay_ordered() {
    let (device, _raw) = mock_device();
    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    handle
        .submit(bulk_in_request(0, 0x81, 128), tx.clone())
        .expect("submit accepted");
    handle
        .submit(bulk_out_request(1, 0x01, 32), tx.clone())
        .expect("submit accepted");
    handle
        .submit(bulk_in_request(2, 0x81, 8), tx.clone())
        .expect("submit accepted");

    for expected in 0..3u64 {
        let completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
        assert_eq!(completion.id.0, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_fifo_order_holds_for_any_submission_batch(
        transfers in proptest::collection::vec((any::<bool>(), 0usize..512), 1..24)
    ) {
        let (device, _raw) = mock_device();
        let handle = DeviceHandle::open(device).expect("handle opens");
        let (tx, rx) = channel();

        for (i, (is_in, len)) in transfers.iter().enumerate() {
            let request = if *is_in {
                bulk_in_request(i as u64, 0x81, *len)
            } else {
                bulk_out_request(i as u64, 0x01, *len)
            };
            handle.submit(request, tx.clone()).expect("submit accepted");
        }

        for i in 0..transfers.len() {
            let completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
            prop_assert_eq!(completion.id.0, i as u64);
        }
    }
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[test]
fn test_cancel_before_dequeue_yields_cancelled() {
    // Scenario: submit A, submit B, cancel A before the worker wakes for it.
    // Expected outcomes, in order: [A: Cancelled, B: Success].
    let (device, gate) = gated_device();
    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    // Priming transfer pins the worker inside execution.
    let _priming = handle
        .submit(bulk_out_request(0, 0x01, 8), tx.clone())
        .expect("submit accepted");
    gate.wait_started();

    let a = handle
        .submit(bulk_out_request(1, 0x01, 8), tx.clone())
        .expect("submit accepted");
    let _b = handle
        .submit(bulk_out_request(2, 0x01, 8), tx.clone())
        .expect("submit accepted");

    handle.cancel(&a);

    gate.release_one(); // priming finishes
    gate.release_one(); // pre-release B; A never executes

    let priming = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert_eq!(priming.id.0, 0);
    assert!(priming.outcome.is_success());

    let a_completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert_eq!(a_completion.id.0, 1);
    assert!(a_completion.outcome.is_cancelled());

    let b_completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert_eq!(b_completion.id.0, 2);
    assert!(b_completion.outcome.is_success());
}

#[test]
fn test_cancel_during_execution_suppresses_success() {
    let (device, gate) = gated_device();
    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    let transfer = handle
        .submit(bulk_in_request(1, 0x81, 16), tx)
        .expect("submit accepted");

    // The worker is now inside the raw I/O call.
    gate.wait_started();
    handle.cancel(&transfer);
    gate.release_one();

    let completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert!(
        completion.outcome.is_cancelled(),
        "success must be downgraded when cancellation lands mid-execution"
    );
}

#[test]
fn test_cancel_after_delivery_has_no_effect() {
    let (device, _raw) = mock_device();
    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    let transfer = handle
        .submit(bulk_out_request(1, 0x01, 8), tx)
        .expect("submit accepted");

    let completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert!(completion.outcome.is_success());

    // Too late: the success already stands and is never re-reported.
    handle.cancel(&transfer);
    thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err(), "no second completion is delivered");
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_submissions_all_complete_exactly_once() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 25;

    let (device, _raw) = mock_device();
    let handle = Arc::new(DeviceHandle::open(device).expect("handle opens"));
    let (tx, rx) = channel();

    let submitters: Vec<_> = (0..THREADS)
        .map(|t| {
            let handle = Arc::clone(&handle);
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let id = t * PER_THREAD + i;
                    handle
                        .submit(bulk_out_request(id, 0x01, 16), tx.clone())
                        .expect("submit accepted");
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().expect("submitter thread finished");
    }

    let mut seen = HashSet::new();
    for _ in 0..THREADS * PER_THREAD {
        let completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
        assert!(
            seen.insert(completion.id.0),
            "transfer {} reported twice",
            completion.id.0
        );
    }
    assert_eq!(seen.len() as u64, THREADS * PER_THREAD);
    assert!(rx.try_recv().is_err(), "no extra completions");
}

// ============================================================================
// Interface Claim Tests
// ============================================================================

#[test]
fn test_claim_conflicts_across_handles() {
    let (device, _raw) = mock_device();
    let h1 = DeviceHandle::open(Arc::clone(&device)).expect("handle opens");
    let h2 = DeviceHandle::open(Arc::clone(&device)).expect("handle opens");

    h1.claim_interface(0).expect("first claim succeeds");
    assert!(matches!(h2.claim_interface(0), Err(Error::InUse(0))));

    h2.claim_interface(1).expect("other interface is free");

    h1.release_interface(0).expect("release succeeds");
    h2.claim_interface(0).expect("re-claim after release succeeds");
}

#[test]
fn test_release_never_claimed_interface_fails() {
    let (device, _raw) = mock_device();
    let handle = DeviceHandle::open(device).expect("handle opens");

    assert!(matches!(
        handle.release_interface(1),
        Err(Error::NotClaimed(1))
    ));
}

#[test]
fn test_drop_releases_only_handle_claims() {
    let (device, _raw) = mock_device();
    let h1 = DeviceHandle::open(Arc::clone(&device)).expect("handle opens");
    let h2 = DeviceHandle::open(Arc::clone(&device)).expect("handle opens");

    h1.claim_interface(0).expect("claim succeeds");
    h2.claim_interface(1).expect("claim succeeds");
    assert_eq!(device.claimed_interfaces(), 0b11);

    drop(h1);

    // Interface 0 is free again, interface 1 still belongs to h2.
    assert_eq!(device.claimed_interfaces(), 0b10);
    h2.claim_interface(0).expect("released interface is claimable");
}

// ============================================================================
// Teardown Tests
// ============================================================================

#[test]
fn test_teardown_reports_pending_as_cancelled() {
    let (device, raw) = mock_device();
    raw.set_delay(Duration::from_millis(200));

    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    handle
        .submit(bulk_out_request(0, 0x01, 8), tx.clone())
        .expect("submit accepted");
    handle
        .submit(bulk_out_request(1, 0x01, 8), tx.clone())
        .expect("submit accepted");
    handle
        .submit(bulk_out_request(2, 0x01, 8), tx.clone())
        .expect("submit accepted");

    // The worker is executing transfer 0; 1 and 2 are pending.
    thread::sleep(Duration::from_millis(50));
    drop(handle); // joins the worker

    let first = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert_eq!(first.id.0, 0);
    assert!(first.outcome.is_success());

    for expected in [1u64, 2] {
        let completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("reported");
        assert_eq!(completion.id.0, expected);
        assert!(
            completion.outcome.is_cancelled(),
            "pending transfers must not be silently dropped"
        );
    }
}

#[test]
fn test_shutdown_then_submit_fails() {
    let (device, _raw) = mock_device();
    let mut handle = DeviceHandle::open(device).expect("handle opens");
    handle.shutdown();

    let (tx, _rx) = channel();
    assert!(matches!(
        handle.submit(bulk_out_request(9, 0x01, 8), tx),
        Err(Error::NotInitialized)
    ));
}

// ============================================================================
// Worker Resilience Tests
// ============================================================================

#[test]
fn test_transfer_failure_does_not_stop_worker() {
    let (device, raw) = mock_device();
    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    raw.queue_result(Err(UsbError::Io));

    handle
        .submit(bulk_out_request(0, 0x01, 8), tx.clone())
        .expect("submit accepted");
    handle
        .submit(bulk_out_request(1, 0x01, 8), tx.clone())
        .expect("submit accepted");

    let failed = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("reported");
    assert_eq!(failed.id.0, 0);
    assert!(matches!(
        failed.outcome,
        TransferOutcome::Error {
            error: UsbError::Io
        }
    ));

    // The worker keeps going.
    let ok = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert_eq!(ok.id.0, 1);
    assert!(ok.outcome.is_success());
}

#[test]
fn test_control_transfer_roundtrip() {
    let (device, _raw) = mock_device();
    let handle = DeviceHandle::open(device).expect("handle opens");
    let (tx, rx) = channel();

    let request = TransferRequest {
        id: RequestId(42),
        transfer: TransferType::Control {
            request_type: 0x80,
            request: 0x06,
            value: 0x0100,
            index: 0,
            data: vec![],
        },
    };
    handle.submit(request, tx).expect("submit accepted");

    let completion: Completion = rx.recv_timeout(DEFAULT_TEST_TIMEOUT).expect("completes");
    assert_eq!(completion.id, RequestId(42));
    match completion.outcome {
        TransferOutcome::Success { data, transferred } => {
            // Default control IN buffer size.
            assert_eq!(data.len(), 64);
            assert_eq!(transferred, 64);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}
