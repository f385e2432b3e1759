use super::*;
use std::cell::Cell;
use std::thread;

fn short_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(15))
}

fn install_short_filter() -> FilterRegistration {
    register(Arc::new(RetryLaterFilter::new(short_policy())))
}

#[test]
fn retry_later_maps_to_fixed_delay() {
    let decision = RetryPolicy::default().classify(RejectType::RetryLater);
    assert_eq!(decision, RetryDecision::RetryAfter(DEFAULT_RETRY_DELAY));
    assert!(decision.as_raw() >= 500);
}

#[test]
fn too_busy_maps_to_cancel() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.classify(RejectType::Rejected), RetryDecision::Cancel);
    assert_eq!(policy.classify(RejectType::Other(7)), RetryDecision::Cancel);
    assert_eq!(RetryDecision::Cancel.as_raw(), -1);
}

#[test]
fn filter_answers_reentrant_and_pending_calls() {
    let filter = RetryLaterFilter::default();
    assert_eq!(filter.handle_incoming_call(1), IncomingCallResponse::Handled);
    assert_eq!(filter.handle_incoming_call(1).as_raw(), 0);
    assert_eq!(
        filter.message_pending(0),
        PendingMessageResponse::WaitDefProcess
    );
    assert_eq!(filter.message_pending(0).as_raw(), 2);
}

#[test]
fn responses_use_host_code_table() {
    assert_eq!(IncomingCallResponse::Rejected.as_raw(), 1);
    assert_eq!(IncomingCallResponse::RetryLater.as_raw(), 2);
    assert_eq!(PendingMessageResponse::CancelCall.as_raw(), 0);
    assert_eq!(PendingMessageResponse::WaitNoProcess.as_raw(), 1);
}

#[test]
fn register_is_idempotent_and_revokes_once() {
    let mut first = install_short_filter();
    assert!(first.is_owner());
    assert!(is_registered());

    let mut second = install_short_filter();
    assert!(!second.is_owner());
    assert!(!second.revoke());
    assert!(is_registered());

    assert!(first.revoke());
    assert!(!first.revoke());
    assert!(!is_registered());
}

#[test]
fn dropping_registration_revokes() {
    {
        let _registration = install_short_filter();
        assert!(is_registered());
    }
    assert!(!is_registered());
}

#[test]
fn registration_is_scoped_to_the_installing_thread() {
    let _registration = install_short_filter();
    let seen_elsewhere = thread::spawn(is_registered).join().unwrap();
    assert!(!seen_elsewhere);
    assert!(is_registered());
}

#[test]
fn retries_until_call_succeeds() {
    let _registration = install_short_filter();
    let attempts = Cell::new(0);
    let started = Instant::now();
    let result = invoke_with_filter("test", &CancelToken::new(), || {
        attempts.set(attempts.get() + 1);
        if attempts.get() <= 2 {
            Err(HostError::Rejected(RejectType::RetryLater))
        } else {
            Ok("done")
        }
    });
    assert_eq!(result.unwrap(), "done");
    assert_eq!(attempts.get(), 3);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn too_busy_cancels_without_retry() {
    let _registration = install_short_filter();
    let attempts = Cell::new(0);
    let result: Result<(), HostError> = invoke_with_filter("test", &CancelToken::new(), || {
        attempts.set(attempts.get() + 1);
        Err(HostError::Rejected(RejectType::Rejected))
    });
    assert!(matches!(
        result,
        Err(HostError::CallCanceled(RejectType::Rejected))
    ));
    assert_eq!(attempts.get(), 1);
}

#[test]
fn rejection_surfaces_without_filter() {
    assert!(!is_registered());
    let result: Result<(), HostError> = invoke_with_filter("test", &CancelToken::new(), || {
        Err(HostError::Rejected(RejectType::RetryLater))
    });
    assert!(matches!(
        result,
        Err(HostError::Rejected(RejectType::RetryLater))
    ));
}

#[test]
fn cancellation_stops_backoff() {
    let _registration = register(Arc::new(RetryLaterFilter::new(RetryPolicy::new(
        Duration::from_secs(30),
    ))));
    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        remote.cancel();
    });
    let result: Result<(), HostError> = invoke_with_filter("test", &cancel, || {
        Err(HostError::Rejected(RejectType::RetryLater))
    });
    assert!(matches!(result, Err(HostError::CallCanceled(_))));
    handle.join().unwrap();
}

#[test]
fn other_errors_pass_through_untouched() {
    let _registration = install_short_filter();
    let result: Result<(), HostError> =
        invoke_with_filter("test", &CancelToken::new(), || Err(HostError::Disconnected));
    assert!(matches!(result, Err(HostError::Disconnected)));
}
