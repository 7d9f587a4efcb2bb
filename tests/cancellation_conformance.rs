//! Cancellation conformance: listener hygiene, abort timing, select abort.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cochan::lab::Lab;
use cochan::test_utils::init_test_logging;
use cochan::{
    CancelKind, CancelReason, CancelSource, Channel, Cleanup, Completion, Select, TryRecvError,
};

fn init_test(name: &str) {
    init_test_logging();
    cochan::test_phase!(name);
}

#[test]
fn aborting_a_wait_removes_exactly_one_entry() {
    init_test("aborting_a_wait_removes_exactly_one_entry");
    let mut lab = Lab::new();
    let ch = Channel::<u32>::new(0);
    let mut source = CancelSource::new();
    let token = source.token();
    let baseline = token.listener_count();

    let keep_ch = ch.clone();
    let kept = lab.spawn(async move { keep_ch.wait_readable("kept", None).await });
    let abort_ch = ch.clone();
    let abort_token = token.clone();
    let aborted = lab.spawn(async move {
        abort_ch
            .wait_readable("aborted", Some(&abort_token))
            .await
    });
    lab.run_until_stalled();
    assert_eq!(ch.readable_waits_count(), 2);

    source.cancel(CancelReason::user("test abort"));
    lab.run_until_stalled();

    // Exactly one entry left the set; the other wait is untouched.
    assert_eq!(ch.readable_waits_count(), 1);
    assert!(matches!(aborted.try_join(), Some(Err(_))));
    assert!(!kept.is_finished());
    assert_eq!(token.listener_count(), baseline);
    cochan::test_complete!("aborting_a_wait_removes_exactly_one_entry");
}

#[test]
fn linked_source_relays_reason_and_detaches() {
    init_test("linked_source_relays_reason_and_detaches");
    let mut upstream = CancelSource::new();
    let up_token = upstream.token();

    let linked = CancelSource::linked(Some(&up_token));
    let child = linked.token();
    assert_eq!(up_token.listener_count(), 1);

    upstream.cancel(CancelReason::shutdown());
    let reason = child.reason().expect("propagated downstream");
    assert_eq!(reason.kind(), CancelKind::Shutdown);
    assert_eq!(up_token.listener_count(), 0);
    cochan::test_complete!("linked_source_relays_reason_and_detaches");
}

#[test]
fn completion_cleanup_runs_after_abort_not_after_settle() {
    init_test("completion_cleanup_runs_after_abort_not_after_settle");
    let cleaned = Arc::new(AtomicUsize::new(0));
    let mut source = CancelSource::new();
    let token = source.token();

    // Abort path: cleanup fires once.
    let c = Arc::clone(&cleaned);
    let pending = Completion::<u32>::new(Some(&token), move |_settler| {
        Some(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }) as Cleanup)
    });
    source.cancel(CancelReason::timeout());
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    drop(pending);
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);

    // Settle path: cleanup never fires.
    let cleaned2 = Arc::new(AtomicUsize::new(0));
    let c2 = Arc::clone(&cleaned2);
    let settled = Completion::<u32>::new(None, move |settler| {
        settler.settle(1);
        Some(Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }) as Cleanup)
    });
    drop(settled);
    assert_eq!(cleaned2.load(Ordering::SeqCst), 0);
    cochan::test_complete!("completion_cleanup_runs_after_abort_not_after_settle");
}

#[test]
fn aborted_select_mutates_no_channel_state() {
    init_test("aborted_select_mutates_no_channel_state");
    let mut lab = Lab::new();
    let input = Channel::<u32>::new(1);
    let output = Channel::new(1);
    output.try_send(0u32).expect("room");
    let mut source = CancelSource::new();
    let token = source.token();

    let sel_in = input.clone();
    let sel_out = output.clone();
    let sel_token = token.clone();
    let select_task = lab.spawn(async move {
        Select::new()
            .recv("in", &sel_in, |v| v)
            // Full buffer: this send arm can only wait.
            .send("out", &sel_out, 9, || None)
            .with_token(&sel_token)
            .run()
            .await
    });
    lab.run_until_stalled();
    assert!(!select_task.is_finished());

    source.cancel(CancelReason::user("abort the race"));
    lab.run_until_stalled();

    let outcome = select_task.try_join().expect("select resolved");
    assert!(outcome.expect_err("aborted").is_aborted());

    // No value consumed, none produced, no waiters left.
    assert_eq!(input.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(output.len(), 1);
    assert_eq!(output.try_recv(), Ok(0));
    assert_eq!(input.readable_waits_count(), 0);
    assert_eq!(output.writable_waits_count(), 0);
    cochan::test_complete!("aborted_select_mutates_no_channel_state");
}

#[test]
fn dropping_suspended_operations_is_clean_cancellation() {
    init_test("dropping_suspended_operations_is_clean_cancellation");
    let mut lab = Lab::new();
    let ch = Channel::new(0);

    // A blocked send whose task is torn down mid-flight.
    let tx = ch.clone();
    let doomed = lab.spawn(async move {
        let _ = tx.send(1).await;
    });
    lab.run_until_stalled();
    assert_eq!(ch.blocked_sends_count(), 1);
    assert!(!doomed.is_finished());

    // Closing settles the send; afterwards nothing lingers.
    ch.close();
    lab.run_until_stalled();
    assert_eq!(ch.blocked_sends_count(), 0);
    assert!(doomed.is_finished());
    cochan::test_complete!("dropping_suspended_operations_is_clean_cancellation");
}
