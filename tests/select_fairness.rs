//! Select fairness, steal safety, and teardown hygiene.

use std::time::Duration;

use cochan::lab::Lab;
use cochan::test_utils::init_test_logging;
use cochan::util::entropy::mix_seed;
use cochan::{CancelSource, Channel, Select, Timer};

fn init_test(name: &str) {
    init_test_logging();
    cochan::test_phase!(name);
}

#[test]
fn two_ready_arms_win_uniformly() {
    init_test("two_ready_arms_win_uniformly");
    let mut lab = Lab::new();
    let rounds = 1000u32;
    let mut a_wins = 0u32;

    for round in 0..rounds {
        let a = Channel::new(1);
        let b = Channel::new(1);
        a.try_send("a").expect("room");
        b.try_send("b").expect("room");

        let winner = lab.block_on(
            Select::new()
                .recv("a", &a, |v| v.expect("prewritten"))
                .recv("b", &b, |v| v.expect("prewritten"))
                .with_seed(mix_seed(u64::from(round)))
                .run(),
        );
        if winner.expect("one arm commits") == "a" {
            a_wins += 1;
        }
    }

    let share = f64::from(a_wins) / f64::from(rounds);
    cochan::assert_with_log!(
        (0.45..=0.55).contains(&share),
        "uniform tie-break",
        "45%..55%",
        share
    );
    cochan::test_complete!("two_ready_arms_win_uniformly");
}

#[test]
fn steal_race_does_not_falsely_resolve() {
    init_test("steal_race_does_not_falsely_resolve");
    let mut lab = Lab::new();
    let ch = Channel::new(0);

    // The select arms a raceReceive on the empty channel.
    let sel_ch = ch.clone();
    let select_task = lab.spawn(async move {
        Select::new()
            .recv("victim", &sel_ch, |v| v)
            .run()
            .await
    });
    lab.run_until_stalled();

    // A separate task performs a direct receive; being a real blocked
    // receiver, it rendezvouses with the next send before any readiness
    // subscriber hears about it.
    let thief_ch = ch.clone();
    let thief = lab.spawn(async move { thief_ch.recv().await });
    lab.run_until_stalled();

    let sent = lab.block_on({
        let tx = ch.clone();
        async move { tx.send(1).await.is_ok() }
    });
    assert!(sent);
    lab.run_until_stalled();

    assert_eq!(thief.try_join(), Some(Some(1)), "direct receive wins");
    assert!(
        !select_task.is_finished(),
        "select must stay blocked; the value was consumed elsewhere"
    );
    cochan::test_complete!("steal_race_does_not_falsely_resolve");
}

#[test]
fn select_commits_exactly_one_operation() {
    init_test("select_commits_exactly_one_operation");
    let mut lab = Lab::new();
    let a = Channel::new(1);
    let b = Channel::new(1);
    a.try_send(1).expect("room");
    b.try_send(2).expect("room");

    let winner = lab
        .block_on(
            Select::new()
                .recv("a", &a, |v| ("a", v))
                .recv("b", &b, |v| ("b", v))
                .run(),
        )
        .expect("one arm commits");

    // Exactly one channel lost its value.
    let remaining = usize::from(a.len() == 1) + usize::from(b.len() == 1);
    assert_eq!(remaining, 1, "the losing arm consumed nothing");
    assert!(winner.1.is_some());
    cochan::test_complete!("select_commits_exactly_one_operation");
}

#[test]
fn teardown_leaves_zero_listeners_and_timers() {
    init_test("teardown_leaves_zero_listeners_and_timers");
    let mut lab = Lab::new();
    let timer = Timer::new();
    let ready = Channel::new(1);
    let idle = Channel::<u32>::new(0);
    let source = CancelSource::new();
    let watched = source.token();
    ready.try_send(7).expect("room");

    let value = lab
        .block_on(
            Select::new()
                .recv("ready", &ready, |v| v.expect("prewritten"))
                .recv("idle", &idle, |_| 0)
                .deadline("t", &timer, Duration::from_millis(50), || 0)
                .on_cancel("stop", &watched, |_| 0)
                .run(),
        )
        .expect("ready arm commits");

    assert_eq!(value, 7);
    assert_eq!(idle.readable_waits_count(), 0);
    assert_eq!(timer.pending(), 0);
    assert_eq!(watched.listener_count(), 0);
    cochan::test_complete!("teardown_leaves_zero_listeners_and_timers");
}

#[test]
fn rearmed_select_still_commits_later_value() {
    init_test("rearmed_select_still_commits_later_value");
    let mut lab = Lab::new();
    let ch = Channel::new(1);

    let sel_ch = ch.clone();
    let select_task = lab.spawn(async move {
        Select::new().recv("only", &sel_ch, |v| v).run().await
    });
    lab.run_until_stalled();

    // Wake the arm, then steal before the select task runs again.
    ch.try_send(1).expect("room");
    assert_eq!(ch.try_recv(), Ok(1));
    lab.run_until_stalled();
    assert!(!select_task.is_finished(), "stolen wake must re-arm");

    // A second, unstolen value commits.
    ch.try_send(2).expect("room");
    lab.run_until_stalled();
    let outcome = select_task.try_join().expect("select finished");
    assert_eq!(outcome.expect("commit"), Some(2));
    cochan::test_complete!("rearmed_select_still_commits_later_value");
}
