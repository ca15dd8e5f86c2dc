//! Property tests for the completion barrier.
//!
//! Whatever order pulls arrive in, and whatever noise arrives alongside them
//! (duplicates, unknown names, pulls for an older cycle), the barrier fires
//! exactly once, on the record that completes the expected set.

use std::collections::HashSet;

use proptest::prelude::*;
use vbostream::streaming::{CompletionBarrier, RecordOutcome};

const CYCLE: u64 = 2;

#[derive(Debug, Clone)]
enum Pull {
    Expected(usize),
    Unknown(usize),
    Stale(usize),
}

fn pull_strategy(n: usize) -> impl Strategy<Value = Pull> {
    prop_oneof![
        (0..n).prop_map(Pull::Expected),
        (0..4usize).prop_map(Pull::Unknown),
        (0..n).prop_map(Pull::Stale),
    ]
}

/// Expected-set size plus a shuffled sequence containing every expected name
/// at least once.
fn pull_plan() -> impl Strategy<Value = (usize, Vec<Pull>)> {
    (1usize..8).prop_flat_map(|n| {
        let noise = prop::collection::vec(pull_strategy(n), 0..24);
        noise.prop_flat_map(move |noise| {
            let mut pulls: Vec<Pull> = (0..n).map(Pull::Expected).collect();
            pulls.extend(noise);
            (Just(n), Just(pulls).prop_shuffle())
        })
    })
}

fn name(i: usize) -> String {
    format!("buffer{}", i)
}

proptest! {
    #[test]
    fn barrier_fires_exactly_once((n, pulls) in pull_plan()) {
        let barrier = CompletionBarrier::new();
        let wait = barrier.arm(CYCLE, (0..n).map(name));

        let mut seen = HashSet::new();
        let mut completions = 0;

        for pull in pulls {
            let fired = seen.len() == n;
            let outcome = match pull {
                Pull::Expected(i) => {
                    let outcome = barrier.record(CYCLE, &name(i));
                    if fired {
                        prop_assert_eq!(outcome, RecordOutcome::AlreadyFired);
                    } else if !seen.insert(i) {
                        prop_assert_eq!(outcome, RecordOutcome::Duplicate);
                    } else if seen.len() == n {
                        prop_assert_eq!(outcome, RecordOutcome::Completed);
                    } else {
                        prop_assert_eq!(
                            outcome,
                            RecordOutcome::Counted { received: seen.len(), expected: n }
                        );
                    }
                    outcome
                }
                Pull::Unknown(i) => {
                    let outcome = barrier.record(CYCLE, &format!("other{}", i));
                    let want = if fired {
                        RecordOutcome::AlreadyFired
                    } else {
                        RecordOutcome::Unexpected
                    };
                    prop_assert_eq!(outcome, want);
                    outcome
                }
                Pull::Stale(i) => {
                    let outcome = barrier.record(CYCLE - 1, &name(i));
                    prop_assert_eq!(outcome, RecordOutcome::Stale { current: CYCLE });
                    outcome
                }
            };

            if outcome == RecordOutcome::Completed {
                completions += 1;
            }
            let (received, expected) = barrier.progress().unwrap();
            prop_assert!(received <= expected);
        }

        prop_assert_eq!(completions, 1);
        prop_assert!(barrier.is_fired());
        prop_assert!(futures::executor::block_on(wait.wait()));
    }

    #[test]
    fn rearm_discards_previous_cycle(first in 1usize..6, second in 1usize..6) {
        let barrier = CompletionBarrier::new();
        let old = barrier.arm(1, (0..first).map(name));
        let new = barrier.arm(2, (0..second).map(name));

        for i in 0..first {
            prop_assert_eq!(barrier.record(1, &name(i)), RecordOutcome::Stale { current: 2 });
        }
        prop_assert!(!futures::executor::block_on(old.wait()));

        for i in 0..second {
            barrier.record(2, &name(i));
        }
        prop_assert!(futures::executor::block_on(new.wait()));
    }
}
