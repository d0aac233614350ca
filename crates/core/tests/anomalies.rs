mod common;

use common::{all_options, r, scan, txn, verdict, w};
use vbox_core::consistency::error::Stage;
use vbox_core::consistency::outcome::Reason;
use vbox_core::history::types::Transaction;
use vbox_core::{Anomaly, Options, Outcome, Violation, Witness};

fn rejected_by(outcome: &Outcome) -> &Reason {
    &outcome.rejection().expect("history should be rejected").reason
}

#[test]
fn empty_history_passes() {
    for options in all_options() {
        let outcome = verdict(vec![], &options);
        assert_eq!(outcome.report().unwrap().witness, Witness::CommitOrder(vec![]));
    }
}

#[test]
fn read_after_write_passes() {
    let h = vec![vec![
        txn(1, 1, 2, vec![w(1, 7, 1)]),
        txn(2, 3, 4, vec![r(1, 7, 1, 1)]),
    ]];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        assert!(outcome.is_accept(), "{options:?}: {outcome:?}");
        assert_eq!(outcome.report().unwrap().witness.transactions(), &[1, 2]);
    }
}

#[test]
fn concurrent_reader_is_ordered_after_writer() {
    // T2 starts first but observes T1.
    let h = vec![
        vec![txn(2, 1, 10, vec![r(1, 7, 1, 1)])],
        vec![txn(1, 2, 11, vec![w(1, 7, 1)])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        assert_eq!(outcome.report().unwrap().witness.transactions(), &[1, 2]);
    }
}

#[test]
fn stale_read_after_commit_fails() {
    let h = vec![
        vec![txn(1, 1, 2, vec![w(1, 7, 1)])],
        vec![txn(2, 3, 4, vec![r(1, 7, 0, 0)])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        assert!(matches!(
            rejected_by(&outcome),
            Reason::Violation(Violation::Cycle {
                stage: Stage::Construction,
                ..
            })
        ));
    }
}

#[test]
fn write_read_cycle_fails() {
    let h = vec![
        vec![txn(1, 1, 10, vec![w(1, 7, 1), r(2, 9, 3, 1)])],
        vec![txn(2, 2, 11, vec![r(1, 7, 1, 1), w(2, 8, 1)])],
        vec![txn(3, 3, 12, vec![w(1, 9, 1), r(2, 8, 2, 2)])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        let rejection = outcome.rejection().unwrap();
        assert!(matches!(rejection.reason, Reason::Violation(Violation::Cycle { .. })));
        assert_eq!(rejection.transactions.len(), 2);
    }
}

#[test]
fn lost_update_fails() {
    let h = vec![
        vec![txn(1, 1, 10, vec![r(1, 7, 0, 0), w(2, 7, 1)])],
        vec![txn(2, 2, 11, vec![r(1, 7, 0, 0), w(2, 7, 2)])],
    ];
    for options in all_options() {
        assert!(!verdict(h.clone(), &options).is_accept());
    }
}

#[test]
fn item_write_skew_fails() {
    let h = vec![
        vec![txn(1, 1, 10, vec![r(1, 7, 0, 0), r(2, 8, 0, 0), w(3, 7, 1)])],
        vec![txn(2, 2, 11, vec![r(1, 7, 0, 0), r(2, 8, 0, 0), w(3, 8, 1)])],
    ];
    for options in all_options() {
        assert!(!verdict(h.clone(), &options).is_accept());
    }
}

#[test]
fn crossed_readers_fail_in_pruning_or_solving() {
    // Each order of the two writers of key 7 contradicts one reader.
    let h = vec![
        vec![txn(1, 1, 20, vec![w(1, 7, 1), w(2, 9, 1)])],
        vec![txn(2, 2, 21, vec![w(1, 7, 2), w(2, 8, 2)])],
        vec![txn(3, 3, 22, vec![r(1, 7, 1, 1), r(2, 8, 2, 2)])],
        vec![txn(4, 4, 23, vec![r(1, 7, 2, 1), r(2, 9, 1, 2)])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        match rejected_by(&outcome) {
            Reason::Violation(Violation::ItemConflict { .. } | Violation::Unsatisfiable) => {}
            other => panic!("{options:?}: unexpected {other:?}"),
        }
    }
}

#[test]
fn predicate_write_skew_fails() {
    // Each scan misses the row the other transaction inserts.
    let h = vec![
        vec![txn(1, 1, 10, vec![scan(1, 0, 9, &[]), w(2, 7, 5)])],
        vec![txn(2, 2, 11, vec![scan(1, 0, 9, &[]), w(2, 8, 5)])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        assert!(matches!(
            rejected_by(&outcome),
            Reason::Violation(Violation::Cycle {
                stage: Stage::Construction,
                ..
            })
        ));
    }
}

#[test]
fn scan_missing_non_matching_row_passes() {
    let h = vec![
        vec![txn(1, 1, 10, vec![w(1, 7, 50)])],
        vec![txn(2, 2, 11, vec![scan(1, 0, 9, &[])])],
    ];
    for options in all_options() {
        assert!(verdict(h.clone(), &options).is_accept());
    }
}

#[test]
fn scan_observing_row_passes() {
    let h = vec![
        vec![txn(1, 1, 10, vec![w(1, 7, 5)])],
        vec![txn(2, 2, 11, vec![scan(1, 0, 9, &[(7, 1, 1)])])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        assert_eq!(outcome.report().unwrap().witness.transactions(), &[1, 2]);
    }
}

#[test]
fn scan_may_precede_concurrent_insert() {
    // T3 misses T1's matching row: it runs before T1 or after T2 overwrites it.
    let h = vec![
        vec![txn(1, 1, 10, vec![w(1, 7, 5)])],
        vec![txn(2, 2, 11, vec![w(1, 7, 50)])],
        vec![txn(3, 3, 12, vec![scan(1, 0, 9, &[])])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        let order = outcome.report().unwrap().witness.transactions().to_vec();
        let position = |tid| order.iter().position(|&t| t == tid).unwrap();
        let missed =
            position(3) < position(1) || (position(1) < position(2) && position(2) < position(3));
        assert!(missed, "{options:?}: {order:?}");
    }
}

#[test]
fn phantom_fails() {
    // T1 -> T2 -> T3 is forced by reads, so T3's scan must see T2's row.
    let h = vec![
        vec![txn(1, 1, 10, vec![w(1, 7, 50), w(2, 8, 60)])],
        vec![txn(2, 2, 11, vec![r(1, 8, 1, 2), w(2, 7, 5), w(3, 9, 60)])],
        vec![txn(3, 3, 12, vec![r(1, 9, 2, 3), scan(2, 0, 9, &[])])],
    ];
    for options in all_options() {
        let outcome = verdict(h.clone(), &options);
        match rejected_by(&outcome) {
            Reason::Violation(
                Violation::PredicateExhausted { .. } | Violation::Unsatisfiable,
            ) => {}
            other => panic!("{options:?}: unexpected {other:?}"),
        }
    }
}

#[test]
fn input_anomalies_are_rejections() {
    let options = Options::default();

    let intermediate = verdict(
        vec![vec![
            txn(1, 1, 2, vec![w(1, 7, 1), w(2, 7, 2)]),
            txn(2, 3, 4, vec![r(1, 7, 1, 1)]),
        ]],
        &options,
    );
    assert!(matches!(
        rejected_by(&intermediate),
        Reason::Anomaly(Anomaly::IntermediateReads { reader: 2, .. })
    ));
    assert_eq!(intermediate.rejection().unwrap().transactions, vec![2, 1]);

    let unknown = verdict(vec![vec![txn(2, 3, 4, vec![r(1, 7, 9, 1)])]], &options);
    assert!(matches!(
        rejected_by(&unknown),
        Reason::Anomaly(Anomaly::InconsistentReads { from_tid: 9, .. })
    ));

    let own = verdict(
        vec![vec![
            txn(1, 1, 2, vec![w(1, 7, 1)]),
            txn(2, 3, 4, vec![w(1, 7, 2), r(2, 7, 1, 1)]),
        ]],
        &options,
    );
    assert!(matches!(
        rejected_by(&own),
        Reason::Anomaly(Anomaly::ReadSelfUpdateFailed { reader: 2, key: 7 })
    ));

    let twice = verdict(
        vec![vec![txn(1, 1, 2, vec![]), txn(1, 3, 4, vec![])]],
        &options,
    );
    assert!(matches!(
        rejected_by(&twice),
        Reason::Anomaly(Anomaly::DuplicateTransaction { tid: 1 })
    ));
}

#[test]
fn json_history_and_outcome_survive_serde() {
    let h = vec![
        vec![txn(1, 1, 10, vec![scan(1, 0, 9, &[]), w(2, 7, 5)])],
        vec![txn(2, 2, 11, vec![scan(1, 0, 9, &[]), w(2, 8, 5)])],
    ];
    let text = serde_json::to_string(&h).unwrap();
    let parsed: Vec<Vec<Transaction>> = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, h);

    let outcome = verdict(parsed, &Options::default());
    let json = serde_json::to_value(&outcome).unwrap();
    assert!(json.to_string().contains("Cycle"));
    let back: Outcome = serde_json::from_value(json).unwrap();
    assert_eq!(back, outcome);
}
