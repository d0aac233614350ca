#![allow(dead_code)]

use vbox_core::history::types::{
    Key, Operation, OperationId, PredicateMatch, PredicateRead, Timestamp, Transaction,
    TransactionId, Value,
};
use vbox_core::options::{Construction, Prune, Storage, Update};
use vbox_core::{check, History, Options, Outcome};

/// Every helper writes and scans this field.
pub const FIELD: u64 = 0;

pub fn txn(tid: TransactionId, start: Timestamp, end: Timestamp, ops: Vec<Operation>) -> Transaction {
    ops.into_iter()
        .fold(Transaction::new(tid, start, end), Transaction::with)
}

pub const fn w(oid: OperationId, key: Key, value: Value) -> Operation {
    Operation::write(oid, 0, key, FIELD, value)
}

pub const fn r(oid: OperationId, key: Key, from_tid: TransactionId, from_oid: OperationId) -> Operation {
    Operation::read(oid, 0, key, from_tid, from_oid)
}

/// Range read over [`FIELD`] returning `(key, from_tid, from_oid)` rows.
pub fn scan(
    oid: OperationId,
    lower: Value,
    upper: Value,
    rows: &[(Key, TransactionId, OperationId)],
) -> Operation {
    let mut read = PredicateRead::new(FIELD, lower, upper);
    read.matches = rows
        .iter()
        .map(|&(key, from_tid, from_oid)| PredicateMatch {
            key,
            from_tid,
            from_oid,
        })
        .collect();
    Operation::predicate(oid, 0, read)
}

pub fn verdict(sessions: Vec<Vec<Transaction>>, options: &Options) -> Outcome {
    check(&History::from_sessions(sessions), options).expect("no internal defect")
}

/// Every combination of storage, construction, update, pruning and merging.
pub fn all_options() -> Vec<Options> {
    let mut all = Vec::new();
    for storage in [Storage::Dense, Storage::Sparse, Storage::Interval] {
        for construction in [
            Construction::Warshall,
            Construction::Italiano,
            Construction::ItalianoInterval,
            Construction::Purdom,
            Construction::PurdomInterval,
        ] {
            for update in [Update::Warshall, Update::Italiano, Update::ItalianoInterval] {
                for prune in [Prune::Incremental, Prune::Rescan, Prune::Disabled] {
                    for merge in [true, false] {
                        all.push(Options {
                            storage,
                            construction,
                            update,
                            prune,
                            merge,
                        });
                    }
                }
            }
        }
    }
    all
}

/// One representative per pruning strategy and storage layout.
pub fn some_options() -> Vec<Options> {
    vec![
        Options::default(),
        Options {
            storage: Storage::Dense,
            construction: Construction::Warshall,
            update: Update::Warshall,
            prune: Prune::Rescan,
            merge: false,
        },
        Options {
            storage: Storage::Sparse,
            construction: Construction::Italiano,
            update: Update::Italiano,
            prune: Prune::Disabled,
            merge: true,
        },
        Options {
            storage: Storage::Interval,
            construction: Construction::Purdom,
            update: Update::ItalianoInterval,
            prune: Prune::Disabled,
            merge: false,
        },
    ]
}

/// Checks `sessions` under every combination and returns the shared verdict.
pub fn agreed_verdict(sessions: &[Vec<Transaction>], options: &[Options]) -> bool {
    let verdicts: Vec<bool> = options
        .iter()
        .map(|o| verdict(sessions.to_vec(), o).is_accept())
        .collect();
    assert!(
        verdicts.iter().all(|&v| v == verdicts[0]),
        "options disagree: {verdicts:?} on {sessions:?}"
    );
    verdicts[0]
}
