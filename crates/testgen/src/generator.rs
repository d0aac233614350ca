use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Local};
use rand::distr::{Distribution, Uniform};
use rand::{Rng, RngExt};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use vbox_core::history::types::{
    Key, Operation, OperationId, PredicateMatch, PredicateRead, Timestamp, Transaction,
    TransactionId, Value,
};

/// Every generated write and predicate uses this field.
pub const FIELD: u64 = 0;

/// Commit points are this far apart.
const STEP: Timestamp = 10;

#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
pub struct HistParams {
    #[builder(default)]
    pub id: u64,
    pub n_node: u64,
    pub n_variable: u64,
    pub n_transaction: u64,
    pub n_event: u64,
    /// Values are drawn from `0..n_value`.
    #[builder(default = 16)]
    pub n_value: u64,
    /// How far a transaction may stretch around its commit point.
    #[builder(default = 25)]
    pub spread: u64,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct GeneratedHistory {
    params: HistParams,
    info: String,
    start: DateTime<Local>,
    end: DateTime<Local>,
    data: Vec<Vec<Transaction>>,
}

impl GeneratedHistory {
    #[must_use]
    pub const fn new(
        params: HistParams,
        info: String,
        start: DateTime<Local>,
        end: DateTime<Local>,
        data: Vec<Vec<Transaction>>,
    ) -> Self {
        Self {
            params,
            info,
            start,
            end,
            data,
        }
    }

    #[must_use]
    pub const fn get_id(&self) -> u64 {
        self.params.id
    }

    #[must_use]
    pub const fn get_data(&self) -> &Vec<Vec<Transaction>> {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<Vec<Transaction>> {
        self.data
    }

    #[must_use]
    pub const fn get_params(&self) -> &HistParams {
        &self.params
    }

    #[must_use]
    pub fn get_info(&self) -> &str {
        &self.info
    }

    #[must_use]
    pub fn get_duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Committed row of a key: writer, operation and value.
#[derive(Clone, Copy)]
struct Row {
    tid: TransactionId,
    oid: OperationId,
    value: Value,
}

/// Serial execution against an in-memory table.
///
/// Absent keys hold the initial version, which carries no field values and
/// so matches no predicate.
struct Simulation<'r, R: Rng> {
    rng: &'r mut R,
    params: &'r HistParams,
    table: BTreeMap<Key, Row>,
    keys: Uniform<u64>,
    values: Uniform<u64>,
    kinds: Uniform<u8>,
}

impl<R: Rng> Simulation<'_, R> {
    /// Runs one transaction at its commit point and installs its writes.
    fn execute(&mut self, tid: TransactionId, start: Timestamp, end: Timestamp) -> Transaction {
        let mut txn = Transaction::new(tid, start, end);
        let mut own: BTreeMap<Key, Row> = BTreeMap::new();
        for oid in 1..=self.params.n_event {
            let at = (start + oid).min(end);
            let op = match self.kinds.sample(&mut *self.rng) {
                0..=3 => {
                    let key = self.keys.sample(&mut *self.rng);
                    let (from_tid, from_oid) = own
                        .get(&key)
                        .or_else(|| self.table.get(&key))
                        .map_or((0, 0), |row| (row.tid, row.oid));
                    Operation::read(oid, at, key, from_tid, from_oid)
                }
                4..=7 => {
                    let key = self.keys.sample(&mut *self.rng);
                    let value = self.values.sample(&mut *self.rng);
                    own.insert(key, Row { tid, oid, value });
                    Operation::write(oid, at, key, FIELD, value)
                }
                _ => {
                    let a = self.values.sample(&mut *self.rng);
                    let b = self.values.sample(&mut *self.rng);
                    let mut read = PredicateRead::new(FIELD, a.min(b), a.max(b));
                    let matches: Vec<PredicateMatch> = self
                        .table
                        .iter()
                        .filter(|(key, _)| !own.contains_key(*key))
                        .chain(own.iter())
                        .filter(|(_, row)| read.admits(row.value))
                        .map(|(&key, row)| PredicateMatch {
                            key,
                            from_tid: row.tid,
                            from_oid: row.oid,
                        })
                        .collect();
                    read.matches = matches;
                    Operation::predicate(oid, at, read)
                }
            };
            txn = txn.with(op);
        }
        self.table.extend(own);
        txn
    }
}

/// Generate a single history with `n_node` sessions of `n_transaction`
/// transactions, each issuing `n_event` reads, writes and predicate reads
/// over `n_variable` keys.
///
/// Transactions run one at a time in the order of their commit points, and
/// each one's interval contains its commit point, so the history is strictly
/// serializable. Intervals of different sessions overlap freely.
///
/// # Panics
///
/// Panics if `n_variable` or `n_value` is zero.
#[must_use]
pub fn generate_single_history(params: &HistParams) -> Vec<Vec<Transaction>> {
    let mut rng = rand::rng();
    generate_with(&mut rng, params)
}

/// [`generate_single_history`] with a caller-provided generator.
///
/// # Panics
///
/// Panics if `n_variable` or `n_value` is zero.
#[must_use]
pub fn generate_with<R: Rng>(rng: &mut R, params: &HistParams) -> Vec<Vec<Transaction>> {
    let n_node = usize::try_from(params.n_node).unwrap_or(usize::MAX);
    let mut sessions: Vec<Vec<Transaction>> = vec![Vec::new(); n_node];
    // end of each session's last transaction
    let mut busy: Vec<Timestamp> = vec![0; n_node];
    let mut remaining: Vec<u64> = vec![params.n_transaction; n_node];

    let mut simulation = Simulation {
        rng,
        params,
        table: BTreeMap::new(),
        keys: Uniform::new(0, params.n_variable).unwrap(),
        values: Uniform::new(0, params.n_value).unwrap(),
        kinds: Uniform::new(0, 10).unwrap(),
    };

    let mut tid: TransactionId = 0;
    let mut commit: Timestamp = STEP;
    loop {
        let ready: Vec<usize> = (0..n_node)
            .filter(|&s| remaining[s] > 0 && busy[s] < commit)
            .collect();
        if ready.is_empty() {
            if remaining.iter().all(|&r| r == 0) {
                break;
            }
            commit += STEP;
            continue;
        }
        let s = ready[simulation.rng.random_range(0..ready.len())];
        let before = simulation.rng.random_range(0..=params.spread);
        let after = simulation.rng.random_range(0..=params.spread);
        let start = commit.saturating_sub(before).max(busy[s] + 1);
        let end = commit + after;

        tid += 1;
        let txn = simulation.execute(tid, start, end.max(start + params.n_event));
        busy[s] = txn.end;
        remaining[s] -= 1;
        sessions[s].push(txn);
        commit += STEP;
    }
    sessions
}

#[must_use]
pub fn generate_mult_histories(n_hist: u64, params: &HistParams) -> Vec<GeneratedHistory> {
    (0..n_hist)
        .into_par_iter()
        .map(|i_hist| {
            let start_time = Local::now();
            let data = generate_single_history(params);
            let end_time = Local::now();
            let mut params = params.clone();
            params.id = i_hist;
            GeneratedHistory {
                params,
                info: "generated".to_string(),
                start: start_time,
                end: end_time,
                data,
            }
        })
        .collect()
}
