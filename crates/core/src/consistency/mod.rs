use crate::constraint::builder::ConstraintBuilder;
use crate::graph::dependency::DependencyGraph;
use crate::graph::TransitiveClosure;
use crate::history::History;
use crate::options::Options;

use self::error::{Defect, Error, Stage, Violation};
use self::outcome::{Outcome, Rejection, Report, Statistics};
use self::pruner::Pruner;
use self::solver::{ConstraintSolver, VboxSolver};

pub mod error;
pub mod outcome;
pub mod pruner;
pub mod solver;
pub mod witness;

pub use witness::Witness;

/// Decides whether `history` is strictly serializable.
///
/// The run loads the history into a [`DependencyGraph`], derives known edges
/// and ordering constraints, builds the transitive closure of the known
/// edges, prunes constraints the closure already decides, and hands the rest
/// to [`VboxSolver`]. On acceptance the returned [`Report`] carries a serial
/// order of the committed transactions.
///
/// ```rust,ignore
/// use vbox_core::{check, Options, Outcome};
///
/// match check(&history, &Options::default())? {
///     Outcome::Accept(report) => println!("serial order: {:?}", report.witness),
///     Outcome::Reject(rejection) => println!("rejected: {rejection}"),
/// }
/// ```
///
/// # Errors
///
/// Input anomalies and isolation violations are verdicts and come back as
/// [`Outcome::Reject`]. Only a [`Defect`], a broken internal invariant, is
/// returned as an error.
pub fn check(history: &History, options: &Options) -> Result<Outcome, Defect> {
    tracing::debug!(transactions = history.len(), ?options, "checking history");
    let graph = match DependencyGraph::load(history) {
        Ok(graph) => graph,
        Err(anomaly) => {
            tracing::debug!(%anomaly, "history rejected while loading");
            return Ok(Outcome::Reject(anomaly.into()));
        }
    };
    match verify(&graph, options) {
        Ok(report) => {
            tracing::debug!(statistics = ?report.statistics, "history accepted");
            Ok(Outcome::Accept(report))
        }
        Err(Error::Anomaly(anomaly)) => Ok(Outcome::Reject(anomaly.into())),
        Err(Error::Violation(violation)) => {
            tracing::debug!(%violation, "history rejected");
            Ok(Outcome::Reject(Rejection::violation(&graph, violation)))
        }
        Err(Error::Defect(defect)) => {
            tracing::debug!(%defect, "run aborted");
            Err(defect)
        }
    }
}

fn verify(graph: &DependencyGraph, options: &Options) -> Result<Report, Error> {
    let built = ConstraintBuilder::new(graph, options.merge).build()?;
    let mut statistics = Statistics {
        transactions: graph.len().saturating_sub(1),
        known_edges: built.known.len(),
        item_constraints: built.constraints.items.len(),
        predicate_constraints: built.constraints.predicates.len(),
        merged: built.merged,
        ..Statistics::default()
    };

    let mut closure =
        TransitiveClosure::new(graph.timeline.clone(), options.storage, options.update);
    closure
        .construct(&built.known, options.construction)
        .map_err(|edge| Violation::Cycle {
            stage: Stage::Construction,
            edge,
        })?;

    let mut constraints = built.constraints;
    statistics.pruning = Pruner::new(&mut closure, &mut constraints, options.prune).prune()?;
    statistics.live_items = constraints.live_item_count();
    statistics.live_predicates = constraints.live_predicate_count();

    let mut solver = VboxSolver::new(&mut closure);
    solver.formulate(&constraints)?;
    let satisfiable = solver.check()?;
    statistics.solving = solver.statistics();
    if !satisfiable {
        return Err(Violation::Unsatisfiable.into());
    }

    Ok(Report {
        witness: Witness::commit_order(&closure, graph),
        statistics,
    })
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::consistency::outcome::Reason;
    use crate::history::error::Anomaly;
    use crate::history::types::{Operation, OperationKind, Transaction};

    #[test]
    fn test_empty_history_is_accepted() {
        let outcome = check(&History::from_sessions(vec![]), &Options::default()).unwrap();
        assert_eq!(outcome.report().unwrap().witness, Witness::CommitOrder(vec![]));
    }

    #[test]
    fn test_read_from_aborted_is_rejected() {
        let history = History::from_sessions(vec![vec![
            Transaction::new(1, 1, 2)
                .with(Operation::write(1, 1, 7, 0, 1))
                .with(Operation::new(2, 2, 2, OperationKind::Abort)),
            Transaction::new(2, 3, 4).with(Operation::read(3, 3, 7, 1, 1)),
        ]]);
        let outcome = check(&history, &Options::default()).unwrap();
        let rejection = outcome.rejection().unwrap();
        assert_eq!(
            rejection.reason,
            Reason::Anomaly(Anomaly::AbortedReads {
                reader: 2,
                key: 7,
                from_tid: 1
            })
        );
    }

    #[test]
    fn test_stale_read_is_rejected_at_construction() {
        // T2 starts after T1 commits but still reads the initial value.
        let history = History::from_sessions(vec![vec![
            Transaction::new(1, 1, 2).with(Operation::write(1, 1, 7, 0, 1)),
            Transaction::new(2, 3, 4).with(Operation::read(3, 3, 7, 0, 0)),
        ]]);
        let outcome = check(&history, &Options::default()).unwrap();
        let rejection = outcome.rejection().unwrap();
        assert!(matches!(
            rejection.reason,
            Reason::Violation(Violation::Cycle {
                stage: Stage::Construction,
                ..
            })
        ));
    }
}
