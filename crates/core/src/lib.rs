//! Strict serializability checking for recorded transactional histories.
//!
//! `vbox_core` decides whether a history of committed transactions, each a
//! timed sequence of reads, writes and predicate reads, can be explained by a
//! serial execution that respects real time. The check runs in four stages:
//!
//! 1. **Loading** -- every read is resolved to the write it observed, giving
//!    a [`DependencyGraph`](graph::DependencyGraph) of write-read edges.
//!    Reads that no committed write explains are [`Anomaly`] rejections.
//! 2. **Building** -- per-key write histories and predicate reads yield the
//!    edges every serial order must contain, and [constraints](constraint)
//!    for the pairs whose order is still open.
//! 3. **Pruning** -- the [`TransitiveClosure`](graph::TransitiveClosure) of
//!    the known edges decides many constraints outright; forced choices are
//!    inserted until nothing else follows.
//! 4. **Solving** -- the remaining constraints become boolean variables for a
//!    conflict-driven search that uses the closure as its theory.
//!
//! # Entry point
//!
//! ```rust,ignore
//! use vbox_core::{check, History, Options, Outcome};
//!
//! let history = History::from_sessions(sessions);
//! match check(&history, &Options::default())? {
//!     Outcome::Accept(report) => println!("serial order: {:?}", report.witness),
//!     Outcome::Reject(rejection) => println!("rejected: {rejection}"),
//! }
//! ```
//!
//! Every [`Options`] combination gives the same verdict; storage layout and
//! closure algorithms only change memory use and running time.
//!
//! # Crate features
//!
//! - **`serde`** -- enables `Serialize`/`Deserialize` derives on the input
//!   model, [`Options`] and [`Outcome`].
//!
//! This crate is `no_std` compatible (requires `alloc`).

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod consistency;
pub mod constraint;
pub mod graph;
pub mod history;
pub mod options;

pub use consistency::error::{Defect, Violation};
pub use consistency::outcome::{Outcome, Rejection, Report, Statistics};
pub use consistency::{check, Witness};
pub use history::error::Anomaly;
pub use history::History;
pub use options::Options;
