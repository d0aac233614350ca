use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use crate::graph::vertex::{Edge, IssuedPredicate, Timeline, Vertex, Write};
use crate::history::error::Anomaly;
use crate::history::types::{Key, OperationId, OperationKind, TransactionId};
use crate::history::History;

/// Vertices of a history with their overlap windows and the write-read edges
/// observed directly in the log.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub vertices: Vec<Vertex>,
    pub timeline: Timeline,
    /// Write-read edges, writer first.
    pub edges: Vec<Edge>,
}

/// Where a read claims its value came from.
struct Source {
    key: Key,
    from_tid: TransactionId,
    from_oid: OperationId,
}

impl DependencyGraph {
    /// Resolves every read of `history` to its writer.
    ///
    /// # Errors
    ///
    /// Returns an [`Anomaly`] when a read cannot be attributed to the last
    /// write of a committed transaction, or when a transaction does not see
    /// its own writes.
    pub fn load(history: &History) -> Result<Self, Anomaly> {
        let transactions = history.transactions();
        let intervals: Vec<_> = transactions.iter().map(|t| (t.start, t.end)).collect();
        let timeline = Timeline::from_intervals(&intervals);

        let mut index: HashMap<TransactionId, u32> = HashMap::new();
        let mut vertices = Vec::with_capacity(transactions.len());
        for (i, txn) in (0..).zip(transactions) {
            if index.insert(txn.tid, i).is_some() {
                return Err(Anomaly::DuplicateTransaction { tid: txn.tid });
            }
            let mut vertex = Vertex::new(i, txn.tid, txn.start, txn.end);
            for op in &txn.operations {
                if let OperationKind::Write { key, field, value } = op.kind {
                    vertex.add_write(key, &Write::single(op.id, field, value));
                }
            }
            vertices.push(vertex);
        }

        let mut edges = Vec::new();
        for (i, txn) in (0..).zip(transactions) {
            let mut own: HashMap<Key, Write> = HashMap::new();
            for op in &txn.operations {
                match &op.kind {
                    OperationKind::Write { key, field, value } => {
                        own.entry(*key)
                            .and_modify(|w| w.combine(&Write::single(op.id, *field, *value)))
                            .or_insert_with(|| Write::single(op.id, *field, *value));
                    }
                    OperationKind::Read {
                        key,
                        from_tid,
                        from_oid,
                    } => {
                        let source = Source {
                            key: *key,
                            from_tid: *from_tid,
                            from_oid: *from_oid,
                        };
                        if let Some(write) = own.get(key) {
                            if source.from_tid != txn.tid
                                || write.history.last() != Some(&source.from_oid)
                            {
                                return Err(Anomaly::ReadSelfUpdateFailed {
                                    reader: txn.tid,
                                    key: *key,
                                });
                            }
                            continue;
                        }
                        let writer = Self::resolve(history, &index, &vertices, txn.tid, &source)?;
                        vertices[writer as usize].add_reader(*key, i);
                        edges.push(Edge::new(writer, i));
                    }
                    OperationKind::Predicate(read) => {
                        let mut shadowed = HashSet::new();
                        for (key, write) in &own {
                            if !write.relevant(read) {
                                continue;
                            }
                            let returned = read.returned(*key);
                            let consistent = match returned {
                                Some(m) => m.from_tid == txn.tid && write.matches(read),
                                None => !write.matches(read),
                            };
                            if !consistent {
                                return Err(Anomaly::ReadSelfUpdateFailed {
                                    reader: txn.tid,
                                    key: *key,
                                });
                            }
                            shadowed.insert(*key);
                        }
                        for m in &read.matches {
                            if shadowed.contains(&m.key) || own.contains_key(&m.key) {
                                continue;
                            }
                            let source = Source {
                                key: m.key,
                                from_tid: m.from_tid,
                                from_oid: m.from_oid,
                            };
                            let writer =
                                Self::resolve(history, &index, &vertices, txn.tid, &source)?;
                            // the returned version must satisfy the predicate
                            let admitted = vertices[writer as usize]
                                .writes
                                .get(&m.key)
                                .is_some_and(|write| write.matches(read));
                            if !admitted {
                                return Err(Anomaly::InconsistentReads {
                                    reader: txn.tid,
                                    key: m.key,
                                    from_tid: m.from_tid,
                                    from_oid: m.from_oid,
                                });
                            }
                            vertices[writer as usize].add_reader(m.key, i);
                            edges.push(Edge::new(writer, i));
                        }
                        vertices[i as usize].predicates.push(IssuedPredicate {
                            read: read.clone(),
                            shadowed,
                        });
                    }
                    OperationKind::Begin | OperationKind::Commit | OperationKind::Abort => {}
                }
            }
        }

        tracing::debug!(
            vertices = vertices.len(),
            write_read = edges.len(),
            "dependency graph loaded"
        );
        Ok(Self {
            vertices,
            timeline,
            edges,
        })
    }

    /// Index of the vertex whose final write to the key is the claimed source.
    fn resolve(
        history: &History,
        index: &HashMap<TransactionId, u32>,
        vertices: &[Vertex],
        reader: TransactionId,
        source: &Source,
    ) -> Result<u32, Anomaly> {
        if source.from_tid == 0 {
            return Ok(0);
        }
        if source.from_tid == reader {
            return Err(Anomaly::ReadSelfUpdateFailed {
                reader,
                key: source.key,
            });
        }
        if history.is_aborted(source.from_tid) {
            return Err(Anomaly::AbortedReads {
                reader,
                key: source.key,
                from_tid: source.from_tid,
            });
        }
        let inconsistent = || Anomaly::InconsistentReads {
            reader,
            key: source.key,
            from_tid: source.from_tid,
            from_oid: source.from_oid,
        };
        let writer = *index.get(&source.from_tid).ok_or_else(inconsistent)?;
        let write = vertices[writer as usize]
            .writes
            .get(&source.key)
            .ok_or_else(inconsistent)?;
        if write.history.last() == Some(&source.from_oid) {
            Ok(writer)
        } else if write.history.contains(&source.from_oid) {
            Err(Anomaly::IntermediateReads {
                reader,
                key: source.key,
                from_tid: source.from_tid,
                from_oid: source.from_oid,
            })
        } else {
            Err(inconsistent())
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[must_use]
    pub fn tid(&self, index: u32) -> TransactionId {
        self.vertices[index as usize].tid
    }
}
