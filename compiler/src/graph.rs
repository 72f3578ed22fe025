// graph.rs — Index tuple analysis and the index variable graph.
//
// Scans an index expression's operands, groups tensor accesses by the tuple
// of index variables used to access them, and derives from the tuples an
// undirected graph over index variables: an edge (u, v) exists if u and v
// are ever used together to index one tensor access. Knowing one of the two
// then constrains which values of the other are structurally relevant, so
// the graph is the reachability structure that decides loop nesting order.
//
// Preconditions: `expr` is a resolved, type-checked index expression.
// Postconditions: the graph is symmetric and has no self-loops; tuples of
//                 length < 2 contribute no edges.
// Failure modes: none — an expression with zero operands yields an empty
//                map and an empty graph.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::id::IndexVarId;
use crate::ir::{IndexExpr, IrContext};

// ── Tuple uses ──────────────────────────────────────────────────────────────

/// An ordered tuple of index variables, e.g. `(i, k)` for `B(i,k)`.
pub type IndexTuple = Vec<IndexVarId>;

/// Map from index-variable tuple to the operands accessed with exactly that
/// tuple. Entries appear in expression traversal order; values are operand
/// indices into `expr.operands`. Rebuilt per lowering call, never persisted.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct IndexTupleUses {
    pub entries: Vec<(IndexTuple, Vec<usize>)>,
}

/// Group the expression's accesses by index tuple:
/// - `B+C`:  (i,j) -> B(i,j), C(i,j)
/// - `B+C'`: (i,j) -> B(i,j) ; (j,i) -> C(j,i)
/// - `B*C`:  (i,k) -> B(i,k) ; (k,j) -> C(k,j)
pub fn collect_tuple_uses(expr: &IndexExpr) -> IndexTupleUses {
    let mut uses = IndexTupleUses::default();
    for (op_idx, operand) in expr.operands.iter().enumerate() {
        match uses
            .entries
            .iter_mut()
            .find(|(tuple, _)| *tuple == operand.index_vars)
        {
            Some((_, ops)) => ops.push(op_idx),
            None => uses.entries.push((operand.index_vars.clone(), vec![op_idx])),
        }
    }
    uses
}

// ── Index variable graph ────────────────────────────────────────────────────

/// Undirected adjacency map over index variables. Symmetric by construction:
/// every tuple-derived edge is inserted in both directions. Duplicate edges
/// are allowed and harmless — traversal is visited-set-gated.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct IndexVarGraph {
    adjacency: BTreeMap<IndexVarId, Vec<IndexVarId>>,
}

impl IndexVarGraph {
    /// Build the graph from an index expression. For every tuple
    /// `(v0, …, vk)` with k >= 1, insert `vi <-> vj` for every unordered
    /// pair `i < j`. A variable repeated within one tuple contributes no
    /// self-loop.
    pub fn build(expr: &IndexExpr) -> Self {
        let uses = collect_tuple_uses(expr);
        let mut graph = IndexVarGraph::default();
        for (tuple, _) in &uses.entries {
            if tuple.len() < 2 {
                continue;
            }
            for i in 0..tuple.len() - 1 {
                for j in i + 1..tuple.len() {
                    if tuple[i] == tuple[j] {
                        continue;
                    }
                    graph.insert_edge(tuple[i], tuple[j]);
                    graph.insert_edge(tuple[j], tuple[i]);
                }
            }
        }
        graph
    }

    fn insert_edge(&mut self, from: IndexVarId, to: IndexVarId) {
        self.adjacency.entry(from).or_default().push(to);
    }

    /// Neighbors of `v` in insertion order; empty if `v` has no edges.
    pub fn neighbors(&self, v: IndexVarId) -> &[IndexVarId] {
        self.adjacency.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, v: IndexVarId) -> bool {
        self.adjacency.contains_key(&v)
    }

    /// All directed edges, including duplicates.
    pub fn edges(&self) -> Vec<(IndexVarId, IndexVarId)> {
        let mut out = Vec::new();
        for (&from, sinks) in &self.adjacency {
            for &to in sinks {
                out.push((from, to));
            }
        }
        out
    }

    pub fn has_edge(&self, from: IndexVarId, to: IndexVarId) -> bool {
        self.neighbors(from).contains(&to)
    }

    /// Render the graph in the dump format used by `--emit graph`.
    pub fn dump(&self, ctx: &IrContext) -> String {
        let mut out = String::from("Index Variable Graph:\n");
        for (from, to) in self.edges() {
            out.push_str(&format!(
                "{} -> {}\n",
                ctx.index_var_name(from),
                ctx.index_var_name(to)
            ));
        }
        out
    }
}

impl fmt::Display for IndexVarGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index Variable Graph:")?;
        for (from, to) in self.edges() {
            writeln!(f, "{from} -> {to}")?;
        }
        Ok(())
    }
}
