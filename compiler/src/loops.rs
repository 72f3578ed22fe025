// loops.rs — Loop nest ordering and sparse subset-loop synthesis.
//
// Orders index variables into one loop per variable by depth-first traversal
// of the index variable graph, starting from the expression's result
// variables. A variable discovered through another is "linked": it is nested
// strictly inside every variable that was required to reach it, so sparse
// dependency chains (row i must be known before the k values that exist in
// row i) are respected.
//
// For a linked loop over a sparse domain, `create_subset_loops` determines
// which tensor index structures must be advanced jointly and packages them
// as `SubsetLoop`s — the sorted-merge traversals the emitter turns into
// conditional loops.
//
// Preconditions: `expr` is resolved; the graph was built from `expr`.
// Postconditions: the loop list contains each index variable at most once
//                 and forms a forest (parent links are arena indices).
// Failure modes: a subset loop with no participating sparse structure is a
//                programming error upstream and fails a hard assertion.
// Side effects: none.

use std::collections::HashSet;

use serde::Serialize;

use crate::graph::IndexVarGraph;
use crate::id::{IndexVarId, LoopId};
use crate::ir::{IndexExpr, IrContext, Operator};
use crate::lir::{CompoundOp, Expr, IndexField, Stmt, Var};

// ── Index variable loops ────────────────────────────────────────────────────

/// One node of the ordered loop nest: an index variable, the loop that
/// linked it into the nest (if any), and the fresh induction variable that
/// drives the generated loop. `link` is an arena index into the loop list,
/// never an owning reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexVariableLoop {
    pub index_var: IndexVarId,
    pub induction_var: Var,
    pub link: Option<LoopId>,
}

impl IndexVariableLoop {
    /// True if this variable was reached through another index variable's
    /// access pattern rather than being a root (free) variable.
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }
}

/// One stack frame of the explicit depth-first traversal: the loop being
/// expanded and the next neighbor to consider.
struct Frame {
    loop_idx: usize,
    next: usize,
}

/// Order the index variables into one loop per variable by traversing the
/// index variable graph from each root in the order given. Each unvisited
/// neighbor becomes a linked loop whose parent is the loop through which it
/// was discovered; the visited set guarantees each variable appears at most
/// once even when the graph contains cycles.
pub fn order_loops(
    graph: &IndexVarGraph,
    roots: &[IndexVarId],
    ctx: &IrContext,
) -> Vec<IndexVariableLoop> {
    let mut loops: Vec<IndexVariableLoop> = Vec::new();
    let mut visited: HashSet<IndexVarId> = HashSet::new();

    for &root in roots {
        if !visited.insert(root) {
            continue;
        }
        loops.push(IndexVariableLoop {
            index_var: root,
            induction_var: Var::new(ctx.index_var_name(root)),
            link: None,
        });

        // Explicit work stack preserving recursive preorder: a neighbor is
        // visited the moment it is first seen, so the linking parent is
        // always the loop that discovered it.
        let mut stack = vec![Frame {
            loop_idx: loops.len() - 1,
            next: 0,
        }];
        while let Some(frame) = stack.last_mut() {
            let var = loops[frame.loop_idx].index_var;
            let neighbors = graph.neighbors(var);
            if frame.next == neighbors.len() {
                stack.pop();
                continue;
            }
            let sink = neighbors[frame.next];
            frame.next += 1;
            if visited.insert(sink) {
                let parent = LoopId(frame.loop_idx as u32);
                loops.push(IndexVariableLoop {
                    index_var: sink,
                    induction_var: Var::new(ctx.index_var_name(sink)),
                    link: Some(parent),
                });
                stack.push(Frame {
                    loop_idx: loops.len() - 1,
                    next: 0,
                });
            }
        }
    }
    loops
}

// ── Tensor index variables ──────────────────────────────────────────────────

/// Binds one sparse tensor's index structure to a loop level: a coordinate
/// pointer (position within the structure's coordinate array) and a sink
/// variable (the coordinate value currently pointed to). All reads go
/// through the structure's `pos`/`crd`/`vals` accessors; the concrete
/// storage stays opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorIndexVar {
    tensor: String,
    operand: usize,
    dim: usize,
    source: Expr,
    coordinate_var: Var,
    sink_var: Var,
}

impl TensorIndexVar {
    /// `source` is the enclosing induction value selecting the coordinate
    /// span: the preceding tuple variable's induction var, or 0 for a
    /// first-position compressed dimension (whose pos array spans the whole
    /// structure).
    pub fn new(tensor: &str, operand: usize, dim: usize, source: Expr, var_name: &str) -> Self {
        TensorIndexVar {
            tensor: tensor.to_string(),
            operand,
            dim,
            source,
            coordinate_var: Var::new(format!("p{tensor}_{var_name}")),
            sink_var: Var::new(format!("s{tensor}_{var_name}")),
        }
    }

    /// Rename the coordinate and sink variables (used when one tensor
    /// participates twice in the same merge).
    pub fn with_name_suffix(mut self, suffix: &str) -> Self {
        self.coordinate_var = Var::new(format!("{}{suffix}", self.coordinate_var.0));
        self.sink_var = Var::new(format!("{}{suffix}", self.sink_var.0));
        self
    }

    pub fn tensor(&self) -> &str {
        &self.tensor
    }

    pub fn operand(&self) -> usize {
        self.operand
    }

    pub fn coordinate_var(&self) -> &Var {
        &self.coordinate_var
    }

    pub fn sink_var(&self) -> &Var {
        &self.sink_var
    }

    /// Load from the pos array at `source + offset`. Offset 1 is the next
    /// row/column boundary — the end of this structure's coordinate span.
    pub fn load_coordinate(&self, offset: i64) -> Expr {
        let off = if offset == 0 {
            self.source.clone()
        } else {
            Expr::add(self.source.clone(), Expr::Int(offset))
        };
        Expr::Field {
            tensor: self.tensor.clone(),
            field: IndexField::Pos(self.dim),
            offset: Box::new(off),
        }
    }

    /// `pX_v = X.pos{dim}[source]` — position the coordinate pointer at the
    /// start of this span.
    pub fn init_coordinate_var(&self) -> Stmt {
        Stmt::assign(&self.coordinate_var, self.load_coordinate(0))
    }

    /// `sX_v = X.crd{dim}[pX_v]` — read the coordinate value under the
    /// pointer.
    pub fn init_sink_var(&self) -> Stmt {
        Stmt::assign(&self.sink_var, self.current_coordinate())
    }

    /// Assign the current coordinate directly to `target` (the degenerate
    /// single-participant case, where the loop induction value is the
    /// structure's own coordinate).
    pub fn init_sink_var_as(&self, target: &Var) -> Stmt {
        Stmt::assign(target, self.current_coordinate())
    }

    fn current_coordinate(&self) -> Expr {
        Expr::Field {
            tensor: self.tensor.clone(),
            field: IndexField::Crd(self.dim),
            offset: Box::new(Expr::var(&self.coordinate_var)),
        }
    }

    /// The tensor value under the coordinate pointer.
    pub fn value(&self) -> Expr {
        Expr::Field {
            tensor: self.tensor.clone(),
            field: IndexField::Vals,
            offset: Box::new(Expr::var(&self.coordinate_var)),
        }
    }
}

// ── Subset loops ────────────────────────────────────────────────────────────

/// One merge-loop instance at a linked loop level: the compound operator
/// accumulated into the workspace, the slice of the expression it computes
/// (operand indices into `expr.operands`), and the tensor index structures
/// advanced in lock-step. One participant degenerates to a pointer chase;
/// two or more form a genuine sorted merge.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsetLoop {
    compound_op: CompoundOp,
    operands: Vec<usize>,
    tensor_index_vars: Vec<TensorIndexVar>,
}

impl SubsetLoop {
    pub fn compound_op(&self) -> CompoundOp {
        self.compound_op
    }

    pub fn operands(&self) -> &[usize] {
        &self.operands
    }

    pub fn tensor_index_vars(&self) -> &[TensorIndexVar] {
        &self.tensor_index_vars
    }
}

/// Split the expression into the terms accumulated at one linked loop level.
/// Additive operands accumulate separately (`+=`/`-=` per operand);
/// multiplicative operands are iterated jointly in a single term whose
/// products are summed.
fn accumulation_terms(expr: &IndexExpr) -> Vec<(CompoundOp, Vec<usize>)> {
    match expr.op {
        Operator::Add => (0..expr.operands.len())
            .map(|i| (CompoundOp::Add, vec![i]))
            .collect(),
        Operator::Sub => (0..expr.operands.len())
            .map(|i| {
                let op = if i == 0 { CompoundOp::Add } else { CompoundOp::Sub };
                (op, vec![i])
            })
            .collect(),
        Operator::Neg => vec![(CompoundOp::Sub, (0..expr.operands.len()).collect())],
        Operator::Mul | Operator::Div => {
            vec![(CompoundOp::Add, (0..expr.operands.len()).collect())]
        }
    }
}

/// For the linked loop at `loop_idx`, determine every distinct sparse tensor
/// structure whose coordinate list must be advanced to enumerate the loop's
/// index variable, and synthesize one subset loop per accumulation term.
pub fn create_subset_loops(
    expr: &IndexExpr,
    ctx: &IrContext,
    loops: &[IndexVariableLoop],
    loop_idx: usize,
) -> Vec<SubsetLoop> {
    let var = loops[loop_idx].index_var;
    let var_name = ctx.index_var_name(var);

    let induction_of = |v: IndexVarId| -> Var {
        loops
            .iter()
            .find(|l| l.index_var == v)
            .map(|l| l.induction_var.clone())
            .expect("tuple-mate of a nested index variable must itself be in the loop nest")
    };

    let mut subset_loops = Vec::new();
    for (compound_op, term_operands) in accumulation_terms(expr) {
        let mut tivs: Vec<TensorIndexVar> = Vec::new();
        for &op_idx in &term_operands {
            let operand = &expr.operands[op_idx];
            let Some(dim) = operand.index_vars.iter().position(|&v| v == var) else {
                continue;
            };
            if !ctx.tensor(operand.tensor).ty().is_sparse_dim(dim) {
                continue;
            }
            let source = if dim == 0 {
                Expr::Int(0)
            } else {
                Expr::Var(induction_of(operand.index_vars[dim - 1]))
            };
            let tensor_name = ctx.tensor(operand.tensor).name();
            let mut tiv = TensorIndexVar::new(tensor_name, op_idx, dim, source, var_name);
            if tivs.iter().any(|t| t.tensor() == tensor_name) {
                tiv = tiv.with_name_suffix(&op_idx.to_string());
            }
            tivs.push(tiv);
        }
        // A subset loop needs at least one sparse structure to drive it;
        // resolve only marks a variable linked when one exists.
        assert!(
            !tivs.is_empty(),
            "subset loop for '{var_name}' has no participating tensor index structure"
        );
        subset_loops.push(SubsetLoop {
            compound_op,
            operands: term_operands,
            tensor_index_vars: tivs,
        });
    }
    subset_loops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TensorId;
    use crate::ir::{
        DimKind, IndexDomain, IndexSet, IndexVar, IndexVarKind, IndexedTensor, TensorNode,
        TensorType,
    };

    fn var(ctx: &mut IrContext, name: &str, kind: IndexVarKind, linked: bool) -> IndexVarId {
        let set = IndexSet::range(4);
        let domain = if linked {
            IndexDomain::Linked { set }
        } else {
            IndexDomain::Dense(set)
        };
        ctx.add_index_var(IndexVar {
            name: name.into(),
            kind,
            domain,
        })
    }

    fn tensor(ctx: &mut IrContext, name: &str, formats: &[DimKind]) -> TensorId {
        let set = IndexSet::range(4);
        ctx.add_tensor(TensorNode::Argument {
            name: name.into(),
            ty: TensorType {
                dims: vec![set; formats.len()],
                formats: formats.to_vec(),
            },
        })
    }

    fn sparse_matmul(ctx: &mut IrContext) -> (IndexExpr, [IndexVarId; 3]) {
        let i = var(ctx, "i", IndexVarKind::Free, false);
        let j = var(ctx, "j", IndexVarKind::Free, true);
        let k = var(ctx, "k", IndexVarKind::Reduction, true);
        let b = tensor(ctx, "B", &[DimKind::Dense, DimKind::Sparse]);
        let c = tensor(ctx, "C", &[DimKind::Sparse, DimKind::Sparse]);
        let expr = IndexExpr {
            op: Operator::Mul,
            operands: vec![
                IndexedTensor {
                    tensor: b,
                    index_vars: vec![i, k],
                },
                IndexedTensor {
                    tensor: c,
                    index_vars: vec![k, j],
                },
            ],
            result_vars: vec![i, j],
            reduction_vars: vec![k],
        };
        (expr, [i, j, k])
    }

    #[test]
    fn matmul_loop_order_follows_discovery() {
        let mut ctx = IrContext::new();
        let (expr, [i, j, k]) = sparse_matmul(&mut ctx);
        let graph = IndexVarGraph::build(&expr);
        let loops = order_loops(&graph, &expr.result_vars, &ctx);

        // i is a root; k is discovered through i; j is discovered through k
        // before its own turn as a root comes up.
        assert_eq!(loops.len(), 3);
        assert_eq!(loops[0].index_var, i);
        assert!(!loops[0].is_linked());
        assert_eq!(loops[1].index_var, k);
        assert_eq!(loops[1].link, Some(LoopId(0)));
        assert_eq!(loops[2].index_var, j);
        assert_eq!(loops[2].link, Some(LoopId(1)));
    }

    #[test]
    fn each_variable_appears_at_most_once() {
        let mut ctx = IrContext::new();
        let (expr, _) = sparse_matmul(&mut ctx);
        let graph = IndexVarGraph::build(&expr);
        let loops = order_loops(&graph, &expr.result_vars, &ctx);
        let mut seen = HashSet::new();
        for l in &loops {
            assert!(seen.insert(l.index_var), "duplicate loop for {:?}", l.index_var);
        }
    }

    #[test]
    fn disconnected_root_becomes_its_own_tree() {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let j = var(&mut ctx, "j", IndexVarKind::Free, false);
        let b = tensor(&mut ctx, "B", &[DimKind::Dense]);
        let c = tensor(&mut ctx, "C", &[DimKind::Dense]);
        // B(i) * C(j): outer product, no shared tuple, no edges.
        let expr = IndexExpr {
            op: Operator::Mul,
            operands: vec![
                IndexedTensor {
                    tensor: b,
                    index_vars: vec![i],
                },
                IndexedTensor {
                    tensor: c,
                    index_vars: vec![j],
                },
            ],
            result_vars: vec![i, j],
            reduction_vars: vec![],
        };
        let graph = IndexVarGraph::build(&expr);
        let loops = order_loops(&graph, &expr.result_vars, &ctx);
        assert_eq!(loops.len(), 2);
        assert!(!loops[0].is_linked());
        assert!(!loops[1].is_linked());
    }

    #[test]
    fn unreachable_reduction_variable_is_absent() {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let k = var(&mut ctx, "k", IndexVarKind::Reduction, false);
        let b = tensor(&mut ctx, "B", &[DimKind::Dense]);
        let c = tensor(&mut ctx, "C", &[DimKind::Dense]);
        // B(i) * C(k): k shares no access with i.
        let expr = IndexExpr {
            op: Operator::Mul,
            operands: vec![
                IndexedTensor {
                    tensor: b,
                    index_vars: vec![i],
                },
                IndexedTensor {
                    tensor: c,
                    index_vars: vec![k],
                },
            ],
            result_vars: vec![i],
            reduction_vars: vec![k],
        };
        let graph = IndexVarGraph::build(&expr);
        let loops = order_loops(&graph, &expr.result_vars, &ctx);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].index_var, i);
    }

    #[test]
    fn matmul_merge_has_two_participants_at_k() {
        let mut ctx = IrContext::new();
        let (expr, [_, _, k]) = sparse_matmul(&mut ctx);
        let graph = IndexVarGraph::build(&expr);
        let loops = order_loops(&graph, &expr.result_vars, &ctx);
        let k_idx = loops.iter().position(|l| l.index_var == k).unwrap();

        let subset_loops = create_subset_loops(&expr, &ctx, &loops, k_idx);
        assert_eq!(subset_loops.len(), 1);
        let sl = &subset_loops[0];
        assert_eq!(sl.compound_op(), CompoundOp::Add);
        assert_eq!(sl.tensor_index_vars().len(), 2);
        assert_eq!(sl.tensor_index_vars()[0].tensor(), "B");
        assert_eq!(sl.tensor_index_vars()[1].tensor(), "C");

        // B(i,k): k at dim 1, span selected by i. C(k,j): k at dim 0,
        // compressed root span.
        assert_eq!(
            format!("{}", sl.tensor_index_vars()[0].load_coordinate(1)),
            "B.pos1[i + 1]"
        );
        assert_eq!(
            format!("{}", sl.tensor_index_vars()[1].load_coordinate(1)),
            "C.pos0[1]"
        );
    }

    #[test]
    fn additive_terms_accumulate_separately() {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let j = var(&mut ctx, "j", IndexVarKind::Free, true);
        let b = tensor(&mut ctx, "B", &[DimKind::Dense, DimKind::Sparse]);
        let c = tensor(&mut ctx, "C", &[DimKind::Dense, DimKind::Sparse]);
        let expr = IndexExpr {
            op: Operator::Sub,
            operands: vec![
                IndexedTensor {
                    tensor: b,
                    index_vars: vec![i, j],
                },
                IndexedTensor {
                    tensor: c,
                    index_vars: vec![i, j],
                },
            ],
            result_vars: vec![i, j],
            reduction_vars: vec![],
        };
        let graph = IndexVarGraph::build(&expr);
        let loops = order_loops(&graph, &expr.result_vars, &ctx);
        let j_idx = loops.iter().position(|l| l.index_var == j).unwrap();

        let subset_loops = create_subset_loops(&expr, &ctx, &loops, j_idx);
        assert_eq!(subset_loops.len(), 2);
        assert_eq!(subset_loops[0].compound_op(), CompoundOp::Add);
        assert_eq!(subset_loops[1].compound_op(), CompoundOp::Sub);
        assert_eq!(subset_loops[0].tensor_index_vars().len(), 1);
        assert_eq!(subset_loops[1].tensor_index_vars().len(), 1);
    }

    #[test]
    fn coordinate_accessor_statements() {
        let tiv = TensorIndexVar::new("B", 0, 1, Expr::Var(Var::new("i")), "k");
        assert_eq!(
            format!("{}", tiv.init_coordinate_var()),
            "pB_k = B.pos1[i]\n"
        );
        assert_eq!(format!("{}", tiv.init_sink_var()), "sB_k = B.crd1[pB_k]\n");
        assert_eq!(
            format!("{}", tiv.init_sink_var_as(&Var::new("k"))),
            "k = B.crd1[pB_k]\n"
        );
        assert_eq!(format!("{}", tiv.value()), "B.vals[pB_k]");
    }
}
