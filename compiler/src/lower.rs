// lower.rs — Scatter-workspace lowering of index expressions.
//
// Turns one index expression into a statement tree: dense counted loops for
// free variables over plain ranges, and synthesized sparse merge loops for
// linked variables. Each linked level accumulates into a dense workspace
// and ends with a scatter marker transferring the workspace into the
// result's sparse slice.
//
// Emission walks the ordered loop list innermost-first. A dense level wraps
// the nest built so far; a linked level *replaces* it with the block of
// subset loops for that level (the merge loops enumerate the level's
// coordinates themselves, so the generic inner nest does not apply).
//
// Preconditions: `expr` is resolved against `ctx`; every linked loop level
//                has at least one sparse participating structure.
// Postconditions: lowering is deterministic and total; the same expression
//                 always yields a structurally identical tree.
// Failure modes: precondition violations are programming errors and fail
//                hard assertions; there are no recoverable errors here.
// Side effects: trace output on stderr when `LowerOptions::trace` is set.

use crate::graph::IndexVarGraph;
use crate::id::{IndexVarId, TensorId};
use crate::ir::{IndexExpr, IrContext, Operator};
use crate::lir::{BinOp, CompoundOp, Expr, Stmt, Var};
use crate::loops::{create_subset_loops, order_loops, SubsetLoop, TensorIndexVar};

// ── Options ────────────────────────────────────────────────────────────────

/// How a multi-participant merge loop advances and continues.
///
/// `Legacy` reproduces the historical behavior exactly: the loop continues
/// only while *every* participant has coordinates left, and every
/// coordinate pointer advances once per iteration whether or not its sink
/// matched the consumed minimum. For a union merge this can skip values of
/// higher-valued participants. `Union` is the corrected merge: continue
/// while *any* participant has coordinates left, and advance a pointer only
/// when its sink equals the consumed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    #[default]
    Legacy,
    Union,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LowerOptions {
    pub merge: MergeStrategy,
    pub trace: bool,
}

// ── Entry point ────────────────────────────────────────────────────────────

/// Lower `expr`, whose result is stored into `target`, to a statement tree.
pub fn lower_scatter_workspace(
    ctx: &IrContext,
    target: TensorId,
    expr: &IndexExpr,
    opts: &LowerOptions,
) -> Stmt {
    let graph = IndexVarGraph::build(expr);
    if opts.trace {
        eprint!("{}", graph.dump(ctx));
    }
    let loops = order_loops(&graph, &expr.result_vars, ctx);
    let target_name = ctx.tensor(target).name();

    // Innermost-first; the seed is the plain dense compute statement, which
    // survives only when no linked level replaces it.
    let mut loop_nest = dense_compute_stmt(ctx, target_name, expr);
    for idx in (0..loops.len()).rev() {
        let loop_ = &loops[idx];
        let ivar = ctx.index_var(loop_.index_var);

        if !(loop_.is_linked() && ivar.domain.is_linked()) {
            let size = ivar.domain.index_set().size;
            loop_nest = Stmt::For {
                var: loop_.induction_var.clone(),
                extent: Expr::Int(size as i64),
                body: Box::new(loop_nest),
            };
        } else {
            let subset_loops = create_subset_loops(expr, ctx, &loops, idx);
            if opts.trace {
                eprintln!("subset loops at {}:", ctx.index_var_name(loop_.index_var));
                for sl in &subset_loops {
                    eprintln!("  {}", workspace_write_string(ctx, expr, sl, loop_.index_var));
                }
            }

            let mut stmts = Vec::with_capacity(subset_loops.len() + 1);
            for sl in &subset_loops {
                let stmt = emit_subset_loop(ctx, expr, &loop_.induction_var, sl, opts.merge);
                stmts.push(Stmt::comment(
                    workspace_write_string(ctx, expr, sl, loop_.index_var),
                    stmt,
                ));
            }
            let scatter = format!(
                "{}{} = workspace",
                target_name,
                slice_string(ctx, &expr.result_vars, loop_.index_var)
            );
            stmts.push(Stmt::comment(scatter, Stmt::Pass));
            loop_nest = Stmt::Block(stmts);
        }
    }

    let top = format!(
        "{}({}) = {}",
        target_name,
        expr.result_vars
            .iter()
            .map(|&v| ctx.index_var_name(v))
            .collect::<Vec<_>>()
            .join(","),
        ctx.expr_string(expr)
    );
    Stmt::comment(top, loop_nest)
}

// ── Dense compute ──────────────────────────────────────────────────────────

fn operator_bin_op(op: Operator) -> BinOp {
    match op {
        Operator::Add => BinOp::Add,
        Operator::Sub => BinOp::Sub,
        Operator::Mul => BinOp::Mul,
        Operator::Div => BinOp::Div,
        Operator::Neg => unreachable!("negation is unary"),
    }
}

/// The innermost statement of an all-dense nest: load every operand at its
/// index variables' induction values, combine with the expression operator,
/// and store (accumulating when reduction variables are present).
fn dense_compute_stmt(ctx: &IrContext, target_name: &str, expr: &IndexExpr) -> Stmt {
    let ind = |v: IndexVarId| Expr::Var(Var::new(ctx.index_var_name(v)));
    let load = |acc: &crate::ir::IndexedTensor| Expr::Load {
        tensor: ctx.tensor(acc.tensor).name().to_string(),
        indices: acc.index_vars.iter().map(|&v| ind(v)).collect(),
    };

    let mut operands = expr.operands.iter().map(load);
    let first = operands.next().unwrap_or(Expr::Int(0));
    let value = if expr.op == Operator::Neg {
        Expr::Neg(Box::new(first))
    } else {
        operands.fold(first, |acc, rhs| {
            Expr::binary(operator_bin_op(expr.op), acc, rhs)
        })
    };

    let op = if expr.reduction_vars.is_empty() {
        CompoundOp::Assign
    } else {
        CompoundOp::Add
    };
    Stmt::Store {
        tensor: target_name.to_string(),
        indices: expr.result_vars.iter().map(|&v| ind(v)).collect(),
        op,
        value,
    }
}

// ── Subset loop emission ───────────────────────────────────────────────────

fn compare_to_next_index_location(tiv: &TensorIndexVar) -> Expr {
    Expr::lt(Expr::var(tiv.coordinate_var()), tiv.load_coordinate(1))
}

/// The continuation predicate of a merge loop over `tivs`. Legacy folds
/// with `&&` (stop as soon as any participant is exhausted); union folds
/// with `||` (continue while any participant has coordinates left).
fn subset_loop_condition(tivs: &[TensorIndexVar], merge: MergeStrategy) -> Expr {
    let mut it = tivs.iter();
    let first = it.next().map(compare_to_next_index_location);
    let mut cond = first.unwrap_or(Expr::Int(0));
    for tiv in it {
        let next = compare_to_next_index_location(tiv);
        cond = match merge {
            MergeStrategy::Legacy => Expr::and(cond, next),
            MergeStrategy::Union => Expr::or(cond, next),
        };
    }
    cond
}

/// The value accumulated into the workspace for this term: sparse
/// participants read through their coordinate pointers, dense operands
/// through plain element loads at the induction values.
fn term_value(ctx: &IrContext, expr: &IndexExpr, sl: &SubsetLoop) -> Expr {
    let mut parts = Vec::with_capacity(sl.operands().len());
    for &op_idx in sl.operands() {
        if let Some(tiv) = sl.tensor_index_vars().iter().find(|t| t.operand() == op_idx) {
            parts.push(tiv.value());
        } else {
            let acc = &expr.operands[op_idx];
            parts.push(Expr::Load {
                tensor: ctx.tensor(acc.tensor).name().to_string(),
                indices: acc
                    .index_vars
                    .iter()
                    .map(|&v| Expr::Var(Var::new(ctx.index_var_name(v))))
                    .collect(),
            });
        }
    }
    let mut it = parts.into_iter();
    let first = it.next().unwrap_or(Expr::Int(0));
    it.fold(first, Expr::mul)
}

fn emit_subset_loop(
    ctx: &IrContext,
    expr: &IndexExpr,
    induction_var: &Var,
    sl: &SubsetLoop,
    merge: MergeStrategy,
) -> Stmt {
    let tivs = sl.tensor_index_vars();
    let cond = subset_loop_condition(tivs, merge);

    let mut body: Vec<Stmt> = Vec::new();
    if tivs.len() == 1 {
        // Degenerate merge: the structure's coordinate is the induction
        // value directly.
        body.push(tivs[0].init_sink_var_as(induction_var));
    } else {
        for tiv in tivs {
            body.push(tiv.init_sink_var());
        }
        body.push(Stmt::assign(
            induction_var,
            Expr::Min(tivs.iter().map(|t| Expr::var(t.sink_var())).collect()),
        ));
    }

    body.push(Stmt::Store {
        tensor: "workspace".to_string(),
        indices: vec![Expr::var(induction_var)],
        op: sl.compound_op(),
        value: term_value(ctx, expr, sl),
    });

    // Advance coordinate pointers at the end of each iteration.
    for tiv in tivs {
        let p = tiv.coordinate_var();
        let step = match merge {
            MergeStrategy::Legacy => Expr::Int(1),
            MergeStrategy::Union if tivs.len() == 1 => Expr::Int(1),
            MergeStrategy::Union => {
                Expr::eq(Expr::var(tiv.sink_var()), Expr::var(induction_var))
            }
        };
        body.push(Stmt::assign(p, Expr::add(Expr::var(p), step)));
    }

    let merge_loop = Stmt::While {
        cond,
        body: Box::new(Stmt::Block(body)),
    };

    // Coordinate pointer initialization precedes the loop.
    let mut stmts: Vec<Stmt> = tivs.iter().map(|t| t.init_coordinate_var()).collect();
    stmts.push(merge_loop);
    Stmt::Block(stmts)
}

// ── Slice strings ──────────────────────────────────────────────────────────

/// Render an index variable list with `slice_var` replaced by `:`:
/// `(i,:)`. A list not containing `slice_var` renders all names.
fn slice_string(ctx: &IrContext, vars: &[IndexVarId], slice_var: IndexVarId) -> String {
    let parts: Vec<&str> = vars
        .iter()
        .map(|&v| {
            if v == slice_var {
                ":"
            } else {
                ctx.index_var_name(v)
            }
        })
        .collect();
    format!("({})", parts.join(","))
}

/// `workspace += B(i,:) * C(:,j)` — the descriptive comment identifying the
/// workspace slice a subset loop writes.
fn workspace_write_string(
    ctx: &IrContext,
    expr: &IndexExpr,
    sl: &SubsetLoop,
    slice_var: IndexVarId,
) -> String {
    let slices: Vec<String> = sl
        .operands()
        .iter()
        .map(|&op_idx| {
            let acc = &expr.operands[op_idx];
            format!(
                "{}{}",
                ctx.tensor(acc.tensor).name(),
                slice_string(ctx, &acc.index_vars, slice_var)
            )
        })
        .collect();
    format!(
        "workspace {} {}",
        sl.compound_op(),
        slices.join(&format!(" {} ", expr.op))
    )
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

    fn arg(ctx: &mut IrContext, name: &str, formats: &[DimKind]) -> TensorId {
        let set = IndexSet::range(4);
        ctx.add_tensor(TensorNode::Argument {
            name: name.into(),
            ty: TensorType {
                dims: vec![set; formats.len()],
                formats: formats.to_vec(),
            },
        })
    }

    fn result(ctx: &mut IrContext, name: &str, order: usize) -> TensorId {
        let set = IndexSet::range(4);
        ctx.add_tensor(TensorNode::Result {
            name: name.into(),
            ty: TensorType::dense(vec![set; order]),
            value: None,
        })
    }

    #[test]
    fn dense_vector_add() {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let b = arg(&mut ctx, "B", &[DimKind::Dense]);
        let c = arg(&mut ctx, "C", &[DimKind::Dense]);
        let a = result(&mut ctx, "A", 1);
        let expr = IndexExpr {
            op: Operator::Add,
            operands: vec![
                IndexedTensor {
                    tensor: b,
                    index_vars: vec![i],
                },
                IndexedTensor {
                    tensor: c,
                    index_vars: vec![i],
                },
            ],
            result_vars: vec![i],
            reduction_vars: vec![],
        };
        let stmt = lower_scatter_workspace(&ctx, a, &expr, &LowerOptions::default());
        assert_eq!(
            format!("{stmt}"),
            "// A(i) = B(i) + C(i)\n\
             for i in 0..4 {\n  A[i] = B[i] + C[i]\n}\n"
        );
    }

    #[test]
    fn dense_transpose_add_nests_loops() {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let j = var(&mut ctx, "j", IndexVarKind::Free, false);
        let b = arg(&mut ctx, "B", &[DimKind::Dense, DimKind::Dense]);
        let c = arg(&mut ctx, "C", &[DimKind::Dense, DimKind::Dense]);
        let a = result(&mut ctx, "A", 2);
        let expr = IndexExpr {
            op: Operator::Add,
            operands: vec![
                IndexedTensor {
                    tensor: b,
                    index_vars: vec![i, j],
                },
                IndexedTensor {
                    tensor: c,
                    index_vars: vec![j, i],
                },
            ],
            result_vars: vec![i, j],
            reduction_vars: vec![],
        };
        let stmt = lower_scatter_workspace(&ctx, a, &expr, &LowerOptions::default());
        assert_eq!(
            format!("{stmt}"),
            "// A(i,j) = B(i,j) + C(j,i)\n\
             for i in 0..4 {\n  for j in 0..4 {\n    A[i,j] = B[i,j] + C[j,i]\n  }\n}\n"
        );
    }

    fn sparse_matmul() -> (IrContext, TensorId, IndexExpr) {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let j = var(&mut ctx, "j", IndexVarKind::Free, true);
        let k = var(&mut ctx, "k", IndexVarKind::Reduction, true);
        let b = arg(&mut ctx, "B", &[DimKind::Dense, DimKind::Sparse]);
        let c = arg(&mut ctx, "C", &[DimKind::Sparse, DimKind::Sparse]);
        let a = result(&mut ctx, "A", 2);
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
        (ctx, a, expr)
    }

    #[test]
    fn sparse_matmul_legacy_merge() {
        let (ctx, a, expr) = sparse_matmul();
        let stmt = lower_scatter_workspace(&ctx, a, &expr, &LowerOptions::default());
        assert_eq!(
            format!("{stmt}"),
            "// A(i,j) = B(i,k) * C(k,j)\n\
             for i in 0..4 {\n\
             \x20 // workspace += B(i,:) * C(:,j)\n\
             \x20 pB_k = B.pos1[i]\n\
             \x20 pC_k = C.pos0[0]\n\
             \x20 while (pB_k < B.pos1[i + 1]) && (pC_k < C.pos0[1]) {\n\
             \x20   sB_k = B.crd1[pB_k]\n\
             \x20   sC_k = C.crd0[pC_k]\n\
             \x20   k = min(sB_k, sC_k)\n\
             \x20   workspace[k] += B.vals[pB_k] * C.vals[pC_k]\n\
             \x20   pB_k = pB_k + 1\n\
             \x20   pC_k = pC_k + 1\n\
             \x20 }\n\
             \x20 // A(i,j) = workspace\n\
             \x20 pass\n\
             }\n"
        );
    }

    #[test]
    fn sparse_matmul_union_merge() {
        let (ctx, a, expr) = sparse_matmul();
        let opts = LowerOptions {
            merge: MergeStrategy::Union,
            trace: false,
        };
        let stmt = lower_scatter_workspace(&ctx, a, &expr, &opts);
        let out = format!("{stmt}");
        assert!(out.contains("while (pB_k < B.pos1[i + 1]) || (pC_k < C.pos0[1]) {"));
        assert!(out.contains("pB_k = pB_k + (sB_k == k)"));
        assert!(out.contains("pC_k = pC_k + (sC_k == k)"));
    }

    #[test]
    fn single_sparse_participant_has_no_merge_predicate() {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let j = var(&mut ctx, "j", IndexVarKind::Free, true);
        let b = arg(&mut ctx, "B", &[DimKind::Dense, DimKind::Sparse]);
        let c = arg(&mut ctx, "C", &[DimKind::Dense, DimKind::Dense]);
        let a = result(&mut ctx, "A", 2);
        let expr = IndexExpr {
            op: Operator::Mul,
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
        let stmt = lower_scatter_workspace(&ctx, a, &expr, &LowerOptions::default());
        let out = format!("{stmt}");
        assert!(!out.contains("min("));
        assert!(out.contains("j = B.crd1[pB_j]"));
        assert!(out.contains("workspace[j] += B.vals[pB_j] * C[i,j]"));
        // Union advance for a lone participant stays unconditional.
        let opts = LowerOptions {
            merge: MergeStrategy::Union,
            trace: false,
        };
        let out = format!("{}", lower_scatter_workspace(&ctx, a, &expr, &opts));
        assert!(out.contains("pB_j = pB_j + 1"));
    }

    #[test]
    fn dense_reduction_accumulates() {
        let mut ctx = IrContext::new();
        let i = var(&mut ctx, "i", IndexVarKind::Free, false);
        let k = var(&mut ctx, "k", IndexVarKind::Reduction, false);
        let b = arg(&mut ctx, "B", &[DimKind::Dense, DimKind::Dense]);
        let c = arg(&mut ctx, "C", &[DimKind::Dense]);
        let a = result(&mut ctx, "A", 1);
        let expr = IndexExpr {
            op: Operator::Mul,
            operands: vec![
                IndexedTensor {
                    tensor: b,
                    index_vars: vec![i, k],
                },
                IndexedTensor {
                    tensor: c,
                    index_vars: vec![k],
                },
            ],
            result_vars: vec![i],
            reduction_vars: vec![k],
        };
        let stmt = lower_scatter_workspace(&ctx, a, &expr, &LowerOptions::default());
        assert_eq!(
            format!("{stmt}"),
            "// A(i) = B(i,k) * C(k)\n\
             for i in 0..4 {\n  for k in 0..4 {\n    A[i] += B[i,k] * C[k]\n  }\n}\n"
        );
    }

    #[test]
    fn determinism() {
        let (ctx, a, expr) = sparse_matmul();
        let first = lower_scatter_workspace(&ctx, a, &expr, &LowerOptions::default());
        let second = lower_scatter_workspace(&ctx, a, &expr, &LowerOptions::default());
        assert_eq!(first, second);
    }
}
