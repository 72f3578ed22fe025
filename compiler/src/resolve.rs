// resolve.rs — Name resolution and semantic checking.
//
// Bridges the surface AST to the IR: tensor declarations become argument
// nodes, each index assignment becomes a flat `IndexExpr` stored in an
// expression node, and the assignment target becomes a result node whose
// value is that expression. Index variables are interned per assignment,
// classified free or reduction, and given dense or linked domains from
// the storage formats of the operands they index.
//
// Preconditions: `program` came from `parser::parse` (possibly with parse
//                errors already reported).
// Postconditions: every produced `IndexExpr` is well-formed for lowering:
//                 known tensors, matching arities, consistent extents.
// Failure modes: semantic errors are collected as diagnostics; an
//                assignment with errors is dropped, resolution continues.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{Access, AddOp, Ident, IndexAssign, Item, MulOp, Program, Span, TensorDecl};
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::graph::IndexVarGraph;
use crate::id::{IndexVarId, TensorId};
use crate::ir::{
    DimKind, IndexDomain, IndexSet, IndexExpr, IndexVar, IndexVarKind, IndexedTensor, IrContext,
    Operator, TensorNode, TensorType,
};

/// One resolved index assignment: the result tensor and the expression that
/// defines it.
#[derive(Debug)]
pub struct Assignment {
    pub target: TensorId,
    pub expr: IndexExpr,
    pub span: Span,
}

/// Output of resolution: the IR arena, the resolved assignments in source
/// order, and all diagnostics (errors and warnings).
#[derive(Debug)]
pub struct ResolvedProgram {
    pub ctx: IrContext,
    pub assignments: Vec<Assignment>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolvedProgram {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.level == DiagLevel::Error)
    }
}

pub fn resolve(program: &Program) -> ResolvedProgram {
    let mut resolver = Resolver::default();
    for item in &program.items {
        match item {
            Item::Tensor(decl) => resolver.declare(decl),
            Item::Assign(assign) => resolver.assign(assign),
        }
    }
    ResolvedProgram {
        ctx: resolver.ctx,
        assignments: resolver.assignments,
        diagnostics: resolver.diagnostics,
    }
}

#[derive(Default)]
struct Resolver {
    ctx: IrContext,
    names: HashMap<String, TensorId>,
    assignments: Vec<Assignment>,
    diagnostics: Vec<Diagnostic>,
}

/// Per-assignment index variable bookkeeping, accumulated across all uses
/// before ids are allocated.
struct VarInfo {
    name: String,
    span: Span,
    size: u64,
    in_lhs: bool,
    in_rhs: bool,
}

impl Resolver {
    fn error(&mut self, span: Span, message: impl Into<String>) -> &mut Diagnostic {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message));
        self.diagnostics.last_mut().unwrap()
    }

    fn warn(&mut self, span: Span, message: impl Into<String>) -> &mut Diagnostic {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Warning, span, message));
        self.diagnostics.last_mut().unwrap()
    }

    // ── Declarations ──

    fn declare(&mut self, decl: &TensorDecl) {
        if self.names.contains_key(&decl.name.name) {
            self.error(
                decl.name.span,
                format!("tensor `{}` is declared more than once", decl.name.name),
            )
            .code = Some(codes::DUPLICATE_TENSOR);
            return;
        }

        let formats = self.resolve_format(decl);
        let dims = decl
            .dims
            .iter()
            .map(|&(n, _)| IndexSet::range(n))
            .collect();
        let id = self.ctx.add_tensor(TensorNode::Argument {
            name: decl.name.name.clone(),
            ty: TensorType { dims, formats },
        });
        self.names.insert(decl.name.name.clone(), id);
    }

    /// Per-dimension storage kinds from the declaration's format string.
    /// An invalid format falls back to all-dense so resolution can go on.
    fn resolve_format(&mut self, decl: &TensorDecl) -> Vec<DimKind> {
        let Some(format) = &decl.format else {
            return vec![DimKind::Dense; decl.dims.len()];
        };
        let mut kinds = Vec::with_capacity(format.name.len());
        let mut valid = true;
        for c in format.name.chars() {
            match c {
                'd' => kinds.push(DimKind::Dense),
                's' => kinds.push(DimKind::Sparse),
                _ => {
                    self.error(
                        format.span,
                        format!("unknown storage kind `{c}` in format `{}`", format.name),
                    )
                    .code = Some(codes::BAD_FORMAT_CHAR);
                    valid = false;
                }
            }
        }
        if valid && kinds.len() != decl.dims.len() {
            let dims = decl.dims.len();
            self.error(
                format.span,
                format!(
                    "format `{}` names {} dimension(s) but `{}` has {}",
                    format.name,
                    kinds.len(),
                    decl.name.name,
                    dims
                ),
            )
            .code = Some(codes::FORMAT_MISMATCH);
            valid = false;
        }
        if valid {
            kinds
        } else {
            vec![DimKind::Dense; decl.dims.len()]
        }
    }

    // ── Assignments ──

    fn assign(&mut self, assign: &IndexAssign) {
        let Some(op) = self.expression_operator(assign) else {
            return;
        };

        let Some(target) = self.lookup(&assign.target.tensor) else {
            return;
        };

        // Validate every access against its declaration before interning
        // index variables.
        let rhs_accesses = assign.rhs.accesses();
        let mut ok = self.check_access(&assign.target, target);
        let mut operand_ids = Vec::with_capacity(rhs_accesses.len());
        for access in &rhs_accesses {
            match self.lookup(&access.tensor) {
                Some(id) => {
                    ok &= self.check_access(access, id);
                    operand_ids.push(id);
                }
                None => ok = false,
            }
        }
        if !ok {
            return;
        }

        // Intern index variables: LHS first (free), then RHS first-use
        // order (reduction when absent from the LHS).
        let mut infos: Vec<VarInfo> = Vec::new();
        let mut consistent = true;
        consistent &= self.scan_access(&mut infos, &assign.target, target, true);
        for (access, &id) in rhs_accesses.iter().zip(&operand_ids) {
            consistent &= self.scan_access(&mut infos, access, id, false);
        }
        if !consistent {
            return;
        }

        let mut ids: HashMap<String, IndexVarId> = HashMap::new();
        for info in &infos {
            let kind = if info.in_lhs {
                IndexVarKind::Free
            } else {
                IndexVarKind::Reduction
            };
            let set = IndexSet::range(info.size);
            let domain = if self.is_linked_var(&info.name, op, &rhs_accesses, &operand_ids) {
                IndexDomain::Linked { set }
            } else {
                IndexDomain::Dense(set)
            };
            let id = self.ctx.add_index_var(IndexVar {
                name: info.name.clone(),
                kind,
                domain,
            });
            ids.insert(info.name.clone(), id);
        }

        for info in &infos {
            if info.in_lhs && !info.in_rhs {
                self.warn(
                    info.span,
                    format!("result index variable `{}` is not used by any operand", info.name),
                )
                .code = Some(codes::UNUSED_RESULT_VAR);
            }
        }

        let var_ids = |access: &Access| -> Vec<IndexVarId> {
            access.index_vars.iter().map(|v| ids[&v.name]).collect()
        };
        let operands: Vec<IndexedTensor> = rhs_accesses
            .iter()
            .zip(&operand_ids)
            .map(|(access, &id)| IndexedTensor {
                tensor: id,
                index_vars: var_ids(access),
            })
            .collect();
        let result_vars = var_ids(&assign.target);
        let reduction_vars: Vec<IndexVarId> = infos
            .iter()
            .filter(|info| !info.in_lhs)
            .map(|info| ids[&info.name])
            .collect();

        let expr = IndexExpr {
            op,
            operands,
            result_vars,
            reduction_vars,
        };
        self.check_reachability(&expr, &infos, &ids);

        // The expression becomes a node; the target becomes a result whose
        // value is that node.
        let ty = self.ctx.tensor(target).ty().clone();
        let name = assign.target.tensor.name.clone();
        let expr_id = self.ctx.add_tensor(TensorNode::Expr {
            name: name.clone(),
            ty: ty.clone(),
            expr: expr.clone(),
        });
        *self.ctx.tensor_mut(target) = TensorNode::Result {
            name,
            ty,
            value: Some(expr_id),
        };

        self.assignments.push(Assignment {
            target,
            expr,
            span: assign.span,
        });
    }

    /// A reduction variable with no path to any result variable never makes
    /// it into the loop nest; say so rather than dropping it silently.
    fn check_reachability(
        &mut self,
        expr: &IndexExpr,
        infos: &[VarInfo],
        ids: &HashMap<String, IndexVarId>,
    ) {
        let graph = IndexVarGraph::build(expr);
        let mut reached: Vec<IndexVarId> = expr.result_vars.clone();
        let mut frontier = reached.clone();
        while let Some(v) = frontier.pop() {
            for &n in graph.neighbors(v) {
                if !reached.contains(&n) {
                    reached.push(n);
                    frontier.push(n);
                }
            }
        }
        for info in infos {
            let id = ids[&info.name];
            if !info.in_lhs && !reached.contains(&id) {
                self.warn(
                    info.span,
                    format!(
                        "reduction variable `{}` is unreachable from every result variable \
                         and will not appear in the loop nest",
                        info.name
                    ),
                )
                .code = Some(codes::DISCONNECTED_REDUCTION);
            }
        }
    }

    fn lookup(&mut self, name: &Ident) -> Option<TensorId> {
        match self.names.get(&name.name) {
            Some(&id) => Some(id),
            None => {
                self.error(
                    name.span,
                    format!("unknown tensor `{}`", name.name),
                )
                .code = Some(codes::UNKNOWN_TENSOR);
                None
            }
        }
    }

    fn check_access(&mut self, access: &Access, tensor: TensorId) -> bool {
        let order = self.ctx.tensor(tensor).order();
        if access.index_vars.len() != order {
            let name = self.ctx.tensor(tensor).name().to_string();
            self.error(
                access.span,
                format!(
                    "`{}` has order {} but is accessed with {} index variable(s)",
                    name,
                    order,
                    access.index_vars.len()
                ),
            )
            .code = Some(codes::ARITY_MISMATCH);
            return false;
        }
        true
    }

    /// Record one access's contribution to the assignment's index variable
    /// set: first-use order, extent consistency, and linked-domain marking
    /// for variables indexing a sparse operand dimension.
    fn scan_access(
        &mut self,
        infos: &mut Vec<VarInfo>,
        access: &Access,
        tensor: TensorId,
        is_lhs: bool,
    ) -> bool {
        let ty = self.ctx.tensor(tensor).ty().clone();
        let mut ok = true;
        for (dim, var) in access.index_vars.iter().enumerate() {
            let size = ty.dims[dim].size;
            match infos.iter_mut().find(|info| info.name == var.name) {
                Some(info) => {
                    if info.size != size {
                        let prev = info.size;
                        self.error(
                            var.span,
                            format!(
                                "index variable `{}` ranges over {} here but {} elsewhere",
                                var.name, size, prev
                            ),
                        )
                        .code = Some(codes::DIMENSION_MISMATCH);
                        ok = false;
                        continue;
                    }
                    info.in_lhs |= is_lhs;
                    info.in_rhs |= !is_lhs;
                }
                None => infos.push(VarInfo {
                    name: var.name.clone(),
                    span: var.span,
                    size,
                    in_lhs: is_lhs,
                    in_rhs: !is_lhs,
                }),
            }
        }
        ok
    }

    /// Whether `name` gets a linked (sparse) domain. A multiplicative or
    /// negated expression forms a single merge over all its operands, so
    /// one sparse use suffices. Additive operands accumulate in separate
    /// merge loops, so every operand must be able to drive its own merge:
    /// a dense use, or an operand that does not use the variable at all
    /// (it broadcasts along it), forces dense iteration.
    fn is_linked_var(
        &self,
        name: &str,
        op: Operator,
        accesses: &[&Access],
        operand_ids: &[TensorId],
    ) -> bool {
        let sparse_use = |access: &Access, tensor: TensorId| -> Option<bool> {
            let ty = self.ctx.tensor(tensor).ty();
            access
                .index_vars
                .iter()
                .position(|v| v.name == name)
                .map(|dim| ty.is_sparse_dim(dim))
        };
        let mut uses = accesses.iter().zip(operand_ids);
        match op {
            Operator::Add | Operator::Sub => {
                let mut any = false;
                for (access, &id) in uses {
                    match sparse_use(access, id) {
                        Some(true) => any = true,
                        Some(false) | None => return false,
                    }
                }
                any
            }
            Operator::Neg | Operator::Mul | Operator::Div => {
                uses.any(|(access, &id)| sparse_use(access, id) == Some(true))
            }
        }
    }

    /// Map the surface expression shape to the single flat IR operator, or
    /// report why it cannot be flattened.
    fn expression_operator(&mut self, assign: &IndexAssign) -> Option<Operator> {
        let rhs = &assign.rhs;
        let has_mul = rhs.first.rest.iter().count() > 0
            || rhs.rest.iter().any(|(_, t)| !t.rest.is_empty());
        let has_add = !rhs.rest.is_empty();

        if rhs.negated && (has_add || has_mul) {
            self.error(
                rhs.span,
                "negation applies to a single access only",
            )
            .code = Some(codes::NEGATED_CHAIN);
            return None;
        }
        if has_add && has_mul {
            self.error(
                rhs.span,
                "additive and multiplicative operators cannot be mixed in one assignment",
            )
            .code = Some(codes::MIXED_OPERATORS);
            return None;
        }

        if rhs.negated {
            return Some(Operator::Neg);
        }
        if has_add {
            let ops: Vec<AddOp> = rhs.rest.iter().map(|(op, _)| *op).collect();
            if ops.iter().all(|&op| op == AddOp::Add) {
                return Some(Operator::Add);
            }
            if ops.iter().all(|&op| op == AddOp::Sub) {
                return Some(Operator::Sub);
            }
            self.error(
                rhs.span,
                "`+` and `-` cannot be mixed in one additive chain",
            )
            .code = Some(codes::MIXED_OPERATORS);
            return None;
        }
        if has_mul {
            let ops: Vec<MulOp> = rhs.first.rest.iter().map(|(op, _)| *op).collect();
            if ops.iter().all(|&op| op == MulOp::Mul) {
                return Some(Operator::Mul);
            }
            if ops.iter().all(|&op| op == MulOp::Div) {
                return Some(Operator::Div);
            }
            self.error(
                rhs.span,
                "`*` and `/` cannot be mixed in one multiplicative chain",
            )
            .code = Some(codes::MIXED_OPERATORS);
            return None;
        }
        // A bare copy `A(i) = B(i)` is a one-operand addition.
        Some(Operator::Add)
    }
}
