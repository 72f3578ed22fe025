// ir.rs — IR node model for tensor index expressions.
//
// Pure data: tensor nodes (literal, index expression, variable store,
// argument, result), index variables with dense or linked domains, and
// `Function` as the ownership unit for lowered statements. Nodes live in an
// `IrContext` arena and reference each other through `TensorId`/`IndexVarId`,
// never through owning pointers, so expressions can share operand tensors
// by reference and the whole model stays serializable.
//
// No algorithm lives here; lowering consumes this model read-only.

use std::fmt;

use serde::Serialize;

use crate::id::{IndexVarId, TensorId};
use crate::lir::Stmt;

// ── Index sets and domains ─────────────────────────────────────────────────

/// A dense range of indices `0..size` — the iteration space of one tensor
/// dimension. Treated as an opaque data source by lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSet {
    pub size: u64,
}

impl IndexSet {
    pub fn range(size: u64) -> Self {
        IndexSet { size }
    }
}

impl fmt::Display for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0..{}", self.size)
    }
}

/// The domain of an index variable: either a plain dense index set, or a
/// sparse relation reached through another index variable's iteration space
/// (the variable's values are then enumerated from coordinate lists, not
/// counted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexDomain {
    Dense(IndexSet),
    Linked { set: IndexSet },
}

impl IndexDomain {
    pub fn is_linked(&self) -> bool {
        matches!(self, IndexDomain::Linked { .. })
    }

    /// The first (and only) underlying index set.
    pub fn index_set(&self) -> IndexSet {
        match self {
            IndexDomain::Dense(set) => *set,
            IndexDomain::Linked { set } => *set,
        }
    }
}

// ── Index variables ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexVarKind {
    /// Appears in the expression's result.
    Free,
    /// Summed over; absent from the result.
    Reduction,
}

/// A named logical iteration dimension. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexVar {
    pub name: String,
    pub kind: IndexVarKind,
    pub domain: IndexDomain,
}

// ── Tensor types ───────────────────────────────────────────────────────────

/// Storage kind of one tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DimKind {
    Dense,
    Sparse,
}

/// The type of a tensor: per-dimension index sets and storage kinds.
/// Scalars are tensors of order 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorType {
    pub dims: Vec<IndexSet>,
    pub formats: Vec<DimKind>,
}

impl TensorType {
    pub fn dense(dims: Vec<IndexSet>) -> Self {
        let formats = vec![DimKind::Dense; dims.len()];
        TensorType { dims, formats }
    }

    pub fn order(&self) -> usize {
        self.dims.len()
    }

    pub fn is_sparse_dim(&self, dim: usize) -> bool {
        self.formats.get(dim) == Some(&DimKind::Sparse)
    }
}

// ── Index expressions ──────────────────────────────────────────────────────

/// One access of a tensor inside an index expression, e.g. `B(i,k)`.
/// A read-only view: the referenced tensor node is shared, not owned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedTensor {
    pub tensor: TensorId,
    pub index_vars: Vec<IndexVarId>,
}

/// The operator combining an index expression's operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    Neg,
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Neg => "-",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        };
        write!(f, "{s}")
    }
}

/// An operator applied to a list of operand tensor accesses, tagged with the
/// index variables free in the result and those reduced over.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexExpr {
    pub op: Operator,
    pub operands: Vec<IndexedTensor>,
    pub result_vars: Vec<IndexVarId>,
    pub reduction_vars: Vec<IndexVarId>,
}

// ── Tensor nodes ───────────────────────────────────────────────────────────

/// A computed or loaded tensor. Closed set of node kinds; traversals are
/// plain matches, no dynamic dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TensorNode {
    /// A dense constant tensor.
    Literal {
        name: String,
        ty: TensorType,
        data: Vec<f64>,
    },
    /// A tensor defined by an index expression.
    Expr {
        name: String,
        ty: TensorType,
        expr: IndexExpr,
    },
    /// A store of a value to a named tensor variable.
    VariableStore { name: String, ty: TensorType },
    /// A formal argument to a function.
    Argument { name: String, ty: TensorType },
    /// A formal result of a function; `value` is the node whose computation
    /// defines it.
    Result {
        name: String,
        ty: TensorType,
        value: Option<TensorId>,
    },
}

impl TensorNode {
    pub fn name(&self) -> &str {
        match self {
            TensorNode::Literal { name, .. }
            | TensorNode::Expr { name, .. }
            | TensorNode::VariableStore { name, .. }
            | TensorNode::Argument { name, .. }
            | TensorNode::Result { name, .. } => name,
        }
    }

    pub fn ty(&self) -> &TensorType {
        match self {
            TensorNode::Literal { ty, .. }
            | TensorNode::Expr { ty, .. }
            | TensorNode::VariableStore { ty, .. }
            | TensorNode::Argument { ty, .. }
            | TensorNode::Result { ty, .. } => ty,
        }
    }

    pub fn order(&self) -> usize {
        self.ty().order()
    }
}

// ── Context arena ──────────────────────────────────────────────────────────

/// Owns all tensor nodes and index variables of a program. Ids are arena
/// indices, allocated in source order.
#[derive(Debug, Default, Serialize)]
pub struct IrContext {
    tensors: Vec<TensorNode>,
    index_vars: Vec<IndexVar>,
}

impl IrContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tensor(&mut self, node: TensorNode) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        self.tensors.push(node);
        id
    }

    pub fn add_index_var(&mut self, var: IndexVar) -> IndexVarId {
        let id = IndexVarId(self.index_vars.len() as u32);
        self.index_vars.push(var);
        id
    }

    pub fn tensor(&self, id: TensorId) -> &TensorNode {
        &self.tensors[id.index()]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut TensorNode {
        &mut self.tensors[id.index()]
    }

    pub fn index_var(&self, id: IndexVarId) -> &IndexVar {
        &self.index_vars[id.index()]
    }

    pub fn index_var_name(&self, id: IndexVarId) -> &str {
        &self.index_vars[id.index()].name
    }

    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &TensorNode)> {
        self.tensors
            .iter()
            .enumerate()
            .map(|(i, t)| (TensorId(i as u32), t))
    }

    pub fn index_vars(&self) -> impl Iterator<Item = (IndexVarId, &IndexVar)> {
        self.index_vars
            .iter()
            .enumerate()
            .map(|(i, v)| (IndexVarId(i as u32), v))
    }

    /// Render an access list like `B(i,k)` for comments and diagnostics.
    pub fn access_string(&self, access: &IndexedTensor) -> String {
        let vars: Vec<&str> = access
            .index_vars
            .iter()
            .map(|&v| self.index_var_name(v))
            .collect();
        format!("{}({})", self.tensor(access.tensor).name(), vars.join(","))
    }

    /// Render a whole index expression, operands joined by its operator:
    /// `B(i,k) * C(k,j)`, `-B(i,j)`.
    pub fn expr_string(&self, expr: &IndexExpr) -> String {
        if expr.op == Operator::Neg {
            let inner = expr
                .operands
                .first()
                .map(|a| self.access_string(a))
                .unwrap_or_default();
            return format!("-{inner}");
        }
        expr.operands
            .iter()
            .map(|a| self.access_string(a))
            .collect::<Vec<_>>()
            .join(&format!(" {} ", expr.op))
    }
}

// ── Functions ──────────────────────────────────────────────────────────────

/// The unit that owns lowered statements, with formal arguments and results.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<TensorId>,
    pub results: Vec<TensorId>,
    pub body: Vec<Stmt>,
}

impl Function {
    pub fn new(name: impl Into<String>, arguments: Vec<TensorId>, results: Vec<TensorId>) -> Self {
        Function {
            name: name.into(),
            arguments,
            results,
            body: Vec::new(),
        }
    }

    pub fn add_statement(&mut self, stmt: Stmt) {
        self.body.push(stmt);
    }

    /// Render the function header and body against its context.
    pub fn display(&self, ctx: &IrContext) -> String {
        let args: Vec<&str> = self
            .arguments
            .iter()
            .map(|&t| ctx.tensor(t).name())
            .collect();
        let results: Vec<&str> = self.results.iter().map(|&t| ctx.tensor(t).name()).collect();
        let mut out = format!("func {}({}) -> ({})\n", self.name, args.join(", "), results.join(", "));
        for stmt in &self.body {
            out.push_str(&format!("{stmt}"));
        }
        out
    }
}
