// AST node types for .tix source files.
//
// A .tix program is a sequence of tensor declarations followed by index
// assignments. Every node carries a byte-offset `Span` for error reporting
// in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid
//                token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use serde::Serialize;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Root ──

/// A complete .tix program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Tensor(TensorDecl),
    Assign(IndexAssign),
}

// ── tensor_decl: 'tensor' IDENT '(' INT (',' INT)* ')' (':' IDENT)? ';' ──

/// `tensor B(4, 4) : ds;` — declares a 4x4 tensor with a dense first
/// dimension and a sparse second dimension. The format string has one
/// `d`/`s` character per dimension; omitted means all-dense.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDecl {
    pub name: Ident,
    pub dims: Vec<(u64, Span)>,
    pub format: Option<Ident>,
    pub span: Span,
}

// ── index_assign: access '=' expr ';' ──

/// `A(i, j) = B(i, k) * C(k, j);`
#[derive(Debug, Clone, PartialEq)]
pub struct IndexAssign {
    pub target: Access,
    pub rhs: SurfaceExpr,
    pub span: Span,
}

/// One tensor access: `B(i, k)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub tensor: Ident,
    pub index_vars: Vec<Ident>,
    pub span: Span,
}

// ── Expressions ──
//
// The surface grammar allows an additive chain of multiplicative chains,
// but the IR's `IndexExpr` is flat (one operator over a list of operands).
// Resolve rejects programs that actually mix the two levels.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulOp {
    Mul,
    Div,
}

/// `(-)? term (('+'|'-') term)*`
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceExpr {
    pub negated: bool,
    pub first: Term,
    pub rest: Vec<(AddOp, Term)>,
    pub span: Span,
}

/// `access (('*'|'/') access)*`
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub first: Access,
    pub rest: Vec<(MulOp, Access)>,
    pub span: Span,
}

impl SurfaceExpr {
    /// All accesses in source order, the target excluded.
    pub fn accesses(&self) -> Vec<&Access> {
        let mut out = vec![&self.first.first];
        out.extend(self.first.rest.iter().map(|(_, a)| a));
        for (_, term) in &self.rest {
            out.push(&term.first);
            out.extend(term.rest.iter().map(|(_, a)| a));
        }
        out
    }
}
