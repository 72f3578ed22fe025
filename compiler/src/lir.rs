//! LIR — the statement vocabulary produced by lowering.
//!
//! `Stmt` is the sole interface contract with a backend code generator:
//! sequential blocks, counted loops, condition-driven merge loops,
//! assignments, element stores, annotated comments, and a no-op. `Expr`
//! covers scalar arithmetic, element loads, and the opaque sparse-index
//! capability surface (`pos`/`crd`/`vals` arrays of a tensor's index
//! structure) — the lowering core never assumes a concrete storage layout
//! beyond these accessors.
//!
//! The `Display` impls render an indented pseudo-code listing used by the
//! CLI and snapshot tests.

use std::fmt;

use serde::Serialize;

// ── Scalar variables ───────────────────────────────────────────────────────

/// A scalar variable driving or produced by a generated loop (induction
/// variables, coordinate pointers, sink values).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Var(pub String);

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Var(name.into())
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Expressions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Eq,
    And,
    Or,
}

impl BinOp {
    fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Eq => "==",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Which array of a sparse tensor's index structure a `Field` access reads.
/// `Pos(d)`/`Crd(d)` address the compressed structure of dimension `d`
/// (position bounds and coordinate list); `Vals` addresses the value array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
    Pos(usize),
    Crd(usize),
    Vals,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(Var),
    Int(i64),
    /// Element load from a (conceptually dense) tensor: `B[i,k]`.
    Load { tensor: String, indices: Vec<Expr> },
    /// Load from a sparse tensor's index structure: `B.crd1[pB_k]`.
    Field {
        tensor: String,
        field: IndexField,
        offset: Box<Expr>,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Minimum over two or more participants' sink values.
    Min(Vec<Expr>),
}

impl Expr {
    pub fn var(v: &Var) -> Expr {
        Expr::Var(v.clone())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Lt, lhs, rhs)
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Eq, lhs, rhs)
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::And, lhs, rhs)
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Or, lhs, rhs)
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, lhs, rhs)
    }
}

// ── Statements ─────────────────────────────────────────────────────────────

/// Compound store operator: `=`, `+=`, `-=`, `*=`, `/=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for CompoundOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompoundOp::Assign => "=",
            CompoundOp::Add => "+=",
            CompoundOp::Sub => "-=",
            CompoundOp::Mul => "*=",
            CompoundOp::Div => "/=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Sequential composition; children execute in order.
    Block(Vec<Stmt>),
    /// Counted dense loop: `for var in 0..extent`.
    For {
        var: Var,
        extent: Expr,
        body: Box<Stmt>,
    },
    /// Conditional loop with an explicit continuation predicate — the
    /// sparse merge-loop form.
    While { cond: Expr, body: Box<Stmt> },
    /// Scalar assignment.
    Assign { var: Var, value: Expr },
    /// Element store into a tensor or workspace.
    Store {
        tensor: String,
        indices: Vec<Expr>,
        op: CompoundOp,
        value: Expr,
    },
    /// Annotated comment wrapping a sub-statement.
    Comment { text: String, body: Box<Stmt> },
    /// No-op.
    Pass,
}

impl Stmt {
    /// Wrap `body` in a comment annotation.
    pub fn comment(text: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::Comment {
            text: text.into(),
            body: Box::new(body),
        }
    }

    pub fn assign(var: &Var, value: Expr) -> Stmt {
        Stmt::Assign {
            var: var.clone(),
            value,
        }
    }
}

// ── Pretty printer ─────────────────────────────────────────────────────────

fn fmt_operand(f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
    // Parenthesize nested binaries so precedence never has to be guessed.
    match e {
        Expr::Binary { .. } => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Load { tensor, indices } => {
                write!(f, "{tensor}[")?;
                for (i, idx) in indices.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{idx}")?;
                }
                write!(f, "]")
            }
            Expr::Field {
                tensor,
                field,
                offset,
            } => match field {
                IndexField::Pos(d) => write!(f, "{tensor}.pos{d}[{offset}]"),
                IndexField::Crd(d) => write!(f, "{tensor}.crd{d}[{offset}]"),
                IndexField::Vals => write!(f, "{tensor}.vals[{offset}]"),
            },
            Expr::Neg(e) => {
                write!(f, "-")?;
                fmt_operand(f, e)
            }
            Expr::Binary { op, lhs, rhs } => {
                fmt_operand(f, lhs)?;
                write!(f, " {} ", op.as_str())?;
                fmt_operand(f, rhs)
            }
            Expr::Min(parts) => {
                write!(f, "min(")?;
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn fmt_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    match stmt {
        Stmt::Block(stmts) => {
            for s in stmts {
                fmt_stmt(f, s, indent)?;
            }
            Ok(())
        }
        Stmt::For { var, extent, body } => {
            writeln!(f, "{pad}for {var} in 0..{extent} {{")?;
            fmt_stmt(f, body, indent + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::While { cond, body } => {
            writeln!(f, "{pad}while {cond} {{")?;
            fmt_stmt(f, body, indent + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::Assign { var, value } => writeln!(f, "{pad}{var} = {value}"),
        Stmt::Store {
            tensor,
            indices,
            op,
            value,
        } => {
            write!(f, "{pad}{tensor}[")?;
            for (i, idx) in indices.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{idx}")?;
            }
            writeln!(f, "] {op} {value}")
        }
        Stmt::Comment { text, body } => {
            writeln!(f, "{pad}// {text}")?;
            fmt_stmt(f, body, indent)
        }
        Stmt::Pass => writeln!(f, "{pad}pass"),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(f, self, 0)
    }
}
