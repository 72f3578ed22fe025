// tixc — Tensor Index Expression Compiler
//
// Library root. Phases in pipeline order: lexer, parser, resolve, lower.

pub mod ast;
pub mod diag;
pub mod graph;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod lir;
pub mod loops;
pub mod lower;
pub mod parser;
pub mod resolve;
