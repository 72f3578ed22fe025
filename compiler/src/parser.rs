// Parser for .tix source files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators over a `ValueInput` token stream.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a .tix source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

fn to_span(s: SimpleSpan) -> Span {
    Span::new(s.start(), s.end())
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span: to_span(span),
        }
    });

    // ── access: IDENT '(' IDENT (',' IDENT)* ')' ──

    let access = ident
        .clone()
        .then(
            ident
                .clone()
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|(tensor, index_vars), e| Access {
            tensor,
            index_vars,
            span: to_span(e.span()),
        });

    // ── term: access (('*'|'/') access)* ──

    let mul_op = select! {
        Token::Star => MulOp::Mul,
        Token::Slash => MulOp::Div,
    };

    let term = access
        .clone()
        .then(mul_op.then(access.clone()).repeated().collect::<Vec<_>>())
        .map_with(|(first, rest), e| Term {
            first,
            rest,
            span: to_span(e.span()),
        });

    // ── expr: '-'? term (('+'|'-') term)* ──

    let add_op = select! {
        Token::Plus => AddOp::Add,
        Token::Minus => AddOp::Sub,
    };

    let expr = just(Token::Minus)
        .or_not()
        .then(term.clone())
        .then(add_op.then(term).repeated().collect::<Vec<_>>())
        .map_with(|((neg, first), rest), e| SurfaceExpr {
            negated: neg.is_some(),
            first,
            rest,
            span: to_span(e.span()),
        });

    // ── tensor_decl: 'tensor' IDENT '(' INT (',' INT)* ')' (':' IDENT)? ';' ──

    let dim = select! {
        Token::Int(n) = e => (n, to_span(e.span())),
    };

    let tensor_decl = just(Token::Tensor)
        .ignore_then(ident.clone())
        .then(
            dim.separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(just(Token::Colon).ignore_then(ident.clone()).or_not())
        .then_ignore(just(Token::Semi))
        .map_with(|((name, dims), format), e| {
            Item::Tensor(TensorDecl {
                name,
                dims,
                format,
                span: to_span(e.span()),
            })
        });

    // ── index_assign: access '=' expr ';' ──

    let index_assign = access
        .then_ignore(just(Token::Equals))
        .then(expr)
        .then_ignore(just(Token::Semi))
        .map_with(|(target, rhs), e| {
            Item::Assign(IndexAssign {
                target,
                rhs,
                span: to_span(e.span()),
            })
        });

    // ── program ──

    tensor_decl
        .or(index_assign)
        .repeated()
        .collect::<Vec<_>>()
        .map_with(|items, e| Program {
            items,
            span: to_span(e.span()),
        })
        .then_ignore(end())
}
