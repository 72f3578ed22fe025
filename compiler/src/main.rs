use clap::Parser;
use std::path::PathBuf;

use tixc::ir::{Function, TensorNode};
use tixc::lower::{LowerOptions, MergeStrategy};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Stmt,
    Tokens,
    Ast,
    Graph,
    Loops,
    Json,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum MergeArg {
    Legacy,
    Union,
}

#[derive(Parser, Debug)]
#[command(
    name = "tixc",
    version,
    about = "Tensor Index Expression Compiler — lowers .tix index expressions to loop nests"
)]
struct Cli {
    /// Input .tix source file
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Stmt)]
    emit: EmitStage,

    /// Merge semantics for multi-participant sparse loops
    #[arg(long, value_enum, default_value_t = MergeArg::Legacy)]
    merge: MergeArg,

    /// Print lowering internals (index variable graph, subset loops)
    #[arg(long)]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();

    // ── Read and lex ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tixc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    if matches!(cli.emit, EmitStage::Tokens) {
        let lexed = tixc::lexer::lex(&source);
        for (tok, span) in &lexed.tokens {
            println!("{tok:?} @ {}..{}", span.start, span.end);
        }
        for err in &lexed.errors {
            eprintln!("tixc: lex error: {}", err.message);
        }
        std::process::exit(if lexed.errors.is_empty() { 0 } else { 1 });
    }

    // ── Parse ──
    let parse_result = tixc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("tixc: parse error: {}", err);
        }
        std::process::exit(1);
    }
    let program = match parse_result.program {
        Some(p) => p,
        None => {
            eprintln!("tixc: parse failed with no output");
            std::process::exit(1);
        }
    };

    if matches!(cli.emit, EmitStage::Ast) {
        println!("{program:#?}");
        return;
    }

    // ── Name resolution ──
    let resolved = tixc::resolve::resolve(&program);
    for diag in &resolved.diagnostics {
        eprintln!("tixc: {}", diag);
    }
    if resolved.has_errors() {
        std::process::exit(1);
    }

    let opts = LowerOptions {
        merge: match cli.merge {
            MergeArg::Legacy => MergeStrategy::Legacy,
            MergeArg::Union => MergeStrategy::Union,
        },
        trace: cli.trace,
    };

    match cli.emit {
        EmitStage::Graph => {
            for assign in &resolved.assignments {
                let graph = tixc::graph::IndexVarGraph::build(&assign.expr);
                print!("{}", graph.dump(&resolved.ctx));
            }
        }
        EmitStage::Loops => {
            for assign in &resolved.assignments {
                let graph = tixc::graph::IndexVarGraph::build(&assign.expr);
                let loops = tixc::loops::order_loops(&graph, &assign.expr.result_vars, &resolved.ctx);
                for (idx, l) in loops.iter().enumerate() {
                    match l.link {
                        Some(parent) => println!(
                            "l{idx}: {} (linked from {parent})",
                            resolved.ctx.index_var_name(l.index_var)
                        ),
                        None => println!("l{idx}: {}", resolved.ctx.index_var_name(l.index_var)),
                    }
                }
            }
        }
        EmitStage::Stmt => {
            let function = lower_program(&resolved, &cli.source, &opts);
            print!("{}", function.display(&resolved.ctx));
        }
        EmitStage::Json => {
            let function = lower_program(&resolved, &cli.source, &opts);
            let assignments: Vec<serde_json::Value> = resolved
                .assignments
                .iter()
                .zip(&function.body)
                .map(|(assign, stmt)| {
                    let graph = tixc::graph::IndexVarGraph::build(&assign.expr);
                    let loops = tixc::loops::order_loops(
                        &graph,
                        &assign.expr.result_vars,
                        &resolved.ctx,
                    );
                    serde_json::json!({
                        "target": resolved.ctx.tensor(assign.target).name(),
                        "expr": resolved.ctx.expr_string(&assign.expr),
                        "graph": graph,
                        "loops": loops,
                        "stmt": format!("{stmt}"),
                    })
                })
                .collect();
            let doc = serde_json::json!({
                "function": function.name,
                "context": resolved.ctx,
                "assignments": assignments,
            });
            match serde_json::to_string_pretty(&doc) {
                Ok(s) => println!("{s}"),
                Err(e) => {
                    eprintln!("tixc: error: json: {e}");
                    std::process::exit(2);
                }
            }
        }
        EmitStage::Tokens | EmitStage::Ast => unreachable!("handled above"),
    }
}

/// Lower every assignment and collect the statements into one function
/// named after the source file.
fn lower_program(
    resolved: &tixc::resolve::ResolvedProgram,
    source: &std::path::Path,
    opts: &LowerOptions,
) -> Function {
    let name = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main")
        .to_string();

    let arguments: Vec<_> = resolved
        .ctx
        .tensors()
        .filter(|(_, node)| matches!(node, TensorNode::Argument { .. }))
        .map(|(id, _)| id)
        .collect();
    let results: Vec<_> = resolved.assignments.iter().map(|a| a.target).collect();

    let mut function = Function::new(name, arguments, results);
    for assign in &resolved.assignments {
        let stmt = tixc::lower::lower_scatter_workspace(
            &resolved.ctx,
            assign.target,
            &assign.expr,
            opts,
        );
        function.add_statement(stmt);
    }
    function
}
