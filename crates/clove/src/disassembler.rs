//! Renders a flow graph as one line per instruction.
//!
//! Diagnostic only; the single contract is that every instruction of every
//! reachable block appears exactly once.

use std::fmt::Write;

use crate::expressions::Literal;
use crate::graph::{Constant, FlowGraph, Instr};
use crate::intern::Symbols;

/// Produces a listing like:
///
/// ```text
/// b0:
///   Goto b1
/// b1:
///   Constant 99
///   Constant 1
///   BinaryOp +
///   Return
/// ```
#[must_use]
pub fn disassemble(graph: &FlowGraph, syms: &Symbols) -> String {
    let mut out = String::new();
    for id in graph.reverse_postorder() {
        let block = graph.block(id);
        let _ = writeln!(out, "b{}:", id.0);
        for instr in &block.instrs {
            let _ = write!(out, "  ");
            write_instr(&mut out, instr, syms);
            let _ = writeln!(out);
        }
    }
    out
}

pub(crate) fn write_instr(out: &mut String, instr: &Instr, syms: &Symbols) {
    match instr {
        Instr::Constant(constant) => {
            let _ = write!(out, "Constant ");
            write_constant(out, constant, syms);
        }
        Instr::MakeLambda(template) => {
            let _ = match template.name {
                Some(name) => write!(out, "MakeLambda {}", syms.name(name)),
                None => write!(out, "MakeLambda <anonymous>"),
            };
        }
        Instr::LoadLocal(sym) => {
            let _ = write!(out, "LoadLocal {}", syms.name(*sym));
        }
        Instr::StoreVariable(sym) => {
            let _ = write!(out, "StoreVariable {}", syms.name(*sym));
        }
        Instr::UnaryOp(op) => {
            let _ = write!(out, "UnaryOp {op}");
        }
        Instr::BinaryOp(op) => {
            let _ = write!(out, "BinaryOp {op}");
        }
        Instr::Cast(sym) => {
            let _ = write!(out, "Cast {}", syms.name(*sym));
        }
        Instr::InstanceOf(sym) => {
            let _ = write!(out, "InstanceOf {}", syms.name(*sym));
        }
        Instr::Eval => {
            let _ = write!(out, "Eval");
        }
        Instr::Invoke { argc } => {
            let _ = write!(out, "Invoke argc={argc}");
        }
        Instr::InvokeDynamic { argc } => {
            let _ = write!(out, "InvokeDynamic argc={argc}");
        }
        Instr::InvokeNative { native, argc } => {
            let _ = write!(out, "InvokeNative #{} argc={argc}", native.raw());
        }
        Instr::Branch {
            true_target,
            false_target,
            join,
        } => {
            let _ = match false_target {
                Some(f) => write!(out, "Branch true=b{} false=b{} join=b{}", true_target.0, f.0, join.0),
                None => write!(out, "Branch true=b{} join=b{}", true_target.0, join.0),
            };
        }
        Instr::Goto(target) => {
            let _ = write!(out, "Goto b{}", target.0);
        }
        Instr::Throw => {
            let _ = write!(out, "Throw");
        }
        Instr::Return => {
            let _ = write!(out, "Return");
        }
        Instr::Pop => {
            let _ = write!(out, "Pop");
        }
    }
}

fn write_constant(out: &mut String, constant: &Constant, syms: &Symbols) {
    match constant {
        Constant::Literal(lit) => write_literal(out, lit, syms),
        Constant::Datum(datum) => {
            let _ = write!(out, "'");
            write_datum(out, datum, syms);
        }
    }
}

fn write_literal(out: &mut String, lit: &Literal, syms: &Symbols) {
    let _ = match lit {
        Literal::Null => write!(out, "()"),
        Literal::Bool(true) => write!(out, "#t"),
        Literal::Bool(false) => write!(out, "#f"),
        Literal::Long(n) => write!(out, "{n}"),
        Literal::Double(d) => write!(out, "{d}"),
        Literal::String(s) => write!(out, "\"{}\"", s.escape_default()),
        Literal::Symbol(sym) => write!(out, "{}", syms.name(*sym)),
    };
}

fn write_datum(out: &mut String, datum: &crate::expressions::Datum, syms: &Symbols) {
    match datum {
        crate::expressions::Datum::Atom(lit) => write_literal(out, lit, syms),
        crate::expressions::Datum::List(items) => {
            let _ = write!(out, "(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, " ");
                }
                write_datum(out, item, syms);
            }
            let _ = write!(out, ")");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::FlowGraphBuilder;
    use crate::heap::Heap;
    use crate::natives::NativeRegistry;
    use crate::parse::Parser;
    use crate::scope::ScopeArena;

    #[test]
    fn every_instruction_appears_exactly_once() {
        let mut syms = Symbols::new();
        let natives = NativeRegistry::bootstrap(&mut syms);
        let mut heap = Heap::new();
        let mut scopes = ScopeArena::new();
        let root = scopes.new_scope(None);
        let script = Parser::parse_script(
            "(when (= 1 1) (+ 2 3))",
            None,
            root,
            &mut syms,
            &mut heap,
            &mut scopes,
        )
        .unwrap();
        let graph = FlowGraphBuilder::build(
            &script.body,
            script.scope,
            &mut scopes,
            &heap,
            &mut syms,
            &natives,
        )
        .unwrap();

        let listing = disassemble(&graph, &syms);
        let instr_count: usize = graph
            .reverse_postorder()
            .iter()
            .map(|id| graph.block(*id).instrs.len())
            .sum();
        let line_count = listing.lines().filter(|l| l.starts_with("  ")).count();
        assert_eq!(instr_count, line_count);
        assert!(listing.contains("Branch"));
        assert!(listing.contains("BinaryOp +"));
    }
}
