//! GraphViz export for flow graphs: a node per instruction, an edge per
//! control-flow edge.

use std::fmt::Write;

use crate::intern::Symbols;

use super::{FlowGraph, Instr};

/// Renders a `digraph` document. Instruction nodes are named `bN_I`;
/// falling through inside a block draws an edge to the next instruction,
/// and terminators draw edges to the first instruction of each successor
/// block.
#[must_use]
pub fn to_dot(graph: &FlowGraph, syms: &Symbols) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph flowgraph {{");
    let _ = writeln!(out, "  node [shape=box fontname=\"monospace\"];");

    for id in graph.reverse_postorder() {
        let block = graph.block(id);
        for (index, instr) in block.instrs.iter().enumerate() {
            let mut label = String::new();
            crate::disassembler::write_instr(&mut label, instr, syms);
            let shape = if instr.is_definition() { "box" } else { "ellipse" };
            let _ = writeln!(
                out,
                "  b{}_{} [label=\"{}\" shape={shape}];",
                id.0,
                index,
                label.replace('"', "\\\"")
            );
            if index + 1 < block.instrs.len() {
                let _ = writeln!(out, "  b{}_{} -> b{}_{};", id.0, index, id.0, index + 1);
            }
        }
        if let Some(last) = block.instrs.len().checked_sub(1) {
            for succ in graph.successors(id) {
                if graph.block(succ).instrs.is_empty() {
                    continue;
                }
                let _ = writeln!(out, "  b{}_{} -> b{}_0;", id.0, last, succ.0);
            }
        }
    }

    let _ = writeln!(out, "}}");
    out
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
    fn dot_document_names_every_instruction_once() {
        let mut syms = Symbols::new();
        let natives = NativeRegistry::bootstrap(&mut syms);
        let mut heap = Heap::new();
        let mut scopes = ScopeArena::new();
        let root = scopes.new_scope(None);
        let script = Parser::parse_script(
            "(cond ((= 1 2) 1) (else 2))",
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

        let dot = to_dot(&graph, &syms);
        assert!(dot.starts_with("digraph"));
        let instr_count: usize = graph
            .reverse_postorder()
            .iter()
            .map(|id| graph.block(*id).instrs.len())
            .sum();
        let node_count = dot.lines().filter(|l| l.contains("[label=")).count();
        // one declaration per instruction plus the shared node style line
        assert_eq!(node_count, instr_count);
    }
}
