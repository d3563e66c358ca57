//! Assembles a [`FlowGraph`] into a linear [`CodeRegion`].
//!
//! Blocks are emitted in reverse postorder. The first pass records a label
//! (byte offset) per block as it is reached; forward `Jump`/`JumpIfFalse`
//! operands are emitted as zero and patched once every label is known.
//! Jumps to the immediately following block are elided.

use std::time::Instant;

use ahash::AHashMap;

use crate::expressions::LambdaTemplate;
use crate::graph::{BlockId, Constant, FlowGraph, Instr};

use super::{CodeRegion, Opcode};

/// Flattens the graph. Compilation time is measured here and carried on
/// the resulting region for diagnostics.
#[must_use]
pub fn assemble(graph: &FlowGraph) -> CodeRegion {
    let start = Instant::now();
    let mut asm = Assembler::default();

    let order = graph.reverse_postorder();
    for (position, id) in order.iter().enumerate() {
        let next = order.get(position + 1).copied();
        asm.bind_label(*id);
        for instr in &graph.block(*id).instrs {
            asm.emit_instr(instr, next);
        }
    }
    asm.patch_jumps();

    CodeRegion::new(asm.buf, asm.constants, asm.lambdas, start.elapsed())
}

#[derive(Default)]
struct Assembler {
    buf: Vec<u8>,
    constants: Vec<Constant>,
    lambdas: Vec<LambdaTemplate>,
    labels: AHashMap<BlockId, usize>,
    /// (operand offset, target block) pairs awaiting resolution.
    patches: Vec<(usize, BlockId)>,
}

impl Assembler {
    fn bind_label(&mut self, id: BlockId) {
        self.labels.insert(id, self.buf.len());
    }

    fn emit_instr(&mut self, instr: &Instr, next: Option<BlockId>) {
        match instr {
            Instr::Constant(constant) => {
                let index = self.add_constant(constant.clone());
                self.emit_u16(Opcode::LoadConst, index);
            }
            Instr::MakeLambda(template) => {
                let index = self.add_lambda((**template).clone());
                self.emit_u16(Opcode::MakeLambda, index);
            }
            Instr::LoadLocal(sym) => self.emit_u32(Opcode::LoadLocal, sym.raw()),
            Instr::StoreVariable(sym) => self.emit_u32(Opcode::StoreLocal, sym.raw()),
            Instr::UnaryOp(op) => self.emit_u8(Opcode::UnaryOp, *op as u8),
            Instr::BinaryOp(op) => self.emit_u8(Opcode::BinaryOp, *op as u8),
            Instr::Cast(sym) => self.emit_u32(Opcode::Cast, sym.raw()),
            Instr::InstanceOf(sym) => self.emit_u32(Opcode::InstanceOf, sym.raw()),
            Instr::Eval => self.emit(Opcode::Eval),
            Instr::Invoke { argc } => self.emit_u8(Opcode::Invoke, *argc),
            Instr::InvokeDynamic { argc } => self.emit_u8(Opcode::InvokeDynamic, *argc),
            Instr::InvokeNative { native, argc } => {
                self.emit(Opcode::InvokeNative);
                self.buf.extend_from_slice(&native.raw().to_le_bytes());
                self.buf.push(*argc);
            }
            Instr::Branch {
                true_target,
                false_target,
                join,
            } => {
                let falsy = false_target.unwrap_or(*join);
                self.emit_jump(Opcode::JumpIfFalse, falsy);
                if Some(*true_target) != next {
                    self.emit_jump(Opcode::Jump, *true_target);
                }
            }
            Instr::Goto(target) => {
                if Some(*target) != next {
                    self.emit_jump(Opcode::Jump, *target);
                }
            }
            Instr::Throw => self.emit(Opcode::Throw),
            Instr::Return => self.emit(Opcode::Return),
            Instr::Pop => self.emit(Opcode::Pop),
        }
    }

    fn emit(&mut self, op: Opcode) {
        self.buf.push(op as u8);
    }

    fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.buf.push(op as u8);
        self.buf.push(operand);
    }

    fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.buf.push(op as u8);
        self.buf.extend_from_slice(&operand.to_le_bytes());
    }

    fn emit_u32(&mut self, op: Opcode, operand: u32) {
        self.buf.push(op as u8);
        self.buf.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emits a jump with a zero placeholder offset to patch later.
    fn emit_jump(&mut self, op: Opcode, target: BlockId) {
        self.buf.push(op as u8);
        self.patches.push((self.buf.len(), target));
        self.buf.extend_from_slice(&0i16.to_le_bytes());
    }

    /// Resolves every recorded jump against the final label table.
    ///
    /// # Panics
    /// Panics when a jump offset exceeds the i16 range, which indicates the
    /// executable is too large; this is a compile-time failure rather than
    /// silent truncation.
    fn patch_jumps(&mut self) {
        for (position, target) in &self.patches {
            let label = *self
                .labels
                .get(target)
                .expect("jump to a block missing from the emission order");
            let base = i64::try_from(*position + 2).expect("code offset exceeds i64");
            let dest = i64::try_from(label).expect("label offset exceeds i64");
            let offset =
                i16::try_from(dest - base).expect("jump offset exceeds i16 range; executable too large");
            let bytes = offset.to_le_bytes();
            self.buf[*position] = bytes[0];
            self.buf[*position + 1] = bytes[1];
        }
    }

    fn add_constant(&mut self, constant: Constant) -> u16 {
        if let Some(existing) = self.constants.iter().position(|c| *c == constant) {
            return u16::try_from(existing).expect("constant pool bounded at u16");
        }
        let index = u16::try_from(self.constants.len()).expect("constant pool exceeds u16 range");
        self.constants.push(constant);
        index
    }

    fn add_lambda(&mut self, template: LambdaTemplate) -> u16 {
        let index = u16::try_from(self.lambdas.len()).expect("lambda table exceeds u16 range");
        self.lambdas.push(template);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::{BinaryOp, Literal};
    use crate::graph::{Block, BlockKind};

    fn block(id: u32, kind: BlockKind, instrs: Vec<Instr>, preds: Vec<BlockId>) -> Block {
        Block {
            id: BlockId(id),
            kind,
            instrs,
            preds,
        }
    }

    fn linear_graph(body: Vec<Instr>) -> FlowGraph {
        FlowGraph::new(vec![
            block(0, BlockKind::GraphEntry, vec![Instr::Goto(BlockId(1))], vec![]),
            block(1, BlockKind::TargetEntry, body, vec![BlockId(0)]),
        ])
    }

    #[test]
    fn straight_line_code_has_no_jumps() {
        let graph = linear_graph(vec![
            Instr::Constant(Constant::Literal(Literal::Long(1))),
            Instr::Constant(Constant::Literal(Literal::Long(2))),
            Instr::BinaryOp(BinaryOp::Add),
            Instr::Return,
        ]);
        let code = assemble(&graph);
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadConst as u8,
                0,
                0,
                Opcode::LoadConst as u8,
                1,
                0,
                Opcode::BinaryOp as u8,
                BinaryOp::Add as u8,
                Opcode::Return as u8,
            ]
        );
    }

    #[test]
    fn equal_constants_share_a_pool_slot() {
        let graph = linear_graph(vec![
            Instr::Constant(Constant::Literal(Literal::Long(7))),
            Instr::Pop,
            Instr::Constant(Constant::Literal(Literal::Long(7))),
            Instr::Return,
        ]);
        let code = assemble(&graph);
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadConst as u8,
                0,
                0,
                Opcode::Pop as u8,
                Opcode::LoadConst as u8,
                0,
                0,
                Opcode::Return as u8,
            ]
        );
    }

    #[test]
    fn forward_branch_is_patched() {
        // entry -> b1: branch(true: b2, false: b3, join b4)
        let graph = FlowGraph::new(vec![
            block(0, BlockKind::GraphEntry, vec![Instr::Goto(BlockId(1))], vec![]),
            block(
                1,
                BlockKind::TargetEntry,
                vec![
                    Instr::Constant(Constant::Literal(Literal::Bool(true))),
                    Instr::Branch {
                        true_target: BlockId(2),
                        false_target: Some(BlockId(3)),
                        join: BlockId(4),
                    },
                ],
                vec![BlockId(0)],
            ),
            block(
                2,
                BlockKind::TargetEntry,
                vec![
                    Instr::Constant(Constant::Literal(Literal::Long(1))),
                    Instr::Goto(BlockId(4)),
                ],
                vec![BlockId(1)],
            ),
            block(
                3,
                BlockKind::TargetEntry,
                vec![
                    Instr::Constant(Constant::Literal(Literal::Long(2))),
                    Instr::Goto(BlockId(4)),
                ],
                vec![BlockId(1)],
            ),
            block(4, BlockKind::JoinEntry, vec![Instr::Return], vec![BlockId(2), BlockId(3)]),
        ]);
        let code = assemble(&graph);
        let bytes = code.bytecode();

        // layout: LoadConst(3) JumpIfFalse(3) [b2: LoadConst(3) Jump(3)] [b3: LoadConst(3)] [b4: Return]
        assert_eq!(bytes[3], Opcode::JumpIfFalse as u8);
        let falsy_offset = i16::from_le_bytes([bytes[4], bytes[5]]);
        // after the operand (offset 6), b2 occupies 6 bytes, so b3 is at 12
        assert_eq!(falsy_offset, 6);

        assert_eq!(bytes[9], Opcode::Jump as u8);
        let join_offset = i16::from_le_bytes([bytes[10], bytes[11]]);
        // b3 (3 bytes) sits between the jump operand end (12) and b4 (15)
        assert_eq!(join_offset, 3);
    }

    #[test]
    fn goto_to_next_block_is_elided() {
        let graph = linear_graph(vec![
            Instr::Constant(Constant::Literal(Literal::Null)),
            Instr::Return,
        ]);
        let code = assemble(&graph);
        // the entry's Goto to block 1 vanishes
        assert_eq!(code.bytecode()[0], Opcode::LoadConst as u8);
    }

    #[test]
    fn backward_jump_gets_a_negative_offset() {
        // entry -> header(join) -> branch(body, exit); body -> header
        let graph = FlowGraph::new(vec![
            block(0, BlockKind::GraphEntry, vec![Instr::Goto(BlockId(1))], vec![]),
            block(
                1,
                BlockKind::JoinEntry,
                vec![
                    Instr::Constant(Constant::Literal(Literal::Bool(false))),
                    Instr::Branch {
                        true_target: BlockId(2),
                        false_target: None,
                        join: BlockId(3),
                    },
                ],
                vec![BlockId(0), BlockId(2)],
            ),
            block(2, BlockKind::TargetEntry, vec![Instr::Goto(BlockId(1))], vec![BlockId(1)]),
            block(
                3,
                BlockKind::TargetEntry,
                vec![
                    Instr::Constant(Constant::Literal(Literal::Null)),
                    Instr::Return,
                ],
                vec![BlockId(1)],
            ),
        ]);
        let code = assemble(&graph);
        let bytes = code.bytecode();
        // find the body's Jump back to the header (the last Jump emitted)
        let jump_at = bytes
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| **b == Opcode::Jump as u8)
            .map(|(i, _)| i)
            .expect("backward jump expected");
        let offset = i16::from_le_bytes([bytes[jump_at + 1], bytes[jump_at + 2]]);
        assert!(offset < 0, "loop back-edge must jump backward, got {offset}");
    }
}
