//! The flow-graph IR.
//!
//! Expressions lower to a control-flow graph of basic blocks. Blocks carry
//! their instructions in a plain vector and reference each other by
//! [`BlockId`]; the graph entry is the first block, and block ids increase
//! monotonically in creation order. `TargetEntry` blocks have exactly one
//! predecessor; `JoinEntry` blocks merge at least two.

pub mod builder;
pub mod dot;

use crate::expressions::{BinaryOp, Datum, LambdaTemplate, Literal, UnaryOp};
use crate::intern::SymbolId;
use crate::natives::NativeId;

/// Index of a basic block inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What kind of entry a block is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The graph's root entry block.
    GraphEntry,
    /// A straight-line block with a single predecessor.
    TargetEntry,
    /// A merge block with two or more predecessors.
    JoinEntry,
}

/// A compile-time constant carried by a `Constant` instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Literal(Literal),
    /// A quoted datum, materialized into pairs when loaded.
    Datum(Datum),
}

/// One IR instruction.
///
/// Instructions that satisfy [`Instr::is_definition`] produce a value that
/// later instructions may consume; the rest are pure control or effects.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Constant(Constant),
    MakeLambda(Box<LambdaTemplate>),
    LoadLocal(SymbolId),
    StoreVariable(SymbolId),
    UnaryOp(UnaryOp),
    BinaryOp(BinaryOp),
    Cast(SymbolId),
    InstanceOf(SymbolId),
    /// Evaluates the datum on top of the stack.
    Eval,
    /// Calls a lambda resolved at compile time; the callee object is still
    /// taken from the stack.
    Invoke { argc: u8 },
    /// Calls whatever the stack-top target turns out to be at runtime.
    InvokeDynamic { argc: u8 },
    /// Calls a native procedure resolved at compile time.
    InvokeNative { native: NativeId, argc: u8 },
    Branch {
        true_target: BlockId,
        false_target: Option<BlockId>,
        join: BlockId,
    },
    Goto(BlockId),
    Throw,
    Return,
    /// Discards an unconsumed definition, keeping the operand stack
    /// balanced in effect position.
    Pop,
}

impl Instr {
    /// Whether this instruction produces a value consumable downstream.
    #[must_use]
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            Self::Constant(_)
                | Self::MakeLambda(_)
                | Self::LoadLocal(_)
                | Self::UnaryOp(_)
                | Self::BinaryOp(_)
                | Self::Cast(_)
                | Self::InstanceOf(_)
                | Self::Eval
                | Self::Invoke { .. }
                | Self::InvokeDynamic { .. }
                | Self::InvokeNative { .. }
        )
    }

    /// Terminators end a block; every block ends in exactly one.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Branch { .. } | Self::Goto(_) | Self::Throw | Self::Return
        )
    }
}

/// A basic block.
#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub instrs: Vec<Instr>,
    pub preds: Vec<BlockId>,
}

/// The lowered control-flow graph of one executable.
#[derive(Debug)]
pub struct FlowGraph {
    blocks: Vec<Block>,
}

impl FlowGraph {
    #[must_use]
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Successor blocks, read off the terminator.
    #[must_use]
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        match self.block(id).instrs.last() {
            Some(Instr::Goto(target)) => vec![*target],
            Some(Instr::Branch {
                true_target,
                false_target,
                join,
            }) => {
                let mut out = vec![*true_target];
                out.push(false_target.unwrap_or(*join));
                out
            }
            _ => vec![],
        }
    }

    /// Blocks in reverse postorder starting from the entry.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        self.postorder_from(self.entry(), &mut visited, &mut postorder);
        postorder.reverse();
        postorder
    }

    fn postorder_from(&self, id: BlockId, visited: &mut [bool], out: &mut Vec<BlockId>) {
        if visited[id.index()] {
            return;
        }
        visited[id.index()] = true;
        // visiting successors in reverse keeps the true branch adjacent to
        // its predecessor in the final reverse-postorder layout
        for succ in self.successors(id).into_iter().rev() {
            self.postorder_from(succ, visited, out);
        }
        out.push(id);
    }
}
