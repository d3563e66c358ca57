//! Lowers macro-expanded expressions into a [`FlowGraph`].
//!
//! The builder works in two modes per expression: *effect* lowering leaves
//! the operand stack untouched, *value* lowering leaves exactly one
//! definition. Call targets that resolve at compile time pick their invoke
//! flavor here: a native procedure becomes `InvokeNative`, a known lambda
//! becomes `Invoke`, anything else `InvokeDynamic`.

use crate::error::CompileError;
use crate::expressions::{BinaryOp, CaseClause, Clause, Datum, Expr, Literal};
use crate::heap::Heap;
use crate::intern::{SymbolId, Symbols};
use crate::natives::NativeRegistry;
use crate::scope::{ScopeArena, ScopeId};
use crate::types::HeapData;
use crate::value::Value;

use super::{Block, BlockId, BlockKind, Constant, FlowGraph, Instr};

type BuildResult<T> = Result<T, CompileError>;

pub struct FlowGraphBuilder<'a> {
    scopes: &'a mut ScopeArena,
    heap: &'a Heap,
    syms: &'a mut Symbols,
    natives: &'a NativeRegistry,
    blocks: Vec<Block>,
    current: BlockId,
    scope: ScopeId,
}

impl<'a> FlowGraphBuilder<'a> {
    /// Lowers a top-level expression sequence. The graph entry `Goto`s the
    /// first target block; the last expression's value is `Return`ed
    /// (null when the sequence is empty or ends without a value).
    pub fn build<'b>(
        exprs: &[Expr],
        scope: ScopeId,
        scopes: &'b mut ScopeArena,
        heap: &'b Heap,
        syms: &'b mut Symbols,
        natives: &'b NativeRegistry,
    ) -> BuildResult<FlowGraph> {
        let mut builder = FlowGraphBuilder {
            scopes,
            heap,
            syms,
            natives,
            blocks: Vec::new(),
            current: BlockId(0),
            scope,
        };

        let entry = builder.new_block(BlockKind::GraphEntry);
        let first = builder.new_block(BlockKind::TargetEntry);
        builder.current = entry;
        builder.terminate(Instr::Goto(first));
        builder.current = first;

        match exprs.split_last() {
            Some((last, init)) => {
                for expr in init {
                    builder.lower_effect(expr)?;
                }
                builder.lower_value(last)?;
            }
            None => builder.emit(Instr::Constant(Constant::Literal(Literal::Null))),
        }
        builder.terminate(Instr::Return);

        // dead blocks opened after a mid-expression throw still need a
        // terminator so every block ends in exactly one
        for block in &mut builder.blocks {
            if !block.instrs.last().is_some_and(Instr::is_terminator) {
                block.instrs.push(Instr::Return);
            }
        }
        Ok(FlowGraph::new(builder.blocks))
    }

    /// Lowers a lambda body under a fresh compile scope that declares the
    /// parameters, chained off the lambda's owning scope.
    pub fn build_lambda(
        args: &[SymbolId],
        body: &[Expr],
        owning_scope: ScopeId,
        scopes: &'a mut ScopeArena,
        heap: &'a Heap,
        syms: &'a mut Symbols,
        natives: &'a NativeRegistry,
    ) -> BuildResult<FlowGraph> {
        let compile_scope = scopes.new_scope(Some(owning_scope));
        for arg in args {
            scopes.add(compile_scope, *arg, None);
        }
        let graph = Self::build(body, compile_scope, scopes, heap, syms, natives);
        scopes.release(compile_scope);
        graph
    }

    fn new_block(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).expect("flow graph exceeded u32 blocks"));
        self.blocks.push(Block {
            id,
            kind,
            instrs: Vec::new(),
            preds: Vec::new(),
        });
        id
    }

    fn emit(&mut self, instr: Instr) {
        debug_assert!(!instr.is_terminator(), "terminators go through terminate()");
        self.block_mut(self.current).instrs.push(instr);
    }

    /// Ends the current block, recording predecessor edges.
    fn terminate(&mut self, instr: Instr) {
        let from = self.current;
        match &instr {
            Instr::Goto(target) => self.add_pred(*target, from),
            Instr::Branch {
                true_target,
                false_target,
                join,
            } => {
                let (true_target, false_target, join) = (*true_target, *false_target, *join);
                self.add_pred(true_target, from);
                match false_target {
                    Some(f) => self.add_pred(f, from),
                    None => self.add_pred(join, from),
                }
            }
            _ => {}
        }
        self.block_mut(from).instrs.push(instr);
    }

    fn add_pred(&mut self, block: BlockId, pred: BlockId) {
        self.block_mut(block).preds.push(pred);
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Lowers an expression for its side effects only.
    fn lower_effect(&mut self, expr: &Expr) -> BuildResult<()> {
        match expr {
            Expr::Binding { name, value } | Expr::LocalDef { symbol: name, value } => {
                self.lower_value(value)?;
                self.emit(Instr::StoreVariable(*name));
                Ok(())
            }
            Expr::Set { symbol, value } => {
                self.lower_value(value)?;
                self.emit(Instr::StoreVariable(*symbol));
                Ok(())
            }
            // macros were consumed by the expander
            Expr::MacroDef { .. } => Ok(()),
            Expr::Begin(body) | Expr::ModuleDef { body, .. } => {
                for child in body {
                    self.lower_effect(child)?;
                }
                Ok(())
            }
            Expr::When { .. } | Expr::Cond { .. } | Expr::Case { .. } | Expr::While { .. } => {
                self.lower_branching(expr, false)
            }
            Expr::Throw(value) => {
                self.lower_value(value)?;
                self.terminate(Instr::Throw);
                let dead = self.new_block(BlockKind::TargetEntry);
                self.current = dead;
                Ok(())
            }
            Expr::Let { .. } | Expr::LetRec { .. } => self.lower_let(expr, false),
            _ => {
                self.lower_value(expr)?;
                self.emit(Instr::Pop);
                Ok(())
            }
        }
    }

    /// Lowers an expression so exactly one definition is left on the
    /// stack.
    fn lower_value(&mut self, expr: &Expr) -> BuildResult<()> {
        match expr {
            Expr::Literal(Literal::Symbol(sym)) => {
                self.emit(Instr::LoadLocal(*sym));
                Ok(())
            }
            Expr::Literal(lit) => {
                self.emit(Instr::Constant(Constant::Literal(lit.clone())));
                Ok(())
            }
            Expr::Quoted(datum) => {
                self.emit(Instr::Constant(Constant::Datum(datum.clone())));
                Ok(())
            }
            // definitions evaluate to null in value position
            Expr::Binding { .. } | Expr::LocalDef { .. } | Expr::Set { .. } | Expr::MacroDef { .. } => {
                debug_assert!(expr.is_definition());
                self.lower_effect(expr)?;
                self.emit(Instr::Constant(Constant::Literal(Literal::Null)));
                Ok(())
            }
            Expr::BinaryOp { op, left, right } => {
                self.lower_value(left)?;
                self.lower_value(right)?;
                self.emit(Instr::BinaryOp(*op));
                Ok(())
            }
            Expr::UnaryOp { op, value } => {
                self.lower_value(value)?;
                self.emit(Instr::UnaryOp(*op));
                Ok(())
            }
            Expr::CallProc { target, args } => self.lower_call(target, args),
            Expr::Begin(body) | Expr::ModuleDef { body, .. } => {
                match body.split_last() {
                    Some((last, init)) => {
                        for child in init {
                            self.lower_effect(child)?;
                        }
                        self.lower_value(last)?;
                    }
                    None => self.emit(Instr::Constant(Constant::Literal(Literal::Null))),
                }
                Ok(())
            }
            Expr::When { .. } | Expr::Cond { .. } | Expr::Case { .. } | Expr::While { .. } => {
                self.lower_branching(expr, true)
            }
            Expr::Let { .. } | Expr::LetRec { .. } => self.lower_let(expr, true),
            Expr::LambdaDef(template) => {
                self.emit(Instr::MakeLambda(Box::new(template.clone())));
                Ok(())
            }
            Expr::Import(symbol) => {
                self.emit(Instr::Constant(Constant::Literal(Literal::Symbol(*symbol))));
                self.invoke_native_named("import", 1)
            }
            Expr::Throw(value) => {
                self.lower_value(value)?;
                self.terminate(Instr::Throw);
                let dead = self.new_block(BlockKind::TargetEntry);
                self.current = dead;
                Ok(())
            }
            Expr::New { class, args } => {
                self.emit(Instr::Constant(Constant::Literal(Literal::Symbol(*class))));
                for arg in args {
                    self.lower_value(arg)?;
                }
                self.invoke_native_named("class:new", args.len() + 1)
            }
            Expr::NewMap(entries) => {
                let map_sym = self.syms.intern("Map");
                self.emit(Instr::Constant(Constant::Literal(Literal::Symbol(map_sym))));
                for (key, value) in entries {
                    self.lower_value(key)?;
                    self.lower_value(value)?;
                }
                self.invoke_native_named("class:new", entries.len() * 2 + 1)
            }
            Expr::Cast { class, value } => {
                self.lower_value(value)?;
                self.emit(Instr::Cast(*class));
                Ok(())
            }
            Expr::InstanceOf { class, value } => {
                self.lower_value(value)?;
                self.emit(Instr::InstanceOf(*class));
                Ok(())
            }
            Expr::LoadInstanceMethod {
                method,
                receiver,
                args,
            } => {
                self.emit(Instr::Constant(Constant::Literal(Literal::Symbol(*method))));
                self.lower_value(receiver)?;
                for arg in args {
                    self.lower_value(arg)?;
                }
                self.invoke_native_named("class:method", args.len() + 2)
            }
            Expr::List(items) => {
                for item in items {
                    self.lower_value(item)?;
                }
                self.invoke_native_named("list", items.len())
            }
            Expr::RxOp { op, args } => {
                let Some(native) = self.natives.lookup(*op) else {
                    return Err(CompileError::new(format!(
                        "reactive operator `{}` is not available (build without the `rx` feature?)",
                        self.syms.name(*op)
                    )));
                };
                for arg in args {
                    self.lower_value(arg)?;
                }
                self.emit_invoke_native(native, args.len())
            }
        }
    }

    /// Arguments left-to-right, then the target; the target's compile-time
    /// resolution picks the invoke flavor.
    fn lower_call(&mut self, target: &Expr, args: &[Expr]) -> BuildResult<()> {
        let argc = self.checked_argc(args.len())?;

        if let Some(sym) = target.as_literal_symbol() {
            // `(eval datum)` lowers to the Eval instruction
            if args.len() == 1
                && self.natives.eval_id().is_some()
                && self.natives.lookup(sym) == self.natives.eval_id()
            {
                self.lower_value(&args[0])?;
                self.emit(Instr::Eval);
                return Ok(());
            }

            match self.scopes.lookup_value(self.scope, sym, true) {
                Some(Value::Native(native)) => {
                    let proc = self.natives.get(native);
                    if !proc.arity.accepts(args.len()) {
                        return Err(CompileError::new(format!(
                            "native `{}` does not accept {} argument(s)",
                            proc.name,
                            args.len()
                        )));
                    }
                    for arg in args {
                        self.lower_value(arg)?;
                    }
                    self.emit(Instr::InvokeNative { native, argc });
                    return Ok(());
                }
                Some(Value::Ref(id)) if matches!(self.heap.get(id), HeapData::Lambda(_)) => {
                    for arg in args {
                        self.lower_value(arg)?;
                    }
                    self.emit(Instr::LoadLocal(sym));
                    self.emit(Instr::Invoke { argc });
                    return Ok(());
                }
                _ => {}
            }
        }

        for arg in args {
            self.lower_value(arg)?;
        }
        self.lower_value(target)?;
        self.emit(Instr::InvokeDynamic { argc });
        Ok(())
    }

    fn lower_let(&mut self, expr: &Expr, want_value: bool) -> BuildResult<()> {
        let (bindings, body, recursive) = match expr {
            Expr::Let { bindings, body } => (bindings, body, false),
            Expr::LetRec { bindings, body } => (bindings, body, true),
            _ => unreachable!("lower_let called on a non-let"),
        };

        let outer = self.scope;
        let compile_scope = self.scopes.new_scope(Some(outer));
        if recursive {
            // letrec: every name is visible to every initializer
            for (name, _) in bindings {
                self.scopes.add(compile_scope, *name, None);
            }
            self.scope = compile_scope;
        }
        for (name, value) in bindings {
            let binding = Expr::Binding {
                name: *name,
                value: Box::new(value.clone()),
            };
            self.lower_effect(&binding)?;
            if !recursive {
                self.scopes.add(compile_scope, *name, None);
            }
        }
        self.scope = compile_scope;

        let result = (|| {
            match body.split_last() {
                Some((last, init)) => {
                    for child in init {
                        self.lower_effect(child)?;
                    }
                    if want_value {
                        self.lower_value(last)?;
                    } else {
                        self.lower_effect(last)?;
                    }
                }
                None if want_value => self.emit(Instr::Constant(Constant::Literal(Literal::Null))),
                None => {}
            }
            Ok(())
        })();
        self.scope = outer;
        self.scopes.release(compile_scope);
        result
    }

    /// Branch-and-join lowering for `when`, `cond`, `case` and `while`.
    fn lower_branching(&mut self, expr: &Expr, want_value: bool) -> BuildResult<()> {
        match expr {
            Expr::When { test, actions } => {
                self.lower_value(test)?;
                let true_block = self.new_block(BlockKind::TargetEntry);
                let false_block = want_value.then(|| self.new_block(BlockKind::TargetEntry));
                let join = self.new_block(BlockKind::JoinEntry);
                self.terminate(Instr::Branch {
                    true_target: true_block,
                    false_target: false_block,
                    join,
                });

                self.current = true_block;
                self.lower_actions(actions, want_value)?;
                self.terminate(Instr::Goto(join));

                if let Some(false_block) = false_block {
                    self.current = false_block;
                    self.emit(Instr::Constant(Constant::Literal(Literal::Null)));
                    self.terminate(Instr::Goto(join));
                }
                self.current = join;
                Ok(())
            }
            Expr::Cond { clauses, alternate } => {
                let join = self.new_block(BlockKind::JoinEntry);
                for clause in clauses {
                    self.lower_value(&clause.test)?;
                    let true_block = self.new_block(BlockKind::TargetEntry);
                    let next = self.new_block(BlockKind::TargetEntry);
                    self.terminate(Instr::Branch {
                        true_target: true_block,
                        false_target: Some(next),
                        join,
                    });
                    self.current = true_block;
                    self.lower_actions(&clause.actions, want_value)?;
                    self.terminate(Instr::Goto(join));
                    self.current = next;
                }
                // the fall-through arm: explicit else or implicit null
                match alternate {
                    Some(actions) => self.lower_actions(actions, want_value)?,
                    None if want_value => self.emit(Instr::Constant(Constant::Literal(Literal::Null))),
                    None => {}
                }
                self.terminate(Instr::Goto(join));
                self.current = join;
                Ok(())
            }
            Expr::Case {
                key,
                clauses,
                alternate,
            } => {
                // evaluate the key once into a compiler temporary
                let tmp = self.syms.gensym("case");
                self.lower_value(key)?;
                self.emit(Instr::StoreVariable(tmp));

                let desugared = Expr::Cond {
                    clauses: clauses
                        .iter()
                        .map(|CaseClause { datum, actions }| Clause {
                            test: Expr::BinaryOp {
                                op: BinaryOp::Equals,
                                left: Box::new(Expr::Literal(Literal::Symbol(tmp))),
                                // symbol datums compare as data, not as loads
                                right: Box::new(match datum {
                                    Literal::Symbol(sym) => {
                                        Expr::Quoted(Datum::Atom(Literal::Symbol(*sym)))
                                    }
                                    other => Expr::Literal(other.clone()),
                                }),
                            },
                            actions: actions.clone(),
                        })
                        .collect(),
                    alternate: alternate.clone(),
                };
                self.lower_branching(&desugared, want_value)
            }
            Expr::While { test, body } => {
                let header = self.new_block(BlockKind::JoinEntry);
                self.terminate(Instr::Goto(header));
                self.current = header;
                self.lower_value(test)?;
                let body_block = self.new_block(BlockKind::TargetEntry);
                let exit = self.new_block(BlockKind::TargetEntry);
                self.terminate(Instr::Branch {
                    true_target: body_block,
                    false_target: None,
                    join: exit,
                });

                self.current = body_block;
                for child in body {
                    self.lower_effect(child)?;
                }
                self.terminate(Instr::Goto(header));

                self.current = exit;
                if want_value {
                    self.emit(Instr::Constant(Constant::Literal(Literal::Null)));
                }
                Ok(())
            }
            _ => unreachable!("lower_branching called on a non-branching expression"),
        }
    }

    fn lower_actions(&mut self, actions: &[Expr], want_value: bool) -> BuildResult<()> {
        match actions.split_last() {
            Some((last, init)) => {
                for child in init {
                    self.lower_effect(child)?;
                }
                if want_value {
                    self.lower_value(last)?;
                } else {
                    self.lower_effect(last)?;
                }
            }
            None if want_value => self.emit(Instr::Constant(Constant::Literal(Literal::Null))),
            None => {}
        }
        Ok(())
    }

    fn invoke_native_named(&mut self, name: &'static str, argc: usize) -> BuildResult<()> {
        let symbol = self.syms.intern(name);
        let native = self
            .natives
            .lookup(symbol)
            .ok_or_else(|| CompileError::new(format!("native `{name}` is not registered")))?;
        self.emit_invoke_native(native, argc)
    }

    fn emit_invoke_native(&mut self, native: crate::natives::NativeId, argc: usize) -> BuildResult<()> {
        let argc = self.checked_argc(argc)?;
        self.emit(Instr::InvokeNative { native, argc });
        Ok(())
    }

    fn checked_argc(&self, argc: usize) -> BuildResult<u8> {
        u8::try_from(argc).map_err(|_| CompileError::new("call has more than 255 arguments"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Parser;

    struct Fixture {
        syms: Symbols,
        heap: Heap,
        scopes: ScopeArena,
        natives: NativeRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let mut syms = Symbols::new();
            let natives = NativeRegistry::bootstrap(&mut syms);
            Self {
                syms,
                heap: Heap::new(),
                scopes: ScopeArena::new(),
                natives,
            }
        }

        fn build(&mut self, source: &str) -> FlowGraph {
            let root = self.scopes.new_scope(None);
            let script = Parser::parse_script(
                source,
                None,
                root,
                &mut self.syms,
                &mut self.heap,
                &mut self.scopes,
            )
            .expect("test source must parse");
            FlowGraphBuilder::build(
                &script.body,
                script.scope,
                &mut self.scopes,
                &self.heap,
                &mut self.syms,
                &self.natives,
            )
            .expect("test source must lower")
        }
    }

    fn assert_well_formed(graph: &FlowGraph) {
        for id in graph.reverse_postorder() {
            let block = graph.block(id);
            let terminators = block.instrs.iter().filter(|i| i.is_terminator()).count();
            assert_eq!(terminators, 1, "block {id:?} must end in exactly one terminator");
            assert!(
                block.instrs.last().is_some_and(Instr::is_terminator),
                "block {id:?} must end with its terminator"
            );
            match block.kind {
                BlockKind::GraphEntry => assert!(block.preds.is_empty()),
                BlockKind::TargetEntry => assert!(block.preds.len() <= 1),
                BlockKind::JoinEntry => assert!(
                    block.preds.len() >= 2,
                    "join {id:?} must merge at least two predecessors"
                ),
            }
        }
    }

    #[test]
    fn graph_entry_points_at_a_target_block() {
        let mut fx = Fixture::new();
        let graph = fx.build("(+ 1 2)");
        let entry = graph.block(graph.entry());
        assert_eq!(entry.kind, BlockKind::GraphEntry);
        assert_eq!(graph.successors(graph.entry()).len(), 1);
        assert_well_formed(&graph);
    }

    #[test]
    fn empty_program_returns_null() {
        let mut fx = Fixture::new();
        let graph = fx.build("");
        let body = graph.block(BlockId(1));
        assert_eq!(
            body.instrs,
            vec![Instr::Constant(Constant::Literal(Literal::Null)), Instr::Return]
        );
    }

    #[test]
    fn binary_op_lowers_operands_left_to_right() {
        let mut fx = Fixture::new();
        let graph = fx.build("(+ 99 1)");
        let body = graph.block(BlockId(1));
        assert_eq!(
            body.instrs,
            vec![
                Instr::Constant(Constant::Literal(Literal::Long(99))),
                Instr::Constant(Constant::Literal(Literal::Long(1))),
                Instr::BinaryOp(BinaryOp::Add),
                Instr::Return,
            ]
        );
    }

    #[test]
    fn native_call_resolves_to_invoke_native_when_bound() {
        let mut fx = Fixture::new();
        let root = fx.scopes.new_scope(None);
        // bind `list` the way the runtime's init scope does
        let sym = fx.syms.intern("list");
        let native = fx.natives.lookup(sym).unwrap();
        fx.scopes.add(root, sym, Some(Value::Native(native)));

        let script = Parser::parse_script(
            "(list 1 2 3)",
            None,
            root,
            &mut fx.syms,
            &mut fx.heap,
            &mut fx.scopes,
        )
        .unwrap();
        let graph = FlowGraphBuilder::build(
            &script.body,
            script.scope,
            &mut fx.scopes,
            &fx.heap,
            &mut fx.syms,
            &fx.natives,
        )
        .unwrap();
        let body = graph.block(BlockId(1));
        assert!(matches!(
            body.instrs[3],
            Instr::InvokeNative { argc: 3, .. }
        ));
    }

    #[test]
    fn known_lambda_call_resolves_to_invoke() {
        let mut fx = Fixture::new();
        let graph = fx.build("(defn double (x) (* x 2)) (double 4)");
        let body = graph.block(BlockId(1));
        assert!(body.instrs.iter().any(|i| matches!(i, Instr::Invoke { argc: 1 })));
    }

    #[test]
    fn unknown_target_falls_back_to_invoke_dynamic() {
        let mut fx = Fixture::new();
        let graph = fx.build("(mystery 1)");
        let body = graph.block(BlockId(1));
        assert!(body.instrs.iter().any(|i| matches!(i, Instr::InvokeDynamic { argc: 1 })));
    }

    #[test]
    fn when_builds_branch_and_join() {
        let mut fx = Fixture::new();
        let graph = fx.build("(when #t 1 2)");
        assert_well_formed(&graph);
        let has_branch = graph
            .blocks()
            .iter()
            .any(|b| b.instrs.iter().any(|i| matches!(i, Instr::Branch { .. })));
        assert!(has_branch);
    }

    #[test]
    fn cond_with_else_is_well_formed() {
        let mut fx = Fixture::new();
        let graph = fx.build("(cond ((= 1 2) 10) ((= 1 1) 20) (else 30))");
        assert_well_formed(&graph);
    }

    #[test]
    fn while_loop_header_is_a_join_with_two_predecessors() {
        let mut fx = Fixture::new();
        let graph = fx.build("(define i 0) (while (< i 10) (set! i (+ i 1)))");
        assert_well_formed(&graph);
        let join = graph
            .blocks()
            .iter()
            .find(|b| b.kind == BlockKind::JoinEntry)
            .expect("loop header expected");
        assert_eq!(join.preds.len(), 2);
    }

    #[test]
    fn effect_position_values_are_popped() {
        let mut fx = Fixture::new();
        let graph = fx.build("1 2");
        let body = graph.block(BlockId(1));
        assert_eq!(
            body.instrs,
            vec![
                Instr::Constant(Constant::Literal(Literal::Long(1))),
                Instr::Pop,
                Instr::Constant(Constant::Literal(Literal::Long(2))),
                Instr::Return,
            ]
        );
    }

    #[test]
    fn quoted_datum_lowers_to_a_constant() {
        use crate::expressions::Datum;
        let mut fx = Fixture::new();
        let graph = fx.build("'(1 2)");
        let body = graph.block(BlockId(1));
        assert!(matches!(body.instrs[0], Instr::Constant(Constant::Datum(Datum::List(_)))));
    }

    #[test]
    fn block_ids_increase_in_creation_order() {
        let mut fx = Fixture::new();
        let graph = fx.build("(when #t 1)");
        for (index, block) in graph.blocks().iter().enumerate() {
            assert_eq!(block.id.index(), index);
        }
    }
}
