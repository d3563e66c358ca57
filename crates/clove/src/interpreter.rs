//! The stack interpreter.
//!
//! Executes assembled [`CodeRegion`]s against the operand stack and the
//! frame stack. Errors are values: a failing instruction pushes an `Error`
//! object, and the dispatch loop then unwinds frame by frame, leaving the
//! error on the stack for the enclosing context (ultimately the caller of
//! [`Vm::execute`]).
//!
//! Collections run at instruction boundaries, where every live value is
//! reachable from the operand stack or a scope; mid-instruction
//! allocations that find the nursery full overflow into the old
//! generation instead of moving objects under a temporary.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::arith::{apply_binary, apply_unary};
use crate::bytecode::{CodeRegion, Opcode, assembler::assemble};
use crate::error::{ErrorKind, RunError, RunResult};
use crate::expressions::{BinaryOp, Datum, Literal, UnaryOp};
use crate::graph::Constant;
use crate::graph::builder::FlowGraphBuilder;
use crate::heap::{Heap, HeapId, RootSet};
use crate::intern::{SymbolId, Symbols};
use crate::io::PrintWriter;
use crate::modules::ModuleRegistry;
use crate::natives::{NativeArgs, NativeId, NativeOutcome, NativeRegistry};
use crate::scope::{ScopeArena, ScopeId};
use crate::types::{ClassRegistry, ErrorObj, HeapData, Lambda, Pair};
use crate::value::Value;

/// The operand stack: values flowing between instructions.
#[derive(Debug, Default)]
pub struct OperationStack {
    values: Vec<Value>,
}

impl OperationStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.values.pop()
    }

    #[must_use]
    pub fn top(&self) -> Option<Value> {
        self.values.last().copied()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.values.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.values.truncate(depth);
    }

    /// Removes and returns every value above `depth`, oldest first.
    pub fn drain_from(&mut self, depth: usize) -> Vec<Value> {
        self.values.split_off(depth)
    }

    pub(crate) fn values_mut(&mut self) -> &mut Vec<Value> {
        &mut self.values
    }
}

/// What a frame is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTarget {
    Script,
    Lambda(Option<SymbolId>),
    Native(NativeId),
}

/// One call record.
#[derive(Debug)]
pub struct StackFrame {
    pub id: u32,
    pub target: FrameTarget,
    pub locals: ScopeId,
    /// Instruction pointer to resume at when control returns here.
    pub resume_ip: usize,
    /// Code being executed; absent for native frames.
    pub code: Option<Rc<CodeRegion>>,
    /// Operand-stack depth at entry; the return value sits right above it.
    pub saved_depth: usize,
    /// Whether the frame's scope is released on pop.
    owns_scope: bool,
}

/// The executor: borrows every runtime subsystem for the duration of one
/// entry-point call.
pub struct Vm<'a> {
    pub heap: &'a mut Heap,
    pub scopes: &'a mut ScopeArena,
    pub stack: &'a mut OperationStack,
    pub frames: &'a mut Vec<StackFrame>,
    pub syms: &'a mut Symbols,
    pub natives: &'a NativeRegistry,
    pub classes: &'a ClassRegistry,
    pub modules: &'a mut ModuleRegistry,
    pub globals: ScopeId,
    pub printer: &'a mut dyn PrintWriter,
    next_frame_id: u32,
}

impl<'a> Vm<'a> {
    #[expect(clippy::too_many_arguments, reason = "the vm borrows each runtime subsystem")]
    pub fn new(
        heap: &'a mut Heap,
        scopes: &'a mut ScopeArena,
        stack: &'a mut OperationStack,
        frames: &'a mut Vec<StackFrame>,
        syms: &'a mut Symbols,
        natives: &'a NativeRegistry,
        classes: &'a ClassRegistry,
        modules: &'a mut ModuleRegistry,
        globals: ScopeId,
        printer: &'a mut dyn PrintWriter,
    ) -> Self {
        Self {
            heap,
            scopes,
            stack,
            frames,
            syms,
            natives,
            classes,
            modules,
            globals,
            printer,
            next_frame_id: 0,
        }
    }

    /// Begins execution of an assembled executable in a fresh frame and
    /// runs it to completion. The result is the stack top (an `Error`
    /// object if execution failed), or null when nothing was produced.
    pub fn execute(
        &mut self,
        code: Rc<CodeRegion>,
        target: FrameTarget,
        locals: ScopeId,
        owns_scope: bool,
    ) -> Value {
        let base = self.frames.len();
        self.push_frame(target, locals, Some(code), owns_scope);
        self.run_loop(base);
        self.stack.pop().unwrap_or(Value::Null)
    }

    pub fn push_frame(
        &mut self,
        target: FrameTarget,
        locals: ScopeId,
        code: Option<Rc<CodeRegion>>,
        owns_scope: bool,
    ) {
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        self.frames.push(StackFrame {
            id,
            target,
            locals,
            resume_ip: 0,
            code,
            saved_depth: self.stack.depth(),
            owns_scope,
        });
    }

    pub fn pop_frame(&mut self) -> StackFrame {
        let frame = self.frames.pop().expect("frame stack underflow");
        if frame.owns_scope {
            self.scopes.release(frame.locals);
        }
        frame
    }

    fn current_frame(&self) -> &StackFrame {
        self.frames.last().expect("no active frame")
    }

    fn current_frame_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("no active frame")
    }

    /// The scope symbol lookups run against: the innermost frame executing
    /// bytecode (native frames only carry `argN` bindings).
    #[must_use]
    pub fn current_env(&self) -> ScopeId {
        self.frames
            .iter()
            .rev()
            .find(|f| !matches!(f.target, FrameTarget::Native(_)))
            .map_or(self.globals, |f| f.locals)
    }

    /// The main dispatch loop; runs until the frame stack shrinks back to
    /// `base`.
    fn run_loop(&mut self, base: usize) {
        if self.frames.len() <= base {
            return;
        }
        let mut code = self
            .current_frame()
            .code
            .clone()
            .expect("run_loop entered on a native frame");
        let mut ip = self.current_frame().resume_ip;

        loop {
            // safe point: every live value is rooted between instructions
            self.maybe_collect();

            // an error on top short-circuits to the next frame pop
            if self.error_on_top() {
                let error = self.stack.pop().expect("error checked on top");
                let frame = self.pop_frame();
                self.stack.truncate(frame.saved_depth);
                self.stack.push(error);
                if self.frames.len() <= base {
                    return;
                }
                let top = self.current_frame();
                code = top.code.clone().expect("resumed frame must carry code");
                ip = top.resume_ip;
                continue;
            }

            let byte = code.bytecode()[ip];
            ip += 1;
            let op = Opcode::from_repr(byte).expect("invalid opcode in assembled code");
            match op {
                Opcode::Nop => {}
                Opcode::LoadConst => {
                    let index = fetch_u16(&code, &mut ip);
                    let constant = code.constant(index).clone();
                    match self.load_constant(&constant) {
                        Ok(value) => self.stack.push(value),
                        Err(err) => self.raise(&err),
                    }
                }
                Opcode::MakeLambda => {
                    let index = fetch_u16(&code, &mut ip);
                    let template = code.lambda_template(index).clone();
                    let scope = self.current_frame().locals;
                    let lambda = Lambda::from_template(&template, scope);
                    match self.alloc_value(HeapData::Lambda(lambda)) {
                        Ok(value) => self.stack.push(value),
                        Err(err) => self.raise(&err),
                    }
                }
                Opcode::LoadLocal => {
                    let sym = SymbolId::from_raw(fetch_u32(&code, &mut ip));
                    let env = self.current_frame().locals;
                    match self.scopes.resolve(env, sym, true) {
                        Some((sid, slot)) => {
                            match self.scopes.scope(sid).locals()[slot].value {
                                Some(value) => self.stack.push(value),
                                None => self.raise(&RunError::lookup_error(format!(
                                    "symbol `{}` is unbound",
                                    self.syms.name(sym)
                                ))),
                            }
                        }
                        None => self.raise(&RunError::lookup_error(format!(
                            "unknown symbol `{}`",
                            self.syms.name(sym)
                        ))),
                    }
                }
                Opcode::StoreLocal => {
                    let sym = SymbolId::from_raw(fetch_u32(&code, &mut ip));
                    let value = self.pop_operand();
                    let env = self.current_frame().locals;
                    self.scopes.store(env, sym, value);
                }
                Opcode::UnaryOp => {
                    let op = UnaryOp::from_repr(fetch_u8(&code, &mut ip))
                        .expect("invalid unary operator in assembled code");
                    let value = self.pop_operand();
                    match apply_unary(self, op, value) {
                        Ok(result) => self.stack.push(result),
                        Err(err) => self.raise(&err),
                    }
                }
                Opcode::BinaryOp => {
                    let op = BinaryOp::from_repr(fetch_u8(&code, &mut ip))
                        .expect("invalid binary operator in assembled code");
                    let rhs = self.pop_operand();
                    let lhs = self.pop_operand();
                    match apply_binary(self, op, lhs, rhs) {
                        Ok(result) => self.stack.push(result),
                        Err(err) => self.raise(&err),
                    }
                }
                Opcode::Cast => {
                    let sym = SymbolId::from_raw(fetch_u32(&code, &mut ip));
                    let value = self.pop_operand();
                    match self.check_instance(value, sym) {
                        Ok(true) => self.stack.push(value),
                        Ok(false) => self.raise(&RunError::type_error(format!(
                            "cannot cast {} to {}",
                            value.class_kind(self.heap),
                            self.syms.name(sym)
                        ))),
                        Err(err) => self.raise(&err),
                    }
                }
                Opcode::InstanceOf => {
                    let sym = SymbolId::from_raw(fetch_u32(&code, &mut ip));
                    let value = self.pop_operand();
                    match self.check_instance(value, sym) {
                        Ok(result) => self.stack.push(Value::Bool(result)),
                        Err(err) => self.raise(&err),
                    }
                }
                Opcode::Eval => {
                    let value = self.pop_operand();
                    if let Err(err) = self.eval_datum(value) {
                        self.raise(&err);
                    }
                }
                Opcode::Invoke | Opcode::InvokeDynamic => {
                    let argc = fetch_u8(&code, &mut ip);
                    let target = self.pop_operand();
                    self.current_frame_mut().resume_ip = ip;
                    match self.invoke_value(target, argc) {
                        Ok(true) => {
                            let top = self.current_frame();
                            code = top.code.clone().expect("invoked frame must carry code");
                            ip = 0;
                        }
                        Ok(false) => {}
                        Err(err) => self.raise(&err),
                    }
                }
                Opcode::InvokeNative => {
                    let native = NativeId::from_raw(fetch_u16(&code, &mut ip));
                    let argc = fetch_u8(&code, &mut ip);
                    if let Err(err) = self.invoke_native(native, argc) {
                        self.raise(&err);
                    }
                }
                Opcode::JumpIfFalse => {
                    let offset = fetch_i16(&code, &mut ip);
                    let predicate = self.pop_operand();
                    if !predicate.is_truthy() {
                        jump(&mut ip, offset);
                    }
                }
                Opcode::Jump => {
                    let offset = fetch_i16(&code, &mut ip);
                    jump(&mut ip, offset);
                }
                Opcode::Throw => {
                    let value = self.pop_operand();
                    let error = self.reify_error(value);
                    self.stack.push(error);
                    // the error-on-top check at the loop head unwinds
                }
                Opcode::Return => {
                    let frame = self.pop_frame();
                    let value = if self.stack.depth() > frame.saved_depth {
                        self.stack.pop()
                    } else {
                        None
                    };
                    self.stack.truncate(frame.saved_depth);
                    if let Some(value) = value {
                        self.stack.push(value);
                    }
                    if self.frames.len() <= base {
                        return;
                    }
                    let top = self.current_frame();
                    code = top.code.clone().expect("resumed frame must carry code");
                    ip = top.resume_ip;
                }
                Opcode::Pop => {
                    self.pop_operand();
                }
            }
        }
    }

    /// Dispatch on a call target: Lambda frames are pushed (returns
    /// `true`), natives complete inline (returns `false`), and everything
    /// else is an error. Macros must have been expanded away.
    fn invoke_value(&mut self, target: Value, argc: u8) -> RunResult<bool> {
        match target {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Lambda(_) => {
                    self.invoke_lambda(id, argc)?;
                    Ok(true)
                }
                HeapData::Macro(m) => Err(RunError::type_error(format!(
                    "macro `{}` must be expanded before it can be called",
                    self.syms.name(m.symbol)
                ))),
                _ => Err(RunError::type_error(format!(
                    "{} is not a procedure",
                    target.class_kind(self.heap)
                ))),
            },
            Value::Native(id) => {
                self.invoke_native(id, argc)?;
                Ok(false)
            }
            _ => Err(RunError::type_error(format!(
                "{} is not a procedure",
                target.class_kind(self.heap)
            ))),
        }
    }

    /// Ensures the lambda is compiled, binds parameters from the stack in
    /// reverse declaration order into a fresh child scope, and pushes the
    /// call frame.
    fn invoke_lambda(&mut self, lambda_id: HeapId, argc: u8) -> RunResult<()> {
        let (args, scope, name, code) = self.ensure_compiled(lambda_id)?;
        if args.len() != argc as usize {
            return Err(RunError::arity_error(format!(
                "{} expects {} argument(s), got {argc}",
                name.map_or_else(|| "lambda".to_owned(), |n| format!("`{}`", self.syms.name(n))),
                args.len()
            )));
        }
        let call_scope = self.scopes.new_scope(Some(scope));
        // the last declared parameter binds the top-of-stack value
        for sym in args.iter().rev() {
            let value = self.pop_operand();
            self.scopes.add(call_scope, *sym, Some(value));
        }
        self.push_frame(FrameTarget::Lambda(name), call_scope, Some(code), true);
        Ok(())
    }

    /// Compiles the lambda's body on first call; memoized on the object.
    fn ensure_compiled(
        &mut self,
        lambda_id: HeapId,
    ) -> RunResult<(Vec<SymbolId>, ScopeId, Option<SymbolId>, Rc<CodeRegion>)> {
        let HeapData::Lambda(lambda) = self.heap.get(lambda_id) else {
            return Err(RunError::type_error("invoke target is not a lambda"));
        };
        let args = lambda.args.clone();
        let scope = lambda.scope;
        let name = lambda.name;
        if let Some(code) = &lambda.code {
            return Ok((args, scope, name, code.clone()));
        }

        let body = lambda.body.clone();
        let graph = FlowGraphBuilder::build_lambda(
            &args,
            &body,
            scope,
            self.scopes,
            self.heap,
            self.syms,
            self.natives,
        )
        .map_err(|e| RunError::type_error(e.message))?;
        let code = Rc::new(assemble(&graph));

        let HeapData::Lambda(lambda) = self.heap.get_mut(lambda_id) else {
            return Err(RunError::type_error("lambda vanished during compilation"));
        };
        lambda.code = Some(code.clone());
        Ok((args, scope, name, code))
    }

    /// Pops the arguments, binds them as `arg0..argN` in a fresh frame
    /// scope, runs the native, and pops the frame again.
    fn invoke_native(&mut self, native: NativeId, argc: u8) -> RunResult<()> {
        let proc = self.natives.get(native);
        let (name, arity, func) = (proc.name, proc.arity, proc.func);
        if !arity.accepts(argc as usize) {
            return Err(RunError::arity_error(format!(
                "native `{name}` does not accept {argc} argument(s)"
            )));
        }

        let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(argc as usize);
        for _ in 0..argc {
            values.push(self.pop_operand());
        }
        values.reverse();

        let scope = self.scopes.new_scope(Some(self.globals));
        for (index, value) in values.iter().enumerate() {
            let arg_sym = self.syms.intern(&format!("arg{index}"));
            self.scopes.add(scope, arg_sym, Some(*value));
        }
        self.push_frame(FrameTarget::Native(native), scope, None, true);

        let args = NativeArgs::new(name, values);
        let outcome = func(self, &args);
        self.pop_frame();

        match outcome? {
            NativeOutcome::Return(value) => self.stack.push(value),
            NativeOutcome::Nothing => {}
        }
        Ok(())
    }

    /// Calls an arbitrary target with `argc` arguments already pushed
    /// left-to-right, running nested frames to completion. The result is
    /// left on the stack.
    pub fn call_value(&mut self, target: Value, argc: u8) -> RunResult<()> {
        let base = self.frames.len();
        if self.invoke_value(target, argc)? {
            self.run_loop(base);
        }
        Ok(())
    }

    /// Evaluates a quoted datum: literals are themselves, symbols resolve
    /// in the current environment, and a proper list applies its head to
    /// the evaluated rest. The result is pushed.
    pub fn eval_datum(&mut self, value: Value) -> RunResult<()> {
        match value {
            Value::Symbol(sym) => {
                let env = self.current_env();
                match self.scopes.lookup_value(env, sym, true) {
                    Some(found) => {
                        self.stack.push(found);
                        Ok(())
                    }
                    None => Err(RunError::lookup_error(format!(
                        "unknown symbol `{}`",
                        self.syms.name(sym)
                    ))),
                }
            }
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Pair(_)) => {
                // keep the list rooted while argument evaluation can move it
                self.stack.push(value);
                let head_slot = self.stack.depth() - 1;
                let length = self.list_length(self.stack_at(head_slot))?;

                // operator heads are syntax, not bindings
                if let Value::Symbol(sym) = self.list_nth(self.stack_at(head_slot), 0) {
                    let name = self.syms.name(sym).to_owned();
                    if let Some(op) = BinaryOp::from_name(&name) {
                        if length != 3 {
                            self.pop_operand();
                            return Err(RunError::type_error(format!(
                                "eval: operator `{name}` expects 2 operands"
                            )));
                        }
                        let left = self.list_nth(self.stack_at(head_slot), 1);
                        self.eval_datum_checked(left)?;
                        let right = self.list_nth(self.stack_at(head_slot), 2);
                        self.eval_datum_checked(right)?;
                        let rhs = self.pop_operand();
                        let lhs = self.pop_operand();
                        self.pop_operand(); // the rooted list head
                        let result = apply_binary(self, op, lhs, rhs)?;
                        self.stack.push(result);
                        return Ok(());
                    }
                    if let Some(op) = UnaryOp::from_name(&name) {
                        if length != 2 {
                            self.pop_operand();
                            return Err(RunError::type_error(format!(
                                "eval: operator `{name}` expects 1 operand"
                            )));
                        }
                        let operand = self.list_nth(self.stack_at(head_slot), 1);
                        self.eval_datum_checked(operand)?;
                        let operand = self.pop_operand();
                        self.pop_operand(); // the rooted list head
                        let result = apply_unary(self, op, operand)?;
                        self.stack.push(result);
                        return Ok(());
                    }
                }

                for index in 1..length {
                    let element = self.list_nth(self.stack_at(head_slot), index);
                    self.eval_datum_checked(element)?;
                }
                let target_expr = self.list_nth(self.stack_at(head_slot), 0);
                self.eval_datum_checked(target_expr)?;
                let target = self.pop_operand();
                self.stack.values_mut().remove(head_slot);

                let argc = u8::try_from(length - 1)
                    .map_err(|_| RunError::type_error("eval: call has more than 255 arguments"))?;
                self.call_value(target, argc)
            }
            other => {
                self.stack.push(other);
                Ok(())
            }
        }
    }

    /// [`Vm::eval_datum`] for an intermediate position: a nested call that
    /// unwound with an error converts it back into `Err` so the enclosing
    /// evaluation stops instead of consuming the error as an operand.
    fn eval_datum_checked(&mut self, value: Value) -> RunResult<()> {
        self.eval_datum(value)?;
        if self.error_on_top() {
            return Err(self.take_run_error());
        }
        Ok(())
    }

    /// Pops an `Error` object off the stack and rebuilds its `RunError`.
    fn take_run_error(&mut self) -> RunError {
        let value = self.pop_operand();
        if let Value::Ref(id) = value
            && let HeapData::Error(e) = self.heap.get(id)
        {
            return RunError::new(e.kind, e.message.clone());
        }
        RunError::new(ErrorKind::User, "unwound without an error object")
    }

    fn stack_at(&self, slot: usize) -> Value {
        self.stack.values[slot]
    }

    fn list_length(&self, value: Value) -> RunResult<usize> {
        let mut count = 0;
        let mut current = value;
        while let Value::Ref(id) = current {
            let HeapData::Pair(pair) = self.heap.get(id) else {
                return Err(RunError::type_error("eval: expected a proper list"));
            };
            count += 1;
            current = pair.cdr;
        }
        if current == Value::Null {
            Ok(count)
        } else {
            Err(RunError::type_error("eval: expected a proper list"))
        }
    }

    fn list_nth(&self, value: Value, index: usize) -> Value {
        let mut current = value;
        for _ in 0..index {
            let Value::Ref(id) = current else {
                panic!("list_nth beyond list end");
            };
            let HeapData::Pair(pair) = self.heap.get(id) else {
                panic!("list_nth on an improper list");
            };
            current = pair.cdr;
        }
        let Value::Ref(id) = current else {
            panic!("list_nth beyond list end");
        };
        let HeapData::Pair(pair) = self.heap.get(id) else {
            panic!("list_nth on an improper list");
        };
        pair.car
    }

    fn check_instance(&mut self, value: Value, class_sym: SymbolId) -> RunResult<bool> {
        let Some(class_id) = self.classes.lookup(class_sym) else {
            return Err(RunError::lookup_error(format!(
                "unknown class `{}`",
                self.syms.name(class_sym)
            )));
        };
        let kind = value.class_kind(self.heap);
        let value_class = self.classes.of_kind(kind);
        Ok(self.classes.is_subclass(value_class, class_id))
    }

    fn load_constant(&mut self, constant: &Constant) -> RunResult<Value> {
        match constant {
            Constant::Literal(lit) => self.literal_value(lit),
            Constant::Datum(datum) => self.datum_value(datum),
        }
    }

    fn literal_value(&mut self, lit: &Literal) -> RunResult<Value> {
        Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Long(n) => Value::Long(*n),
            Literal::Double(d) => Value::Double(*d),
            Literal::Symbol(sym) => Value::Symbol(*sym),
            Literal::String(s) => self.alloc_value(HeapData::String(s.clone()))?,
        })
    }

    /// Materializes a quoted datum: atoms become values, lists become
    /// null-terminated pair chains built right-to-left. Built elements sit
    /// on the operand stack between allocations, so they stay rooted.
    fn datum_value(&mut self, datum: &Datum) -> RunResult<Value> {
        match datum {
            Datum::Atom(lit) => self.literal_value(lit),
            Datum::List(items) => {
                let depth = self.stack.depth();
                for item in items {
                    let value = self.datum_value(item)?;
                    self.stack.push(value);
                }
                let mut result = Value::Null;
                while self.stack.depth() > depth {
                    let item = self.pop_operand();
                    result = self.alloc_value(HeapData::Pair(Pair::new(item, result)))?;
                }
                Ok(result)
            }
        }
    }

    /// Allocates a heap payload without moving anything: a full nursery
    /// overflows into the old generation, and the collector only runs at
    /// instruction boundaries.
    pub fn alloc_value(&mut self, data: HeapData) -> RunResult<Value> {
        match self.heap.allocate(data) {
            Ok(id) => Ok(Value::Ref(id)),
            Err(data) => Ok(Value::Ref(self.heap.allocate_tenured(data))),
        }
    }

    /// Reifies a runtime error as an `Error` object and pushes it; the
    /// dispatch loop unwinds from there.
    pub fn raise(&mut self, err: &RunError) {
        let error = HeapData::Error(ErrorObj {
            kind: err.kind,
            message: err.message.clone(),
        });
        let value = match self.heap.allocate(error) {
            Ok(id) => Value::Ref(id),
            Err(data) => Value::Ref(self.heap.allocate_tenured(data)),
        };
        self.stack.push(value);
    }

    /// `throw` wraps its operand into an `Error` unless it already is one.
    fn reify_error(&mut self, value: Value) -> Value {
        if value.is_error(self.heap) {
            return value;
        }
        let mut message = String::new();
        let _ = crate::value::write_display(
            &mut message,
            value,
            self.heap,
            self.syms,
            self.natives,
        );
        let error = HeapData::Error(ErrorObj {
            kind: ErrorKind::User,
            message,
        });
        match self.heap.allocate(error) {
            Ok(id) => Value::Ref(id),
            Err(data) => Value::Ref(self.heap.allocate_tenured(data)),
        }
    }

    fn error_on_top(&self) -> bool {
        self.stack.top().is_some_and(|v| v.is_error(self.heap))
    }

    fn pop_operand(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    /// Runs a minor collection now, unconditionally.
    pub fn collect_minor(&mut self) {
        self.heap.collect_minor(RootSet {
            stack: self.stack.values_mut(),
            scopes: self.scopes,
        });
    }

    /// Runs a major collection now, unconditionally.
    pub fn collect_major(&mut self) {
        self.heap.collect_major(RootSet {
            stack: self.stack.values_mut(),
            scopes: self.scopes,
        });
    }

    /// Between-instructions safe point: collects under memory pressure.
    fn maybe_collect(&mut self) {
        if self.heap.new_zone_pressure() {
            self.collect_minor();
        }
        if self.heap.old_zone_pressure() {
            self.collect_major();
        }
    }

    /// The id of the innermost frame, for introspection natives.
    #[must_use]
    pub fn current_frame_id(&self) -> u32 {
        self.current_frame().id
    }

    /// Re-reads a native argument through the frame scope.
    ///
    /// The raw values in [`NativeArgs`] go stale if a collection runs while
    /// the native calls back into the interpreter; the frame scope is a
    /// root and stays current.
    #[must_use]
    pub fn native_arg(&self, index: usize) -> Value {
        let frame = self.current_frame();
        self.scopes.scope(frame.locals).locals()[index]
            .value
            .expect("native arguments are always bound")
    }

    /// The locals scope of the innermost frame.
    #[must_use]
    pub fn current_locals(&self) -> ScopeId {
        self.current_frame().locals
    }

    /// Writes `value` with its display form into a fresh string.
    #[must_use]
    pub fn display_value(&self, value: Value) -> String {
        let mut out = String::new();
        let _ = crate::value::write_display(&mut out, value, self.heap, self.syms, self.natives);
        out
    }

    /// Writes `value` with its re-parseable repr into a fresh string.
    #[must_use]
    pub fn repr_value(&self, value: Value) -> String {
        let mut out = String::new();
        let _ = crate::value::write_repr(&mut out, value, self.heap, self.syms, self.natives);
        out
    }
}

fn fetch_u8(code: &CodeRegion, ip: &mut usize) -> u8 {
    let byte = code.bytecode()[*ip];
    *ip += 1;
    byte
}

fn fetch_u16(code: &CodeRegion, ip: &mut usize) -> u16 {
    let bytes = [code.bytecode()[*ip], code.bytecode()[*ip + 1]];
    *ip += 2;
    u16::from_le_bytes(bytes)
}

fn fetch_u32(code: &CodeRegion, ip: &mut usize) -> u32 {
    let bytes = [
        code.bytecode()[*ip],
        code.bytecode()[*ip + 1],
        code.bytecode()[*ip + 2],
        code.bytecode()[*ip + 3],
    ];
    *ip += 4;
    u32::from_le_bytes(bytes)
}

fn fetch_i16(code: &CodeRegion, ip: &mut usize) -> i16 {
    let bytes = [code.bytecode()[*ip], code.bytecode()[*ip + 1]];
    *ip += 2;
    i16::from_le_bytes(bytes)
}

fn jump(ip: &mut usize, offset: i16) {
    let target = i64::try_from(*ip).expect("instruction pointer exceeds i64") + i64::from(offset);
    *ip = usize::try_from(target).expect("jump produced a negative instruction pointer");
}
