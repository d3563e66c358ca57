//! The runtime: process-wide state and the public entry points.
//!
//! `Init` builds the interner, heap, scope arena, native registry and
//! class registry, registers every native in the init scope, optionally
//! loads the kernel module, and installs the runtime into a per-thread
//! slot. `Eval`/`Exec`/`Call`/`Import` drive the pipeline end to end.
//!
//! Scope layout: the init scope holds the natives; the global scope chains
//! off it and accumulates every definition (script scopes are merged into
//! it before execution, which is what makes REPL definitions and
//! merge-only module loads visible to later code).

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::bytecode::assembler::assemble;
use crate::disassembler::disassemble;
use crate::error::{Exception, RunError};
use crate::expand::MacroExpander;
use crate::graph::builder::FlowGraphBuilder;
use crate::heap::{Heap, HeapStats};
use crate::interpreter::{FrameTarget, OperationStack, StackFrame, Vm};
use crate::intern::Symbols;
use crate::io::{PrintWriter, StdPrint};
use crate::modules::ModuleRegistry;
use crate::natives::NativeRegistry;
use crate::object::Object;
use crate::parse::{Parser, Script};
use crate::scope::{ScopeArena, ScopeId};
use crate::types::ClassRegistry;
use crate::value::Value;

/// The built-in module auto-loaded at boot.
const KERNEL_MODULE: &str = "_kernel";
const KERNEL_SOURCE: &str = include_str!("kernel.cl");

/// Boot configuration.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Load the kernel module at init (default true).
    pub kernel: bool,
    /// Search directory for imports.
    pub module_dir: Option<PathBuf>,
    /// Disassemble scripts before executing them.
    pub log_script_instrs: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            kernel: true,
            module_dir: None,
            log_script_instrs: false,
        }
    }
}

/// Process-wide interpreter state. One per worker; see [`init`] for the
/// thread-local install.
pub struct Runtime {
    syms: Symbols,
    heap: Heap,
    scopes: ScopeArena,
    stack: OperationStack,
    frames: Vec<StackFrame>,
    natives: NativeRegistry,
    classes: ClassRegistry,
    modules: ModuleRegistry,
    init_scope: ScopeId,
    global_scope: ScopeId,
    options: RuntimeOptions,
    /// Every script evaluated or imported, keeping their scopes reachable.
    scripts: Vec<Script>,
}

impl Runtime {
    /// Builds a runtime: registers the natives in the init scope and loads
    /// the kernel module when requested.
    ///
    /// # Panics
    /// Panics if the embedded kernel module fails to load, which would be
    /// a defect in the shipped kernel source.
    #[must_use]
    pub fn new(options: RuntimeOptions) -> Self {
        let mut syms = Symbols::new();
        let natives = NativeRegistry::bootstrap(&mut syms);
        let classes = ClassRegistry::bootstrap(&mut syms);
        let mut scopes = ScopeArena::new();

        let init_scope = scopes.new_scope(None);
        for (id, proc) in natives.iter() {
            scopes.add(init_scope, proc.symbol, Some(Value::Native(id)));
        }
        let global_scope = scopes.new_scope(Some(init_scope));

        let modules = ModuleRegistry::new(options.module_dir.clone());

        let mut runtime = Self {
            syms,
            heap: Heap::new(),
            scopes,
            stack: OperationStack::new(),
            frames: Vec::new(),
            natives,
            classes,
            modules,
            init_scope,
            global_scope,
            options,
            scripts: Vec::new(),
        };

        if runtime.options.kernel {
            runtime.load_kernel();
        }
        runtime
    }

    fn load_kernel(&mut self) {
        let module = self.syms.intern(KERNEL_MODULE);
        let mut printer = StdPrint;
        let mut vm = self.vm(&mut printer);
        crate::modules::import_source(&mut vm, module, KERNEL_MODULE, KERNEL_SOURCE)
            .expect("kernel module failed to load");
    }

    fn vm<'a>(&'a mut self, printer: &'a mut dyn PrintWriter) -> Vm<'a> {
        Vm::new(
            &mut self.heap,
            &mut self.scopes,
            &mut self.stack,
            &mut self.frames,
            &mut self.syms,
            &self.natives,
            &self.classes,
            &mut self.modules,
            self.global_scope,
            printer,
        )
    }

    /// Parses and macro-expands source into a script whose scope chains
    /// off the global scope.
    pub fn parse(&mut self, source: &str, name: Option<String>) -> Result<Script, Exception> {
        let mut script = Parser::parse_script(
            source,
            name,
            self.global_scope,
            &mut self.syms,
            &mut self.heap,
            &mut self.scopes,
        )?;
        MacroExpander::expand_script(&mut script, &self.scopes, &mut self.heap, &self.syms)?;
        Ok(script)
    }

    /// Compiles a script (no-op when already compiled): merges its scope
    /// into the global scope, lowers to a flow graph and assembles.
    pub fn compile(&mut self, script: &mut Script) -> Result<(), Exception> {
        if script.is_compiled() {
            return Ok(());
        }
        self.scopes.merge(self.global_scope, script.scope);
        let graph = FlowGraphBuilder::build(
            &script.body,
            self.global_scope,
            &mut self.scopes,
            &self.heap,
            &mut self.syms,
            &self.natives,
        )?;
        if self.options.log_script_instrs {
            let listing = disassemble(&graph, &self.syms);
            eprint!("{listing}");
        }
        let region = assemble(&graph);
        if self.options.log_script_instrs {
            eprintln!("; assembled in {:?}", region.compile_time());
        }
        script.code = Some(Rc::new(region));
        Ok(())
    }

    /// Ensures the script is compiled, pushes a frame and interprets it.
    /// A runtime `Error` comes back as `Object::Error`, not as `Err`.
    pub fn exec_with(
        &mut self,
        script: &mut Script,
        printer: &mut dyn PrintWriter,
    ) -> Result<Object, Exception> {
        self.compile(script)?;
        let code = script.code.clone().expect("compile() just ran");
        let globals = self.global_scope;
        let mut vm = self.vm(printer);
        let result = vm.execute(code, FrameTarget::Script, globals, false);
        Ok(Object::from_value(result, &self.heap, &self.syms, &self.natives))
    }

    /// Parses, expands, compiles and executes source, returning the value
    /// of its last expression (null for an empty stream).
    pub fn eval(&mut self, source: &str) -> Result<Object, Exception> {
        let mut printer = StdPrint;
        self.eval_with(source, &mut printer)
    }

    /// [`Runtime::eval`] with an explicit print writer.
    pub fn eval_with(
        &mut self,
        source: &str,
        printer: &mut dyn PrintWriter,
    ) -> Result<Object, Exception> {
        let mut script = self.parse(source, None)?;
        let result = self.exec_with(&mut script, printer)?;
        self.scripts.push(script);
        Ok(result)
    }

    /// Calls a procedure bound to `name` with the given arguments. Arity
    /// mismatches and runtime failures come back as `Object::Error`.
    pub fn call_with(
        &mut self,
        name: &str,
        args: &[Object],
        printer: &mut dyn PrintWriter,
    ) -> Result<Object, Exception> {
        let Some(target) = self
            .syms
            .get(name)
            .and_then(|symbol| self.scopes.lookup_value(self.global_scope, symbol, true))
        else {
            return Ok(Object::Error {
                kind: crate::error::ErrorKind::Lookup,
                message: format!("unknown symbol `{name}`"),
            });
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg.to_value(&mut self.heap, &mut self.syms) {
                Ok(value) => values.push(value),
                Err(err) => return Ok(error_object(&err)),
            }
        }
        let Ok(argc) = u8::try_from(values.len()) else {
            return Ok(Object::Error {
                kind: crate::error::ErrorKind::Arity,
                message: "call has more than 255 arguments".to_owned(),
            });
        };

        let mut vm = self.vm(printer);
        for value in values {
            vm.stack.push(value);
        }
        let result = match vm.call_value(target, argc) {
            Ok(()) => vm.stack.pop().unwrap_or(Value::Null),
            Err(err) => {
                // arguments above the call are abandoned with the failure
                vm.raise(&err);
                vm.stack.pop().expect("raise pushed an error")
            }
        };
        // failed calls can leave pushed arguments behind
        self.stack.truncate(0);
        Ok(Object::from_value(result, &self.heap, &self.syms, &self.natives))
    }

    /// Imports a module by name into the global scope.
    pub fn import(&mut self, name: &str, printer: &mut dyn PrintWriter) -> Result<(), RunError> {
        let symbol = self.syms.intern(name);
        let mut vm = self.vm(printer);
        crate::modules::import_module(&mut vm, symbol)
    }

    #[must_use]
    pub fn loaded_module_count(&self) -> usize {
        self.modules.loaded_count()
    }

    #[must_use]
    pub fn operand_stack_depth(&self) -> usize {
        self.stack.depth()
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    #[must_use]
    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Lowers source to its flow graph and renders the instruction
    /// listing, without executing anything.
    pub fn disassemble(&mut self, source: &str) -> Result<String, Exception> {
        let script = self.parse(source, None)?;
        self.scopes.merge(self.global_scope, script.scope);
        let graph = FlowGraphBuilder::build(
            &script.body,
            self.global_scope,
            &mut self.scopes,
            &self.heap,
            &mut self.syms,
            &self.natives,
        )?;
        Ok(disassemble(&graph, &self.syms))
    }

    /// Lowers source to its flow graph and renders a GraphViz document.
    pub fn export_dot(&mut self, source: &str) -> Result<String, Exception> {
        let script = self.parse(source, None)?;
        self.scopes.merge(self.global_scope, script.scope);
        let graph = FlowGraphBuilder::build(
            &script.body,
            self.global_scope,
            &mut self.scopes,
            &self.heap,
            &mut self.syms,
            &self.natives,
        )?;
        Ok(crate::graph::dot::to_dot(&graph, &self.syms))
    }
}

fn error_object(err: &RunError) -> Object {
    Object::Error {
        kind: err.kind,
        message: err.message.clone(),
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Constructs a runtime and installs it as this thread's current runtime.
pub fn init(options: RuntimeOptions) {
    let runtime = Runtime::new(options);
    CURRENT.with(|slot| *slot.borrow_mut() = Some(runtime));
}

/// True when [`init`] has run on this thread (and [`teardown`] has not).
#[must_use]
pub fn is_initialized() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}

/// Runs `f` against the thread's current runtime.
///
/// # Panics
/// Panics when no runtime is installed on this thread.
pub fn with_current<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    CURRENT.with(|slot| {
        let mut borrow = slot.borrow_mut();
        let runtime = borrow
            .as_mut()
            .expect("no runtime is installed on this thread; call runtime::init first");
        f(runtime)
    })
}

/// Clears the thread's current runtime, releasing its scopes and heap.
pub fn teardown() {
    CURRENT.with(|slot| *slot.borrow_mut() = None);
}
