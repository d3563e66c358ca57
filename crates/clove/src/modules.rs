//! Module discovery and loading.
//!
//! A module is a `.cl` source file resolved against the configured module
//! directory and each entry of the `CLOVE_PATH` environment variable
//! (colon separated). Loading is parse + macro-expand + scope-merge into
//! the global scope; imports are idempotent, and re-importing emits a
//! debug message and does nothing else.

use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::error::{ErrorKind, RunError, RunResult};
use crate::expand::MacroExpander;
use crate::interpreter::Vm;
use crate::intern::SymbolId;
use crate::io::PrintWriter;
use crate::parse::Parser;

/// The environment variable that augments the module search path.
pub const PATH_ENV_VAR: &str = "CLOVE_PATH";

/// Source file extension for module discovery.
pub const MODULE_EXTENSION: &str = "cl";

/// Process-wide module state: search paths plus the once-loaded set.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    module_dir: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    loaded: AHashSet<SymbolId>,
}

impl ModuleRegistry {
    /// Builds the registry from the configured directory and `CLOVE_PATH`.
    #[must_use]
    pub fn new(module_dir: Option<PathBuf>) -> Self {
        let search_paths = std::env::var(PATH_ENV_VAR)
            .map(|raw| raw.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect())
            .unwrap_or_default();
        Self {
            module_dir,
            search_paths,
            loaded: AHashSet::new(),
        }
    }

    #[must_use]
    pub fn is_loaded(&self, module: SymbolId) -> bool {
        self.loaded.contains(&module)
    }

    pub fn mark_loaded(&mut self, module: SymbolId) {
        self.loaded.insert(module);
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Resolves `<dir>/<name>.cl` against the module directory first, then
    /// each search path.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.module_dir
            .iter()
            .chain(self.search_paths.iter())
            .map(|dir| module_file(dir, name))
            .find(|candidate| candidate.is_file())
    }
}

fn module_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{MODULE_EXTENSION}"))
}

/// Imports a module by symbol into the global scope.
pub fn import_module(vm: &mut Vm<'_>, module: SymbolId) -> RunResult<()> {
    if vm.modules.is_loaded(module) {
        let message = format!("module `{}` is already loaded\n", vm.syms.name(module));
        vm.printer.eprint(&message);
        return Ok(());
    }
    let name = vm.syms.name(module).to_owned();
    let Some(path) = vm.modules.resolve(&name) else {
        return Err(RunError::new(
            ErrorKind::Import,
            format!("cannot resolve module `{name}`"),
        ));
    };
    let source = std::fs::read_to_string(&path).map_err(|e| {
        RunError::new(
            ErrorKind::Import,
            format!("cannot read module `{name}` from {}: {e}", path.display()),
        )
    })?;
    import_source(vm, module, &name, &source)
}

/// Parses, expands and merges module source. Shared by file imports and
/// the embedded kernel module.
pub fn import_source(vm: &mut Vm<'_>, module: SymbolId, name: &str, source: &str) -> RunResult<()> {
    let mut script = Parser::parse_script(
        source,
        Some(name.to_owned()),
        vm.globals,
        vm.syms,
        vm.heap,
        vm.scopes,
    )
    .map_err(|e| RunError::new(ErrorKind::Import, format!("module `{name}`: {e}")))?;
    MacroExpander::expand_script(&mut script, vm.scopes, vm.heap, vm.syms)
        .map_err(|e| RunError::new(ErrorKind::Import, format!("module `{name}`: {e}")))?;
    vm.scopes.merge(vm.globals, script.scope);
    vm.modules.mark_loaded(module);
    Ok(())
}
