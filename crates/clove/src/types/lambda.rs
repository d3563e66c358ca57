//! Lambdas and macros as heap objects.

use std::rc::Rc;

use crate::bytecode::CodeRegion;
use crate::expressions::{Expr, LambdaTemplate};
use crate::intern::SymbolId;
use crate::scope::ScopeId;
use crate::value::Value;

use super::Trace;

/// A user-defined procedure.
///
/// The body is kept in expression form until the first call; compilation
/// is memoized in `code`. The owning scope is the lexical environment the
/// lambda was created in, and every call frame chains a fresh child scope
/// off it.
#[derive(Debug, Clone)]
pub struct Lambda {
    pub name: Option<SymbolId>,
    pub args: Vec<SymbolId>,
    pub docs: Option<String>,
    pub body: Vec<Expr>,
    pub code: Option<Rc<CodeRegion>>,
    pub scope: ScopeId,
}

impl Lambda {
    #[must_use]
    pub fn from_template(template: &LambdaTemplate, scope: ScopeId) -> Self {
        Self {
            name: template.name,
            args: template.args.clone(),
            docs: template.docs.clone(),
            body: template.body.clone(),
            code: None,
            scope,
        }
    }

    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.code.is_some()
    }
}

impl Trace for Lambda {
    fn trace(&mut self, _visitor: &mut dyn FnMut(&mut Value)) {
        // body expressions are pure data and the owning scope is an arena
        // index kept alive by the scope arena itself
    }
}

/// A compile-time rewrite rule: a pattern producing a new expression
/// sequence to splice into the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroObj {
    pub symbol: SymbolId,
    pub args: Vec<SymbolId>,
    pub body: Vec<Expr>,
}

impl Trace for MacroObj {
    fn trace(&mut self, _visitor: &mut dyn FnMut(&mut Value)) {}
}
