//! Macro expansion.
//!
//! Rewrites macro call sites in an expression tree. A macro call is any
//! `CallProc` whose target is a literal symbol bound in the current scope
//! to a Macro object. Expansion is outermost-first with at most one
//! replacement per pass, iterated to a fixed point per slot; a replacement
//! sequence splices into the host's ordered list, and an empty sequence
//! removes the call site.
//!
//! Hygiene is by lexical scope: a macro body expands under a freshly
//! pushed frame binding the macro's formals to the unexpanded argument
//! expressions, and a literal symbol resolving (non-recursively) to such a
//! frame binding is inlined. Free symbols resolve against the scope at the
//! expansion site.

use std::collections::VecDeque;

use ahash::AHashMap;

use crate::error::CompileError;
use crate::expressions::{CaseClause, Clause, Expr, LambdaTemplate, Literal};
use crate::heap::Heap;
use crate::intern::{SymbolId, Symbols};
use crate::parse::Script;
use crate::scope::{ScopeArena, ScopeId};
use crate::types::{HeapData, MacroObj};

type ExpandResult<T> = Result<T, CompileError>;

pub struct MacroExpander<'a> {
    scopes: &'a ScopeArena,
    heap: &'a mut Heap,
    syms: &'a Symbols,
    scope: ScopeId,
    /// Macro-parameter frames; the innermost frame is the only one
    /// consulted by the inline rule.
    frames: Vec<AHashMap<SymbolId, Expr>>,
    /// Total macro-site expansions; bounds runaway self-expansion.
    expansions: usize,
}

/// A macro that has expanded this many times is assumed to never reach a
/// fixed point.
const MAX_EXPANSIONS: usize = 10_000;

impl<'a> MacroExpander<'a> {
    pub fn new(scopes: &'a ScopeArena, heap: &'a mut Heap, syms: &'a Symbols, scope: ScopeId) -> Self {
        Self {
            scopes,
            heap,
            syms,
            scope,
            frames: Vec::new(),
            expansions: 0,
        }
    }

    /// Expands every top-level slot of a script, then the bodies of the
    /// parse-time lambdas installed in its scope (so merge-only module
    /// loads export expanded callables).
    pub fn expand_script(
        script: &mut Script,
        scopes: &ScopeArena,
        heap: &mut Heap,
        syms: &Symbols,
    ) -> ExpandResult<()> {
        let mut expander = MacroExpander::new(scopes, heap, syms, script.scope);
        let body = std::mem::take(&mut script.body);
        script.body = expander.expand_slots(body)?;
        expander.expand_scope_lambdas(script.scope)?;
        Ok(())
    }

    /// Expands the stored body of every lambda bound in `scope`.
    fn expand_scope_lambdas(&mut self, scope: ScopeId) -> ExpandResult<()> {
        let lambda_ids: Vec<_> = self
            .scopes
            .scope(scope)
            .locals()
            .iter()
            .filter_map(|local| local.value.and_then(crate::value::Value::ref_id))
            .filter(|id| matches!(self.heap.get(*id), HeapData::Lambda(_)))
            .collect();
        for id in lambda_ids {
            let HeapData::Lambda(lambda) = self.heap.get_mut(id) else {
                continue;
            };
            let body = std::mem::take(&mut lambda.body);
            let expanded = self.expand_slots(body)?;
            let HeapData::Lambda(lambda) = self.heap.get_mut(id) else {
                continue;
            };
            lambda.body = expanded;
        }
        Ok(())
    }

    /// Runs each slot to its fixed point, splicing replacements in place.
    fn expand_slots(&mut self, exprs: Vec<Expr>) -> ExpandResult<Vec<Expr>> {
        let mut out = Vec::with_capacity(exprs.len());
        let mut queue: VecDeque<Expr> = exprs.into();
        while let Some(expr) = queue.pop_front() {
            match self.visit(&expr)? {
                Some(replacement) => {
                    // splice and re-visit the replacement before the rest
                    for e in replacement.into_iter().rev() {
                        queue.push_front(e);
                    }
                }
                None => out.push(expr),
            }
        }
        Ok(out)
    }

    /// One expansion pass. `Some(exprs)` means the expression changed and
    /// should be replaced by the sequence; `None` means no macro site was
    /// found anywhere inside it.
    fn visit(&mut self, expr: &Expr) -> ExpandResult<Option<Vec<Expr>>> {
        // outermost-first: the node itself before its children
        if let Expr::CallProc { target, args } = expr
            && let Some(sym) = target.as_literal_symbol()
            && let Some(macro_obj) = self.find_macro(sym)
        {
            return self.expand_macro_call(&macro_obj, args).map(Some);
        }

        let mut changed = false;
        let rebuilt = match expr {
            Expr::Literal(Literal::Symbol(sym)) => {
                // inline rule: innermost frame only, and never a
                // self-reference (a formal bound to its own name)
                if let Some(bound) = self.frames.last().and_then(|frame| frame.get(sym)) {
                    if bound == expr {
                        return Ok(None);
                    }
                    return Ok(Some(vec![bound.clone()]));
                }
                return Ok(None);
            }
            Expr::Literal(_) | Expr::Quoted(_) | Expr::Import(_) | Expr::MacroDef { .. } => return Ok(None),
            Expr::Binding { name, value } => Expr::Binding {
                name: *name,
                value: Box::new(self.visit_single(value, &mut changed)?),
            },
            Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
                op: *op,
                left: Box::new(self.visit_single(left, &mut changed)?),
                right: Box::new(self.visit_single(right, &mut changed)?),
            },
            Expr::UnaryOp { op, value } => Expr::UnaryOp {
                op: *op,
                value: Box::new(self.visit_single(value, &mut changed)?),
            },
            Expr::CallProc { target, args } => Expr::CallProc {
                target: Box::new(self.visit_single(target, &mut changed)?),
                args: self.visit_list(args, &mut changed)?,
            },
            Expr::Begin(body) => Expr::Begin(self.visit_list(body, &mut changed)?),
            Expr::Cond { clauses, alternate } => {
                let mut new_clauses = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    new_clauses.push(Clause {
                        test: self.visit_single(&clause.test, &mut changed)?,
                        actions: self.visit_list(&clause.actions, &mut changed)?,
                    });
                }
                let alternate = match alternate {
                    Some(actions) => Some(self.visit_list(actions, &mut changed)?),
                    None => None,
                };
                Expr::Cond {
                    clauses: new_clauses,
                    alternate,
                }
            }
            Expr::Case {
                key,
                clauses,
                alternate,
            } => {
                let key = self.visit_single(key, &mut changed)?;
                let mut new_clauses = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    new_clauses.push(CaseClause {
                        datum: clause.datum.clone(),
                        actions: self.visit_list(&clause.actions, &mut changed)?,
                    });
                }
                let alternate = match alternate {
                    Some(actions) => Some(self.visit_list(actions, &mut changed)?),
                    None => None,
                };
                Expr::Case {
                    key: Box::new(key),
                    clauses: new_clauses,
                    alternate,
                }
            }
            Expr::When { test, actions } => Expr::When {
                test: Box::new(self.visit_single(test, &mut changed)?),
                actions: self.visit_list(actions, &mut changed)?,
            },
            Expr::While { test, body } => Expr::While {
                test: Box::new(self.visit_single(test, &mut changed)?),
                body: self.visit_list(body, &mut changed)?,
            },
            Expr::Let { bindings, body } => Expr::Let {
                bindings: self.visit_bindings(bindings, &mut changed)?,
                body: self.visit_list(body, &mut changed)?,
            },
            Expr::LetRec { bindings, body } => Expr::LetRec {
                bindings: self.visit_bindings(bindings, &mut changed)?,
                body: self.visit_list(body, &mut changed)?,
            },
            Expr::LambdaDef(template) => Expr::LambdaDef(LambdaTemplate {
                name: template.name,
                args: template.args.clone(),
                docs: template.docs.clone(),
                body: self.visit_list(&template.body, &mut changed)?,
            }),
            Expr::LocalDef { symbol, value } => Expr::LocalDef {
                symbol: *symbol,
                value: Box::new(self.visit_single(value, &mut changed)?),
            },
            Expr::ModuleDef { symbol, body } => Expr::ModuleDef {
                symbol: *symbol,
                body: self.visit_list(body, &mut changed)?,
            },
            Expr::Set { symbol, value } => Expr::Set {
                symbol: *symbol,
                value: Box::new(self.visit_single(value, &mut changed)?),
            },
            Expr::Throw(value) => Expr::Throw(Box::new(self.visit_single(value, &mut changed)?)),
            Expr::New { class, args } => Expr::New {
                class: *class,
                args: self.visit_list(args, &mut changed)?,
            },
            Expr::NewMap(entries) => {
                let mut new_entries = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    new_entries.push((
                        self.visit_single(key, &mut changed)?,
                        self.visit_single(value, &mut changed)?,
                    ));
                }
                Expr::NewMap(new_entries)
            }
            Expr::Cast { class, value } => Expr::Cast {
                class: *class,
                value: Box::new(self.visit_single(value, &mut changed)?),
            },
            Expr::InstanceOf { class, value } => Expr::InstanceOf {
                class: *class,
                value: Box::new(self.visit_single(value, &mut changed)?),
            },
            Expr::LoadInstanceMethod {
                method,
                receiver,
                args,
            } => Expr::LoadInstanceMethod {
                method: *method,
                receiver: Box::new(self.visit_single(receiver, &mut changed)?),
                args: self.visit_list(args, &mut changed)?,
            },
            Expr::List(items) => Expr::List(self.visit_list(items, &mut changed)?),
            Expr::RxOp { op, args } => Expr::RxOp {
                op: *op,
                args: self.visit_list(args, &mut changed)?,
            },
        };

        Ok(if changed { Some(vec![rebuilt]) } else { None })
    }

    /// Visits a single-expression child. Stops exploring once the pass has
    /// already made its one replacement. A multi-expression result in a
    /// single-value position collapses to a `begin`.
    fn visit_single(&mut self, child: &Expr, changed: &mut bool) -> ExpandResult<Expr> {
        if *changed {
            return Ok(child.clone());
        }
        match self.visit(child)? {
            Some(replacement) => {
                *changed = true;
                Ok(match replacement.len() {
                    0 => Expr::Literal(Literal::Null),
                    1 => replacement.into_iter().next().expect("length checked"),
                    _ => Expr::Begin(replacement),
                })
            }
            None => Ok(child.clone()),
        }
    }

    /// Visits an expression list; a replacement sequence splices in place.
    fn visit_list(&mut self, items: &[Expr], changed: &mut bool) -> ExpandResult<Vec<Expr>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if *changed {
                out.push(item.clone());
                continue;
            }
            match self.visit(item)? {
                Some(replacement) => {
                    *changed = true;
                    out.extend(replacement);
                }
                None => out.push(item.clone()),
            }
        }
        Ok(out)
    }

    fn visit_bindings(
        &mut self,
        bindings: &[(SymbolId, Expr)],
        changed: &mut bool,
    ) -> ExpandResult<Vec<(SymbolId, Expr)>> {
        let mut out = Vec::with_capacity(bindings.len());
        for (name, value) in bindings {
            out.push((*name, self.visit_single(value, changed)?));
        }
        Ok(out)
    }

    fn find_macro(&self, sym: SymbolId) -> Option<MacroObj> {
        let value = self.scopes.lookup_value(self.scope, sym, true)?;
        let id = value.ref_id()?;
        match self.heap.get(id) {
            HeapData::Macro(m) => Some(m.clone()),
            _ => None,
        }
    }

    /// Expands one macro call: binds formals to the unexpanded argument
    /// expressions in a fresh frame and runs the body slots under it.
    fn expand_macro_call(&mut self, macro_obj: &MacroObj, args: &[Expr]) -> ExpandResult<Vec<Expr>> {
        if macro_obj.args.len() != args.len() {
            return Err(CompileError::new(format!(
                "macro `{}` expects {} argument(s), got {}",
                self.syms.name(macro_obj.symbol),
                macro_obj.args.len(),
                args.len()
            )));
        }
        self.expansions += 1;
        if self.expansions > MAX_EXPANSIONS {
            return Err(CompileError::new(format!(
                "macro `{}` expansion did not reach a fixed point",
                self.syms.name(macro_obj.symbol)
            )));
        }
        let mut frame = AHashMap::with_capacity(args.len());
        for (formal, actual) in macro_obj.args.iter().zip(args) {
            frame.insert(*formal, actual.clone());
        }
        self.frames.push(frame);
        let result = self.expand_slots(macro_obj.body.clone());
        self.frames.pop();
        result
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
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                syms: Symbols::new(),
                heap: Heap::new(),
                scopes: ScopeArena::new(),
            }
        }

        fn expand(&mut self, source: &str) -> Result<Script, CompileError> {
            let root = self.scopes.new_scope(None);
            let mut script = Parser::parse_script(
                source,
                None,
                root,
                &mut self.syms,
                &mut self.heap,
                &mut self.scopes,
            )
            .expect("test source must parse");
            MacroExpander::expand_script(&mut script, &self.scopes, &mut self.heap, &self.syms)?;
            Ok(script)
        }
    }

    #[test]
    fn macro_call_is_rewritten_with_arguments_substituted() {
        let mut fx = Fixture::new();
        let script = fx.expand("(defmacro inc (x) (+ x 1)) (inc 41)").unwrap();
        // slot 0: the macro definition, slot 1: the expansion
        match &script.body[1] {
            Expr::BinaryOp { left, right, .. } => {
                assert_eq!(**left, Expr::Literal(Literal::Long(41)));
                assert_eq!(**right, Expr::Literal(Literal::Long(1)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn nested_macro_sites_reach_a_fixed_point() {
        let mut fx = Fixture::new();
        let script = fx
            .expand("(defmacro inc (x) (+ x 1)) (inc (inc 40))")
            .unwrap();
        match &script.body[1] {
            Expr::BinaryOp { left, .. } => match &**left {
                Expr::BinaryOp { left, .. } => {
                    assert_eq!(**left, Expr::Literal(Literal::Long(40)));
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn multi_expression_body_splices_into_the_host_list() {
        let mut fx = Fixture::new();
        let script = fx.expand("(defmacro twice (x) x x) (twice 7) 9").unwrap();
        assert_eq!(script.body.len(), 4);
        assert_eq!(script.body[1], Expr::Literal(Literal::Long(7)));
        assert_eq!(script.body[2], Expr::Literal(Literal::Long(7)));
        assert_eq!(script.body[3], Expr::Literal(Literal::Long(9)));
    }

    #[test]
    fn empty_expansion_removes_the_call_site() {
        let mut fx = Fixture::new();
        let script = fx.expand("(defmacro nothing () ) (nothing) 5").unwrap();
        assert_eq!(script.body.len(), 2);
        assert_eq!(script.body[1], Expr::Literal(Literal::Long(5)));
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let mut fx = Fixture::new();
        let err = fx.expand("(defmacro inc (x) (+ x 1)) (inc 1 2)").unwrap_err();
        assert!(err.message.contains("expects 1 argument(s), got 2"));
    }

    #[test]
    fn self_referential_formal_does_not_loop() {
        let mut fx = Fixture::new();
        // the call-site argument is the same symbol as the formal
        let script = fx.expand("(defmacro same (x) (+ x 1)) (same x)").unwrap();
        match &script.body[1] {
            Expr::BinaryOp { left, .. } => {
                assert!(matches!(**left, Expr::Literal(Literal::Symbol(_))));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn expansion_recurses_into_nested_positions() {
        let mut fx = Fixture::new();
        let script = fx
            .expand("(defmacro inc (x) (+ x 1)) (begin (inc 1) (when #t (inc 2)))")
            .unwrap();
        match &script.body[1] {
            Expr::Begin(body) => {
                assert!(matches!(body[0], Expr::BinaryOp { .. }));
                match &body[1] {
                    Expr::When { actions, .. } => {
                        assert!(matches!(actions[0], Expr::BinaryOp { .. }));
                    }
                    other => panic!("unexpected: {other:?}"),
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_time_lambda_bodies_are_expanded() {
        let mut fx = Fixture::new();
        let script = fx
            .expand("(defmacro inc (x) (+ x 1)) (defn bump (n) (inc n))")
            .unwrap();
        let name = fx.syms.get("bump").unwrap();
        let value = fx.scopes.lookup_value(script.scope, name, false).unwrap();
        let HeapData::Lambda(lambda) = fx.heap.get(value.ref_id().unwrap()) else {
            panic!("lambda expected");
        };
        assert!(matches!(lambda.body[0], Expr::BinaryOp { .. }));
    }
}
