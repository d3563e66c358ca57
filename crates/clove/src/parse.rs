//! Recursive-descent parser.
//!
//! Produces either a single expression or a [`Script`]: a top-level
//! ordered expression list plus its scope. In a parenthesized form the
//! first token decides the variant; a binary- or unary-operator head wins
//! over a call.
//!
//! The parser also installs compile-time bindings: `defmacro` builds a
//! Macro object (redefinition is fatal) and `defn` / `(define (f ...))`
//! builds an uncompiled Lambda, both added to the enclosing scope so the
//! macro expander and flow-graph builder can resolve them.

use std::rc::Rc;

use crate::bytecode::CodeRegion;
use crate::error::ParseError;
use crate::expressions::{
    CaseClause, Clause, Datum, Expr, LambdaTemplate, Literal,
};
use crate::heap::{Heap, HeapId};
use crate::intern::Symbols;
use crate::lexer::TokenStream;
use crate::scope::{ScopeArena, ScopeId};
use crate::token::{Token, TokenKind};
use crate::types::{HeapData, Lambda, MacroObj};
use crate::value::Value;

/// A parsed top-level program: expression sequence, its scope, and the
/// compiled code once the assembler has run.
#[derive(Debug)]
pub struct Script {
    pub name: Option<String>,
    pub body: Vec<Expr>,
    pub scope: ScopeId,
    pub code: Option<Rc<CodeRegion>>,
}

impl Script {
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.code.is_some()
    }
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    stream: TokenStream<'a>,
    syms: &'a mut Symbols,
    heap: &'a mut Heap,
    scopes: &'a mut ScopeArena,
    scope: ScopeId,
}

impl<'a> Parser<'a> {
    pub fn new(
        source: &'a str,
        syms: &'a mut Symbols,
        heap: &'a mut Heap,
        scopes: &'a mut ScopeArena,
        scope: ScopeId,
    ) -> Self {
        Self {
            stream: TokenStream::new(source),
            syms,
            heap,
            scopes,
            scope,
        }
    }

    /// Parses a whole source text as a script whose scope is a fresh child
    /// of `parent`.
    pub fn parse_script(
        source: &str,
        name: Option<String>,
        parent: ScopeId,
        syms: &mut Symbols,
        heap: &mut Heap,
        scopes: &mut ScopeArena,
    ) -> ParseResult<Script> {
        let scope = scopes.new_scope(Some(parent));
        let mut parser = Parser::new(source, syms, heap, scopes, scope);
        let mut body = Vec::new();
        loop {
            if parser.stream.peek().is_end_of_stream() {
                break;
            }
            body.push(parser.parse_expr()?);
        }
        Ok(Script {
            name,
            body,
            scope,
            code: None,
        })
    }

    /// Parses one expression.
    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        let token = self.stream.next();
        match token.kind {
            TokenKind::LiteralTrue => Ok(Expr::Literal(Literal::Bool(true))),
            TokenKind::LiteralFalse => Ok(Expr::Literal(Literal::Bool(false))),
            TokenKind::LiteralLong => Ok(Expr::Literal(Literal::Long(token.as_long()))),
            TokenKind::LiteralDouble => Ok(Expr::Literal(Literal::Double(token.as_double()))),
            TokenKind::LiteralString => Ok(Expr::Literal(Literal::String(token.text))),
            TokenKind::Identifier => {
                let sym = self.syms.intern(&token.text);
                Ok(Expr::Literal(Literal::Symbol(sym)))
            }
            TokenKind::Quote => {
                let datum = self.parse_datum()?;
                Ok(Expr::Quoted(datum))
            }
            TokenKind::LParen => self.parse_form(),
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while self.stream.peek().kind != TokenKind::RBracket {
                    self.reject_eof("unterminated list literal")?;
                    items.push(self.parse_expr()?);
                }
                self.stream.next();
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                while self.stream.peek().kind != TokenKind::RBrace {
                    self.reject_eof("unterminated map literal")?;
                    let key = self.parse_expr()?;
                    self.reject_eof("map literal is missing a value")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                }
                self.stream.next();
                Ok(Expr::NewMap(entries))
            }
            // operator words used as values read as plain symbols
            _ if Self::symbol_text(&token).is_some() => {
                let text = Self::symbol_text(&token).expect("guard checked");
                let sym = self.syms.intern(text);
                Ok(Expr::Literal(Literal::Symbol(sym)))
            }
            TokenKind::Invalid => Err(self.fatal(&token, "invalid input")),
            TokenKind::EndOfStream => Err(self.fatal(&token, "unexpected end of stream")),
            _ => Err(self.fatal(&token, "unexpected token")),
        }
    }

    /// The head token of a parenthesized form decides its variant.
    fn parse_form(&mut self) -> ParseResult<Expr> {
        let head = self.stream.peek().clone();
        if head.kind == TokenKind::RParen {
            self.stream.next();
            return Ok(Expr::Literal(Literal::Null));
        }
        if let Some(op) = head.kind.to_binary_op() {
            self.stream.next();
            let left = self.parse_expr()?;
            let right = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        if let Some(op) = head.kind.to_unary_op() {
            self.stream.next();
            let value = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::UnaryOp {
                op,
                value: Box::new(value),
            });
        }
        match head.kind {
            TokenKind::Define => self.parse_define(),
            TokenKind::Defn => self.parse_defn(),
            TokenKind::Fn => {
                self.stream.next();
                let template = self.parse_lambda_tail(None)?;
                Ok(Expr::LambdaDef(template))
            }
            TokenKind::DefMacro => self.parse_defmacro(),
            TokenKind::DefModule => {
                self.stream.next();
                let symbol = self.parse_identifier()?;
                let body = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::ModuleDef { symbol, body })
            }
            TokenKind::Begin => {
                self.stream.next();
                let body = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::Begin(body))
            }
            TokenKind::Cond => self.parse_cond(),
            TokenKind::When => {
                self.stream.next();
                let test = self.parse_expr()?;
                let actions = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::When {
                    test: Box::new(test),
                    actions,
                })
            }
            TokenKind::Case => self.parse_case(),
            TokenKind::While => {
                self.stream.next();
                let test = self.parse_expr()?;
                let body = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::While {
                    test: Box::new(test),
                    body,
                })
            }
            TokenKind::Let | TokenKind::LetRec => {
                let recursive = head.kind == TokenKind::LetRec;
                self.stream.next();
                let bindings = self.parse_bindings()?;
                let body = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(if recursive {
                    Expr::LetRec { bindings, body }
                } else {
                    Expr::Let { bindings, body }
                })
            }
            TokenKind::Set => {
                self.stream.next();
                let symbol = self.parse_identifier()?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Set {
                    symbol,
                    value: Box::new(value),
                })
            }
            TokenKind::Throw => {
                self.stream.next();
                let value = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Throw(Box::new(value)))
            }
            TokenKind::Import => {
                self.stream.next();
                // allow both (import m) and (import 'm)
                if self.stream.peek().kind == TokenKind::Quote {
                    self.stream.next();
                }
                let symbol = self.parse_identifier()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Import(symbol))
            }
            TokenKind::New => {
                self.stream.next();
                let class = self.parse_identifier()?;
                let args = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::New { class, args })
            }
            TokenKind::InstanceOf => {
                self.stream.next();
                let class = self.parse_identifier()?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::InstanceOf {
                    class,
                    value: Box::new(value),
                })
            }
            TokenKind::CastOp => {
                self.stream.next();
                let class = self.parse_identifier()?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Cast {
                    class,
                    value: Box::new(value),
                })
            }
            TokenKind::Identifier if head.text.starts_with("rx:") => {
                self.stream.next();
                let op = self.syms.intern(&head.text);
                let args = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::RxOp { op, args })
            }
            TokenKind::Identifier if head.text.starts_with('.') => {
                self.stream.next();
                let method = self.syms.intern(&head.text[1..]);
                let receiver = self.parse_expr()?;
                let args = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::LoadInstanceMethod {
                    method,
                    receiver: Box::new(receiver),
                    args,
                })
            }
            _ => {
                let target = self.parse_expr()?;
                let args = self.parse_expr_list(TokenKind::RParen)?;
                self.stream.next();
                Ok(Expr::CallProc {
                    target: Box::new(target),
                    args,
                })
            }
        }
    }

    fn parse_define(&mut self) -> ParseResult<Expr> {
        self.stream.next(); // define
        if self.stream.peek().kind == TokenKind::LParen {
            // (define (f args...) body...) sugar
            self.stream.next();
            let name = self.parse_identifier()?;
            let args = self.parse_arg_list()?;
            let body = self.parse_expr_list(TokenKind::RParen)?;
            self.stream.next();
            let template = LambdaTemplate {
                name: Some(name),
                args,
                docs: None,
                body,
            };
            self.install_lambda(&template);
            return Ok(Expr::LocalDef {
                symbol: name,
                value: Box::new(Expr::LambdaDef(template)),
            });
        }
        let symbol = self.parse_identifier()?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        // declare the name so later compile-time resolution can see it
        self.scopes.add(self.scope, symbol, None);
        Ok(Expr::LocalDef {
            symbol,
            value: Box::new(value),
        })
    }

    fn parse_defn(&mut self) -> ParseResult<Expr> {
        self.stream.next(); // defn
        let name = self.parse_identifier()?;
        let template = self.parse_lambda_tail(Some(name))?;
        self.install_lambda(&template);
        Ok(Expr::LocalDef {
            symbol: name,
            value: Box::new(Expr::LambdaDef(template)),
        })
    }

    /// Parses `(args...) docstring? body...)` and consumes the closing
    /// paren of the enclosing form.
    fn parse_lambda_tail(&mut self, name: Option<crate::intern::SymbolId>) -> ParseResult<LambdaTemplate> {
        self.expect(TokenKind::LParen)?;
        let args = self.parse_arg_list()?;
        let mut body = self.parse_expr_list(TokenKind::RParen)?;
        self.stream.next();
        let docs = match body.first() {
            Some(Expr::Literal(Literal::String(_))) if body.len() > 1 => {
                let Expr::Literal(Literal::String(docs)) = body.remove(0) else {
                    unreachable!("shape checked above");
                };
                Some(docs)
            }
            _ => None,
        };
        Ok(LambdaTemplate {
            name,
            args,
            docs,
            body,
        })
    }

    fn parse_defmacro(&mut self) -> ParseResult<Expr> {
        let head = self.stream.next(); // defmacro
        let symbol = self.parse_identifier()?;
        self.expect(TokenKind::LParen)?;
        let args = self.parse_arg_list()?;
        let body = self.parse_expr_list(TokenKind::RParen)?;
        self.stream.next();

        if self.scopes.has(self.scope, symbol, false) {
            return Err(ParseError::new(
                format!("cannot redefine symbol `{}`", self.syms.name(symbol)),
                head.position,
            ));
        }
        let macro_obj = MacroObj {
            symbol,
            args: args.clone(),
            body: body.clone(),
        };
        let id = self.alloc(HeapData::Macro(macro_obj));
        self.scopes.add(self.scope, symbol, Some(Value::Ref(id)));

        Ok(Expr::MacroDef { symbol, args, body })
    }

    fn parse_cond(&mut self) -> ParseResult<Expr> {
        self.stream.next(); // cond
        let mut clauses = Vec::new();
        let mut alternate = None;
        loop {
            match self.stream.peek().kind {
                TokenKind::RParen => {
                    self.stream.next();
                    break;
                }
                TokenKind::LParen => {
                    self.stream.next();
                    if self.stream.peek().kind == TokenKind::Else {
                        self.stream.next();
                        let actions = self.parse_expr_list(TokenKind::RParen)?;
                        self.stream.next();
                        alternate = Some(actions);
                        self.expect(TokenKind::RParen)?;
                        break;
                    }
                    let test = self.parse_expr()?;
                    let actions = self.parse_expr_list(TokenKind::RParen)?;
                    self.stream.next();
                    clauses.push(Clause { test, actions });
                }
                _ => {
                    let token = self.stream.next();
                    return Err(self.fatal(&token, "expected a cond clause"));
                }
            }
        }
        Ok(Expr::Cond { clauses, alternate })
    }

    fn parse_case(&mut self) -> ParseResult<Expr> {
        self.stream.next(); // case
        let key = self.parse_expr()?;
        let mut clauses = Vec::new();
        let mut alternate = None;
        loop {
            match self.stream.peek().kind {
                TokenKind::RParen => {
                    self.stream.next();
                    break;
                }
                TokenKind::LParen => {
                    self.stream.next();
                    if self.stream.peek().kind == TokenKind::Else {
                        self.stream.next();
                        let actions = self.parse_expr_list(TokenKind::RParen)?;
                        self.stream.next();
                        alternate = Some(actions);
                        self.expect(TokenKind::RParen)?;
                        break;
                    }
                    let datum = self.parse_case_datum()?;
                    let actions = self.parse_expr_list(TokenKind::RParen)?;
                    self.stream.next();
                    clauses.push(CaseClause { datum, actions });
                }
                _ => {
                    let token = self.stream.next();
                    return Err(self.fatal(&token, "expected a case clause"));
                }
            }
        }
        Ok(Expr::Case {
            key: Box::new(key),
            clauses,
            alternate,
        })
    }

    fn parse_case_datum(&mut self) -> ParseResult<Literal> {
        let token = self.stream.next();
        match token.kind {
            TokenKind::LiteralTrue => Ok(Literal::Bool(true)),
            TokenKind::LiteralFalse => Ok(Literal::Bool(false)),
            TokenKind::LiteralLong => Ok(Literal::Long(token.as_long())),
            TokenKind::LiteralDouble => Ok(Literal::Double(token.as_double())),
            TokenKind::LiteralString => Ok(Literal::String(token.text)),
            TokenKind::Identifier => Ok(Literal::Symbol(self.syms.intern(&token.text))),
            _ => Err(self.fatal(&token, "expected a literal case datum")),
        }
    }

    fn parse_bindings(&mut self) -> ParseResult<Vec<(crate::intern::SymbolId, Expr)>> {
        self.expect(TokenKind::LParen)?;
        let mut bindings = Vec::new();
        loop {
            match self.stream.peek().kind {
                TokenKind::RParen => {
                    self.stream.next();
                    return Ok(bindings);
                }
                TokenKind::LParen => {
                    self.stream.next();
                    let name = self.parse_identifier()?;
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::RParen)?;
                    bindings.push((name, value));
                }
                _ => {
                    let token = self.stream.next();
                    return Err(self.fatal(&token, "expected a binding"));
                }
            }
        }
    }

    fn parse_arg_list(&mut self) -> ParseResult<Vec<crate::intern::SymbolId>> {
        let mut args = Vec::new();
        loop {
            match self.stream.peek().kind {
                TokenKind::RParen => {
                    self.stream.next();
                    return Ok(args);
                }
                TokenKind::Identifier => {
                    let token = self.stream.next();
                    args.push(self.syms.intern(&token.text));
                }
                _ => {
                    let token = self.stream.next();
                    return Err(self.fatal(&token, "expected a parameter name"));
                }
            }
        }
    }

    /// Parses expressions until (not consuming) the given closer.
    fn parse_expr_list(&mut self, closer: TokenKind) -> ParseResult<Vec<Expr>> {
        let mut out = Vec::new();
        loop {
            let peek = self.stream.peek();
            if peek.kind == closer {
                return Ok(out);
            }
            if peek.is_end_of_stream() {
                let token = self.stream.next();
                return Err(self.fatal(&token, "unmatched parenthesis"));
            }
            out.push(self.parse_expr()?);
        }
    }

    fn parse_datum(&mut self) -> ParseResult<Datum> {
        let token = self.stream.next();
        match token.kind {
            TokenKind::LParen => {
                let mut items = Vec::new();
                loop {
                    let peek = self.stream.peek();
                    if peek.kind == TokenKind::RParen {
                        self.stream.next();
                        return Ok(if items.is_empty() {
                            Datum::Atom(Literal::Null)
                        } else {
                            Datum::List(items)
                        });
                    }
                    if peek.is_end_of_stream() {
                        let token = self.stream.next();
                        return Err(self.fatal(&token, "unmatched parenthesis in datum"));
                    }
                    items.push(self.parse_datum()?);
                }
            }
            TokenKind::Quote => Ok(self.parse_datum()?),
            TokenKind::LiteralTrue => Ok(Datum::Atom(Literal::Bool(true))),
            TokenKind::LiteralFalse => Ok(Datum::Atom(Literal::Bool(false))),
            TokenKind::LiteralLong => Ok(Datum::Atom(Literal::Long(token.as_long()))),
            TokenKind::LiteralDouble => Ok(Datum::Atom(Literal::Double(token.as_double()))),
            TokenKind::LiteralString => Ok(Datum::Atom(Literal::String(token.text))),
            TokenKind::Identifier => Ok(Datum::Atom(Literal::Symbol(self.syms.intern(&token.text)))),
            _ => match Self::symbol_text(&token) {
                Some(text) => {
                    let sym = self.syms.intern(text);
                    Ok(Datum::Atom(Literal::Symbol(sym)))
                }
                None => Err(self.fatal(&token, "unexpected token in datum")),
            },
        }
    }

    /// The spelled-out name of operator and keyword tokens, so they read
    /// back as symbols inside quoted data and in value position.
    fn symbol_text(token: &Token) -> Option<&'static str> {
        Some(match token.kind {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Equals => "=",
            TokenKind::NotEquals => "!=",
            TokenKind::LessThan => "<",
            TokenKind::LessThanEqual => "<=",
            TokenKind::GreaterThan => ">",
            TokenKind::GreaterThanEqual => ">=",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Cons => "cons",
            TokenKind::Not => "not",
            TokenKind::Car => "car",
            TokenKind::Cdr => "cdr",
            TokenKind::Define => "define",
            TokenKind::Defn => "defn",
            TokenKind::Fn => "fn",
            TokenKind::DefMacro => "defmacro",
            TokenKind::Begin => "begin",
            TokenKind::Cond => "cond",
            TokenKind::Else => "else",
            TokenKind::When => "when",
            TokenKind::Case => "case",
            TokenKind::While => "while",
            TokenKind::Let => "let",
            TokenKind::LetRec => "letrec",
            TokenKind::Set => "set!",
            TokenKind::Throw => "throw",
            TokenKind::Import => "import",
            TokenKind::New => "new",
            TokenKind::InstanceOf => "instanceof?",
            TokenKind::CastOp => "cast",
            _ => return None,
        })
    }

    fn parse_identifier(&mut self) -> ParseResult<crate::intern::SymbolId> {
        let token = self.stream.next();
        if token.kind != TokenKind::Identifier {
            return Err(self.fatal(&token, "expected an identifier"));
        }
        Ok(self.syms.intern(&token.text))
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        let token = self.stream.next();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(ParseError::new(
                format!("expected {kind}, found {}", token.kind),
                token.position,
            ))
        }
    }

    fn reject_eof(&mut self, message: &str) -> ParseResult<()> {
        if self.stream.peek().is_end_of_stream() {
            let token = self.stream.next();
            return Err(self.fatal(&token, message));
        }
        Ok(())
    }

    fn fatal(&self, token: &Token, message: &str) -> ParseError {
        if token.text.is_empty() {
            ParseError::new(format!("{message} ({})", token.kind), token.position)
        } else {
            ParseError::new(
                format!("{message} ({} `{}`)", token.kind, token.text),
                token.position,
            )
        }
    }

    /// Parse-time allocation; falls back to the old generation when the
    /// nursery is full (no roots are available for a collection here).
    fn alloc(&mut self, data: HeapData) -> HeapId {
        match self.heap.allocate(data) {
            Ok(id) => id,
            Err(data) => self.heap.allocate_tenured(data),
        }
    }

    /// Installs the parse-time Lambda for a named function so later call
    /// sites resolve to `Invoke` and merge-only module loads export a
    /// callable value. A previous binding (REPL redefinition) is rebound.
    fn install_lambda(&mut self, template: &LambdaTemplate) {
        let Some(name) = template.name else { return };
        let lambda = Lambda::from_template(template, self.scope);
        let id = self.alloc(HeapData::Lambda(lambda));
        if !self.scopes.add(self.scope, name, Some(Value::Ref(id))) {
            self.scopes.store(self.scope, name, Value::Ref(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::BinaryOp;

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

        fn script(&mut self, source: &str) -> ParseResult<Script> {
            let root = self.scopes.new_scope(None);
            Parser::parse_script(
                source,
                None,
                root,
                &mut self.syms,
                &mut self.heap,
                &mut self.scopes,
            )
        }
    }

    #[test]
    fn parses_literals() {
        let mut fx = Fixture::new();
        let script = fx.script("42 3.5 #t \"hi\" foo ()").unwrap();
        assert_eq!(script.body.len(), 6);
        assert_eq!(script.body[0], Expr::Literal(Literal::Long(42)));
        assert_eq!(script.body[1], Expr::Literal(Literal::Double(3.5)));
        assert_eq!(script.body[2], Expr::Literal(Literal::Bool(true)));
        assert_eq!(script.body[3], Expr::Literal(Literal::String("hi".into())));
        assert!(matches!(script.body[4], Expr::Literal(Literal::Symbol(_))));
        assert_eq!(script.body[5], Expr::Literal(Literal::Null));
    }

    #[test]
    fn binary_op_head_wins_over_call() {
        let mut fx = Fixture::new();
        let script = fx.script("(+ 1 2)").unwrap();
        match &script.body[0] {
            Expr::BinaryOp { op, .. } => assert_eq!(*op, BinaryOp::Add),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn define_function_sugar_installs_a_lambda() {
        let mut fx = Fixture::new();
        let script = fx.script("(define (double x) (* x 2))").unwrap();
        let name = fx.syms.get("double").unwrap();
        let value = fx.scopes.lookup_value(script.scope, name, false).unwrap();
        let id = value.ref_id().unwrap();
        assert!(matches!(fx.heap.get(id), HeapData::Lambda(_)));
        match &script.body[0] {
            Expr::LocalDef { symbol, value } => {
                assert_eq!(*symbol, name);
                assert!(matches!(**value, Expr::LambdaDef(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn defn_docstring_is_split_from_the_body() {
        let mut fx = Fixture::new();
        let script = fx.script("(defn inc (x) \"adds one\" (+ x 1))").unwrap();
        match &script.body[0] {
            Expr::LocalDef { value, .. } => match &**value {
                Expr::LambdaDef(template) => {
                    assert_eq!(template.docs.as_deref(), Some("adds one"));
                    assert_eq!(template.body.len(), 1);
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn defmacro_installs_and_redefinition_is_fatal() {
        let mut fx = Fixture::new();
        let script = fx.script("(defmacro inc (x) (+ x 1))").unwrap();
        let name = fx.syms.get("inc").unwrap();
        let value = fx.scopes.lookup_value(script.scope, name, false).unwrap();
        assert!(matches!(fx.heap.get(value.ref_id().unwrap()), HeapData::Macro(_)));

        let err = fx
            .script("(defmacro twice (x) x x) (defmacro twice (x) x)")
            .unwrap_err();
        assert!(err.message.contains("cannot redefine"));
    }

    #[test]
    fn cond_with_else() {
        let mut fx = Fixture::new();
        let script = fx.script("(cond ((= x 1) 10) (else 20))").unwrap();
        match &script.body[0] {
            Expr::Cond { clauses, alternate } => {
                assert_eq!(clauses.len(), 1);
                assert!(alternate.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn quoted_list_with_operator_symbols() {
        let mut fx = Fixture::new();
        let script = fx.script("'(+ 1 2)").unwrap();
        match &script.body[0] {
            Expr::Quoted(Datum::List(items)) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[0], Datum::Atom(Literal::Symbol(_))));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn let_bindings() {
        let mut fx = Fixture::new();
        let script = fx.script("(let ((x 1) (y 2)) (+ x y))").unwrap();
        match &script.body[0] {
            Expr::Let { bindings, body } => {
                assert_eq!(bindings.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unmatched_paren_is_fatal_with_position() {
        let mut fx = Fixture::new();
        let err = fx.script("(begin 1 2").unwrap_err();
        assert!(err.message.contains("unmatched"));
        assert_eq!(err.position.row, 1);
    }

    #[test]
    fn method_head_parses_to_instance_dispatch() {
        let mut fx = Fixture::new();
        let script = fx.script("(.length xs)").unwrap();
        match &script.body[0] {
            Expr::LoadInstanceMethod { method, .. } => {
                assert_eq!(fx.syms.name(*method), "length");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_source_parses_to_empty_script() {
        let mut fx = Fixture::new();
        let script = fx.script("  ; nothing here\n").unwrap();
        assert!(script.body.is_empty());
    }
}
