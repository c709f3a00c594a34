//! Static guard — rejects unsafe candidate code before anything runs.
//!
//! The candidate is parsed into a Python syntax tree and walked once.
//! Rejected:
//!
//! - source that does not parse (`SyntaxError`)
//! - `global` / `nonlocal` declarations, which let a candidate reach
//!   state outside its own frame
//! - imports whose top-level module is on the blocked list
//!
//! This is a best-effort filter. Indirect access to blocked functionality
//! is left to the capability table inside the worker.

use rustpython_parser::{ast, Parse};
use thiserror::Error;

use crate::capability::{self, CapabilityTable};
use crate::outcome::FailureKind;

/// A reason to refuse a candidate without executing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("forbidden construct: {0}")]
    ForbiddenConstruct(&'static str),

    #[error("forbidden import: {0}")]
    ForbiddenImport(String),

    #[error("candidate too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
}

impl Diagnostic {
    pub fn kind(&self) -> FailureKind {
        match self {
            Diagnostic::Syntax(_) => FailureKind::SyntaxError,
            Diagnostic::ForbiddenConstruct(_) => FailureKind::ForbiddenConstruct,
            Diagnostic::ForbiddenImport(_) => FailureKind::ForbiddenImport,
            Diagnostic::TooLarge { .. } => FailureKind::TooLarge,
        }
    }
}

/// Screens `code` and returns the first diagnostic, if any.
pub fn screen(code: &str) -> Option<Diagnostic> {
    Walker::run(code, true).into_iter().next()
}

/// Screens `code` and returns every diagnostic found, in source order.
///
/// A syntax error is always reported alone.
pub fn screen_all(code: &str) -> Vec<Diagnostic> {
    Walker::run(code, false)
}

struct Walker {
    diagnostics: Vec<Diagnostic>,
    stop_at_first: bool,
}

impl Walker {
    fn run(code: &str, stop_at_first: bool) -> Vec<Diagnostic> {
        let suite = match ast::Suite::parse(code, "<candidate>") {
            Ok(suite) => suite,
            Err(e) => return vec![Diagnostic::Syntax(e.to_string())],
        };

        let mut walker = Walker {
            diagnostics: Vec::new(),
            stop_at_first,
        };
        walker.visit_body(&suite);
        walker.diagnostics
    }

    fn done(&self) -> bool {
        self.stop_at_first && !self.diagnostics.is_empty()
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        if !self.done() {
            self.diagnostics.push(diagnostic);
        }
    }

    fn check_module(&mut self, module: &str) {
        if !CapabilityTable::global().restricted.allows_import(module) {
            self.report(Diagnostic::ForbiddenImport(
                capability::top_level(module).to_string(),
            ));
        }
    }

    fn visit_body(&mut self, body: &[ast::Stmt]) {
        for stmt in body {
            if self.done() {
                return;
            }
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &ast::Stmt) {
        use ast::Stmt;

        match stmt {
            Stmt::Global(_) => self.report(Diagnostic::ForbiddenConstruct("Global")),
            Stmt::Nonlocal(_) => self.report(Diagnostic::ForbiddenConstruct("Nonlocal")),
            Stmt::Import(node) => {
                for alias in &node.names {
                    self.check_module(alias.name.as_str());
                }
            }
            Stmt::ImportFrom(node) => {
                if let Some(module) = &node.module {
                    self.check_module(module.as_str());
                }
            }
            Stmt::FunctionDef(node) => self.visit_body(&node.body),
            Stmt::AsyncFunctionDef(node) => self.visit_body(&node.body),
            Stmt::ClassDef(node) => self.visit_body(&node.body),
            Stmt::For(node) => {
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::AsyncFor(node) => {
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::While(node) => {
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::If(node) => {
                self.visit_body(&node.body);
                self.visit_body(&node.orelse);
            }
            Stmt::With(node) => self.visit_body(&node.body),
            Stmt::AsyncWith(node) => self.visit_body(&node.body),
            Stmt::Match(node) => {
                for case in &node.cases {
                    self.visit_body(&case.body);
                }
            }
            Stmt::Try(node) => {
                self.visit_body(&node.body);
                self.visit_handlers(&node.handlers);
                self.visit_body(&node.orelse);
                self.visit_body(&node.finalbody);
            }
            Stmt::TryStar(node) => {
                self.visit_body(&node.body);
                self.visit_handlers(&node.handlers);
                self.visit_body(&node.orelse);
                self.visit_body(&node.finalbody);
            }
            _ => {}
        }
    }

    fn visit_handlers(&mut self, handlers: &[ast::ExceptHandler]) {
        for handler in handlers {
            let ast::ExceptHandler::ExceptHandler(h) = handler;
            self.visit_body(&h.body);
        }
    }
}
