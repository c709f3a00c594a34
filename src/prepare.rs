//! Candidate preparation — pure text/tree clean-up of raw model output.
//!
//! Nothing here is a safety check. These passes only make a model's
//! answer runnable (strip reasoning and fences, keep the function, add
//! obviously missing imports, neutralize inline asserts); the guard still
//! screens whatever comes out.

use std::collections::{BTreeSet, HashMap, HashSet};

use rustpython_parser::ast::{self, Stmt};
use rustpython_parser::lexer::lex;
use rustpython_parser::text_size::TextRange;
use rustpython_parser::{Mode, Parse, Tok};

/// `typing` names that are imported on demand.
const TYPING_NAMES: &[&str] = &[
    "List", "Dict", "Set", "Tuple", "Optional", "Sequence", "Iterable",
];

/// Modules that are imported on demand.
const SUPPORT_MODULES: &[&str] = &["re", "math", "collections"];

/// Full pipeline: extract the function, add support imports, strip asserts.
pub fn prepare(raw: &str) -> String {
    strip_asserts(&ensure_support_imports(&extract_function(raw)))
}

/// Reduces model output to the first top-level function and the imports
/// that precede it.
///
/// `<think>` blocks and Markdown code fences are removed and tabs become
/// four spaces. If the result does not parse, or has no function, the
/// cleaned text is returned as is.
pub fn extract_function(raw: &str) -> String {
    let cleaned = clean(raw);
    let Ok(suite) = ast::Suite::parse(&cleaned, "<candidate>") else {
        return cleaned;
    };
    let Some(position) = suite.iter().position(|s| matches!(s, Stmt::FunctionDef(_))) else {
        return cleaned;
    };

    let mut pieces: Vec<&str> = Vec::new();
    for stmt in &suite[..position] {
        match stmt {
            Stmt::Import(node) => pieces.push(slice(&cleaned, node.range)),
            Stmt::ImportFrom(node) => pieces.push(slice(&cleaned, node.range)),
            _ => {}
        }
    }
    if let Stmt::FunctionDef(func) = &suite[position] {
        pieces.push(slice(&cleaned, func.range));
    }

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prepends imports for typing names and support modules that the code
/// uses without importing.
pub fn ensure_support_imports(code: &str) -> String {
    let Ok(suite) = ast::Suite::parse(code, "<candidate>") else {
        return code.to_string();
    };

    let mut imported: HashSet<String> = HashSet::new();
    let mut imported_from: HashMap<String, HashSet<String>> = HashMap::new();
    for stmt in &suite {
        match stmt {
            Stmt::Import(node) => {
                for alias in &node.names {
                    let top = alias.name.as_str().split('.').next().unwrap_or_default();
                    imported.insert(top.to_string());
                }
            }
            Stmt::ImportFrom(node) => {
                if let Some(module) = &node.module {
                    let names = imported_from.entry(module.as_str().to_string()).or_default();
                    for alias in &node.names {
                        names.insert(alias.name.as_str().to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let mut typing_needed: BTreeSet<&str> = BTreeSet::new();
    let mut modules_needed: BTreeSet<&str> = BTreeSet::new();
    let mut after_dot = false;
    for (tok, _) in lex(code, Mode::Module).flatten() {
        if let Tok::Name { name } = &tok {
            // `x.List` is an attribute, not a use of the name
            if !after_dot {
                if let Some(t) = TYPING_NAMES.iter().find(|t| **t == name.as_str()) {
                    typing_needed.insert(*t);
                }
                if let Some(m) = SUPPORT_MODULES.iter().find(|m| **m == name.as_str()) {
                    modules_needed.insert(*m);
                }
            }
        }
        after_dot = matches!(tok, Tok::Dot);
    }

    let mut additions: Vec<String> = Vec::new();
    if !typing_needed.is_empty() && !imported.contains("typing") {
        let existing = imported_from.get("typing");
        let missing: Vec<&str> = typing_needed
            .into_iter()
            .filter(|name| existing.map_or(true, |e| !e.contains(*name)))
            .collect();
        if !missing.is_empty() {
            additions.push(format!("from typing import {}", missing.join(", ")));
        }
    }
    for module in modules_needed {
        let from_imported = imported_from.get(module).is_some_and(|n| !n.is_empty());
        if !imported.contains(module) && !from_imported {
            additions.push(format!("import {module}"));
        }
    }

    if additions.is_empty() {
        return code.to_string();
    }
    format!("{}\n\n{code}", additions.join("\n"))
}

/// Replaces every `assert` statement with `pass`.
///
/// Models often leave self-checks under the function; a wrong one would
/// fail an otherwise correct candidate.
pub fn strip_asserts(code: &str) -> String {
    let Ok(suite) = ast::Suite::parse(code, "<candidate>") else {
        return code.to_string();
    };

    let mut ranges: Vec<TextRange> = Vec::new();
    for_each_stmt(&suite, &mut |stmt| {
        if let Stmt::Assert(node) = stmt {
            ranges.push(node.range);
        }
    });
    if ranges.is_empty() {
        return code.to_string();
    }

    ranges.sort_by_key(|r| r.start());
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;
    for range in ranges {
        let start = usize::from(range.start());
        let end = usize::from(range.end());
        out.push_str(&code[cursor..start]);
        out.push_str("pass");
        cursor = end;
    }
    out.push_str(&code[cursor..]);
    out
}

fn clean(raw: &str) -> String {
    let mut s = remove_think_blocks(raw.trim());
    s = s.trim().to_string();

    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest.strip_prefix("python").unwrap_or(rest);
        s = rest.trim_start().to_string();
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest.trim_end().to_string();
    }

    s.replace('\t', "    ")
}

fn remove_think_blocks(s: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        let Some(len) = rest[start..].find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &rest[start + len + CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

fn slice(source: &str, range: TextRange) -> &str {
    &source[usize::from(range.start())..usize::from(range.end())]
}

/// Visits every statement, nested bodies included.
fn for_each_stmt(body: &[Stmt], f: &mut dyn FnMut(&Stmt)) {
    for stmt in body {
        f(stmt);
        match stmt {
            Stmt::FunctionDef(n) => for_each_stmt(&n.body, f),
            Stmt::AsyncFunctionDef(n) => for_each_stmt(&n.body, f),
            Stmt::ClassDef(n) => for_each_stmt(&n.body, f),
            Stmt::For(n) => {
                for_each_stmt(&n.body, f);
                for_each_stmt(&n.orelse, f);
            }
            Stmt::AsyncFor(n) => {
                for_each_stmt(&n.body, f);
                for_each_stmt(&n.orelse, f);
            }
            Stmt::While(n) => {
                for_each_stmt(&n.body, f);
                for_each_stmt(&n.orelse, f);
            }
            Stmt::If(n) => {
                for_each_stmt(&n.body, f);
                for_each_stmt(&n.orelse, f);
            }
            Stmt::With(n) => for_each_stmt(&n.body, f),
            Stmt::AsyncWith(n) => for_each_stmt(&n.body, f),
            Stmt::Match(n) => {
                for case in &n.cases {
                    for_each_stmt(&case.body, f);
                }
            }
            Stmt::Try(n) => {
                for_each_stmt(&n.body, f);
                for ast::ExceptHandler::ExceptHandler(h) in &n.handlers {
                    for_each_stmt(&h.body, f);
                }
                for_each_stmt(&n.orelse, f);
                for_each_stmt(&n.finalbody, f);
            }
            Stmt::TryStar(n) => {
                for_each_stmt(&n.body, f);
                for ast::ExceptHandler::ExceptHandler(h) in &n.handlers {
                    for_each_stmt(&h.body, f);
                }
                for_each_stmt(&n.orelse, f);
                for_each_stmt(&n.finalbody, f);
            }
            _ => {}
        }
    }
}
