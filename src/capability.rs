//! Capability table — the symbol sets code blocks may use inside a worker.
//!
//! Two fixed sets exist:
//!
//! - `restricted`: a curated allow-list of builtins for candidate code, plus
//!   a guarded `__import__` that refuses blocked modules at import time.
//! - `full`: every builtin of the interpreter, used only for the trusted
//!   test script.
//!
//! The table is built once and shipped to each worker in its `init`
//! message; the worker never decides on its own what is allowed.

use std::sync::OnceLock;

use serde::Serialize;

/// Top-level modules candidate code may never import.
pub const BLOCKED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "pathlib",
    "shutil",
    "socket",
    "pickle",
    "importlib",
    "ctypes",
    "multiprocessing",
    "signal",
    "resource",
];

/// Builtins visible to candidate code.
pub const RESTRICTED_BUILTINS: &[&str] = &[
    // types & basics
    "bool", "int", "float", "str", "list", "tuple", "dict", "set",
    // iteration / sequences
    "len", "range", "enumerate", "zip", "reversed", "sorted",
    "sum", "min", "max", "all", "any", "map", "filter",
    // numeric helpers
    "abs", "pow", "round", "divmod",
    // conversions / chars
    "bin", "ord", "chr",
    // checks
    "isinstance", "type", "hash",
    "slice",
    // worker stdout is rerouted to the host log
    "print",
];

/// Returns the top-level segment of a dotted module path (`os.path` → `os`).
pub fn top_level(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

/// Which builtins a code block receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Allow-listed builtins only, imports go through the guard hook.
    Restricted,
    /// The interpreter's complete builtin module.
    Full,
}

/// An immutable named-symbol table.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySet {
    pub scope: Scope,
    /// Allowed builtin names. Empty for [`Scope::Full`], which means "all".
    pub builtins: Vec<&'static str>,
    /// Modules the import hook rejects. Empty for [`Scope::Full`].
    pub blocked_modules: Vec<&'static str>,
}

impl CapabilitySet {
    fn restricted() -> Self {
        Self {
            scope: Scope::Restricted,
            builtins: RESTRICTED_BUILTINS.to_vec(),
            blocked_modules: BLOCKED_MODULES.to_vec(),
        }
    }

    fn full() -> Self {
        Self {
            scope: Scope::Full,
            builtins: Vec::new(),
            blocked_modules: Vec::new(),
        }
    }

    /// Whether code running under this set may import `module`. The static
    /// guard asks the restricted set; the worker hook enforces the same list.
    pub fn allows_import(&self, module: &str) -> bool {
        !self.blocked_modules.contains(&top_level(module))
    }
}

/// The pair of capability sets handed to every worker.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityTable {
    pub restricted: CapabilitySet,
    pub full: CapabilitySet,
}

impl CapabilityTable {
    /// Process-wide table, built on first access and never mutated.
    pub fn global() -> &'static CapabilityTable {
        static TABLE: OnceLock<CapabilityTable> = OnceLock::new();
        TABLE.get_or_init(|| CapabilityTable {
            restricted: CapabilitySet::restricted(),
            full: CapabilitySet::full(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_segment() {
        assert_eq!(top_level("os.path"), "os");
        assert_eq!(top_level("collections"), "collections");
        assert_eq!(top_level("xml.etree.ElementTree"), "xml");
    }

    #[test]
    fn test_blocked_matches_root_only() {
        let restricted = &CapabilityTable::global().restricted;
        assert!(!restricted.allows_import("os"));
        assert!(!restricted.allows_import("os.path"));
        assert!(!restricted.allows_import("multiprocessing.pool"));
        assert!(restricted.allows_import("math"));
        assert!(restricted.allows_import("osmium"));
        assert!(restricted.allows_import("re"));
    }

    #[test]
    fn test_blocked_list_is_exact() {
        let restricted = &CapabilityTable::global().restricted;
        assert_eq!(BLOCKED_MODULES.len(), 12);
        for m in ["os", "sys", "subprocess", "pathlib", "shutil", "socket", "pickle",
                  "importlib", "ctypes", "multiprocessing", "signal", "resource"] {
            assert!(!restricted.allows_import(m), "{m} should be blocked");
        }
    }

    #[test]
    fn test_restricted_builtins() {
        let builtins = &CapabilityTable::global().restricted.builtins;
        for name in ["len", "print", "sorted", "isinstance"] {
            assert!(builtins.contains(&name), "{name} should be allowed");
        }
        for name in ["open", "eval", "exec", "compile", "__import__", "getattr"] {
            assert!(!builtins.contains(&name), "{name} should not be allowed");
        }
    }

    #[test]
    fn test_full_set_allows_every_import() {
        let table = CapabilityTable::global();
        assert_eq!(table.full.scope, Scope::Full);
        assert!(table.full.allows_import("os"));
        assert!(table.full.allows_import("subprocess"));
    }

    #[test]
    fn test_table_serializes_for_worker() {
        let json = serde_json::to_value(CapabilityTable::global()).unwrap();
        assert_eq!(json["restricted"]["scope"], "restricted");
        assert_eq!(json["full"]["scope"], "full");
        assert_eq!(json["restricted"]["blocked_modules"][0], "os");
        assert_eq!(
            json["restricted"]["builtins"].as_array().unwrap().len(),
            RESTRICTED_BUILTINS.len()
        );
    }
}
