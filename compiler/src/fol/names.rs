//! Symbol name allocation.

use std::collections::HashSet;

/// Words that are syntax in DFG or SMT-LIB and cannot name a symbol
const RESERVED: &[&str] = &[
    "and", "or", "not", "implies", "implied", "equiv", "equal", "forall", "exists", "true",
    "false", "formula", "predicate", "predicates", "functions", "sorts", "sort", "subsort",
    "axioms", "conjectures", "end_of_list", "begin_problem", "end_problem", "name", "author",
    "status", "description", "satisfiable", "unsatisfiable", "unknown", "distinct", "ite",
    "let", "as", "par", "bool", "int", "real", "select", "store", "assert",
];

/// Hands out unique, prover-safe lowercase identifiers.
///
/// Collisions are resolved by suffixing `_2`, `_3`, ...
#[derive(Debug, Clone, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, hint: &str) -> String {
        let base = sanitize(hint);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.is_taken(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.used.contains(name) || RESERVED.contains(&name)
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

/// Lowercase, `[a-z0-9_]` only, starting with a letter
fn sanitize(hint: &str) -> String {
    let mut out: String = hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if !out.starts_with(|c: char| c.is_ascii_lowercase()) {
        out.insert(0, 'x');
    }
    out
}
