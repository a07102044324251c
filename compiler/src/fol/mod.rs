//! Sorted first-order logic with equality.
//!
//! The translator builds [`Formula`] trees over symbols registered in a
//! [`Symbols`] table and collects them into a [`Theory`], which renders to
//! SPASS DFG or SMT-LIB 2 text.
//!
//! The formula constructors simplify as they go (flattening, constant
//! folding), so callers can build formulas compositionally without worrying
//! about `and(true, ...)` noise in the output.

pub mod dfg;
pub mod names;
pub mod smtlib;

pub use names::NameAllocator;

use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone)]
pub struct PredSymbol {
    pub name: String,
    pub args: Vec<SortId>,
}

#[derive(Debug, Clone)]
pub struct FuncSymbol {
    pub name: String,
    pub args: Vec<SortId>,
    pub result: SortId,
}

/// Symbol table of one theory
#[derive(Debug, Clone, Default)]
pub struct Symbols {
    pub sorts: Vec<String>,
    pub predicates: Vec<PredSymbol>,
    pub functions: Vec<FuncSymbol>,
    names: NameAllocator,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sort(&mut self, hint: &str) -> SortId {
        let name = self.names.fresh(hint);
        self.sorts.push(name);
        SortId(self.sorts.len() - 1)
    }

    pub fn add_predicate(&mut self, hint: &str, args: Vec<SortId>) -> PredId {
        let name = self.names.fresh(hint);
        self.predicates.push(PredSymbol { name, args });
        PredId(self.predicates.len() - 1)
    }

    pub fn add_function(&mut self, hint: &str, args: Vec<SortId>, result: SortId) -> FuncId {
        let name = self.names.fresh(hint);
        self.functions.push(FuncSymbol { name, args, result });
        FuncId(self.functions.len() - 1)
    }

    pub fn sort_name(&self, id: SortId) -> &str {
        &self.sorts[id.0]
    }

    pub fn predicate(&self, id: PredId) -> &PredSymbol {
        &self.predicates[id.0]
    }

    pub fn function(&self, id: FuncId) -> &FuncSymbol {
        &self.functions[id.0]
    }

    pub fn find_predicate(&self, name: &str) -> Option<PredId> {
        self.predicates
            .iter()
            .position(|p| p.name == name)
            .map(PredId)
    }
}

// =============================================================================
// Terms and formulas
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Var(String),
    App(FuncId, Vec<Term>),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn app(func: FuncId, args: Vec<Term>) -> Self {
        Term::App(func, args)
    }
}

/// A sorted bound variable
pub type Binder = (String, SortId);

/// Source of fresh variable names `V1`, `V2`, ...
///
/// Symbols are always lowercase, so these never clash with them.
#[derive(Debug, Clone, Default)]
pub struct VarGen {
    next: usize,
}

impl VarGen {
    pub fn fresh(&mut self) -> String {
        self.next += 1;
        format!("V{}", self.next)
    }

    pub fn binder(&mut self, sort: SortId) -> (Binder, Term) {
        let name = self.fresh();
        let term = Term::var(name.clone());
        ((name, sort), term)
    }

    pub fn binders(&mut self, sorts: &[SortId]) -> (Vec<Binder>, Vec<Term>) {
        sorts.iter().map(|s| self.binder(*s)).unzip()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    True,
    False,
    Atom(PredId, Vec<Term>),
    Eq(Term, Term),
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Implies(Box<Formula>, Box<Formula>),
    Iff(Box<Formula>, Box<Formula>),
    ForAll(Vec<Binder>, Box<Formula>),
    Exists(Vec<Binder>, Box<Formula>),
}

impl Formula {
    pub fn atom(pred: PredId, args: Vec<Term>) -> Self {
        Formula::Atom(pred, args)
    }

    pub fn eq(left: Term, right: Term) -> Self {
        if left == right {
            Formula::True
        } else {
            Formula::Eq(left, right)
        }
    }

    pub fn not(inner: Formula) -> Self {
        match inner {
            Formula::True => Formula::False,
            Formula::False => Formula::True,
            Formula::Not(f) => *f,
            other => Formula::Not(Box::new(other)),
        }
    }

    pub fn and(parts: impl IntoIterator<Item = Formula>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Formula::True => {}
                Formula::False => return Formula::False,
                Formula::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Formula::True,
            1 => out.pop().unwrap_or(Formula::True),
            _ => Formula::And(out),
        }
    }

    pub fn or(parts: impl IntoIterator<Item = Formula>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Formula::False => {}
                Formula::True => return Formula::True,
                Formula::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Formula::False,
            1 => out.pop().unwrap_or(Formula::False),
            _ => Formula::Or(out),
        }
    }

    pub fn implies(premise: Formula, conclusion: Formula) -> Self {
        match (premise, conclusion) {
            (Formula::True, c) => c,
            (Formula::False, _) | (_, Formula::True) => Formula::True,
            (p, Formula::False) => Formula::not(p),
            (p, c) => Formula::Implies(Box::new(p), Box::new(c)),
        }
    }

    pub fn iff(left: Formula, right: Formula) -> Self {
        match (left, right) {
            (Formula::True, f) | (f, Formula::True) => f,
            (Formula::False, f) | (f, Formula::False) => Formula::not(f),
            (l, r) if l == r => Formula::True,
            (l, r) => Formula::Iff(Box::new(l), Box::new(r)),
        }
    }

    /// Sorts are nonempty, so a constant body absorbs the quantifier
    pub fn forall(vars: Vec<Binder>, body: Formula) -> Self {
        match body {
            Formula::True | Formula::False => body,
            _ if vars.is_empty() => body,
            Formula::ForAll(inner, body) => {
                let mut all = vars;
                all.extend(inner);
                Formula::ForAll(all, body)
            }
            _ => Formula::ForAll(vars, Box::new(body)),
        }
    }

    pub fn exists(vars: Vec<Binder>, body: Formula) -> Self {
        match body {
            Formula::True | Formula::False => body,
            _ if vars.is_empty() => body,
            Formula::Exists(inner, body) => {
                let mut all = vars;
                all.extend(inner);
                Formula::Exists(all, body)
            }
            _ => Formula::Exists(vars, Box::new(body)),
        }
    }

    /// Exactly one of the formulas holds
    pub fn exactly_one(parts: Vec<Formula>) -> Self {
        let mut pairs = Vec::new();
        for i in 0..parts.len() {
            for j in (i + 1)..parts.len() {
                pairs.push(Formula::not(Formula::and([
                    parts[i].clone(),
                    parts[j].clone(),
                ])));
            }
        }
        Formula::and(std::iter::once(Formula::or(parts)).chain(pairs))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Formula::True)
    }

    /// Number of nodes, for statistics
    pub fn size(&self) -> usize {
        match self {
            Formula::True | Formula::False | Formula::Atom(..) | Formula::Eq(..) => 1,
            Formula::Not(f) => 1 + f.size(),
            Formula::And(parts) | Formula::Or(parts) => {
                1 + parts.iter().map(Formula::size).sum::<usize>()
            }
            Formula::Implies(a, b) | Formula::Iff(a, b) => 1 + a.size() + b.size(),
            Formula::ForAll(_, body) | Formula::Exists(_, body) => 1 + body.size(),
        }
    }

    /// Predicates occurring anywhere in the formula
    pub fn predicates(&self) -> BTreeSet<PredId> {
        let mut out = BTreeSet::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates(&self, out: &mut BTreeSet<PredId>) {
        match self {
            Formula::True | Formula::False | Formula::Eq(..) => {}
            Formula::Atom(pred, _) => {
                out.insert(*pred);
            }
            Formula::Not(f) | Formula::ForAll(_, f) | Formula::Exists(_, f) => {
                f.collect_predicates(out)
            }
            Formula::And(parts) | Formula::Or(parts) => {
                for part in parts {
                    part.collect_predicates(out);
                }
            }
            Formula::Implies(a, b) | Formula::Iff(a, b) => {
                a.collect_predicates(out);
                b.collect_predicates(out);
            }
        }
    }
}

// =============================================================================
// Theories
// =============================================================================

/// Symbols, axioms and the conjectures to prove from them
#[derive(Debug, Clone)]
pub struct Theory {
    pub name: String,
    pub symbols: Symbols,
    pub axioms: Vec<Formula>,
    pub conjectures: Vec<Formula>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TheoryStats {
    pub sorts: usize,
    pub predicates: usize,
    pub functions: usize,
    pub axioms: usize,
    pub conjectures: usize,
    pub formula_nodes: usize,
}

impl Theory {
    pub fn new(name: impl Into<String>, symbols: Symbols) -> Self {
        Self {
            name: name.into(),
            symbols,
            axioms: Vec::new(),
            conjectures: Vec::new(),
        }
    }

    pub fn stats(&self) -> TheoryStats {
        TheoryStats {
            sorts: self.symbols.sorts.len(),
            predicates: self.symbols.predicates.len(),
            functions: self.symbols.functions.len(),
            axioms: self.axioms.len(),
            conjectures: self.conjectures.len(),
            formula_nodes: self
                .axioms
                .iter()
                .chain(&self.conjectures)
                .map(Formula::size)
                .sum(),
        }
    }

    /// The formula a refutation prover must show unsatisfiable
    pub fn negated_goal(&self) -> Formula {
        Formula::not(Formula::and(self.conjectures.iter().cloned()))
    }

    pub fn to_dfg(&self) -> String {
        dfg::Dfg(self).to_string()
    }

    pub fn to_smtlib(&self) -> String {
        smtlib::SmtLib(self).to_string()
    }
}
