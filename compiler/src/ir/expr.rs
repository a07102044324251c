//! Statement, objset and formula trees.
//!
//! Each family is a closed enum tagged with `kind` in JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered sequence of statements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block(pub Vec<Statement>);

impl Block {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self(statements)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn statements(&self) -> &[Statement] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Variables assigned anywhere in the block, nested blocks included
    pub fn assigned_vars(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        for stmt in &self.0 {
            stmt.collect_assigned(&mut out);
        }
        out
    }

    /// Variables read somewhere in the block before the block assigns them.
    ///
    /// Program order; a read inside a branch counts if no earlier statement
    /// on that path assigned the variable.
    pub fn read_before_write(&self) -> HashSet<String> {
        let mut written = HashSet::new();
        let mut out = HashSet::new();
        self.scan_reads(&mut written, &mut out);
        out
    }

    fn scan_reads(&self, written: &mut HashSet<String>, out: &mut HashSet<String>) {
        for stmt in &self.0 {
            stmt.scan_reads(written, out);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    /// Iterations are unordered
    #[default]
    Flat,
    /// Iterations run in one total order, each seeing its predecessor's output
    Chained,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Assign {
        var: String,
        value: ObjsetExpr,
    },
    Create {
        class: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        var: Option<String>,
    },
    Delete {
        objset: ObjsetExpr,
    },
    CreateTuple {
        from: ObjsetExpr,
        relation: String,
        to: ObjsetExpr,
    },
    DeleteTuple {
        from: ObjsetExpr,
        relation: String,
        to: ObjsetExpr,
    },
    If {
        condition: FormulaExpr,
        then: Block,
        #[serde(default)]
        otherwise: Block,
    },
    Either {
        branches: Vec<Block>,
    },
    ForEach {
        var: String,
        objset: ObjsetExpr,
        body: Block,
        #[serde(default)]
        order: LoopKind,
    },
}

impl Statement {
    pub fn assign(var: &str, value: ObjsetExpr) -> Self {
        Self::Assign {
            var: var.to_string(),
            value,
        }
    }

    pub fn create(class: &str) -> Self {
        Self::Create {
            class: class.to_string(),
            var: None,
        }
    }

    pub fn create_as(var: &str, class: &str) -> Self {
        Self::Create {
            class: class.to_string(),
            var: Some(var.to_string()),
        }
    }

    pub fn delete(objset: ObjsetExpr) -> Self {
        Self::Delete { objset }
    }

    pub fn create_tuple(from: ObjsetExpr, relation: &str, to: ObjsetExpr) -> Self {
        Self::CreateTuple {
            from,
            relation: relation.to_string(),
            to,
        }
    }

    pub fn delete_tuple(from: ObjsetExpr, relation: &str, to: ObjsetExpr) -> Self {
        Self::DeleteTuple {
            from,
            relation: relation.to_string(),
            to,
        }
    }

    pub fn if_then(condition: FormulaExpr, then: Vec<Statement>, otherwise: Vec<Statement>) -> Self {
        Self::If {
            condition,
            then: Block::new(then),
            otherwise: Block::new(otherwise),
        }
    }

    pub fn either(branches: Vec<Vec<Statement>>) -> Self {
        Self::Either {
            branches: branches.into_iter().map(Block::new).collect(),
        }
    }

    pub fn foreach(var: &str, objset: ObjsetExpr, body: Vec<Statement>) -> Self {
        Self::ForEach {
            var: var.to_string(),
            objset,
            body: Block::new(body),
            order: LoopKind::Flat,
        }
    }

    pub fn foreach_chained(var: &str, objset: ObjsetExpr, body: Vec<Statement>) -> Self {
        Self::ForEach {
            var: var.to_string(),
            objset,
            body: Block::new(body),
            order: LoopKind::Chained,
        }
    }

    fn collect_assigned(&self, out: &mut HashSet<String>) {
        match self {
            Statement::Assign { var, .. } => {
                out.insert(var.clone());
            }
            Statement::Create { var: Some(var), .. } => {
                out.insert(var.clone());
            }
            Statement::If {
                then, otherwise, ..
            } => {
                out.extend(then.assigned_vars());
                out.extend(otherwise.assigned_vars());
            }
            Statement::Either { branches } => {
                for branch in branches {
                    out.extend(branch.assigned_vars());
                }
            }
            Statement::ForEach { body, .. } => out.extend(body.assigned_vars()),
            _ => {}
        }
    }

    fn scan_reads(&self, written: &mut HashSet<String>, out: &mut HashSet<String>) {
        let mut note = |names: HashSet<String>, written: &HashSet<String>| {
            out.extend(names.into_iter().filter(|n| !written.contains(n)));
        };
        match self {
            Statement::Assign { var, value } => {
                note(value.var_reads(), written);
                written.insert(var.clone());
            }
            Statement::Create { var, .. } => {
                if let Some(var) = var {
                    written.insert(var.clone());
                }
            }
            Statement::Delete { objset } => note(objset.var_reads(), written),
            Statement::CreateTuple { from, to, .. } | Statement::DeleteTuple { from, to, .. } => {
                note(from.var_reads(), written);
                note(to.var_reads(), written);
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                note(condition.var_reads(), written);
                Self::scan_branches([then, otherwise].into_iter(), written, out);
            }
            Statement::Either { branches } => {
                Self::scan_branches(branches.iter(), written, out);
            }
            Statement::ForEach {
                var, objset, body, ..
            } => {
                note(objset.var_reads(), written);
                let mut inner = written.clone();
                inner.insert(var.clone());
                body.scan_reads(&mut inner, out);
            }
        }
    }

    /// A variable counts as written after the branching only if every path wrote it
    fn scan_branches<'a>(
        branches: impl Iterator<Item = &'a Block>,
        written: &mut HashSet<String>,
        out: &mut HashSet<String>,
    ) {
        let mut common: Option<HashSet<String>> = None;
        for branch in branches {
            let mut inner = written.clone();
            branch.scan_reads(&mut inner, out);
            common = Some(match common {
                None => inner,
                Some(prev) => prev.intersection(&inner).cloned().collect(),
            });
        }
        if let Some(common) = common {
            *written = common;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjsetExpr {
    AllOf { class: String },
    Var { name: String },
    Subset { of: Box<ObjsetExpr> },
    OneOf { of: Box<ObjsetExpr> },
    Union { parts: Vec<ObjsetExpr> },
    Deref { from: Box<ObjsetExpr>, relation: String },
    Iterator { name: String },
}

impl ObjsetExpr {
    pub fn all_of(class: &str) -> Self {
        Self::AllOf {
            class: class.to_string(),
        }
    }

    pub fn var(name: &str) -> Self {
        Self::Var {
            name: name.to_string(),
        }
    }

    pub fn iterator(name: &str) -> Self {
        Self::Iterator {
            name: name.to_string(),
        }
    }

    pub fn subset(of: ObjsetExpr) -> Self {
        Self::Subset { of: Box::new(of) }
    }

    pub fn one_of(of: ObjsetExpr) -> Self {
        Self::OneOf { of: Box::new(of) }
    }

    pub fn union(parts: Vec<ObjsetExpr>) -> Self {
        Self::Union { parts }
    }

    pub fn deref(from: ObjsetExpr, relation: &str) -> Self {
        Self::Deref {
            from: Box::new(from),
            relation: relation.to_string(),
        }
    }

    /// Variable and iterator names this expression reads
    pub fn var_reads(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_reads(&mut out);
        out
    }

    fn collect_reads(&self, out: &mut HashSet<String>) {
        match self {
            ObjsetExpr::AllOf { .. } => {}
            ObjsetExpr::Var { name } | ObjsetExpr::Iterator { name } => {
                out.insert(name.clone());
            }
            ObjsetExpr::Subset { of } | ObjsetExpr::OneOf { of } => of.collect_reads(out),
            ObjsetExpr::Union { parts } => {
                for part in parts {
                    part.collect_reads(out);
                }
            }
            ObjsetExpr::Deref { from, .. } => from.collect_reads(out),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolLit {
    True,
    False,
    /// Nondeterministic truth value
    Unknown,
}

/// Quantified variable with its domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantVar {
    pub name: String,
    pub domain: ObjsetExpr,
}

impl QuantVar {
    pub fn new(name: &str, domain: ObjsetExpr) -> Self {
        Self {
            name: name.to_string(),
            domain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormulaExpr {
    Bool { value: BoolLit },
    Not { formula: Box<FormulaExpr> },
    And { parts: Vec<FormulaExpr> },
    Or { parts: Vec<FormulaExpr> },
    Implies { premise: Box<FormulaExpr>, conclusion: Box<FormulaExpr> },
    Equiv { parts: Vec<FormulaExpr> },
    Equal { objsets: Vec<ObjsetExpr> },
    In { objset: ObjsetExpr, within: ObjsetExpr },
    IsEmpty { objset: ObjsetExpr },
    ForAll { vars: Vec<QuantVar>, body: Box<FormulaExpr> },
    Exists { vars: Vec<QuantVar>, body: Box<FormulaExpr> },
}

impl FormulaExpr {
    pub fn literal(value: BoolLit) -> Self {
        Self::Bool { value }
    }

    pub fn not(formula: FormulaExpr) -> Self {
        Self::Not {
            formula: Box::new(formula),
        }
    }

    pub fn and(parts: Vec<FormulaExpr>) -> Self {
        Self::And { parts }
    }

    pub fn or(parts: Vec<FormulaExpr>) -> Self {
        Self::Or { parts }
    }

    pub fn implies(premise: FormulaExpr, conclusion: FormulaExpr) -> Self {
        Self::Implies {
            premise: Box::new(premise),
            conclusion: Box::new(conclusion),
        }
    }

    pub fn equal(objsets: Vec<ObjsetExpr>) -> Self {
        Self::Equal { objsets }
    }

    pub fn is_in(objset: ObjsetExpr, within: ObjsetExpr) -> Self {
        Self::In { objset, within }
    }

    pub fn is_empty(objset: ObjsetExpr) -> Self {
        Self::IsEmpty { objset }
    }

    pub fn forall(var: &str, domain: ObjsetExpr, body: FormulaExpr) -> Self {
        Self::ForAll {
            vars: vec![QuantVar::new(var, domain)],
            body: Box::new(body),
        }
    }

    pub fn exists(var: &str, domain: ObjsetExpr, body: FormulaExpr) -> Self {
        Self::Exists {
            vars: vec![QuantVar::new(var, domain)],
            body: Box::new(body),
        }
    }

    /// Free variable reads, excluding names bound by inner quantifiers
    pub fn var_reads(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_reads(&mut out);
        out
    }

    fn collect_reads(&self, out: &mut HashSet<String>) {
        match self {
            FormulaExpr::Bool { .. } => {}
            FormulaExpr::Not { formula } => formula.collect_reads(out),
            FormulaExpr::And { parts } | FormulaExpr::Or { parts } | FormulaExpr::Equiv { parts } => {
                for part in parts {
                    part.collect_reads(out);
                }
            }
            FormulaExpr::Implies {
                premise,
                conclusion,
            } => {
                premise.collect_reads(out);
                conclusion.collect_reads(out);
            }
            FormulaExpr::Equal { objsets } => {
                for objset in objsets {
                    out.extend(objset.var_reads());
                }
            }
            FormulaExpr::In { objset, within } => {
                out.extend(objset.var_reads());
                out.extend(within.var_reads());
            }
            FormulaExpr::IsEmpty { objset } => out.extend(objset.var_reads()),
            FormulaExpr::ForAll { vars, body } | FormulaExpr::Exists { vars, body } => {
                let mut bound = HashSet::new();
                for var in vars {
                    out.extend(
                        var.domain
                            .var_reads()
                            .into_iter()
                            .filter(|n| !bound.contains(n)),
                    );
                    bound.insert(var.name.clone());
                }
                out.extend(body.var_reads().into_iter().filter(|n| !bound.contains(n)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_json_shape() {
        let stmt = Statement::foreach_chained(
            "x",
            ObjsetExpr::all_of("C"),
            vec![Statement::delete(ObjsetExpr::iterator("x"))],
        );
        let json = serde_json::to_value(&stmt).unwrap();
        assert_eq!(json["kind"], "for_each");
        assert_eq!(json["order"], "chained");
        assert_eq!(json["body"][0]["objset"]["kind"], "iterator");

        let back: Statement = serde_json::from_value(json).unwrap();
        assert_eq!(back, stmt);
    }

    #[test]
    fn test_loop_order_defaults_to_flat() {
        let json = serde_json::json!({
            "kind": "for_each",
            "var": "x",
            "objset": {"kind": "all_of", "class": "C"},
            "body": []
        });
        let stmt: Statement = serde_json::from_value(json).unwrap();
        assert!(matches!(stmt, Statement::ForEach { order: LoopKind::Flat, .. }));
    }

    #[test]
    fn test_read_before_write() {
        let block = Block::new(vec![
            Statement::delete(ObjsetExpr::var("a")),
            Statement::assign("a", ObjsetExpr::all_of("C")),
            Statement::assign("b", ObjsetExpr::all_of("C")),
            Statement::delete(ObjsetExpr::var("b")),
        ]);
        let reads = block.read_before_write();
        assert!(reads.contains("a"));
        assert!(!reads.contains("b"));
    }

    #[test]
    fn test_branch_write_must_cover_every_path() {
        let block = Block::new(vec![
            Statement::either(vec![
                vec![Statement::assign("a", ObjsetExpr::all_of("C"))],
                vec![],
            ]),
            Statement::delete(ObjsetExpr::var("a")),
        ]);
        assert!(block.read_before_write().contains("a"));
        assert!(block.assigned_vars().contains("a"));
    }

    #[test]
    fn test_quantifier_binds_its_vars() {
        let formula = FormulaExpr::forall(
            "o",
            ObjsetExpr::all_of("C"),
            FormulaExpr::is_in(ObjsetExpr::var("o"), ObjsetExpr::var("s")),
        );
        let reads = formula.var_reads();
        assert!(reads.contains("s"));
        assert!(!reads.contains("o"));
    }
}
