//! Effect domain analysis for actions.
//!
//! Walks an action's statement tree and records, per class and relation,
//! which operations it performs and whether each one is provably confined to
//! objects created earlier in the same action.
//!
//! ## Locality
//!
//! - A `create` is always local, and a variable bound to it is local
//! - Reading `allof(C)` or a parameter is global
//! - A dereference inherits the locality of its source
//! - Branches and loop bodies AND the locality of every contributing path
//! - Deleting objects also deletes (globally) every tuple of an incident relation
//!
//! After analysis a local entry is dropped when a global entry exists for the
//! same domain and operation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::ir::typing::{infer, TypeEnv};
use crate::ir::{
    Action, Block, DataStore, FormulaExpr, LoopKind, ObjsetExpr, RelationId, Statement,
};
use crate::types::{Cardinality, ClassId, ObjsetType, TypeError};

// =============================================================================
// Effect Types
// =============================================================================

/// A class or a (base) relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    Class(ClassId),
    Relation(RelationId),
}

impl Domain {
    pub fn name(&self, store: &DataStore) -> String {
        match self {
            Domain::Class(id) => store.graph.name(*id).to_string(),
            Domain::Relation(id) => store.relation_label(*id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Create,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Create => write!(f, "create"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Effect {
    pub operation: Operation,
    pub local: bool,
}

impl Effect {
    pub fn new(operation: Operation, local: bool) -> Self {
        Self { operation, local }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let locality = if self.local { "local" } else { "non-local" };
        write!(f, "{}: {}", self.operation, locality)
    }
}

// =============================================================================
// Effect Maps
// =============================================================================

/// Per-domain effect sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectMap {
    entries: BTreeMap<Domain, BTreeSet<Effect>>,
}

impl EffectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, domain: Domain, operation: Operation, local: bool) {
        self.entries
            .entry(domain)
            .or_default()
            .insert(Effect::new(operation, local));
    }

    pub fn merge(&mut self, other: &EffectMap) {
        for (domain, effects) in &other.entries {
            self.entries
                .entry(*domain)
                .or_default()
                .extend(effects.iter().copied());
        }
    }

    /// Drop local entries shadowed by a global one
    pub fn normalize(&mut self) {
        for effects in self.entries.values_mut() {
            let global: Vec<Operation> = effects
                .iter()
                .filter(|e| !e.local)
                .map(|e| e.operation)
                .collect();
            for op in global {
                effects.remove(&Effect::new(op, true));
            }
        }
    }

    pub fn ops_on(&self, domain: Domain) -> impl Iterator<Item = &Effect> {
        self.entries.get(&domain).into_iter().flatten()
    }

    pub fn contains(&self, domain: Domain, operation: Operation, local: bool) -> bool {
        self.entries
            .get(&domain)
            .is_some_and(|e| e.contains(&Effect::new(operation, local)))
    }

    /// Domains read in any way
    pub fn reads(&self) -> BTreeSet<Domain> {
        self.domains_with(|op| op == Operation::Read)
    }

    /// Domains created or deleted
    pub fn writes(&self) -> BTreeSet<Domain> {
        self.domains_with(|op| op != Operation::Read)
    }

    fn domains_with(&self, pred: impl Fn(Operation) -> bool) -> BTreeSet<Domain> {
        self.entries
            .iter()
            .filter(|(_, effects)| effects.iter().any(|e| pred(e.operation)))
            .map(|(domain, _)| *domain)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Domain, &BTreeSet<Effect>)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per domain, e.g. `C: {delete: local}`
    pub fn describe(&self, store: &DataStore) -> Vec<String> {
        self.entries
            .iter()
            .map(|(domain, effects)| {
                let effects: Vec<String> = effects.iter().map(|e| e.to_string()).collect();
                format!("{}: {{{}}}", domain.name(store), effects.join(", "))
            })
            .collect()
    }
}

// =============================================================================
// Analyzer
// =============================================================================

pub struct EffectAnalyzer<'a> {
    store: &'a DataStore,
    types: TypeEnv,
    locals: HashMap<String, bool>,
    map: EffectMap,
    in_formula: bool,
}

impl<'a> EffectAnalyzer<'a> {
    pub fn new(store: &'a DataStore) -> Self {
        Self::with_bindings(store, TypeEnv::new(), HashMap::new())
    }

    /// Start from variables already in scope
    pub fn with_bindings(
        store: &'a DataStore,
        types: TypeEnv,
        locals: HashMap<String, bool>,
    ) -> Self {
        Self {
            store,
            types,
            locals,
            map: EffectMap::new(),
            in_formula: false,
        }
    }

    /// Analyze a whole action; parameters are pre-existing objects
    pub fn analyze_action(store: &'a DataStore, action: &Action) -> Result<EffectMap, TypeError> {
        let mut analyzer = Self::new(store);
        for param in &action.params {
            let class = store.graph.id(&param.class)?;
            analyzer
                .types
                .insert(param.name.clone(), ObjsetType::of_class(class).with_card(param.cardinality));
            analyzer.locals.insert(param.name.clone(), false);
        }
        analyzer.block(&action.block)?;
        Ok(analyzer.finish())
    }

    /// Domains a closed formula reads
    pub fn analyze_formula(store: &'a DataStore, formula: &FormulaExpr) -> Result<EffectMap, TypeError> {
        let mut analyzer = Self::new(store);
        analyzer.formula(formula)?;
        Ok(analyzer.finish())
    }

    pub fn finish(mut self) -> EffectMap {
        self.map.normalize();
        self.map
    }

    pub fn block(&mut self, block: &Block) -> Result<(), TypeError> {
        for stmt in block.statements() {
            self.statement(stmt)?;
        }
        Ok(())
    }

    pub fn statement(&mut self, stmt: &Statement) -> Result<(), TypeError> {
        match stmt {
            Statement::Assign { var, value } => {
                let local = self.objset(value)?;
                let ty = infer(self.store, value, &self.types)?;
                self.bind(var, ty, local);
            }
            Statement::Create { class, var } => {
                let id = self.store.graph.id(class)?;
                self.map.add(Domain::Class(id), Operation::Create, true);
                if let Some(var) = var {
                    self.bind(var, ObjsetType::of_class(id).with_card(Cardinality::one()), true);
                }
            }
            Statement::Delete { objset } => {
                let local = self.objset(objset)?;
                let ty = infer(self.store, objset, &self.types)?;
                for class in ty.sig.classes() {
                    self.map.add(Domain::Class(class), Operation::Delete, local);
                }
                for rel in self.store.incident_relations(&ty.sig) {
                    self.map.add(Domain::Relation(rel), Operation::Delete, false);
                }
            }
            Statement::CreateTuple { from, relation, to } => {
                self.tuple(from, relation, to, Operation::Create)?;
            }
            Statement::DeleteTuple { from, relation, to } => {
                self.tuple(from, relation, to, Operation::Delete)?;
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                self.formula(condition)?;
                self.branches(&[then, otherwise])?;
            }
            Statement::Either { branches } => {
                let branches: Vec<&Block> = branches.iter().collect();
                self.branches(&branches)?;
            }
            Statement::ForEach {
                var,
                objset,
                body,
                order,
            } => {
                let local = self.objset(objset)?;
                let ty = infer(self.store, objset, &self.types)?;
                let saved = (self.types.clone(), self.locals.clone());
                self.bind(var, ty.with_card(Cardinality::one()), local);
                self.block(body)?;
                let inner_types = std::mem::replace(&mut self.types, saved.0);
                let inner_locals = std::mem::replace(&mut self.locals, saved.1);
                if *order == LoopKind::Chained {
                    // Carried variables may hold either the pre-loop or an in-loop value
                    for name in body.assigned_vars() {
                        let (Some(before), Some(after)) =
                            (self.types.get(&name).cloned(), inner_types.get(&name))
                        else {
                            continue;
                        };
                        let sig = self.store.graph.join(&before.sig, &after.sig, false)?;
                        let local = self.locals.get(&name).copied().unwrap_or(true)
                            && inner_locals.get(&name).copied().unwrap_or(true);
                        self.bind(&name, ObjsetType::new(sig, before.card | after.card), local);
                    }
                }
            }
        }
        Ok(())
    }

    fn bind(&mut self, var: &str, ty: ObjsetType, local: bool) {
        self.types.insert(var.to_string(), ty);
        self.locals.insert(var.to_string(), local);
    }

    fn tuple(
        &mut self,
        from: &ObjsetExpr,
        relation: &str,
        to: &ObjsetExpr,
        operation: Operation,
    ) -> Result<(), TypeError> {
        let from_local = self.objset(from)?;
        let to_local = self.objset(to)?;
        let source = infer(self.store, from, &self.types)?;
        let rel = self.store.relation_on(&source.sig, relation)?;
        let (base, _) = rel.base();
        self.map
            .add(Domain::Relation(base), operation, from_local && to_local);
        Ok(())
    }

    /// Analyze alternative blocks from the same entry scope and merge them
    fn branches(&mut self, branches: &[&Block]) -> Result<(), TypeError> {
        let entry = (self.types.clone(), self.locals.clone());
        let mut exits = Vec::with_capacity(branches.len());
        for branch in branches {
            self.types = entry.0.clone();
            self.locals = entry.1.clone();
            self.block(branch)?;
            exits.push((
                std::mem::take(&mut self.types),
                std::mem::take(&mut self.locals),
            ));
        }

        let mut types = TypeEnv::new();
        let mut locals: HashMap<String, bool> = HashMap::new();
        for (branch_types, branch_locals) in exits {
            for (name, ty) in branch_types {
                let merged = match types.remove(&name) {
                    Some(prev) => ObjsetType::new(
                        self.store.graph.join(&prev.sig, &ty.sig, false)?,
                        prev.card | ty.card,
                    ),
                    None => ty,
                };
                types.insert(name, merged);
            }
            for (name, local) in branch_locals {
                *locals.entry(name).or_insert(true) &= local;
            }
        }
        self.types = types;
        self.locals = locals;
        Ok(())
    }

    /// Record reads of an objset and return whether its value is local
    pub fn objset(&mut self, expr: &ObjsetExpr) -> Result<bool, TypeError> {
        match expr {
            ObjsetExpr::AllOf { class } => {
                let id = self.store.graph.id(class)?;
                self.map.add(Domain::Class(id), Operation::Read, false);
                Ok(false)
            }
            ObjsetExpr::Var { name } | ObjsetExpr::Iterator { name } => self
                .locals
                .get(name)
                .copied()
                .ok_or_else(|| TypeError::UndefinedVariable(name.clone())),
            ObjsetExpr::Subset { of } | ObjsetExpr::OneOf { of } => self.objset(of),
            ObjsetExpr::Union { parts } => {
                let mut local = true;
                for part in parts {
                    local &= self.objset(part)?;
                }
                Ok(local)
            }
            ObjsetExpr::Deref { from, relation } => {
                let local = self.objset(from)?;
                let source = infer(self.store, from, &self.types)?;
                let (base, _) = self.store.relation_on(&source.sig, relation)?.base();
                self.map
                    .add(Domain::Relation(base), Operation::Read, local && !self.in_formula);
                Ok(local)
            }
        }
    }

    /// Formula reads are always global
    pub fn formula(&mut self, formula: &FormulaExpr) -> Result<(), TypeError> {
        let outer = self.in_formula;
        self.in_formula = true;
        let result = self.formula_inner(formula);
        self.in_formula = outer;
        result
    }

    fn formula_inner(&mut self, formula: &FormulaExpr) -> Result<(), TypeError> {
        match formula {
            FormulaExpr::Bool { .. } => {}
            FormulaExpr::Not { formula } => self.formula_inner(formula)?,
            FormulaExpr::And { parts } | FormulaExpr::Or { parts } | FormulaExpr::Equiv { parts } => {
                for part in parts {
                    self.formula_inner(part)?;
                }
            }
            FormulaExpr::Implies {
                premise,
                conclusion,
            } => {
                self.formula_inner(premise)?;
                self.formula_inner(conclusion)?;
            }
            FormulaExpr::Equal { objsets } => {
                for objset in objsets {
                    self.objset(objset)?;
                }
            }
            FormulaExpr::In { objset, within } => {
                self.objset(objset)?;
                self.objset(within)?;
            }
            FormulaExpr::IsEmpty { objset } => {
                self.objset(objset)?;
            }
            FormulaExpr::ForAll { vars, body } | FormulaExpr::Exists { vars, body } => {
                let saved = (self.types.clone(), self.locals.clone());
                for var in vars {
                    self.objset(&var.domain)?;
                    let ty = infer(self.store, &var.domain, &self.types)?;
                    self.bind(&var.name, ty.with_card(Cardinality::one()), false);
                }
                self.formula_inner(body)?;
                (self.types, self.locals) = saved;
            }
        }
        Ok(())
    }
}

/// Whether an objset only ever denotes locally created objects
pub fn is_local(expr: &ObjsetExpr, locals: &HashMap<String, bool>) -> bool {
    match expr {
        ObjsetExpr::AllOf { .. } => false,
        ObjsetExpr::Var { name } | ObjsetExpr::Iterator { name } => {
            locals.get(name).copied().unwrap_or(false)
        }
        ObjsetExpr::Subset { of } | ObjsetExpr::OneOf { of } => is_local(of, locals),
        ObjsetExpr::Union { parts } => parts.iter().all(|p| is_local(p, locals)),
        ObjsetExpr::Deref { from, .. } => is_local(from, locals),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassDecl, RelationDecl, Spec};

    fn store() -> DataStore {
        DataStore::new(Spec {
            classes: vec![ClassDecl::new("C", &[]), ClassDecl::new("D", &[])],
            relations: vec![RelationDecl::new("C", "link", "D")],
            ..Spec::default()
        })
        .unwrap()
    }

    fn analyze(store: &DataStore, statements: Vec<Statement>) -> EffectMap {
        EffectAnalyzer::analyze_action(store, &Action::new("a", statements)).unwrap()
    }

    fn class(store: &DataStore, name: &str) -> Domain {
        Domain::Class(store.graph.id(name).unwrap())
    }

    #[test]
    fn test_delete_of_created_object_is_local() {
        let store = store();
        let map = analyze(
            &store,
            vec![
                Statement::create_as("x", "C"),
                Statement::delete(ObjsetExpr::var("x")),
            ],
        );
        let c = class(&store, "C");
        assert!(map.contains(c, Operation::Delete, true));
        assert!(!map.contains(c, Operation::Delete, false));
        assert!(map.contains(c, Operation::Create, true));
    }

    #[test]
    fn test_delete_all_is_global_and_prunes_relations() {
        let store = store();
        let map = analyze(&store, vec![Statement::delete(ObjsetExpr::all_of("C"))]);
        let c = class(&store, "C");
        assert!(map.contains(c, Operation::Delete, false));
        assert!(map.contains(c, Operation::Read, false));
        assert!(map.contains(Domain::Relation(RelationId(0)), Operation::Delete, false));
        assert!(!map.writes().contains(&class(&store, "D")));
    }

    #[test]
    fn test_global_shadows_local() {
        let store = store();
        let map = analyze(
            &store,
            vec![
                Statement::create_as("x", "C"),
                Statement::delete(ObjsetExpr::var("x")),
                Statement::delete(ObjsetExpr::all_of("C")),
            ],
        );
        let effects: Vec<&Effect> = map
            .ops_on(class(&store, "C"))
            .filter(|e| e.operation == Operation::Delete)
            .collect();
        assert_eq!(effects, vec![&Effect::new(Operation::Delete, false)]);
    }

    #[test]
    fn test_branch_locality_is_conjunction() {
        let store = store();
        let map = analyze(
            &store,
            vec![
                Statement::either(vec![
                    vec![Statement::create_as("x", "C")],
                    vec![Statement::assign("x", ObjsetExpr::all_of("C"))],
                ]),
                Statement::delete(ObjsetExpr::var("x")),
            ],
        );
        assert!(map.contains(class(&store, "C"), Operation::Delete, false));
    }

    #[test]
    fn test_tuple_between_created_objects_is_local() {
        let store = store();
        let map = analyze(
            &store,
            vec![
                Statement::create_as("c", "C"),
                Statement::create_as("d", "D"),
                Statement::create_tuple(ObjsetExpr::var("c"), "link", ObjsetExpr::var("d")),
            ],
        );
        assert!(map.contains(Domain::Relation(RelationId(0)), Operation::Create, true));
    }

    #[test]
    fn test_formula_reads() {
        let store = store();
        let formula = FormulaExpr::forall(
            "c",
            ObjsetExpr::all_of("C"),
            FormulaExpr::is_empty(ObjsetExpr::deref(ObjsetExpr::var("c"), "link")),
        );
        let map = EffectAnalyzer::analyze_formula(&store, &formula).unwrap();
        assert_eq!(
            map.reads(),
            [class(&store, "C"), Domain::Relation(RelationId(0))]
                .into_iter()
                .collect()
        );
        assert!(map.writes().is_empty());
    }

    #[test]
    fn test_is_local_helper() {
        let mut locals = HashMap::new();
        locals.insert("x".to_string(), true);
        assert!(is_local(&ObjsetExpr::var("x"), &locals));
        assert!(!is_local(
            &ObjsetExpr::union(vec![ObjsetExpr::var("x"), ObjsetExpr::all_of("C")]),
            &locals
        ));
    }

    #[test]
    fn test_describe() {
        let store = store();
        let map = analyze(&store, vec![Statement::delete(ObjsetExpr::all_of("D"))]);
        let lines = map.describe(&store);
        assert!(lines.contains(&"D: {read: non-local, delete: non-local}".to_string()));
    }
}
