//! Translation of actions and invariants into first-order theories.
//!
//! One [`Translation`] session handles one verification goal. It owns every
//! mutable registry (symbols, contexts, formula frames, scope) and advances
//! two cursors while walking the action: the current loop context and the
//! current store state.
//!
//! The encoding:
//! - one sort per connected component of the class graph, with an `is_<class>`
//!   predicate per class
//! - one sort per base relation whose elements are `(left, right)` tuples,
//!   identified by their endpoints
//! - a state predicate per sort saying which objects/tuples exist
//!
//! Statement rules live in `stmt`, objset rules in `objset` and formula rules
//! in `formula`.

pub mod cardinality;
pub mod context;
pub mod formula;
pub mod objset;
pub mod state;
pub mod stmt;

pub use cardinality::cardinality_invariants;
pub use context::{ContextId, Contexts};
pub use objset::ObjsetValue;
pub use state::{State, StateSlot};

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

use crate::effects::{Domain, EffectAnalyzer};
use crate::fol::{Binder, Formula, FuncId, PredId, SortId, Symbols, Term, Theory, VarGen};
use crate::ir::typing::TypeEnv;
use crate::ir::{Action, DataStore, FormulaExpr, Param, RelationId};
use crate::types::{Cardinality, ClassId, ObjsetType, TypeError};

/// Largest cardinality bound encoded with explicit witnesses
pub const MAX_COUNTING_BOUND: u32 = 8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TranslateError {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("Order-sensitive loop over {var}: {reason}")]
    OrderSensitiveLoop { var: String, reason: String },

    #[error("Nondeterministic objset inside a formula")]
    NondeterminismInFormula,

    #[error("Cardinality bound {bound} in {context} is too large to encode")]
    CardinalityTooLarge { context: String, bound: u32 },

    #[error("Internal translation error: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, TranslateError>;

/// Sort of the tuples of one base relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleSort {
    pub sort: SortId,
    pub left: FuncId,
    pub right: FuncId,
    pub source: SortId,
    pub target: SortId,
}

/// Objects produced by one create statement, keyed by its context parameters
#[derive(Debug, Clone)]
struct CreationLink {
    pred: PredId,
    params: Vec<SortId>,
}

#[derive(Debug, Clone, Default)]
struct Frame {
    /// Branch indicator and its arity
    guard: Option<(PredId, usize)>,
    formulas: Vec<Formula>,
}

/// Variables in scope
#[derive(Debug, Clone, Default)]
struct Scope {
    values: HashMap<String, ObjsetValue>,
    types: TypeEnv,
    locals: HashMap<String, bool>,
}

impl Scope {
    fn bind(&mut self, name: &str, value: ObjsetValue, ty: ObjsetType, local: bool) {
        self.values.insert(name.to_string(), value);
        self.types.insert(name.to_string(), ty);
        self.locals.insert(name.to_string(), local);
    }
}

pub struct Translation<'a> {
    store: &'a DataStore,
    symbols: Symbols,
    vars: VarGen,
    component_sorts: Vec<SortId>,
    tuple_sorts: HashMap<RelationId, TupleSort>,
    class_preds: Vec<PredId>,
    contexts: Contexts,
    frames: Vec<Frame>,
    context: ContextId,
    initial: State,
    state: State,
    creates: BTreeMap<SortId, Vec<CreationLink>>,
    scope: Scope,
    formula_depth: usize,
}

impl<'a> Translation<'a> {
    /// Start a session: sorts, class and relation axioms, initial state
    pub fn new(store: &'a DataStore) -> Self {
        let graph = &store.graph;
        let mut symbols = Symbols::new();

        let component_sorts: Vec<SortId> = (0..graph.component_count())
            .map(|c| {
                let hint = graph
                    .component_members(c)
                    .next()
                    .map(|id| graph.name(id).to_string())
                    .unwrap_or_else(|| "object".to_string());
                symbols.add_sort(&hint)
            })
            .collect();

        let class_preds: Vec<PredId> = graph
            .ids()
            .map(|id| {
                let sort = component_sorts[graph.component(id)];
                symbols.add_predicate(&format!("is_{}", graph.name(id)), vec![sort])
            })
            .collect();

        let mut tuple_sorts = HashMap::new();
        for rel in store.base_relations() {
            let label = store.relation_label(rel.id);
            let source = component_sorts[graph.component(rel.source)];
            let target = component_sorts[graph.component(rel.target)];
            let sort = symbols.add_sort(&label);
            let left = symbols.add_function(&format!("{}_left", label), vec![sort], source);
            let right = symbols.add_function(&format!("{}_right", label), vec![sort], target);
            tuple_sorts.insert(
                rel.id,
                TupleSort {
                    sort,
                    left,
                    right,
                    source,
                    target,
                },
            );
        }

        let slots = (0..symbols.sorts.len())
            .map(|i| {
                let sort = SortId(i);
                let hint = format!("existed_initially_{}", symbols.sort_name(sort));
                StateSlot::new(symbols.add_predicate(&hint, vec![sort]), 0)
            })
            .collect();
        let initial = State::new(slots);

        let mut tr = Self {
            store,
            symbols,
            vars: VarGen::default(),
            component_sorts,
            tuple_sorts,
            class_preds,
            contexts: Contexts::new(),
            frames: vec![Frame::default()],
            context: Contexts::ROOT,
            state: initial.clone(),
            initial,
            creates: BTreeMap::new(),
            scope: Scope::default(),
            formula_depth: 0,
        };
        tr.type_axioms();
        tr
    }

    fn type_axioms(&mut self) {
        let store = self.store;
        let graph = &store.graph;
        let mut axioms = Vec::new();
        for child in graph.ids() {
            let sort = self.class_sort(child);
            for parent in graph.parents(child) {
                let (b, o) = self.vars.binder(sort);
                axioms.push(Formula::forall(
                    vec![b],
                    Formula::implies(self.is_class(child, &o), self.is_class(*parent, &o)),
                ));
            }
        }

        let mut relations: Vec<(RelationId, TupleSort)> =
            self.tuple_sorts.iter().map(|(id, ts)| (*id, *ts)).collect();
        relations.sort_by_key(|(id, _)| *id);
        for (id, ts) in relations {
            let rel = store.relation(id);
            let left = |t: &Term| Term::app(ts.left, vec![t.clone()]);
            let right = |t: &Term| Term::app(ts.right, vec![t.clone()]);

            let (b, t) = self.vars.binder(ts.sort);
            axioms.push(Formula::forall(
                vec![b],
                Formula::and([
                    self.is_class(rel.source, &left(&t)),
                    self.is_class(rel.target, &right(&t)),
                ]),
            ));

            let (b1, t1) = self.vars.binder(ts.sort);
            let (b2, t2) = self.vars.binder(ts.sort);
            axioms.push(Formula::forall(
                vec![b1, b2],
                Formula::implies(
                    Formula::and([
                        Formula::eq(left(&t1), left(&t2)),
                        Formula::eq(right(&t1), right(&t2)),
                    ]),
                    Formula::eq(t1.clone(), t2.clone()),
                ),
            ));

            let (bx, x) = self.vars.binder(ts.source);
            let (by, y) = self.vars.binder(ts.target);
            let (bt, t) = self.vars.binder(ts.sort);
            axioms.push(Formula::forall(
                vec![bx, by],
                Formula::implies(
                    Formula::and([self.is_class(rel.source, &x), self.is_class(rel.target, &y)]),
                    Formula::exists(
                        vec![bt],
                        Formula::and([Formula::eq(left(&t), x.clone()), Formula::eq(right(&t), y.clone())]),
                    ),
                ),
            ));

            let (b, t) = self.vars.binder(ts.sort);
            axioms.push(Formula::forall(
                vec![b],
                Formula::implies(
                    self.initial.holds(ts.sort, &[], t.clone()),
                    Formula::and([
                        self.initial.holds(ts.source, &[], left(&t)),
                        self.initial.holds(ts.target, &[], right(&t)),
                    ]),
                ),
            ));
        }

        for axiom in axioms {
            self.emit(axiom);
        }
    }

    // =========================================================================
    // Frames and axioms
    // =========================================================================

    fn emit(&mut self, formula: Formula) {
        if formula.is_true() {
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.formulas.push(formula);
        }
    }

    fn push_frame(&mut self, guard: Option<(PredId, usize)>) {
        self.frames.push(Frame {
            guard,
            formulas: Vec::new(),
        });
    }

    fn pop_frame(&mut self) {
        if self.frames.len() < 2 {
            return;
        }
        if let Some(frame) = self.frames.pop() {
            if let Some(parent) = self.frames.last_mut() {
                parent.formulas.extend(frame.formulas);
            }
        }
    }

    /// Indicators of every enclosing branch
    fn guards(&self, params: &[Term]) -> Formula {
        Formula::and(
            self.frames
                .iter()
                .filter_map(|f| f.guard)
                .map(|(pred, depth)| Formula::atom(pred, params[..depth].to_vec())),
        )
    }

    fn context_binders(&mut self, ctx: ContextId) -> (Vec<Binder>, Vec<Term>) {
        let sorts = self.contexts.get(ctx).param_sorts.clone();
        self.vars.binders(&sorts)
    }

    /// Emit `forall ps. live(ps) & guards(ps) => body(ps)` over the current context
    fn axiom_over(
        &mut self,
        build: impl FnOnce(&mut Self, &[Term]) -> Result<Formula>,
    ) -> Result<()> {
        self.axiom_in(self.context, true, build)
    }

    fn axiom_in(
        &mut self,
        ctx: ContextId,
        guarded: bool,
        build: impl FnOnce(&mut Self, &[Term]) -> Result<Formula>,
    ) -> Result<()> {
        let (binders, params) = self.context_binders(ctx);
        let body = build(self, &params)?;
        let mut premise = vec![self.contexts.membership(ctx, &params)];
        if guarded {
            premise.push(self.guards(&params));
        }
        self.emit(Formula::forall(
            binders,
            Formula::implies(Formula::and(premise), body),
        ));
        Ok(())
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Predicate over the current context parameters followed by `extra`
    fn fresh_pred(&mut self, hint: &str, extra: &[SortId]) -> PredId {
        let mut args = self.contexts.get(self.context).param_sorts.clone();
        args.extend_from_slice(extra);
        self.symbols.add_predicate(hint, args)
    }

    fn fresh_slot(&mut self, sort: SortId) -> StateSlot {
        let hint = format!("state_{}", self.symbols.sort_name(sort));
        let pred = self.fresh_pred(&hint, &[sort]);
        StateSlot::new(pred, self.depth())
    }

    fn depth(&self) -> usize {
        self.contexts.level(self.context)
    }

    fn class_sort(&self, class: ClassId) -> SortId {
        self.component_sorts[self.store.graph.component(class)]
    }

    fn is_class(&self, class: ClassId, object: &Term) -> Formula {
        Formula::atom(self.class_preds[class.0], vec![object.clone()])
    }

    fn tuple(&self, relation: RelationId) -> Result<TupleSort> {
        self.tuple_sorts.get(&relation).copied().ok_or_else(|| {
            TranslateError::Invariant(format!(
                "relation {} has no tuple sort",
                self.store.relation_label(relation)
            ))
        })
    }

    /// Sort of the objects an objset of this type holds; `None` for bottom
    fn sort_of(&self, ty: &ObjsetType) -> Result<Option<SortId>> {
        if ty.sig.is_bottom() {
            return Ok(None);
        }
        match self.store.graph.component_of(&ty.sig) {
            Some(c) => Ok(Some(self.component_sorts[c])),
            None => Err(TypeError::IncompatibleTypes {
                left: ty.sig.describe(&self.store.graph),
                right: "a single class hierarchy".to_string(),
            }
            .into()),
        }
    }

    fn domain_sort(&self, domain: Domain) -> Option<SortId> {
        match domain {
            Domain::Class(class) => Some(self.class_sort(class)),
            Domain::Relation(rel) => self.tuple_sorts.get(&rel).map(|ts| ts.sort),
        }
    }

    /// Name a value with a fresh predicate over the current context
    fn define(&mut self, hint: &str, sort: SortId, value: &ObjsetValue) -> Result<ObjsetValue> {
        let pred = self.fresh_pred(hint, &[sort]);
        let depth = self.depth();
        self.axiom_over(|tr, ps| {
            let (b, o) = tr.vars.binder(sort);
            let mut args = ps.to_vec();
            args.push(o.clone());
            let body = tr.apply(value, ps, &o)?;
            Ok(Formula::forall(vec![b], Formula::iff(Formula::atom(pred, args), body)))
        })?;
        Ok(ObjsetValue::Pred { pred, depth })
    }

    // =========================================================================
    // Goals
    // =========================================================================

    /// Action parameters: nondeterministic sets of pre-existing objects
    fn params(&mut self, params: &[Param]) -> Result<()> {
        for param in params {
            let class = self.store.graph.id(&param.class)?;
            let card = param.cardinality;
            if !card.is_valid() {
                return Err(TypeError::InvalidCardinality {
                    context: format!("parameter {}", param.name),
                    cardinality: card,
                }
                .into());
            }
            check_bound(&format!("parameter {}", param.name), card)?;

            let sort = self.class_sort(class);
            let pred = self
                .symbols
                .add_predicate(&format!("param_{}", param.name), vec![sort]);
            let member = |o: &Term| Formula::atom(pred, vec![o.clone()]);

            let (b, o) = self.vars.binder(sort);
            let typing = Formula::forall(
                vec![b],
                Formula::implies(
                    member(&o),
                    Formula::and([
                        self.initial.holds(sort, &[], o.clone()),
                        self.is_class(class, &o),
                    ]),
                ),
            );
            self.emit(typing);
            let lower = at_least(&mut self.vars, card.min, sort, &member);
            self.emit(lower);
            if let Some(max) = card.max {
                let upper = at_most(&mut self.vars, max, sort, &member);
                self.emit(upper);
            }

            self.scope.bind(
                &param.name,
                ObjsetValue::Pred { pred, depth: 0 },
                ObjsetType::of_class(class).with_card(card),
                false,
            );
        }
        Ok(())
    }

    /// Created objects are distinct across statements and iterations
    fn creation_axioms(&mut self) {
        let creates = std::mem::take(&mut self.creates);
        for (sort, links) in &creates {
            for (i, link) in links.iter().enumerate() {
                if !link.params.is_empty() {
                    let (b1, p1) = self.vars.binders(&link.params);
                    let (b2, p2) = self.vars.binders(&link.params);
                    let (bo, o) = self.vars.binder(*sort);
                    let same: Vec<Formula> = p1
                        .iter()
                        .zip(&p2)
                        .map(|(a, b)| Formula::eq(a.clone(), b.clone()))
                        .collect();
                    let all: Vec<Binder> = b1.into_iter().chain(b2).chain([bo]).collect();
                    self.emit(Formula::forall(
                        all,
                        Formula::implies(
                            Formula::and([created(link, &p1, &o), created(link, &p2, &o)]),
                            Formula::and(same),
                        ),
                    ));
                }
                for other in &links[i + 1..] {
                    let (b1, p1) = self.vars.binders(&link.params);
                    let (b2, p2) = self.vars.binders(&other.params);
                    let (bo, o) = self.vars.binder(*sort);
                    let all: Vec<Binder> = b1.into_iter().chain(b2).chain([bo]).collect();
                    self.emit(Formula::forall(
                        all,
                        Formula::not(Formula::and([
                            created(link, &p1, &o),
                            created(other, &p2, &o),
                        ])),
                    ));
                }
            }
        }
    }

    /// Bind `exists_finally_*` to the final state
    fn final_state_axioms(&mut self) {
        let finals: Vec<(SortId, StateSlot)> =
            self.state.sorts().map(|s| (s, self.state.slot(s))).collect();
        for (sort, slot) in finals {
            let hint = format!("exists_finally_{}", self.symbols.sort_name(sort));
            let pred = self.symbols.add_predicate(&hint, vec![sort]);
            let (b, o) = self.vars.binder(sort);
            self.emit(Formula::forall(
                vec![b],
                Formula::iff(Formula::atom(pred, vec![o.clone()]), slot.holds(&[], o)),
            ));
        }
    }

    /// Conjunction of closed formulas at the current state
    fn closed_formulas(&mut self, formulas: &[&FormulaExpr]) -> Result<Formula> {
        let saved = std::mem::take(&mut self.scope);
        let mut parts = Vec::with_capacity(formulas.len());
        for formula in formulas {
            parts.push(self.formula(formula, &[])?);
        }
        self.scope = saved;
        Ok(Formula::and(parts))
    }

    fn into_theory(mut self, name: &str, conjecture: Formula) -> Theory {
        while self.frames.len() > 1 {
            self.pop_frame();
        }
        let axioms = self
            .frames
            .pop()
            .map(|frame| frame.formulas)
            .unwrap_or_default();
        let mut theory = Theory::new(name, self.symbols);
        theory.axioms = axioms;
        theory.conjectures.push(conjecture);
        theory
    }
}

fn created(link: &CreationLink, params: &[Term], object: &Term) -> Formula {
    let mut args = params.to_vec();
    args.push(object.clone());
    Formula::atom(link.pred, args)
}

fn check_bound(context: &str, card: Cardinality) -> Result<()> {
    let bound = card.max.unwrap_or(card.min).max(card.min);
    if bound > MAX_COUNTING_BOUND {
        return Err(TranslateError::CardinalityTooLarge {
            context: context.to_string(),
            bound,
        });
    }
    Ok(())
}

/// At least `k` distinct objects satisfy `member`
fn at_least(vars: &mut VarGen, k: u32, sort: SortId, member: &dyn Fn(&Term) -> Formula) -> Formula {
    let (binders, terms): (Vec<Binder>, Vec<Term>) = (0..k).map(|_| vars.binder(sort)).unzip();
    let mut parts: Vec<Formula> = terms.iter().map(member).collect();
    for i in 0..terms.len() {
        for j in (i + 1)..terms.len() {
            parts.push(Formula::not(Formula::eq(terms[i].clone(), terms[j].clone())));
        }
    }
    Formula::exists(binders, Formula::and(parts))
}

/// At most `k` distinct objects satisfy `member`
fn at_most(vars: &mut VarGen, k: u32, sort: SortId, member: &dyn Fn(&Term) -> Formula) -> Formula {
    let (binders, terms): (Vec<Binder>, Vec<Term>) =
        (0..=k).map(|_| vars.binder(sort)).unzip();
    let mut equal = Vec::new();
    for i in 0..terms.len() {
        for j in (i + 1)..terms.len() {
            equal.push(Formula::eq(terms[i].clone(), terms[j].clone()));
        }
    }
    Formula::forall(
        binders,
        Formula::implies(Formula::and(terms.iter().map(member)), Formula::or(equal)),
    )
}

/// Theory whose conjecture is `pre-invariants => post-invariants` across `action`
pub fn translate_goal(
    store: &DataStore,
    action: &Action,
    assumptions: &[&FormulaExpr],
    checks: &[&FormulaExpr],
    name: &str,
) -> Result<Theory> {
    // Validates names and types before any symbol is allocated
    EffectAnalyzer::analyze_action(store, action)?;

    let mut tr = Translation::new(store);
    tr.params(&action.params)?;
    tr.block(&action.block)?;
    tr.creation_axioms();
    tr.final_state_axioms();

    let final_state = tr.state.clone();
    tr.state = tr.initial.clone();
    let pre = tr.closed_formulas(assumptions)?;
    tr.state = final_state;
    let post = tr.closed_formulas(checks)?;

    let theory = tr.into_theory(name, Formula::implies(pre, post));
    debug!(goal = name, stats = ?theory.stats(), "translated goal");
    Ok(theory)
}

/// Theory that is refutable exactly when the invariants contradict each other
pub fn translate_consistency(
    store: &DataStore,
    invariants: &[&FormulaExpr],
    name: &str,
) -> Result<Theory> {
    let mut tr = Translation::new(store);
    for invariant in invariants {
        let formula = tr.closed_formulas(&[*invariant])?;
        tr.emit(formula);
    }
    let theory = tr.into_theory(name, Formula::False);
    debug!(goal = name, stats = ?theory.stats(), "translated consistency check");
    Ok(theory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassDecl, ObjsetExpr, RelationDecl, Spec, Statement};

    fn store() -> DataStore {
        DataStore::new(Spec {
            classes: vec![ClassDecl::new("C", &[]), ClassDecl::new("D", &["C"])],
            relations: vec![RelationDecl::new("C", "next", "C")],
            ..Spec::default()
        })
        .unwrap()
    }

    #[test]
    fn test_session_sorts_and_initial_state() {
        let store = store();
        let tr = Translation::new(&store);
        assert_eq!(tr.symbols.sorts, vec!["c", "c_next"]);
        assert_eq!(tr.symbols.predicate(tr.class_preds[1]).name, "is_d");
        assert_eq!(
            tr.symbols.predicate(tr.initial.slot(SortId(1)).pred).name,
            "existed_initially_c_next"
        );
        // subclass, tuple typing, injectivity, totality, initial well-formedness
        assert_eq!(tr.frames[0].formulas.len(), 5);
    }

    #[test]
    fn test_counting_formulas() {
        let mut vars = VarGen::default();
        let mut symbols = Symbols::new();
        let s = symbols.add_sort("s");
        let p = symbols.add_predicate("p", vec![s]);
        let member = |o: &Term| Formula::atom(p, vec![o.clone()]);
        assert_eq!(at_least(&mut vars, 0, s, &member), Formula::True);
        assert!(matches!(at_least(&mut vars, 2, s, &member), Formula::Exists(ref b, _) if b.len() == 2));
        assert!(matches!(at_most(&mut vars, 1, s, &member), Formula::ForAll(ref b, _) if b.len() == 2));
    }

    #[test]
    fn test_large_parameter_bound_is_rejected() {
        let store = store();
        let action = Action::new("a", vec![]).with_param("x", "C", Cardinality::new(9, None));
        let err = translate_goal(&store, &action, &[], &[], "g").unwrap_err();
        assert!(matches!(err, TranslateError::CardinalityTooLarge { bound: 9, .. }));
    }

    #[test]
    fn test_goal_conjecture_is_implication() {
        let store = store();
        let action = Action::new("a", vec![Statement::delete(ObjsetExpr::all_of("C"))]);
        let inv = FormulaExpr::is_empty(ObjsetExpr::all_of("C"));
        let theory = translate_goal(&store, &action, &[&inv], &[&inv], "g").unwrap();
        assert_eq!(theory.conjectures.len(), 1);
        assert!(matches!(theory.conjectures[0], Formula::Implies(..)));
        assert!(theory
            .symbols
            .find_predicate("exists_finally_c")
            .is_some());
    }
}
