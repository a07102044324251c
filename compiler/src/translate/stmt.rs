//! Statement translation.
//!
//! Every statement advances `self.state`; the axioms it emits relate the new
//! slots to the old ones. Slots created under a branch or inside a loop body
//! are only constrained while that branch is taken or that iteration is live,
//! so every compound statement ends by defining fresh slots at the level it
//! started from.
//!
//! Loops are handled in two passes around the body. Preparation (`plan_loop`,
//! and `iteration_inputs` for chained loops) computes the sorts the body
//! touches and allocates per-iteration input slots and carry predicates.
//! Migration (`flat_loop`'s merge, `thread_iterations` and the exit axioms)
//! relates those slots to the pre-loop state and to the state after the loop.

use std::collections::{BTreeSet, HashSet};

use crate::effects::{is_local, EffectAnalyzer, Operation};
use crate::fol::{Formula, PredId, SortId, Term};
use crate::ir::{Block, FormulaExpr, LoopKind, ObjsetExpr, Statement};
use crate::types::{Cardinality, ObjsetType, TypeError};

use super::context::{ChainOrder, ContextId, ContextKind};
use super::state::{State, StateSlot};
use super::{CreationLink, ObjsetValue, Result, Scope, TranslateError, Translation};

/// What a loop body touches, computed before translating it
#[derive(Debug)]
struct LoopPlan {
    writes: BTreeSet<SortId>,

    /// Sorts the body creates objects or tuples in
    creates: BTreeSet<SortId>,

    /// Sorts read through non-local objsets
    reads: BTreeSet<SortId>,

    /// Outer variables the body reassigns
    carried: Vec<String>,

    /// Carried variables the body reads before reassigning
    boundary: Vec<String>,
}

/// Value of a carried variable at the end of the previous iteration
struct Carry {
    name: String,
    pred: PredId,
    sort: SortId,
    ty: ObjsetType,
}

/// A loop body, translated in its own context
struct LoopBody {
    child: ContextId,
    sort: SortId,
    entry: State,
    out: State,
    scope: Scope,
}

impl<'a> Translation<'a> {
    pub(crate) fn block(&mut self, block: &Block) -> Result<()> {
        for stmt in block.statements() {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Assign { var, value } => self.assign(var, value),
            Statement::Create { class, var } => self.create(class, var.as_deref()),
            Statement::Delete { objset } => self.delete(objset),
            Statement::CreateTuple { from, relation, to } => {
                self.update_tuples(from, relation, to, Operation::Create)
            }
            Statement::DeleteTuple { from, relation, to } => {
                self.update_tuples(from, relation, to, Operation::Delete)
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => self.if_else(condition, then, otherwise),
            Statement::Either { branches } => self.either(branches),
            Statement::ForEach {
                var,
                objset,
                body,
                order,
            } => self.foreach(var, objset, body, *order),
        }
    }

    fn assign(&mut self, var: &str, expr: &ObjsetExpr) -> Result<()> {
        let (value, ty) = self.objset(expr)?;
        let local = is_local(expr, &self.scope.locals);
        let value = if value.is_atomic() {
            value
        } else {
            match self.sort_of(&ty)? {
                Some(sort) => self.define(&format!("assign_{}", var), sort, &value)?,
                None => ObjsetValue::Empty,
            }
        };
        self.scope.bind(var, value, ty, local);
        Ok(())
    }

    fn create(&mut self, class: &str, var: Option<&str>) -> Result<()> {
        let store = self.store;
        let graph = &store.graph;
        let class_id = graph.id(class)?;
        let sort = self.class_sort(class_id);
        let excluded: Vec<_> = graph
            .component_members(graph.component(class_id))
            .filter(|other| *other != class_id && !graph.all_parents(class_id).contains(other))
            .collect();

        let pred = self.fresh_pred(&format!("created_{}", class), &[sort]);
        let depth = self.depth();
        let with = |ps: &[Term], o: &Term| {
            let mut args = ps.to_vec();
            args.push(o.clone());
            Formula::atom(pred, args)
        };

        self.axiom_over(|tr, ps| {
            let (b, o) = tr.vars.binder(sort);
            Ok(Formula::exists(vec![b], with(ps, &o)))
        })?;

        // Facts about created objects hold whether or not the statement runs
        let (binders, ps) = self.context_binders(self.context);
        let (b, o) = self.vars.binder(sort);
        let mut facts = vec![
            self.contexts.membership(self.context, &ps),
            self.guards(&ps),
            Formula::not(self.initial.holds(sort, &[], o.clone())),
            self.is_class(class_id, &o),
        ];
        facts.extend(excluded.iter().map(|other| Formula::not(self.is_class(*other, &o))));
        let all: Vec<_> = binders.iter().cloned().chain([b]).collect();
        self.emit(Formula::forall(all, Formula::implies(with(&ps, &o), Formula::and(facts))));

        let (b1, o1) = self.vars.binder(sort);
        let (b2, o2) = self.vars.binder(sort);
        let all: Vec<_> = binders.into_iter().chain([b1, b2]).collect();
        self.emit(Formula::forall(
            all,
            Formula::implies(
                Formula::and([with(&ps, &o1), with(&ps, &o2)]),
                Formula::eq(o1.clone(), o2.clone()),
            ),
        ));

        let old = self.state.slot(sort);
        let new = self.fresh_slot(sort);
        self.axiom_over(|tr, ps| {
            let (b, o) = tr.vars.binder(sort);
            Ok(Formula::forall(
                vec![b],
                Formula::iff(
                    new.holds(ps, o.clone()),
                    Formula::or([old.holds(ps, o.clone()), with(ps, &o)]),
                ),
            ))
        })?;
        self.state = self.state.link(sort, new);

        let params = self.contexts.get(self.context).param_sorts.clone();
        self.creates
            .entry(sort)
            .or_default()
            .push(CreationLink { pred, params });

        if let Some(var) = var {
            self.scope.bind(
                var,
                ObjsetValue::Pred { pred, depth },
                ObjsetType::of_class(class_id).with_card(Cardinality::one()),
                true,
            );
        }
        Ok(())
    }

    fn delete(&mut self, expr: &ObjsetExpr) -> Result<()> {
        let (value, ty) = self.objset(expr)?;
        let Some(sort) = self.sort_of(&ty)? else {
            return Ok(());
        };

        let old = self.state.slot(sort);
        let new = self.fresh_slot(sort);
        self.axiom_over(|tr, ps| {
            let (b, o) = tr.vars.binder(sort);
            let gone = tr.apply(&value, ps, &o)?;
            Ok(Formula::forall(
                vec![b],
                Formula::iff(
                    new.holds(ps, o.clone()),
                    Formula::and([old.holds(ps, o), Formula::not(gone)]),
                ),
            ))
        })?;
        let mut changes = vec![(sort, new)];

        // Tuples touching a deleted object go with it
        for rel in self.store.incident_relations(&ty.sig) {
            let ts = self.tuple(rel)?;
            let old = self.state.slot(ts.sort);
            let new = self.fresh_slot(ts.sort);
            self.axiom_over(|tr, ps| {
                let (b, t) = tr.vars.binder(ts.sort);
                let mut parts = vec![old.holds(ps, t.clone())];
                if ts.source == sort {
                    let left = Term::app(ts.left, vec![t.clone()]);
                    parts.push(Formula::not(tr.apply(&value, ps, &left)?));
                }
                if ts.target == sort {
                    let right = Term::app(ts.right, vec![t.clone()]);
                    parts.push(Formula::not(tr.apply(&value, ps, &right)?));
                }
                Ok(Formula::forall(
                    vec![b],
                    Formula::iff(new.holds(ps, t), Formula::and(parts)),
                ))
            })?;
            changes.push((ts.sort, new));
        }

        self.state = self.state.with_slots(changes);
        Ok(())
    }

    fn update_tuples(
        &mut self,
        from: &ObjsetExpr,
        relation: &str,
        to: &ObjsetExpr,
        operation: Operation,
    ) -> Result<()> {
        let (from_value, from_ty) = self.objset(from)?;
        let (to_value, to_ty) = self.objset(to)?;
        let store = self.store;
        let rel = store.relation_on(&from_ty.sig, relation)?;
        let target = crate::types::TypeSig::class(rel.target);
        if !to_ty.sig.is_bottom() {
            let fits = matches!(
                store.graph.compare(&to_ty.sig, &target),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            );
            if !fits {
                return Err(TypeError::IncompatibleTypes {
                    left: to_ty.sig.describe(&store.graph),
                    right: target.describe(&store.graph),
                }
                .into());
            }
        }

        let (base, flipped) = rel.base();
        let ts = self.tuple(base)?;
        let (left_value, right_value) = if flipped {
            (to_value, from_value)
        } else {
            (from_value, to_value)
        };

        let old = self.state.slot(ts.sort);
        let new = self.fresh_slot(ts.sort);
        let source = self.state.slot(ts.source);
        let target = self.state.slot(ts.target);
        self.axiom_over(|tr, ps| {
            let (b, t) = tr.vars.binder(ts.sort);
            let left = Term::app(ts.left, vec![t.clone()]);
            let right = Term::app(ts.right, vec![t.clone()]);
            let matched = Formula::and([
                tr.apply(&left_value, ps, &left)?,
                tr.apply(&right_value, ps, &right)?,
            ]);
            let updated = match operation {
                Operation::Delete => Formula::and([old.holds(ps, t.clone()), Formula::not(matched)]),
                _ => Formula::or([
                    old.holds(ps, t.clone()),
                    Formula::and([
                        matched,
                        source.holds(ps, left),
                        target.holds(ps, right),
                    ]),
                ]),
            };
            Ok(Formula::forall(vec![b], Formula::iff(new.holds(ps, t), updated)))
        })?;
        self.state = self.state.link(ts.sort, new);
        Ok(())
    }

    // =========================================================================
    // Branching
    // =========================================================================

    fn if_else(&mut self, condition: &FormulaExpr, then: &Block, otherwise: &Block) -> Result<()> {
        let taken = self.fresh_pred("then", &[]);
        let skipped = self.fresh_pred("else", &[]);
        self.axiom_over(|tr, ps| {
            let cond = tr.formula(condition, ps)?;
            Ok(Formula::and([
                Formula::iff(Formula::atom(taken, ps.to_vec()), cond.clone()),
                Formula::iff(Formula::atom(skipped, ps.to_vec()), Formula::not(cond)),
            ]))
        })?;
        self.branch(&[(taken, then), (skipped, otherwise)])
    }

    fn either(&mut self, branches: &[Block]) -> Result<()> {
        match branches {
            [] => Ok(()),
            [only] => self.block(only),
            _ => {
                let indicators: Vec<PredId> = (0..branches.len())
                    .map(|i| self.fresh_pred(&format!("either_{}", i + 1), &[]))
                    .collect();
                self.axiom_over(|_, ps| {
                    Ok(Formula::exactly_one(
                        indicators
                            .iter()
                            .map(|ind| Formula::atom(*ind, ps.to_vec()))
                            .collect(),
                    ))
                })?;
                let paired: Vec<(PredId, &Block)> = indicators.into_iter().zip(branches).collect();
                self.branch(&paired)
            }
        }
    }

    /// Translate alternative blocks from the same state and merge their results
    fn branch(&mut self, branches: &[(PredId, &Block)]) -> Result<()> {
        let depth = self.depth();
        let entry_state = self.state.clone();
        let entry_scope = self.scope.clone();

        let mut exits = Vec::with_capacity(branches.len());
        for (indicator, block) in branches {
            self.state = entry_state.clone();
            self.scope = entry_scope.clone();
            self.push_frame(Some((*indicator, depth)));
            let result = self.block(block);
            self.pop_frame();
            result?;
            let state = std::mem::replace(&mut self.state, entry_state.clone());
            exits.push((*indicator, state, std::mem::take(&mut self.scope)));
        }

        let changed: BTreeSet<SortId> = exits
            .iter()
            .flat_map(|(_, state, _)| entry_state.sort_difference(state))
            .collect();
        let mut changes = Vec::with_capacity(changed.len());
        for sort in changed {
            let slots: Vec<(PredId, StateSlot)> = exits
                .iter()
                .map(|(indicator, state, _)| (*indicator, state.slot(sort)))
                .collect();
            let merged = self.fresh_slot(sort);
            self.axiom_over(|tr, ps| {
                let (b, o) = tr.vars.binder(sort);
                let alternatives = slots.iter().map(|(indicator, slot)| {
                    Formula::and([
                        Formula::atom(*indicator, ps[..depth].to_vec()),
                        slot.holds(ps, o.clone()),
                    ])
                });
                Ok(Formula::forall(
                    vec![b],
                    Formula::iff(merged.holds(ps, o.clone()), Formula::or(alternatives)),
                ))
            })?;
            changes.push((sort, merged));
        }
        self.state = entry_state.with_slots(changes);
        self.scope = self.merge_scopes(depth, &exits)?;
        Ok(())
    }

    fn merge_scopes(&self, depth: usize, exits: &[(PredId, State, Scope)]) -> Result<Scope> {
        let names: BTreeSet<&String> = exits
            .iter()
            .flat_map(|(_, _, scope)| scope.values.keys())
            .collect();
        let mut merged = Scope::default();
        for name in names {
            let values: Vec<Option<&ObjsetValue>> =
                exits.iter().map(|(_, _, scope)| scope.values.get(name)).collect();
            let value = match values.first() {
                Some(Some(first)) if values.iter().all(|v| *v == Some(*first)) => (*first).clone(),
                _ => ObjsetValue::BranchMerge {
                    slots: exits
                        .iter()
                        .zip(&values)
                        .map(|((indicator, _, _), value)| {
                            (*indicator, depth, value.cloned().unwrap_or(ObjsetValue::Empty))
                        })
                        .collect(),
                },
            };

            let mut ty: Option<ObjsetType> = None;
            let mut local = true;
            for (_, _, scope) in exits {
                let branch_ty = scope
                    .types
                    .get(name)
                    .cloned()
                    .unwrap_or_else(ObjsetType::bottom);
                ty = Some(match ty {
                    Some(prev) => ObjsetType::new(
                        self.store.graph.join(&prev.sig, &branch_ty.sig, false)?,
                        prev.card | branch_ty.card,
                    ),
                    None => branch_ty,
                });
                if let Some(branch_local) = scope.locals.get(name) {
                    local &= branch_local;
                }
            }
            merged.bind(name, value, ty.unwrap_or_else(ObjsetType::bottom), local);
        }
        Ok(merged)
    }

    // =========================================================================
    // Loops
    // =========================================================================

    fn foreach(&mut self, var: &str, objset: &ObjsetExpr, body: &Block, order: LoopKind) -> Result<()> {
        let (domain, ty) = self.objset(objset)?;
        let Some(sort) = self.sort_of(&ty)? else {
            return Ok(());
        };
        let iterator_local = is_local(objset, &self.scope.locals);
        let plan = self.plan_loop(var, &ty, iterator_local, body)?;

        let parent = self.context;
        let child = self.contexts.add(&mut self.symbols, parent, sort, order, var);
        let type_pred = self.contexts.get(child).type_pred.ok_or_else(|| {
            TranslateError::Invariant(format!("loop context for {} has no type predicate", var))
        })?;
        self.axiom_over(|tr, ps| {
            let (b, it) = tr.vars.binder(sort);
            let mut args = ps.to_vec();
            args.push(it.clone());
            let member = tr.apply(&domain, ps, &it)?;
            Ok(Formula::forall(vec![b], Formula::iff(Formula::atom(type_pred, args), member)))
        })?;
        let nesting = self.contexts.nesting_axiom(child, &mut self.vars);
        self.emit(nesting);
        for axiom in self.contexts.order_axioms(child, &mut self.vars) {
            self.emit(axiom);
        }

        let iterator = (ty.with_card(Cardinality::one()), iterator_local);
        match order {
            LoopKind::Flat => self.flat_loop(var, iterator, child, sort, &plan, body),
            LoopKind::Chained => self.chained_loop(var, iterator, child, sort, &plan, body),
        }
    }

    fn plan_loop(&self, var: &str, ty: &ObjsetType, local: bool, body: &Block) -> Result<LoopPlan> {
        let mut types = self.scope.types.clone();
        let mut locals = self.scope.locals.clone();
        types.insert(var.to_string(), ty.with_card(Cardinality::one()));
        locals.insert(var.to_string(), local);
        let mut analyzer = EffectAnalyzer::with_bindings(self.store, types, locals);
        analyzer.block(body)?;
        let effects = analyzer.finish();

        let writes = effects
            .writes()
            .into_iter()
            .filter_map(|domain| self.domain_sort(domain))
            .collect();
        let creates = effects
            .entries()
            .filter(|(_, ops)| ops.iter().any(|e| e.operation == Operation::Create))
            .filter_map(|(domain, _)| self.domain_sort(*domain))
            .collect();
        let reads = effects
            .reads()
            .into_iter()
            .filter(|domain| effects.contains(*domain, Operation::Read, false))
            .filter_map(|domain| self.domain_sort(domain))
            .collect();

        let mut carried: Vec<String> = body
            .assigned_vars()
            .into_iter()
            .filter(|name| name != var && self.scope.values.contains_key(name))
            .collect();
        carried.sort();
        let read_first: HashSet<String> = body.read_before_write();
        let boundary = carried
            .iter()
            .filter(|name| read_first.contains(*name))
            .cloned()
            .collect();

        Ok(LoopPlan {
            writes,
            creates,
            reads,
            carried,
            boundary,
        })
    }

    /// Run the body in the child context from `entry`, then restore the outer scope
    fn loop_body(
        &mut self,
        var: &str,
        iterator: (ObjsetType, bool),
        child: ContextId,
        sort: SortId,
        entry: State,
        body: &Block,
    ) -> Result<LoopBody> {
        let parent = self.context;
        let outer_scope = self.scope.clone();
        self.context = child;
        self.state = entry.clone();
        let level = self.contexts.level(child);
        self.scope
            .bind(var, ObjsetValue::Param { level }, iterator.0, iterator.1);
        let result = self.block(body);
        let out = std::mem::replace(&mut self.state, entry.clone());
        let scope = std::mem::replace(&mut self.scope, outer_scope);
        self.context = parent;
        result?;
        Ok(LoopBody {
            child,
            sort,
            entry,
            out,
            scope,
        })
    }

    fn check_writes(&self, var: &str, body: &LoopBody, plan: &LoopPlan) -> Result<Vec<SortId>> {
        let changed = body.entry.sort_difference(&body.out);
        if let Some(sort) = changed.iter().find(|s| !plan.writes.contains(*s)) {
            return Err(TranslateError::Invariant(format!(
                "loop over {} changed {} outside its write set",
                var,
                self.symbols.sort_name(*sort)
            )));
        }
        Ok(changed)
    }

    fn sort_names(&self, sorts: impl IntoIterator<Item = SortId>) -> String {
        sorts
            .into_iter()
            .map(|s| self.symbols.sort_name(s).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Iterations are independent: each sees the pre-loop state.
    ///
    /// Deletions commute, so a body may read what it deletes. Reading a sort
    /// the body creates into would observe sibling iterations, which is
    /// rejected.
    fn flat_loop(
        &mut self,
        var: &str,
        iterator: (ObjsetType, bool),
        child: ContextId,
        sort: SortId,
        plan: &LoopPlan,
        body: &Block,
    ) -> Result<()> {
        if !plan.boundary.is_empty() {
            return Err(TranslateError::OrderSensitiveLoop {
                var: var.to_string(),
                reason: format!("reads {} before reassigning it", plan.boundary.join(", ")),
            });
        }
        let overlap: Vec<SortId> = plan.reads.intersection(&plan.creates).copied().collect();
        if !overlap.is_empty() {
            return Err(TranslateError::OrderSensitiveLoop {
                var: var.to_string(),
                reason: format!("reads and creates in {}", self.sort_names(overlap)),
            });
        }

        let entry = self.state.clone();
        let body = self.loop_body(var, iterator, child, sort, entry, body)?;
        let changed = self.check_writes(var, &body, plan)?;

        let mut changes = Vec::with_capacity(changed.len());
        for written in changed {
            let before = body.entry.slot(written);
            let after = body.out.slot(written);
            let new = self.fresh_slot(written);
            self.axiom_over(|tr, ps| {
                let (b, o) = tr.vars.binder(written);
                let (b1, it1) = tr.vars.binder(body.sort);
                let (b2, it2) = tr.vars.binder(body.sort);
                let inner1: Vec<Term> = ps.iter().cloned().chain([it1]).collect();
                let inner2: Vec<Term> = ps.iter().cloned().chain([it2]).collect();
                let kept = Formula::and([
                    before.holds(ps, o.clone()),
                    Formula::forall(
                        vec![b1],
                        Formula::implies(
                            tr.contexts.membership(body.child, &inner1),
                            after.holds(&inner1, o.clone()),
                        ),
                    ),
                ]);
                let added = Formula::and([
                    Formula::not(before.holds(ps, o.clone())),
                    Formula::exists(
                        vec![b2],
                        Formula::and([
                            tr.contexts.membership(body.child, &inner2),
                            after.holds(&inner2, o.clone()),
                        ]),
                    ),
                ]);
                Ok(Formula::forall(
                    vec![b],
                    Formula::iff(new.holds(ps, o), Formula::or([kept, added])),
                ))
            })?;
            changes.push((written, new));
        }
        self.state = body.entry.with_slots(changes);
        Ok(())
    }

    /// Iterations run in order, each starting from its predecessor's result
    fn chained_loop(
        &mut self,
        var: &str,
        iterator: (ObjsetType, bool),
        child: ContextId,
        sort: SortId,
        plan: &LoopPlan,
        body: &Block,
    ) -> Result<()> {
        let ContextKind::Chained(order) = self.contexts.get(child).kind else {
            return Err(TranslateError::Invariant(format!(
                "loop over {} is not ordered",
                var
            )));
        };
        let pre_state = self.state.clone();
        let pre_scope = self.scope.clone();

        // Slots and carried values at the start of each iteration
        let parent = self.context;
        self.context = child;
        let prepared = self.iteration_inputs(var, child, plan);
        self.context = parent;
        let (inputs, carries) = prepared?;

        let entry = pre_state.with_slots(inputs.iter().copied());
        let body = self.loop_body(var, iterator, child, sort, entry, body);
        self.scope = pre_scope.clone();
        let body = body?;
        self.check_writes(var, &body, plan)?;

        // Inside the iteration context: carried values and state threading
        self.context = child;
        let threaded = self.thread_iterations(&body, &pre_state, &inputs, &carries, order);
        self.context = parent;
        threaded?;

        let empty = |tr: &mut Self, ps: &[Term]| {
            let (b, it) = tr.vars.binder(sort);
            let inner: Vec<Term> = ps.iter().cloned().chain([it]).collect();
            Formula::not(Formula::exists(vec![b], tr.contexts.membership(child, &inner)))
        };
        let last = |ps: &[Term]| Formula::atom(order.last, ps.to_vec());

        let mut changes = Vec::with_capacity(inputs.len());
        for (written, _) in &inputs {
            let written = *written;
            let before = pre_state.slot(written);
            let after = body.out.slot(written);
            let new = self.fresh_slot(written);
            self.axiom_over(|tr, ps| {
                let nothing = empty(tr, ps);
                let (b, o) = tr.vars.binder(written);
                let unchanged = Formula::forall(
                    vec![b],
                    Formula::iff(new.holds(ps, o.clone()), before.holds(ps, o)),
                );
                let (bi, it) = tr.vars.binder(sort);
                let inner: Vec<Term> = ps.iter().cloned().chain([it]).collect();
                let (b, o) = tr.vars.binder(written);
                let final_iteration = Formula::forall(
                    vec![bi],
                    Formula::implies(
                        last(&inner),
                        Formula::forall(
                            vec![b],
                            Formula::iff(new.holds(ps, o.clone()), after.holds(&inner, o)),
                        ),
                    ),
                );
                Ok(Formula::and([Formula::implies(nothing, unchanged), final_iteration]))
            })?;
            changes.push((written, new));
        }
        self.state = pre_state.with_slots(changes);

        for name in &plan.carried {
            let (Some(pre_value), Some(pre_ty), Some(end_value), Some(end_ty)) = (
                pre_scope.values.get(name),
                pre_scope.types.get(name),
                body.scope.values.get(name),
                body.scope.types.get(name),
            ) else {
                continue;
            };
            let ty = pre_ty.join(end_ty, &self.store.graph)?;
            let local = pre_scope.locals.get(name).copied().unwrap_or(false)
                && body.scope.locals.get(name).copied().unwrap_or(false);
            let Some(value_sort) = self.sort_of(&ty)? else {
                self.scope.bind(name, ObjsetValue::Empty, ty, local);
                continue;
            };
            let pred = self.fresh_pred(&format!("after_{}", name), &[value_sort]);
            let depth = self.depth();
            let with = |ps: &[Term], o: &Term| {
                let mut args = ps.to_vec();
                args.push(o.clone());
                Formula::atom(pred, args)
            };
            self.axiom_over(|tr, ps| {
                let nothing = empty(tr, ps);
                let (b, o) = tr.vars.binder(value_sort);
                let unchanged = Formula::forall(
                    vec![b],
                    Formula::iff(with(ps, &o), tr.apply(pre_value, ps, &o)?),
                );
                let (bi, it) = tr.vars.binder(sort);
                let inner: Vec<Term> = ps.iter().cloned().chain([it]).collect();
                let (b, o) = tr.vars.binder(value_sort);
                let final_value = Formula::forall(
                    vec![b],
                    Formula::iff(with(ps, &o), tr.apply(end_value, &inner, &o)?),
                );
                Ok(Formula::and([
                    Formula::implies(nothing, unchanged),
                    Formula::forall(vec![bi], Formula::implies(last(&inner), final_value)),
                ]))
            })?;
            self.scope.bind(name, ObjsetValue::Pred { pred, depth }, ty, local);
        }
        Ok(())
    }

    /// Per-iteration input slots and carry predicates for boundary variables
    fn iteration_inputs(
        &mut self,
        var: &str,
        child: ContextId,
        plan: &LoopPlan,
    ) -> Result<(Vec<(SortId, StateSlot)>, Vec<Carry>)> {
        let level = self.contexts.level(child);
        let inputs = plan
            .writes
            .iter()
            .map(|s| (*s, self.fresh_slot(*s)))
            .collect();
        let mut carries = Vec::with_capacity(plan.boundary.len());
        for name in &plan.boundary {
            let (Some(before), Some(ty)) =
                (self.scope.values.get(name).cloned(), self.scope.types.get(name).cloned())
            else {
                return Err(TypeError::UndefinedVariable(name.clone()).into());
            };
            let Some(value_sort) = self.sort_of(&ty)? else {
                return Err(TranslateError::OrderSensitiveLoop {
                    var: var.to_string(),
                    reason: format!("{} is empty before the loop", name),
                });
            };
            let carry = self.fresh_pred(&format!("carry_{}", name), &[value_sort]);
            let value = ObjsetValue::LoopBoundary {
                context: child,
                before: Box::new(before),
                inside: Box::new(ObjsetValue::Pred { pred: carry, depth: level }),
            };
            let local = self.scope.locals.get(name).copied().unwrap_or(false);
            self.scope.bind(name, value, ty.clone(), local);
            carries.push(Carry {
                name: name.clone(),
                pred: carry,
                sort: value_sort,
                ty,
            });
        }
        Ok((inputs, carries))
    }

    /// Each iteration starts where its predecessor ended, the first where the loop started
    fn thread_iterations(
        &mut self,
        body: &LoopBody,
        pre_state: &State,
        inputs: &[(SortId, StateSlot)],
        carries: &[Carry],
        order: ChainOrder,
    ) -> Result<()> {
        for carry in carries {
            let (Some(end), Some(end_ty)) = (
                body.scope.values.get(&carry.name),
                body.scope.types.get(&carry.name),
            ) else {
                continue;
            };
            carry.ty.join(end_ty, &self.store.graph)?;
            self.axiom_over(|tr, ps| {
                let (b, o) = tr.vars.binder(carry.sort);
                let mut args = ps.to_vec();
                args.push(o.clone());
                Ok(Formula::forall(
                    vec![b],
                    Formula::iff(Formula::atom(carry.pred, args), tr.apply(end, ps, &o)?),
                ))
            })?;
        }

        for (written, input) in inputs {
            let written = *written;
            let before = pre_state.slot(written);
            let after = body.out.slot(written);
            let input = *input;
            self.axiom_over(|tr, ps| {
                let (outer, current) = ps.split_at(ps.len() - 1);
                let (b, o) = tr.vars.binder(written);
                let first = Formula::implies(
                    Formula::atom(order.first, ps.to_vec()),
                    Formula::forall(
                        vec![b],
                        Formula::iff(input.holds(ps, o.clone()), before.holds(ps, o)),
                    ),
                );
                let (bp, p) = tr.vars.binder(body.sort);
                let previous: Vec<Term> = outer.iter().cloned().chain([p.clone()]).collect();
                let pair: Vec<Term> = outer
                    .iter()
                    .cloned()
                    .chain([p])
                    .chain(current.iter().cloned())
                    .collect();
                let (b, o) = tr.vars.binder(written);
                let next = Formula::forall(
                    vec![bp],
                    Formula::implies(
                        Formula::atom(order.just_before, pair),
                        Formula::forall(
                            vec![b],
                            Formula::iff(input.holds(ps, o.clone()), after.holds(&previous, o)),
                        ),
                    ),
                );
                Ok(Formula::and([first, next]))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassDecl, DataStore, RelationDecl, Spec};

    fn store() -> DataStore {
        DataStore::new(Spec {
            classes: vec![
                ClassDecl::new("Node", &[]),
                ClassDecl::new("Leaf", &["Node"]),
                ClassDecl::new("Label", &[]),
            ],
            relations: vec![RelationDecl::new("Node", "label", "Label")],
            ..Spec::default()
        })
        .unwrap()
    }

    fn run(store: &DataStore, statements: Vec<Statement>) -> Result<Translation<'_>> {
        let mut tr = Translation::new(store);
        tr.block(&Block::new(statements))?;
        Ok(tr)
    }

    fn fail(store: &DataStore, statements: Vec<Statement>) -> TranslateError {
        match run(store, statements) {
            Ok(_) => panic!("translation should fail"),
            Err(err) => err,
        }
    }

    fn sort(tr: &Translation<'_>, name: &str) -> SortId {
        let index = tr.symbols.sorts.iter().position(|s| s == name).unwrap();
        SortId(index)
    }

    /// Some emitted axiom uses every one of `preds`
    fn mentions(tr: &Translation<'_>, preds: &[PredId]) -> bool {
        tr.frames
            .iter()
            .flat_map(|frame| &frame.formulas)
            .any(|formula| {
                let used = formula.predicates();
                preds.iter().all(|p| used.contains(p))
            })
    }

    fn pred(tr: &Translation<'_>, name: &str) -> PredId {
        tr.symbols.find_predicate(name).unwrap()
    }

    #[test]
    fn test_create_binds_local_singleton() {
        let store = store();
        let tr = run(&store, vec![Statement::create_as("n", "Leaf")]).unwrap();
        assert!(matches!(tr.scope.values["n"], ObjsetValue::Pred { depth: 0, .. }));
        assert!(tr.scope.locals["n"]);
        assert!(tr.scope.types["n"].card.is_singleton());
        assert_eq!(tr.initial.sort_difference(&tr.state), vec![sort(&tr, "node")]);
        assert_eq!(tr.creates.len(), 1);
    }

    #[test]
    fn test_delete_clears_incident_tuples() {
        let store = store();
        let tr = run(&store, vec![Statement::delete(ObjsetExpr::all_of("Label"))]).unwrap();
        assert_eq!(
            tr.initial.sort_difference(&tr.state),
            vec![sort(&tr, "label"), sort(&tr, "node_label")]
        );
    }

    #[test]
    fn test_tuple_target_must_fit() {
        let store = store();
        let err = fail(
            &store,
            vec![Statement::create_tuple(
                ObjsetExpr::all_of("Node"),
                "label",
                ObjsetExpr::all_of("Node"),
            )],
        );
        assert!(matches!(err, TranslateError::Type(TypeError::IncompatibleTypes { .. })));
    }

    #[test]
    fn test_single_branch_either_is_inlined() {
        let store = store();
        let tr = run(
            &store,
            vec![Statement::either(vec![vec![Statement::create("Label")]])],
        )
        .unwrap();
        assert!(tr.symbols.find_predicate("either_1").is_none());
        assert_eq!(tr.initial.sort_difference(&tr.state), vec![sort(&tr, "label")]);
    }

    #[test]
    fn test_branch_merges_differing_values() {
        let store = store();
        let tr = run(
            &store,
            vec![Statement::if_then(
                FormulaExpr::is_empty(ObjsetExpr::all_of("Label")),
                vec![Statement::create_as("x", "Label")],
                vec![Statement::assign("x", ObjsetExpr::all_of("Label"))],
            )],
        )
        .unwrap();
        assert!(matches!(
            tr.scope.values["x"],
            ObjsetValue::BranchMerge { ref slots } if slots.len() == 2
        ));
        assert!(!tr.scope.locals["x"]);
        assert_eq!(tr.scope.types["x"].card, Cardinality::any());
    }

    #[test]
    fn test_flat_loop_rejects_carried_reads() {
        let store = store();
        let err = fail(
            &store,
            vec![
                Statement::assign("acc", ObjsetExpr::all_of("Label")),
                Statement::foreach(
                    "n",
                    ObjsetExpr::all_of("Node"),
                    vec![Statement::assign(
                        "acc",
                        ObjsetExpr::union(vec![
                            ObjsetExpr::var("acc"),
                            ObjsetExpr::deref(ObjsetExpr::iterator("n"), "label"),
                        ]),
                    )],
                ),
            ],
        );
        assert!(matches!(err, TranslateError::OrderSensitiveLoop { ref var, .. } if var == "n"));
    }

    #[test]
    fn test_flat_loop_rejects_reading_what_it_creates() {
        let store = store();
        let err = fail(
            &store,
            vec![Statement::foreach(
                "n",
                ObjsetExpr::all_of("Node"),
                vec![Statement::if_then(
                    FormulaExpr::is_empty(ObjsetExpr::all_of("Label")),
                    vec![Statement::create("Label")],
                    vec![],
                )],
            )],
        );
        assert!(matches!(
            err,
            TranslateError::OrderSensitiveLoop { ref reason, .. } if reason.contains("label")
        ));
    }

    #[test]
    fn test_flat_loop_deletes_through_iterator() {
        let store = store();
        let tr = run(
            &store,
            vec![Statement::foreach(
                "n",
                ObjsetExpr::all_of("Node"),
                vec![Statement::delete(ObjsetExpr::deref(ObjsetExpr::iterator("n"), "label"))],
            )],
        )
        .unwrap();
        let label = sort(&tr, "label");
        assert_ne!(tr.state.slot(label), tr.initial.slot(label));

        // Iterations are unordered and merged against the pre-loop state
        assert!(tr.symbols.find_predicate("before_n").is_none());
        assert!(tr.symbols.find_predicate("just_before_n").is_none());
        let merged = [
            tr.symbols.find_predicate("iter_n").unwrap(),
            tr.initial.slot(label).pred,
            tr.state.slot(label).pred,
        ];
        assert!(mentions(&tr, &merged));
    }

    #[test]
    fn test_flat_loop_assignments_stay_inside() {
        let store = store();
        let tr = run(
            &store,
            vec![Statement::foreach(
                "n",
                ObjsetExpr::all_of("Node"),
                vec![
                    Statement::create_as("l", "Label"),
                    Statement::create_tuple(ObjsetExpr::iterator("n"), "label", ObjsetExpr::var("l")),
                ],
            )],
        )
        .unwrap();
        assert!(!tr.scope.values.contains_key("l"));
        assert!(!tr.scope.values.contains_key("n"));
        assert_eq!(tr.context, crate::translate::Contexts::ROOT);
        assert_eq!(
            tr.initial.sort_difference(&tr.state),
            vec![sort(&tr, "label"), sort(&tr, "node_label")]
        );
        assert_eq!(tr.state.slot(sort(&tr, "label")).depth, 0);
    }

    #[test]
    fn test_chained_loop_carries_values_out() {
        let store = store();
        let tr = run(
            &store,
            vec![
                Statement::assign("seen", ObjsetExpr::union(vec![])),
                Statement::foreach_chained(
                    "l",
                    ObjsetExpr::all_of("Label"),
                    vec![Statement::assign(
                        "seen",
                        ObjsetExpr::union(vec![ObjsetExpr::var("seen"), ObjsetExpr::iterator("l")]),
                    )],
                ),
            ],
        );
        // the pre-loop value has no type to carry
        assert!(matches!(tr, Err(TranslateError::OrderSensitiveLoop { .. })));

        let tr = run(
            &store,
            vec![
                Statement::assign("seen", ObjsetExpr::subset(ObjsetExpr::all_of("Label"))),
                Statement::foreach_chained(
                    "l",
                    ObjsetExpr::all_of("Label"),
                    vec![Statement::assign(
                        "seen",
                        ObjsetExpr::union(vec![ObjsetExpr::var("seen"), ObjsetExpr::iterator("l")]),
                    )],
                ),
            ],
        )
        .unwrap();
        assert!(matches!(tr.scope.values["seen"], ObjsetValue::Pred { depth: 0, .. }));
        assert!(tr.symbols.find_predicate("carry_seen").is_some());
        assert!(tr.symbols.find_predicate("after_seen").is_some());

        // The first iteration is the one no sibling precedes
        assert!(mentions(&tr, &[pred(&tr, "before_l"), pred(&tr, "carry_seen")]));
        assert!(mentions(&tr, &[pred(&tr, "just_before_l"), pred(&tr, "carry_seen")]));
    }

    #[test]
    fn test_chained_loop_threads_state() {
        let store = store();
        let tr = run(
            &store,
            vec![Statement::foreach_chained(
                "n",
                ObjsetExpr::all_of("Node"),
                vec![Statement::delete(ObjsetExpr::deref(ObjsetExpr::all_of("Node"), "label"))],
            )],
        )
        .unwrap();
        let label = sort(&tr, "label");
        assert_ne!(tr.state.slot(label), tr.initial.slot(label));
        assert_eq!(tr.state.slot(label).depth, 0);

        // The first iteration starts from the pre-loop state, later ones from their predecessor
        let threads = [
            pred(&tr, "first_n"),
            pred(&tr, "just_before_n"),
            tr.initial.slot(label).pred,
        ];
        assert!(mentions(&tr, &threads));

        // The loop ends in the last iteration's state, or unchanged when nothing is iterated
        let exits = [
            pred(&tr, "last_n"),
            tr.state.slot(label).pred,
            tr.initial.slot(label).pred,
        ];
        assert!(mentions(&tr, &exits));
        assert!(!mentions(&tr, &[pred(&tr, "first_n"), tr.state.slot(label).pred]));
    }
}
