//! Translated objset values.
//!
//! An [`ObjsetValue`] is a recipe for the membership formula `v(ps, o)`: "under
//! context parameters `ps`, object `o` is in the set". Values only ever refer
//! to immutable predicates, so a value captured before a statement keeps
//! denoting the same set afterwards.

use crate::fol::{Formula, PredId, Term};
use crate::ir::typing::infer;
use crate::ir::{ObjsetExpr, RelationId};
use crate::types::{ClassId, ObjsetType, TypeError};

use super::context::{ContextId, ContextKind};
use super::state::StateSlot;
use super::{Result, TranslateError, Translation};

#[derive(Debug, Clone, PartialEq)]
pub enum ObjsetValue {
    Empty,

    /// Objects of a class existing in a state
    Class { class: ClassId, slot: StateSlot },

    /// Objects satisfying a predicate over the first `depth` context parameters
    Pred { pred: PredId, depth: usize },

    /// The object iterated at the given loop level
    Param { level: usize },

    /// A single quantified object
    Bound(Term),

    Union(Vec<ObjsetValue>),

    /// Targets of existing tuples whose source is in `source`
    Deref {
        source: Box<ObjsetValue>,
        relation: RelationId,
        flipped: bool,
        slot: StateSlot,
    },

    /// Value of whichever branch was taken
    BranchMerge { slots: Vec<(PredId, usize, ObjsetValue)> },

    /// Pre-loop value in the first iteration, previous iteration's value after
    LoopBoundary {
        context: ContextId,
        before: Box<ObjsetValue>,
        inside: Box<ObjsetValue>,
    },
}

impl ObjsetValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, ObjsetValue::Empty)
    }

    /// Values that are cheap to reference without naming them
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            ObjsetValue::Empty | ObjsetValue::Pred { .. } | ObjsetValue::Param { .. } | ObjsetValue::Bound(_)
        )
    }
}

impl<'a> Translation<'a> {
    /// Membership of `object` in `value` under parameters `ps`
    pub(crate) fn apply(&mut self, value: &ObjsetValue, ps: &[Term], object: &Term) -> Result<Formula> {
        Ok(match value {
            ObjsetValue::Empty => Formula::False,
            ObjsetValue::Class { class, slot } => Formula::and([
                slot.holds(ps, object.clone()),
                self.is_class(*class, object),
            ]),
            ObjsetValue::Pred { pred, depth } => {
                let mut args = ps[..*depth].to_vec();
                args.push(object.clone());
                Formula::atom(*pred, args)
            }
            ObjsetValue::Param { level } => Formula::eq(object.clone(), ps[level - 1].clone()),
            ObjsetValue::Bound(term) => Formula::eq(object.clone(), term.clone()),
            ObjsetValue::Union(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    out.push(self.apply(part, ps, object)?);
                }
                Formula::or(out)
            }
            ObjsetValue::Deref {
                source,
                relation,
                flipped,
                slot,
            } => {
                let ts = self.tuple(*relation)?;
                let (near, far) = if *flipped {
                    (ts.right, ts.left)
                } else {
                    (ts.left, ts.right)
                };
                let (b, t) = self.vars.binder(ts.sort);
                let from = self.apply(source, ps, &Term::app(near, vec![t.clone()]))?;
                Formula::exists(
                    vec![b],
                    Formula::and([
                        slot.holds(ps, t.clone()),
                        Formula::eq(Term::app(far, vec![t]), object.clone()),
                        from,
                    ]),
                )
            }
            ObjsetValue::BranchMerge { slots } => {
                let mut out = Vec::with_capacity(slots.len());
                for (indicator, depth, inner) in slots {
                    let taken = Formula::atom(*indicator, ps[..*depth].to_vec());
                    out.push(Formula::and([taken, self.apply(inner, ps, object)?]));
                }
                Formula::or(out)
            }
            ObjsetValue::LoopBoundary {
                context,
                before,
                inside,
            } => {
                let data = self.contexts.get(*context);
                let level = data.level;
                let sort = data.param_sorts[level - 1];
                let ContextKind::Chained(order) = data.kind else {
                    return Err(TranslateError::Invariant(
                        "loop boundary outside a chained loop".to_string(),
                    ));
                };
                let outer = &ps[..level - 1];
                let current = ps[level - 1].clone();

                // First iteration: no position of the same parent tuple precedes this one
                let (bp, p) = self.vars.binder(sort);
                let mut earlier = outer.to_vec();
                earlier.push(p);
                let precedes = self.contexts.before(*context, *context, &earlier, ps, Formula::False);
                let is_first = Formula::not(Formula::exists(vec![bp], precedes));
                let from_before = self.apply(before, ps, object)?;

                let (bq, q) = self.vars.binder(sort);
                let mut previous = outer.to_vec();
                previous.push(q.clone());
                let from_inside = self.apply(inside, &previous, object)?;
                let mut pair = outer.to_vec();
                pair.push(q);
                pair.push(current);

                Formula::or([
                    Formula::and([is_first, from_before]),
                    Formula::exists(
                        vec![bq],
                        Formula::and([Formula::atom(order.just_before, pair), from_inside]),
                    ),
                ])
            }
        })
    }

    /// Translate an objset at the current state and context
    pub(crate) fn objset(&mut self, expr: &ObjsetExpr) -> Result<(ObjsetValue, ObjsetType)> {
        let ty = infer(self.store, expr, &self.scope.types)?;
        let value = self.objset_value(expr)?;
        if ty.sig.is_bottom() && !value.is_empty() {
            return Err(TypeError::IncompatibleTypes {
                left: format!("{:?}", expr),
                right: "<bottom>".to_string(),
            }
            .into());
        }
        Ok((value, ty))
    }

    fn objset_value(&mut self, expr: &ObjsetExpr) -> Result<ObjsetValue> {
        match expr {
            ObjsetExpr::AllOf { class } => {
                let class = self.store.graph.id(class)?;
                let slot = self.state.slot(self.class_sort(class));
                Ok(ObjsetValue::Class { class, slot })
            }
            ObjsetExpr::Var { name } | ObjsetExpr::Iterator { name } => self
                .scope
                .values
                .get(name)
                .cloned()
                .ok_or_else(|| TypeError::UndefinedVariable(name.clone()).into()),
            ObjsetExpr::Subset { of } => {
                let (inner, ty) = self.choice_source(of)?;
                let Some(sort) = self.sort_of(&ty)? else {
                    return Ok(ObjsetValue::Empty);
                };
                let pred = self.fresh_pred("subset", &[sort]);
                let depth = self.depth();
                self.axiom_over(|tr, ps| {
                    let (b, o) = tr.vars.binder(sort);
                    let mut args = ps.to_vec();
                    args.push(o.clone());
                    let within = tr.apply(&inner, ps, &o)?;
                    Ok(Formula::forall(
                        vec![b],
                        Formula::implies(Formula::atom(pred, args), within),
                    ))
                })?;
                Ok(ObjsetValue::Pred { pred, depth })
            }
            ObjsetExpr::OneOf { of } => {
                let (inner, ty) = self.choice_source(of)?;
                let Some(sort) = self.sort_of(&ty)? else {
                    return Ok(ObjsetValue::Empty);
                };
                let pred = self.fresh_pred("one_of", &[sort]);
                let depth = self.depth();
                self.axiom_over(|tr, ps| {
                    let chosen = |o: &Term| {
                        let mut args = ps.to_vec();
                        args.push(o.clone());
                        Formula::atom(pred, args)
                    };
                    let (b, o) = tr.vars.binder(sort);
                    let within = Formula::forall(
                        vec![b],
                        Formula::implies(chosen(&o), tr.apply(&inner, ps, &o)?),
                    );
                    let (b, o) = tr.vars.binder(sort);
                    let source_nonempty = Formula::exists(vec![b], tr.apply(&inner, ps, &o)?);
                    let (b, o) = tr.vars.binder(sort);
                    let picked = Formula::exists(vec![b], chosen(&o));
                    let (b1, o1) = tr.vars.binder(sort);
                    let (b2, o2) = tr.vars.binder(sort);
                    let single = Formula::forall(
                        vec![b1, b2],
                        Formula::implies(
                            Formula::and([chosen(&o1), chosen(&o2)]),
                            Formula::eq(o1.clone(), o2.clone()),
                        ),
                    );
                    Ok(Formula::and([
                        within,
                        Formula::implies(source_nonempty, picked),
                        single,
                    ]))
                })?;
                Ok(ObjsetValue::Pred { pred, depth })
            }
            ObjsetExpr::Union { parts } => {
                let mut values = Vec::with_capacity(parts.len());
                for part in parts {
                    let value = self.objset_value(part)?;
                    if !value.is_empty() {
                        values.push(value);
                    }
                }
                Ok(match values.len() {
                    0 => ObjsetValue::Empty,
                    1 => values.pop().unwrap_or(ObjsetValue::Empty),
                    _ => ObjsetValue::Union(values),
                })
            }
            ObjsetExpr::Deref { from, relation } => {
                let source = self.objset_value(from)?;
                let source_ty = infer(self.store, from, &self.scope.types)?;
                let (base, flipped) = self.store.relation_on(&source_ty.sig, relation)?.base();
                let slot = self.state.slot(self.tuple(base)?.sort);
                Ok(ObjsetValue::Deref {
                    source: Box::new(source),
                    relation: base,
                    flipped,
                    slot,
                })
            }
        }
    }

    /// Nondeterministic choices are only meaningful in actions
    fn choice_source(&mut self, of: &ObjsetExpr) -> Result<(ObjsetValue, ObjsetType)> {
        if self.formula_depth > 0 {
            return Err(TranslateError::NondeterminismInFormula);
        }
        self.objset(of)
    }
}
