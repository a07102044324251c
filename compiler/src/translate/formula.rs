//! Formula translation at the current state and context.

use crate::fol::{Binder, Formula, Term};
use crate::ir::{BoolLit, FormulaExpr, QuantVar};
use crate::types::Cardinality;

use super::{ObjsetValue, Result, Translation};

impl<'a> Translation<'a> {
    /// Translate a formula under context parameters `ps`
    pub(crate) fn formula(&mut self, expr: &FormulaExpr, ps: &[Term]) -> Result<Formula> {
        self.formula_depth += 1;
        let result = self.formula_inner(expr, ps);
        self.formula_depth -= 1;
        result
    }

    fn formula_inner(&mut self, expr: &FormulaExpr, ps: &[Term]) -> Result<Formula> {
        match expr {
            FormulaExpr::Bool { value } => Ok(match value {
                BoolLit::True => Formula::True,
                BoolLit::False => Formula::False,
                BoolLit::Unknown => {
                    let pred = self.fresh_pred("unknown", &[]);
                    Formula::atom(pred, ps[..self.depth()].to_vec())
                }
            }),
            FormulaExpr::Not { formula } => Ok(Formula::not(self.formula_inner(formula, ps)?)),
            FormulaExpr::And { parts } => Ok(Formula::and(self.formulas(parts, ps)?)),
            FormulaExpr::Or { parts } => Ok(Formula::or(self.formulas(parts, ps)?)),
            FormulaExpr::Implies {
                premise,
                conclusion,
            } => Ok(Formula::implies(
                self.formula_inner(premise, ps)?,
                self.formula_inner(conclusion, ps)?,
            )),
            FormulaExpr::Equiv { parts } => {
                let mut translated = self.formulas(parts, ps)?.into_iter();
                let Some(first) = translated.next() else {
                    return Ok(Formula::True);
                };
                Ok(Formula::and(translated.map(|f| Formula::iff(first.clone(), f))))
            }
            FormulaExpr::Equal { objsets } => {
                let mut values = Vec::with_capacity(objsets.len());
                let mut joined: Option<crate::types::ObjsetType> = None;
                for objset in objsets {
                    let (value, ty) = self.objset(objset)?;
                    joined = Some(match joined {
                        Some(prev) => prev.join(&ty, &self.store.graph)?,
                        None => ty,
                    });
                    values.push(value);
                }
                let Some(sort) = joined.map(|ty| self.sort_of(&ty)).transpose()?.flatten() else {
                    return Ok(Formula::True);
                };
                let (b, o) = self.vars.binder(sort);
                let Some((first, rest)) = values.split_first() else {
                    return Ok(Formula::True);
                };
                let head = self.apply(first, ps, &o)?;
                let mut parts = Vec::with_capacity(rest.len());
                for value in rest {
                    parts.push(Formula::iff(head.clone(), self.apply(value, ps, &o)?));
                }
                Ok(Formula::forall(vec![b], Formula::and(parts)))
            }
            FormulaExpr::In { objset, within } => {
                let (inner, inner_ty) = self.objset(objset)?;
                let (outer, outer_ty) = self.objset(within)?;
                if inner_ty.sig.is_bottom() {
                    return Ok(Formula::True);
                }
                let ty = inner_ty.join(&outer_ty, &self.store.graph)?;
                let Some(sort) = self.sort_of(&ty)? else {
                    return Ok(Formula::True);
                };
                let (b, o) = self.vars.binder(sort);
                Ok(Formula::forall(
                    vec![b],
                    Formula::implies(self.apply(&inner, ps, &o)?, self.apply(&outer, ps, &o)?),
                ))
            }
            FormulaExpr::IsEmpty { objset } => {
                let (value, ty) = self.objset(objset)?;
                let Some(sort) = self.sort_of(&ty)? else {
                    return Ok(Formula::True);
                };
                let (b, o) = self.vars.binder(sort);
                Ok(Formula::not(Formula::exists(vec![b], self.apply(&value, ps, &o)?)))
            }
            FormulaExpr::ForAll { vars, body } => {
                let Some((binders, domain)) = self.quantified(vars, ps)? else {
                    return Ok(Formula::True);
                };
                let body = self.formula_inner(body, ps);
                self.scope = domain.saved;
                Ok(Formula::forall(binders, Formula::implies(domain.members, body?)))
            }
            FormulaExpr::Exists { vars, body } => {
                let Some((binders, domain)) = self.quantified(vars, ps)? else {
                    return Ok(Formula::False);
                };
                let body = self.formula_inner(body, ps);
                self.scope = domain.saved;
                Ok(Formula::exists(binders, Formula::and([domain.members, body?])))
            }
        }
    }

    fn formulas(&mut self, parts: &[FormulaExpr], ps: &[Term]) -> Result<Vec<Formula>> {
        parts.iter().map(|part| self.formula_inner(part, ps)).collect()
    }

    /// Bind quantified variables in order; `None` when some domain has no sort
    fn quantified(
        &mut self,
        vars: &[QuantVar],
        ps: &[Term],
    ) -> Result<Option<(Vec<Binder>, QuantDomain)>> {
        let saved = self.scope.clone();
        let mut binders = Vec::with_capacity(vars.len());
        let mut members = Vec::with_capacity(vars.len());
        for var in vars {
            let bound = self.objset(&var.domain).and_then(|(value, ty)| {
                Ok(self.sort_of(&ty)?.map(|sort| (value, ty, sort)))
            });
            let (value, ty, sort) = match bound {
                Ok(Some(found)) => found,
                Ok(None) => {
                    self.scope = saved;
                    return Ok(None);
                }
                Err(err) => {
                    self.scope = saved;
                    return Err(err);
                }
            };
            let (binder, term) = self.vars.binder(sort);
            match self.apply(&value, ps, &term) {
                Ok(member) => members.push(member),
                Err(err) => {
                    self.scope = saved;
                    return Err(err);
                }
            }
            binders.push(binder);
            self.scope.bind(
                &var.name,
                ObjsetValue::Bound(term),
                ty.with_card(Cardinality::one()),
                false,
            );
        }
        Ok(Some((
            binders,
            QuantDomain {
                members: Formula::and(members),
                saved,
            },
        )))
    }
}

/// Domain constraints of a quantifier and the scope to restore after its body
struct QuantDomain {
    members: Formula,
    saved: super::Scope,
}
