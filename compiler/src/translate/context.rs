//! Loop contexts.
//!
//! A context is a position in loop nesting. Level `n` contexts are
//! parameterized by `n` iteration parameters, one per enclosing loop; each
//! parameter is the object that loop iterates over. Contexts live in an arena
//! and refer to their parent by index.

use crate::fol::{Formula, PredId, SortId, Symbols, Term, VarGen};
use crate::ir::LoopKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

/// Order predicates of a chained context; each takes the parent parameters first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOrder {
    pub before: PredId,
    pub just_before: PredId,
    pub first: PredId,
    pub last: PredId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Root,
    Flat,
    Chained(ChainOrder),
}

#[derive(Debug, Clone)]
pub struct ContextData {
    pub parent: Option<ContextId>,
    pub level: usize,
    pub param_sorts: Vec<SortId>,

    /// Live iterations at this level; `None` for the root
    pub type_pred: Option<PredId>,
    pub kind: ContextKind,
}

#[derive(Debug, Clone)]
pub struct Contexts {
    arena: Vec<ContextData>,
}

impl Default for Contexts {
    fn default() -> Self {
        Self::new()
    }
}

impl Contexts {
    pub const ROOT: ContextId = ContextId(0);

    pub fn new() -> Self {
        Self {
            arena: vec![ContextData {
                parent: None,
                level: 0,
                param_sorts: Vec::new(),
                type_pred: None,
                kind: ContextKind::Root,
            }],
        }
    }

    pub fn get(&self, id: ContextId) -> &ContextData {
        &self.arena[id.0]
    }

    pub fn level(&self, id: ContextId) -> usize {
        self.arena[id.0].level
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Allocate a child context iterating over objects of `sort`
    pub fn add(
        &mut self,
        symbols: &mut Symbols,
        parent: ContextId,
        sort: SortId,
        kind: LoopKind,
        hint: &str,
    ) -> ContextId {
        let parent_data = self.get(parent);
        let level = parent_data.level + 1;
        let mut param_sorts = parent_data.param_sorts.clone();
        param_sorts.push(sort);

        let outer = &param_sorts[..level - 1];
        let type_pred = symbols.add_predicate(&format!("iter_{}", hint), param_sorts.clone());
        let kind = match kind {
            LoopKind::Flat => ContextKind::Flat,
            LoopKind::Chained => {
                let pair: Vec<SortId> = outer.iter().copied().chain([sort, sort]).collect();
                ContextKind::Chained(ChainOrder {
                    before: symbols.add_predicate(&format!("before_{}", hint), pair.clone()),
                    just_before: symbols.add_predicate(&format!("just_before_{}", hint), pair),
                    first: symbols.add_predicate(&format!("first_{}", hint), param_sorts.clone()),
                    last: symbols.add_predicate(&format!("last_{}", hint), param_sorts.clone()),
                })
            }
        };

        self.arena.push(ContextData {
            parent: Some(parent),
            level,
            param_sorts,
            type_pred: Some(type_pred),
            kind,
        });
        ContextId(self.arena.len() - 1)
    }

    /// The parameters denote a live iteration of this context
    pub fn membership(&self, id: ContextId, params: &[Term]) -> Formula {
        let data = self.get(id);
        match data.type_pred {
            Some(pred) => Formula::atom(pred, params[..data.level].to_vec()),
            None => Formula::True,
        }
    }

    pub fn ancestor_at(&self, id: ContextId, level: usize) -> ContextId {
        let mut current = id;
        while self.level(current) > level {
            match self.get(current).parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    pub fn common_ancestor(&self, a: ContextId, b: ContextId) -> ContextId {
        let level = self.level(a).min(self.level(b));
        let mut a = self.ancestor_at(a, level);
        let mut b = self.ancestor_at(b, level);
        while a != b {
            match (self.get(a).parent, self.get(b).parent) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                _ => return Self::ROOT,
            }
        }
        a
    }

    /// Position `pa` in context `a` precedes position `pb` in context `b`.
    ///
    /// Levels are compared outermost first up to the common ancestor; when
    /// both positions coincide there, the result is `fallback`.
    pub fn before(
        &self,
        a: ContextId,
        b: ContextId,
        pa: &[Term],
        pb: &[Term],
        fallback: Formula,
    ) -> Formula {
        let common = self.common_ancestor(a, b);
        let mut acc = fallback;
        let mut ctx = common;
        while let Some(parent) = self.get(ctx).parent {
            let data = self.get(ctx);
            let l = data.level;
            let (x, y) = (pa[l - 1].clone(), pb[l - 1].clone());
            let same = Formula::and([Formula::eq(x.clone(), y.clone()), acc]);
            acc = match data.kind {
                ContextKind::Chained(order) => {
                    let mut args = pa[..l - 1].to_vec();
                    args.push(x);
                    args.push(y);
                    Formula::or([Formula::atom(order.before, args), same])
                }
                _ => same,
            };
            ctx = parent;
        }
        acc
    }

    /// Every live iteration has a live parent iteration
    pub fn nesting_axiom(&self, id: ContextId, vars: &mut VarGen) -> Formula {
        let data = self.get(id);
        let Some(parent) = data.parent else {
            return Formula::True;
        };
        let (binders, params) = vars.binders(&data.param_sorts);
        Formula::forall(
            binders,
            Formula::implies(
                self.membership(id, &params),
                self.membership(parent, &params),
            ),
        )
    }

    /// Strict total order over the iterations of one parent tuple
    pub fn order_axioms(&self, id: ContextId, vars: &mut VarGen) -> Vec<Formula> {
        let data = self.get(id);
        let ContextKind::Chained(order) = data.kind else {
            return Vec::new();
        };
        let l = data.level;
        let sort = data.param_sorts[l - 1];
        let (outer_binders, outer) = vars.binders(&data.param_sorts[..l - 1]);
        let (bx, x) = vars.binder(sort);
        let (by, y) = vars.binder(sort);
        let (bz, z) = vars.binder(sort);

        let with = |pred: PredId, tail: &[&Term]| {
            let mut args = outer.clone();
            args.extend(tail.iter().map(|t| (*t).clone()));
            Formula::atom(pred, args)
        };
        let member = |t: &Term| {
            let mut args = outer.clone();
            args.push(t.clone());
            self.membership(id, &args)
        };
        let before = |a: &Term, b: &Term| with(order.before, &[a, b]);
        let quantify = |extra: Vec<crate::fol::Binder>, body: Formula| {
            let mut all = outer_binders.clone();
            all.extend(extra);
            Formula::forall(all, body)
        };

        vec![
            quantify(
                vec![bx.clone(), by.clone()],
                Formula::implies(before(&x, &y), Formula::and([member(&x), member(&y)])),
            ),
            quantify(vec![bx.clone()], Formula::not(before(&x, &x))),
            quantify(
                vec![bx.clone(), by.clone(), bz.clone()],
                Formula::implies(
                    Formula::and([before(&x, &y), before(&y, &z)]),
                    before(&x, &z),
                ),
            ),
            quantify(
                vec![bx.clone(), by.clone()],
                Formula::implies(
                    Formula::and([
                        member(&x),
                        member(&y),
                        Formula::not(Formula::eq(x.clone(), y.clone())),
                    ]),
                    Formula::or([before(&x, &y), before(&y, &x)]),
                ),
            ),
            quantify(
                vec![bx.clone(), by.clone()],
                Formula::implies(before(&x, &y), Formula::not(before(&y, &x))),
            ),
            quantify(
                vec![bx.clone(), by.clone()],
                Formula::iff(
                    with(order.just_before, &[&x, &y]),
                    Formula::and([
                        before(&x, &y),
                        Formula::not(Formula::exists(
                            vec![bz.clone()],
                            Formula::and([before(&x, &z), before(&z, &y)]),
                        )),
                    ]),
                ),
            ),
            quantify(
                vec![bx.clone()],
                Formula::iff(
                    with(order.first, &[&x]),
                    Formula::and([
                        member(&x),
                        Formula::not(Formula::exists(vec![by.clone()], before(&y, &x))),
                    ]),
                ),
            ),
            quantify(
                vec![bx.clone()],
                Formula::iff(
                    with(order.last, &[&x]),
                    Formula::and([
                        member(&x),
                        Formula::not(Formula::exists(vec![by.clone()], before(&x, &y))),
                    ]),
                ),
            ),
            quantify(
                vec![bx.clone()],
                Formula::implies(
                    member(&x),
                    Formula::and([
                        Formula::exists(vec![by.clone()], with(order.first, &[&y])),
                        Formula::exists(vec![bz.clone()], with(order.last, &[&z])),
                    ]),
                ),
            ),
            quantify(
                vec![bx.clone()],
                Formula::implies(
                    Formula::and([member(&x), Formula::not(with(order.first, &[&x]))]),
                    Formula::exists(vec![by.clone()], with(order.just_before, &[&y, &x])),
                ),
            ),
            quantify(
                vec![bx],
                Formula::implies(
                    Formula::and([member(&x), Formula::not(with(order.last, &[&x]))]),
                    Formula::exists(vec![by], with(order.just_before, &[&x, &y])),
                ),
            ),
        ]
    }
}
