//! Relation cardinalities as ordinary invariants.
//!
//! A relation declared with bounds `[min, max]` yields one invariant saying
//! every source object has at least `min` and at most `max` targets. Bounds
//! are expanded into explicit witnesses, so they are capped at
//! [`MAX_COUNTING_BOUND`](super::MAX_COUNTING_BOUND).

use crate::ir::{DataStore, FormulaExpr, Invariant, ObjsetExpr, QuantVar, Relation};

use super::{check_bound, Result};

/// One invariant per relation with a non-trivial cardinality
pub fn cardinality_invariants(store: &DataStore) -> Result<Vec<Invariant>> {
    let mut out = Vec::new();
    for rel in store.relations() {
        let card = rel.cardinality;
        if card.min == 0 && card.max.is_none() {
            continue;
        }
        let label = store.relation_label(rel.id);
        check_bound(&label, card)?;

        let mut parts = Vec::new();
        if card.min > 0 {
            parts.push(at_least(rel, card.min));
        }
        if let Some(max) = card.max {
            parts.push(at_most(rel, max));
        }
        let source = store.graph.name(rel.source);
        let formula = FormulaExpr::forall("x", ObjsetExpr::all_of(source), FormulaExpr::and(parts));

        let mut invariant = Invariant::new(format!("{} cardinality", label), formula);
        invariant.description = Some(format!("{} has {} targets", label, card));
        out.push(invariant);
    }
    Ok(out)
}

fn targets(rel: &Relation) -> ObjsetExpr {
    ObjsetExpr::deref(ObjsetExpr::var("x"), &rel.name)
}

fn witnesses(rel: &Relation, count: u32) -> (Vec<QuantVar>, Vec<String>) {
    let names: Vec<String> = (1..=count).map(|i| format!("y{}", i)).collect();
    let vars = names.iter().map(|n| QuantVar::new(n, targets(rel))).collect();
    (vars, names)
}

fn pairs(names: &[String]) -> Vec<(ObjsetExpr, ObjsetExpr)> {
    let mut out = Vec::new();
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            out.push((ObjsetExpr::var(a), ObjsetExpr::var(b)));
        }
    }
    out
}

fn at_least(rel: &Relation, min: u32) -> FormulaExpr {
    let (vars, names) = witnesses(rel, min);
    let distinct = pairs(&names)
        .into_iter()
        .map(|(a, b)| FormulaExpr::not(FormulaExpr::equal(vec![a, b])))
        .collect();
    FormulaExpr::Exists {
        vars,
        body: Box::new(FormulaExpr::and(distinct)),
    }
}

fn at_most(rel: &Relation, max: u32) -> FormulaExpr {
    if max == 0 {
        return FormulaExpr::is_empty(targets(rel));
    }
    let (vars, names) = witnesses(rel, max + 1);
    let equal = pairs(&names)
        .into_iter()
        .map(|(a, b)| FormulaExpr::equal(vec![a, b]))
        .collect();
    FormulaExpr::ForAll {
        vars,
        body: Box::new(FormulaExpr::or(equal)),
    }
}
