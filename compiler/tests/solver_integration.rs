//! Semantic checks against real provers.
//!
//! Each test skips itself when neither SPASS nor Z3 is installed. Provers
//! may give up on a goal; any verdict they do reach must be the expected one.
//! The emitted axioms themselves are pinned by the translator's unit tests.

use std::time::Duration;

use dsverify::ir::{
    Action, BoolLit, ClassDecl, DataStore, FormulaExpr, ObjsetExpr, Spec, Statement,
};
use dsverify::solver::{ProverConfig, Solver, Verdict};
use dsverify::translate::translate_goal;

fn solver() -> Option<Solver> {
    let provers: Vec<ProverConfig> = ProverConfig::defaults()
        .into_iter()
        .filter(|p| p.is_installed())
        .collect();
    if provers.is_empty() {
        println!("SPASS/Z3 not available, skipping integration test");
        return None;
    }
    Some(Solver::new(provers, Duration::from_secs(20)))
}

fn store() -> DataStore {
    DataStore::new(Spec {
        classes: vec![ClassDecl::new("C", &[])],
        ..Spec::default()
    })
    .unwrap()
}

fn some_c() -> FormulaExpr {
    FormulaExpr::exists("o", ObjsetExpr::all_of("C"), FormulaExpr::literal(BoolLit::True))
}

fn no_c() -> FormulaExpr {
    FormulaExpr::is_empty(ObjsetExpr::all_of("C"))
}

fn at_most_one_c() -> FormulaExpr {
    FormulaExpr::forall(
        "a",
        ObjsetExpr::all_of("C"),
        FormulaExpr::forall(
            "b",
            ObjsetExpr::all_of("C"),
            FormulaExpr::equal(vec![ObjsetExpr::var("a"), ObjsetExpr::var("b")]),
        ),
    )
}

/// A prover may time out, but must never reach the wrong verdict
#[track_caller]
fn assert_decisive(actual: Verdict, expected: Verdict) {
    if actual != Verdict::Inconclusive {
        assert_eq!(actual, expected);
    }
}

/// Verdict of `assumptions => checks` across the action
fn check(
    solver: &Solver,
    statements: Vec<Statement>,
    assumptions: &[&FormulaExpr],
    checks: &[&FormulaExpr],
) -> Verdict {
    let store = store();
    let action = Action::new("a", statements);
    let theory = translate_goal(&store, &action, assumptions, checks, "goal").unwrap();
    solver.solve(&theory).unwrap().verdict
}

#[test]
fn test_created_objects_are_distinct() {
    let Some(solver) = solver() else { return };
    let reset = || Statement::delete(ObjsetExpr::all_of("C"));
    let inv = at_most_one_c();

    let one = check(&solver, vec![reset(), Statement::create("C")], &[], &[&inv]);
    assert_decisive(one, Verdict::Correct);

    let two = check(
        &solver,
        vec![reset(), Statement::create("C"), Statement::create("C")],
        &[],
        &[&inv],
    );
    assert_decisive(two, Verdict::Incorrect);
}

#[test]
fn test_delete_all_empties_the_class() {
    let Some(solver) = solver() else { return };
    let delete = || vec![Statement::delete(ObjsetExpr::all_of("C"))];

    assert_decisive(check(&solver, delete(), &[], &[&no_c()]), Verdict::Correct);
    assert_decisive(check(&solver, delete(), &[], &[&some_c()]), Verdict::Incorrect);
}

#[test]
fn test_either_branches_are_symmetric() {
    let Some(solver) = solver() else { return };
    let both_create = || {
        vec![Statement::either(vec![
            vec![Statement::create("C")],
            vec![Statement::create("C")],
        ])]
    };

    assert_decisive(check(&solver, both_create(), &[], &[&some_c()]), Verdict::Correct);
    assert_decisive(check(&solver, both_create(), &[], &[&no_c()]), Verdict::Incorrect);

    let nothing = vec![Statement::either(vec![vec![], vec![]])];
    assert_decisive(check(&solver, nothing, &[&no_c()], &[&no_c()]), Verdict::Correct);
}

#[test]
fn test_flat_loop_deletes_every_iterated_object() {
    let Some(solver) = solver() else { return };
    let statements = vec![Statement::foreach(
        "x",
        ObjsetExpr::all_of("C"),
        vec![Statement::delete(ObjsetExpr::var("x"))],
    )];
    assert_decisive(check(&solver, statements, &[], &[&no_c()]), Verdict::Correct);
}

#[test]
fn test_flat_loop_iterations_see_the_pre_loop_state() {
    let Some(solver) = solver() else { return };
    let statements = vec![Statement::foreach(
        "x",
        ObjsetExpr::all_of("C"),
        vec![Statement::delete(ObjsetExpr::all_of("C"))],
    )];
    assert_decisive(check(&solver, statements, &[], &[&no_c()]), Verdict::Correct);
}

#[test]
fn test_chained_loop_skips_when_nothing_is_iterated() {
    let Some(solver) = solver() else { return };
    let statements = vec![Statement::foreach_chained(
        "x",
        ObjsetExpr::all_of("C"),
        vec![Statement::create("C")],
    )];
    assert_decisive(check(&solver, statements, &[&no_c()], &[&no_c()]), Verdict::Correct);
}

#[test]
fn test_chained_loop_ends_in_the_last_iteration_state() {
    let Some(solver) = solver() else { return };
    let delete_each_round = || {
        vec![Statement::foreach_chained(
            "x",
            ObjsetExpr::all_of("C"),
            vec![Statement::delete(ObjsetExpr::all_of("C"))],
        )]
    };
    assert_decisive(check(&solver, delete_each_round(), &[], &[&no_c()]), Verdict::Correct);

    let create_each_round = vec![Statement::foreach_chained(
        "x",
        ObjsetExpr::all_of("C"),
        vec![Statement::create("C")],
    )];
    assert_decisive(check(&solver, create_each_round, &[&some_c()], &[&no_c()]), Verdict::Incorrect);
}
