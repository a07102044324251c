//! End-to-end tests from JSON specifications to rendered theories and reports

use serde_json::json;

use dsverify::config::VerifierConfig;
use dsverify::effects::{Domain, EffectAnalyzer, Operation};
use dsverify::ir::DataStore;
use dsverify::solver::{Dialect, ProverConfig, Verdict};
use dsverify::verify::{Outcome, Verifier, CONSISTENCY};

fn blog() -> serde_json::Value {
    json!({
        "classes": [
            { "name": "User" },
            { "name": "Admin", "parents": ["User"] },
            { "name": "Post" },
            { "name": "Log" }
        ],
        "relations": [
            { "class": "User", "name": "posts", "target": "Post" },
            {
                "class": "Post", "name": "author", "target": "User",
                "cardinality": { "min": 1, "max": 1 },
                "inverse_of": "posts"
            }
        ],
        "actions": [
            {
                "name": "publish",
                "params": [{ "name": "u", "class": "User" }],
                "block": [
                    { "kind": "create", "class": "Post", "var": "p" },
                    {
                        "kind": "create_tuple",
                        "from": { "kind": "var", "name": "u" },
                        "relation": "posts",
                        "to": { "kind": "var", "name": "p" }
                    }
                ]
            },
            {
                "name": "purge",
                "block": [{ "kind": "delete", "objset": { "kind": "all_of", "class": "Post" } }]
            },
            {
                "name": "log",
                "block": [{ "kind": "create", "class": "Log" }]
            },
            {
                "name": "seed",
                "block": [{
                    "kind": "for_each",
                    "var": "x",
                    "objset": { "kind": "all_of", "class": "Post" },
                    "body": [{
                        "kind": "if",
                        "condition": {
                            "kind": "is_empty",
                            "objset": { "kind": "all_of", "class": "Post" }
                        },
                        "then": [{ "kind": "create", "class": "Post" }]
                    }]
                }]
            }
        ],
        "invariants": [{
            "name": "posts_have_authors",
            "formula": {
                "kind": "for_all",
                "vars": [{ "name": "p", "domain": { "kind": "all_of", "class": "Post" } }],
                "body": {
                    "kind": "not",
                    "formula": {
                        "kind": "is_empty",
                        "objset": {
                            "kind": "deref",
                            "from": { "kind": "var", "name": "p" },
                            "relation": "author"
                        }
                    }
                }
            }
        }]
    })
}

fn store() -> DataStore {
    DataStore::from_json(&blog().to_string()).unwrap()
}

fn offline() -> VerifierConfig {
    VerifierConfig {
        provers: vec![ProverConfig {
            name: "none".to_string(),
            program: "dsverify-no-such-prover".to_string(),
            args: Vec::new(),
            dialect: Dialect::Dfg,
        }],
        parallel: false,
        ..VerifierConfig::default()
    }
}

#[test]
fn test_spec_loads_from_json() {
    let store = store();
    assert_eq!(store.actions().count(), 4);
    assert_eq!(store.relations().len(), 2);
    assert!(store.invariant("posts_have_authors").is_ok());
}

#[test]
fn test_invalid_spec_is_rejected() {
    let mut spec = blog();
    spec["classes"][1]["parents"] = json!(["Nobody"]);
    let err = DataStore::from_json(&spec.to_string()).unwrap_err();
    assert!(err.to_string().contains("Nobody"));
}

#[test]
fn test_publish_effects() {
    let store = store();
    let action = store.action("publish").unwrap();
    let effects = EffectAnalyzer::analyze_action(&store, action).unwrap();
    let post = Domain::Class(store.graph.id("Post").unwrap());
    assert!(effects.contains(post, Operation::Create, true));
    assert!(effects
        .writes()
        .iter()
        .any(|d| matches!(d, Domain::Relation(_))));
    let user = Domain::Class(store.graph.id("User").unwrap());
    assert!(!effects.writes().contains(&user));
}

#[test]
fn test_cardinality_invariants_join_declared_ones() {
    let store = store();
    let verifier = Verifier::new(&store, offline()).unwrap();
    let names: Vec<&str> = verifier
        .invariants()
        .into_iter()
        .map(|inv| inv.name.as_str())
        .collect();
    assert_eq!(names, vec!["posts_have_authors", "Post.author cardinality"]);
}

#[test]
fn test_goal_theory_renders_in_both_dialects() {
    let store = store();
    let verifier = Verifier::new(&store, offline()).unwrap();
    let action = store.action("publish").unwrap();
    let invariant = verifier.invariant("posts_have_authors").unwrap();
    let theory = verifier.goal_theory(action, Some(invariant)).unwrap();

    let stats = theory.stats();
    assert_eq!(stats.conjectures, 1);
    assert!(stats.sorts >= 3);
    assert!(stats.axioms > 0);
    assert!(theory.symbols.find_predicate("param_u").is_some());

    let dfg = theory.to_dfg();
    assert!(dfg.contains("list_of_symbols"));
    assert!(dfg.contains("list_of_formulae(conjectures)"));
    let smt = theory.to_smtlib();
    assert!(smt.contains("(declare-sort"));
    assert!(smt.contains("(check-sat)"));
}

#[test]
fn test_unrelated_action_is_framed() {
    let store = store();
    let verifier = Verifier::new(&store, offline()).unwrap();
    let report = verifier.verify_action("log", &[]).unwrap();
    assert_eq!(report.goals[0].invariant, CONSISTENCY);
    assert!(report.goals[1..]
        .iter()
        .all(|g| g.outcome == Outcome::Trivial));
}

#[test]
fn test_order_sensitive_loop_is_reported_per_goal() {
    let store = store();
    let verifier = Verifier::new(&store, offline()).unwrap();
    let report = verifier
        .verify_action("seed", &["posts_have_authors".to_string()])
        .unwrap();
    assert_eq!(report.goals.len(), 2);
    assert_eq!(
        report.goals[0].outcome,
        Outcome::Verdict(Verdict::Inconclusive)
    );
    match &report.goals[1].outcome {
        Outcome::Error(message) => assert!(message.contains("Order-sensitive")),
        other => panic!("expected a translation error, got {:?}", other),
    }
    assert_eq!(report.summary().errors, 1);
}

#[test]
fn test_nondeterministic_invariant_is_an_error() {
    let mut spec = blog();
    spec["invariants"] = json!([{
        "name": "some_post",
        "formula": {
            "kind": "is_empty",
            "objset": { "kind": "one_of", "of": { "kind": "all_of", "class": "Post" } }
        }
    }]);
    let store = DataStore::from_json(&spec.to_string()).unwrap();
    let verifier = Verifier::new(&store, offline()).unwrap();
    let report = verifier.verify_action("purge", &[]).unwrap();
    assert!(report
        .goals
        .iter()
        .all(|g| matches!(g.outcome, Outcome::Error(_))));
}

#[test]
fn test_report_serializes_outcomes() {
    let store = store();
    let verifier = Verifier::new(&store, offline()).unwrap();
    let report = verifier.verify_action("log", &[]).unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["goals"][0]["invariant"], json!(CONSISTENCY));
    assert_eq!(value["goals"][1]["outcome"]["status"], json!("trivial"));
}

#[cfg(unix)]
mod fake_prover {
    use super::*;

    /// A prover that proves everything
    fn agreeable() -> VerifierConfig {
        VerifierConfig {
            provers: vec![ProverConfig {
                name: "yes".to_string(),
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo unsat".to_string()],
                dialect: Dialect::SmtLib,
            }],
            ..VerifierConfig::default()
        }
    }

    #[test]
    fn test_proved_consistency_goal_means_contradiction() {
        let store = store();
        let verifier = Verifier::new(&store, agreeable()).unwrap();
        let report = verifier.verify_action("purge", &[]).unwrap();
        assert_eq!(
            report.goals[0].outcome,
            Outcome::Verdict(Verdict::Incorrect)
        );
        assert!(report.goals[1..]
            .iter()
            .all(|g| g.outcome == Outcome::Verdict(Verdict::Correct)));
        assert_eq!(report.goals[1].prover.as_deref(), Some("yes"));
    }

    #[test]
    fn test_halting_stops_after_first_incorrect_goal() {
        let store = store();
        let config = VerifierConfig {
            halt_on_first_error: true,
            ..agreeable()
        };
        let verifier = Verifier::new(&store, config).unwrap();
        let report = verifier.verify_all(&[]).unwrap();
        assert_eq!(report.goals.len(), 1);
        assert!(report.has_incorrect());
    }

    #[test]
    fn test_emit_dir_receives_theories() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let config = VerifierConfig {
            emit_dir: Some(dir.path().to_path_buf()),
            ..agreeable()
        };
        let verifier = Verifier::new(&store, config).unwrap();
        verifier
            .verify_action("purge", &["posts_have_authors".to_string()])
            .unwrap();
        assert!(dir.path().join("purge__posts_have_authors.smt2").exists());
        assert!(dir.path().join("purge__consistency.dfg").exists());
    }
}
