//! Batch verification of actions against invariants.
//!
//! For one action the verifier builds a list of goals: a consistency check of
//! all invariants together, then one preservation goal per checked invariant.
//! Every goal is translated and solved on its own, so one failing goal never
//! affects its siblings.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::VerifierConfig;
use crate::effects::{Domain, EffectAnalyzer};
use crate::fol::{Theory, TheoryStats};
use crate::ir::{Action, DataStore, FormulaExpr, Invariant, RelationId};
use crate::solver::{Dialect, Solver, Verdict};
use crate::translate::{
    cardinality_invariants, translate_consistency, translate_goal, TranslateError,
};
use crate::types::TypeError;

/// Invariant label of the consistency goal
pub const CONSISTENCY: &str = "consistency";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Verdict(Verdict),
    /// The action writes nothing the invariant reads
    Trivial,
    /// Translation failed
    Error(String),
}

impl Outcome {
    pub fn is_incorrect(&self) -> bool {
        matches!(self, Outcome::Verdict(Verdict::Incorrect))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Verdict(verdict) => write!(f, "{}", verdict),
            Outcome::Trivial => write!(f, "correct (frame)"),
            Outcome::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalReport {
    pub action: String,
    pub invariant: String,
    pub outcome: Outcome,
    pub prover: Option<String>,
    pub stats: Option<TheoryStats>,
    pub translation_ms: u64,
    pub solving_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub goals: Vec<GoalReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub correct: usize,
    pub incorrect: usize,
    pub inconclusive: usize,
    pub errors: usize,
}

impl Report {
    pub fn has_incorrect(&self) -> bool {
        self.goals.iter().any(|g| g.outcome.is_incorrect())
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for goal in &self.goals {
            match goal.outcome {
                Outcome::Verdict(Verdict::Correct) | Outcome::Trivial => summary.correct += 1,
                Outcome::Verdict(Verdict::Incorrect) => summary.incorrect += 1,
                Outcome::Verdict(Verdict::Inconclusive) => summary.inconclusive += 1,
                Outcome::Error(_) => summary.errors += 1,
            }
        }
        summary
    }

    pub fn extend(&mut self, other: Report) {
        self.goals.extend(other.goals);
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for goal in &self.goals {
            writeln!(
                f,
                "{} / {}: {} ({} ms translate, {} ms solve)",
                goal.action, goal.invariant, goal.outcome, goal.translation_ms, goal.solving_ms
            )?;
        }
        let s = self.summary();
        write!(
            f,
            "{} correct, {} incorrect, {} inconclusive, {} errors",
            s.correct, s.incorrect, s.inconclusive, s.errors
        )
    }
}

/// What a goal checks
#[derive(Debug, Clone, Copy)]
enum Goal<'i> {
    Consistency,
    Preserve(&'i Invariant),
}

impl Goal<'_> {
    fn label(&self) -> &str {
        match self {
            Goal::Consistency => CONSISTENCY,
            Goal::Preserve(invariant) => &invariant.name,
        }
    }
}

/// Storage a domain lives in after translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Component(usize),
    Tuples(RelationId),
}

fn sort_key(store: &DataStore, domain: Domain) -> SortKey {
    match domain {
        Domain::Class(class) => SortKey::Component(store.graph.component(class)),
        Domain::Relation(rel) => SortKey::Tuples(store.relation(rel).base().0),
    }
}

pub struct Verifier<'a> {
    store: &'a DataStore,
    config: VerifierConfig,
    solver: Solver,
    cardinality: Vec<Invariant>,
}

impl<'a> Verifier<'a> {
    pub fn new(store: &'a DataStore, config: VerifierConfig) -> Result<Self, TranslateError> {
        let cardinality = cardinality_invariants(store)?;
        let solver = config.solver();
        Ok(Self {
            store,
            config,
            solver,
            cardinality,
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Declared invariants followed by the synthesized cardinality invariants
    pub fn invariants(&self) -> Vec<&Invariant> {
        self.store.invariants().chain(&self.cardinality).collect()
    }

    pub fn invariant(&self, name: &str) -> Result<&Invariant, TypeError> {
        self.invariants()
            .into_iter()
            .find(|inv| inv.name == name)
            .ok_or_else(|| TypeError::UnknownInvariant(name.to_string()))
    }

    /// Invariants to check; all of them when `filter` is empty
    fn selected(&self, filter: &[String]) -> Result<Vec<&Invariant>, TypeError> {
        if filter.is_empty() {
            return Ok(self.invariants());
        }
        filter.iter().map(|name| self.invariant(name)).collect()
    }

    /// Theory of one goal without solving it
    pub fn goal_theory(
        &self,
        action: &Action,
        invariant: Option<&Invariant>,
    ) -> Result<Theory, TranslateError> {
        let assumed: Vec<&FormulaExpr> = self
            .invariants()
            .into_iter()
            .map(|inv| &inv.formula)
            .collect();
        match invariant {
            Some(invariant) => translate_goal(
                self.store,
                action,
                &assumed,
                &[&invariant.formula],
                &goal_name(&action.name, &invariant.name),
            ),
            None => translate_consistency(
                self.store,
                &assumed,
                &goal_name(&action.name, CONSISTENCY),
            ),
        }
    }

    pub fn verify_all(&self, filter: &[String]) -> Result<Report, TypeError> {
        let mut report = Report::default();
        for action in self.store.actions() {
            let partial = self.verify_action(&action.name, filter)?;
            let stop = self.config.halt_on_first_error && partial.has_incorrect();
            report.extend(partial);
            if stop {
                break;
            }
        }
        Ok(report)
    }

    pub fn verify_action(&self, name: &str, filter: &[String]) -> Result<Report, TypeError> {
        let action = self.store.action(name)?;
        let checked = self.selected(filter)?;
        // An ill-typed action has no trustworthy write set; its goals fail in translation
        let writes: Option<BTreeSet<SortKey>> = match EffectAnalyzer::analyze_action(self.store, action) {
            Ok(effects) => Some(
                effects
                    .writes()
                    .into_iter()
                    .map(|d| sort_key(self.store, d))
                    .collect(),
            ),
            Err(err) => {
                warn!(action = name, error = %err, "action is ill-typed");
                None
            }
        };

        let goals: Vec<Goal<'_>> = std::iter::once(Goal::Consistency)
            .chain(checked.into_iter().map(Goal::Preserve))
            .collect();
        info!(action = name, goals = goals.len(), "verifying action");

        let run = |goal: &Goal<'_>| self.check(action, *goal, writes.as_ref());
        let goals = if self.config.halt_on_first_error {
            let mut done = Vec::with_capacity(goals.len());
            for goal in &goals {
                let report = run(goal);
                let stop = report.outcome.is_incorrect();
                done.push(report);
                if stop {
                    break;
                }
            }
            done
        } else if self.config.parallel {
            goals.par_iter().map(run).collect()
        } else {
            goals.iter().map(run).collect()
        };
        Ok(Report { goals })
    }

    fn check(&self, action: &Action, goal: Goal<'_>, writes: Option<&BTreeSet<SortKey>>) -> GoalReport {
        let mut report = GoalReport {
            action: action.name.clone(),
            invariant: goal.label().to_string(),
            outcome: Outcome::Trivial,
            prover: None,
            stats: None,
            translation_ms: 0,
            solving_ms: 0,
        };

        if let (Goal::Preserve(invariant), Some(writes)) = (goal, writes) {
            if self.is_framed(invariant, writes) {
                debug!(action = %action.name, invariant = %invariant.name, "invariant untouched by action");
                return report;
            }
        }

        let start = Instant::now();
        let theory = match goal {
            Goal::Consistency => self.goal_theory(action, None),
            Goal::Preserve(invariant) => self.goal_theory(action, Some(invariant)),
        };
        report.translation_ms = millis(start.elapsed());
        let theory = match theory {
            Ok(theory) => theory,
            Err(err) => {
                warn!(action = %action.name, goal = goal.label(), error = %err, "translation failed");
                report.outcome = Outcome::Error(err.to_string());
                return report;
            }
        };
        report.stats = Some(theory.stats());

        if let Some(dir) = &self.config.emit_dir {
            if let Err(err) = emit_goal(dir, &theory) {
                warn!(dir = %dir.display(), error = %err, "failed to emit theory");
            }
        }

        let verdict = match self.solver.solve(&theory) {
            Ok(outcome) => {
                report.solving_ms = millis(outcome.elapsed);
                report.prover = outcome.prover;
                outcome.verdict
            }
            Err(err) => {
                warn!(goal = %theory.name, error = %err, "solver unavailable");
                Verdict::Inconclusive
            }
        };
        // The consistency theory proves `false`: a proof means the invariants contradict
        let verdict = match goal {
            Goal::Consistency => verdict.flipped(),
            Goal::Preserve(_) => verdict,
        };
        info!(action = %action.name, goal = goal.label(), %verdict, "goal checked");
        report.outcome = Outcome::Verdict(verdict);
        report
    }

    /// The invariant reads no sort the action writes
    fn is_framed(&self, invariant: &Invariant, writes: &BTreeSet<SortKey>) -> bool {
        match EffectAnalyzer::analyze_formula(self.store, &invariant.formula) {
            Ok(effects) => effects
                .reads()
                .into_iter()
                .all(|d| !writes.contains(&sort_key(self.store, d))),
            Err(_) => false,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

/// File-friendly name of an (action, invariant) goal
pub fn goal_name(action: &str, invariant: &str) -> String {
    format!("{}__{}", action, invariant)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Write a theory in every dialect; returns the written paths
pub fn emit_goal(dir: &Path, theory: &Theory) -> std::io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for dialect in [Dialect::Dfg, Dialect::SmtLib] {
        let path = dir.join(format!("{}.{}", theory.name, dialect.extension()));
        fs::write(&path, dialect.render(theory))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassDecl, ObjsetExpr, Spec, Statement};
    use crate::solver::ProverConfig;

    fn store() -> DataStore {
        DataStore::new(Spec {
            classes: vec![ClassDecl::new("A", &[]), ClassDecl::new("B", &[])],
            actions: vec![
                Action::new("make_a", vec![Statement::create("A")]),
                Action::new("bad", vec![Statement::delete(ObjsetExpr::var("undefined"))]),
            ],
            invariants: vec![
                Invariant::new("no_b", FormulaExpr::is_empty(ObjsetExpr::all_of("B"))),
                Invariant::new("no_a", FormulaExpr::is_empty(ObjsetExpr::all_of("A"))),
            ],
            ..Spec::default()
        })
        .unwrap()
    }

    fn offline() -> VerifierConfig {
        VerifierConfig {
            provers: vec![ProverConfig {
                name: "none".to_string(),
                program: "dsverify-no-such-prover".to_string(),
                args: Vec::new(),
                dialect: Dialect::SmtLib,
            }],
            parallel: false,
            ..VerifierConfig::default()
        }
    }

    #[test]
    fn test_goal_names_are_file_friendly() {
        assert_eq!(goal_name("add", "User.posts cardinality"), "add__User_posts_cardinality");
    }

    #[test]
    fn test_untouched_invariant_is_trivial() {
        let store = store();
        let verifier = Verifier::new(&store, offline()).unwrap();
        let report = verifier.verify_action("make_a", &["no_b".to_string()]).unwrap();
        assert_eq!(report.goals.len(), 2);
        assert_eq!(report.goals[0].invariant, CONSISTENCY);
        assert_eq!(report.goals[1].outcome, Outcome::Trivial);
    }

    #[test]
    fn test_missing_prover_is_inconclusive() {
        let store = store();
        let verifier = Verifier::new(&store, offline()).unwrap();
        let report = verifier.verify_action("make_a", &["no_a".to_string()]).unwrap();
        assert_eq!(report.goals[1].outcome, Outcome::Verdict(Verdict::Inconclusive));
        assert!(report.goals[1].stats.is_some());
        assert_eq!(report.summary().inconclusive, 2);
    }

    #[test]
    fn test_ill_typed_action_is_not_framed() {
        let store = store();
        let verifier = Verifier::new(&store, offline()).unwrap();
        let report = verifier.verify_action("bad", &["no_b".to_string()]).unwrap();
        assert_eq!(report.goals.len(), 2);
        match &report.goals[1].outcome {
            Outcome::Error(message) => assert!(message.contains("undefined")),
            other => panic!("expected a type error, got {:?}", other),
        }
        let summary = report.summary();
        assert_eq!(summary.correct, 0);
        assert_eq!(summary.errors, 1);
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let store = store();
        let verifier = Verifier::new(&store, offline()).unwrap();
        assert!(matches!(
            verifier.verify_action("nope", &[]),
            Err(TypeError::UnknownAction(_))
        ));
        assert!(matches!(
            verifier.verify_action("make_a", &["nope".to_string()]),
            Err(TypeError::UnknownInvariant(_))
        ));
    }

    #[test]
    fn test_emit_writes_both_dialects() {
        let store = store();
        let verifier = Verifier::new(&store, offline()).unwrap();
        let action = store.action("make_a").unwrap();
        let theory = verifier
            .goal_theory(action, Some(verifier.invariant("no_a").unwrap()))
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let written = emit_goal(dir.path(), &theory).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].to_string_lossy().ends_with("make_a__no_a.dfg"));
        let text = fs::read_to_string(&written[1]).unwrap();
        assert!(text.contains("(check-sat)"));
    }
}
