//! External prover driver.
//!
//! A theory is written to a temporary file once per input dialect and handed
//! to every configured prover at the same time. The first prover to reach a
//! decisive verdict wins and the others are killed. Provers that are not
//! installed are skipped with a warning.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fol::Theory;

/// Extra time granted to a prover beyond its own time limit
const GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Failed to prepare prover input: {0}")]
    Io(#[from] std::io::Error),

    #[error("No prover could be started (tried: {0})")]
    NoProver(String),
}

/// Outcome of one proof attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The conjecture follows from the axioms
    Correct,
    /// A counter-model exists
    Incorrect,
    /// Timeout, resource limit or unparseable output
    Inconclusive,
}

impl Verdict {
    /// For checks whose conjecture is the negation of the property of interest
    pub fn flipped(self) -> Self {
        match self {
            Verdict::Correct => Verdict::Incorrect,
            Verdict::Incorrect => Verdict::Correct,
            Verdict::Inconclusive => Verdict::Inconclusive,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Correct => write!(f, "correct"),
            Verdict::Incorrect => write!(f, "incorrect"),
            Verdict::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SPASS input format
    Dfg,
    /// SMT-LIB 2
    SmtLib,
}

impl Dialect {
    pub fn extension(&self) -> &'static str {
        match self {
            Dialect::Dfg => "dfg",
            Dialect::SmtLib => "smt2",
        }
    }

    pub fn render(&self, theory: &Theory) -> String {
        match self {
            Dialect::Dfg => theory.to_dfg(),
            Dialect::SmtLib => theory.to_smtlib(),
        }
    }
}

/// How to invoke one prover.
///
/// `{file}` and `{timeout}` (whole seconds) in `args` are substituted per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverConfig {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub dialect: Dialect,
}

impl ProverConfig {
    pub fn spass() -> Self {
        Self {
            name: "spass".to_string(),
            program: "SPASS".to_string(),
            args: vec![
                "-TimeLimit={timeout}".to_string(),
                "-PGiven=0".to_string(),
                "-PProblem=0".to_string(),
                "{file}".to_string(),
            ],
            dialect: Dialect::Dfg,
        }
    }

    pub fn z3() -> Self {
        Self {
            name: "z3".to_string(),
            program: "z3".to_string(),
            args: vec![
                "-smt2".to_string(),
                "-T:{timeout}".to_string(),
                "{file}".to_string(),
            ],
            dialect: Dialect::SmtLib,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::spass(), Self::z3()]
    }

    /// The program can be spawned from `PATH`
    pub fn is_installed(&self) -> bool {
        Command::new(&self.program)
            .arg("-h")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    pub fn command_args(&self, file: &Path, timeout: Duration) -> Vec<String> {
        let file = file.display().to_string();
        let seconds = timeout.as_secs().max(1).to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{file}", &file).replace("{timeout}", &seconds))
            .collect()
    }
}

/// Read a verdict off a prover's standard output
pub fn parse_verdict(dialect: Dialect, output: &str) -> Verdict {
    match dialect {
        Dialect::Dfg => {
            if output.contains("Proof found") {
                Verdict::Correct
            } else if output.contains("Completion found") {
                Verdict::Incorrect
            } else {
                Verdict::Inconclusive
            }
        }
        Dialect::SmtLib => match output.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some("unsat") => Verdict::Correct,
            Some("sat") => Verdict::Incorrect,
            _ => Verdict::Inconclusive,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolverOutcome {
    pub verdict: Verdict,

    /// Prover that produced a decisive verdict
    pub prover: Option<String>,

    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

/// Races the configured provers on one theory at a time
#[derive(Debug, Clone)]
pub struct Solver {
    provers: Vec<ProverConfig>,
    timeout: Duration,
}

impl Solver {
    pub fn new(provers: Vec<ProverConfig>, timeout: Duration) -> Self {
        Self { provers, timeout }
    }

    pub fn provers(&self) -> &[ProverConfig] {
        &self.provers
    }
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn solve(&self, theory: &Theory) -> Result<SolverOutcome, SolverError> {
        let start = Instant::now();

        let mut inputs = Vec::new();
        for prover in &self.provers {
            if inputs.iter().any(|(d, _)| *d == prover.dialect) {
                continue;
            }
            let mut file = tempfile::Builder::new()
                .prefix("dsverify-")
                .suffix(&format!(".{}", prover.dialect.extension()))
                .tempfile()?;
            file.write_all(prover.dialect.render(theory).as_bytes())?;
            file.flush()?;
            inputs.push((prover.dialect, file));
        }

        let (tx, rx) = mpsc::channel();
        let mut running: Vec<(String, Child)> = Vec::new();
        for (index, prover) in self.provers.iter().enumerate() {
            let Some((_, file)) = inputs.iter().find(|(d, _)| *d == prover.dialect) else {
                continue;
            };
            let spawned = Command::new(&prover.program)
                .args(prover.command_args(file.path(), self.timeout))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn();
            let mut child = match spawned {
                Ok(child) => child,
                Err(err) => {
                    warn!(prover = %prover.name, program = %prover.program, error = %err, "skipping prover");
                    continue;
                }
            };
            if let Some(mut stdout) = child.stdout.take() {
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut output = String::new();
                    let _ = stdout.read_to_string(&mut output);
                    let _ = tx.send((index, output));
                });
            }
            debug!(prover = %prover.name, goal = %theory.name, "prover started");
            running.push((prover.name.clone(), child));
        }
        drop(tx);

        if running.is_empty() {
            let tried: Vec<&str> = self.provers.iter().map(|p| p.program.as_str()).collect();
            return Err(SolverError::NoProver(tried.join(", ")));
        }

        let deadline = start + self.timeout + GRACE;
        let mut outcome = SolverOutcome {
            verdict: Verdict::Inconclusive,
            prover: None,
            elapsed: Duration::ZERO,
        };
        let mut pending = running.len();
        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((index, output)) => {
                    pending -= 1;
                    let prover = &self.provers[index];
                    let verdict = parse_verdict(prover.dialect, &output);
                    debug!(prover = %prover.name, %verdict, "prover finished");
                    if verdict != Verdict::Inconclusive {
                        outcome.verdict = verdict;
                        outcome.prover = Some(prover.name.clone());
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    info!(goal = %theory.name, "provers timed out");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        for (name, mut child) in running {
            if let Ok(None) = child.try_wait() {
                debug!(prover = %name, "stopping prover");
                let _ = child.kill();
            }
            let _ = child.wait();
        }

        outcome.elapsed = start.elapsed();
        Ok(outcome)
    }
}
