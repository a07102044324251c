//! dsverify library.
//!
//! Checks that the actions of a data-store specification preserve its
//! invariants. Actions and invariants are translated into sorted first-order
//! theories (SPASS DFG or SMT-LIB 2) and handed to external provers.
//!
//! Pipeline: [`ir::DataStore`] → [`effects`] (frame analysis) →
//! [`translate`] (one theory per goal) → [`solver`] → [`verify::Report`].

pub mod config;
pub mod effects;
pub mod fol;
pub mod ir;
pub mod solver;
pub mod translate;
pub mod types;
pub mod verify;

pub use config::VerifierConfig;
pub use ir::{DataStore, Spec};
pub use solver::Verdict;
pub use verify::{Outcome, Report, Verifier};
