//! # kadai
//!
//! An exercise-authoring and auto-grading toolchain for notebook-based
//! programming courses: it splits exercise masters into typed fields,
//! generates submission forms and judge configurations, and runs tagged
//! evaluation stages over learner submissions.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Static-analysis predicates over learner Python source
pub mod analysis;
/// Form and configuration generation
pub mod bundle;
/// Evaluation cases, run contexts, and the failure taxonomy
pub mod case;
/// Exercise masters: field splitting and stage declaration scanning
pub mod exercise;
/// Interpreter plumbing for answer-executing stages
pub mod interp;
/// Judge setting generation
pub mod judge;
/// Notebook document plumbing
pub mod notebook;
/// The built-in raw check stage
pub mod rawcheck;
/// Result rendering: tables, reports, and judge JSON
pub mod report;
/// Stage execution and result classification
pub mod runner;
/// Evaluation stages and their builder
pub mod stage;
/// Submission artifact binding
pub mod submission;
/// Evaluation tags and the tag registry
pub mod tags;

pub use case::{CaseContext, CaseError, CaseFailure, CaseRole, EvaluationCase, ExceptionKind,
               Tolerance};
pub use runner::{ResultRecord, StageOutcome, StageRunner, Status, aggregate};
pub use stage::{EvaluationStage, ExerciseStyle, StageMode};
pub use tags::{EvaluationTag, TagRef, TagRegistry, predefined_tags};
