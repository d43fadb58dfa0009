#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The stage runner: executes every case of a stage, classifies each
//! outcome into a result record, and aggregates the stage's score.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    case::{CaseContext, CaseFailure, CaseRole, EvaluationCase},
    interp::Answer,
    stage::{EvaluationStage, StageMode},
    submission::BoundSubmission,
    tags::{EvaluationTag, TagRef, TagRegistry},
};

/// The classification of one case execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The body returned without failing.
    Pass,
    /// An assertion made by the body did not hold.
    Fail,
    /// The body raised an uncaught exception.
    Error,
    /// The case never started; stage setup failed before it.
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pass => "pass",
            Status::Fail => "fail",
            Status::Error => "error",
            Status::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One case's classified outcome, in the exact shape the judge consumes.
///
/// Tags are carried fully expanded, so the serialized record needs no
/// registry to interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// The case's name.
    pub name:   String,
    /// The classification.
    pub status: Status,
    /// Tags attached by classification, first-mention order.
    pub tags:   Vec<EvaluationTag>,
    /// The failure or error text; empty on pass.
    pub err:    String,
    /// The diagnostic message logged by the body; cleared on pass.
    pub msg:    String,
}

impl ResultRecord {
    /// The attached tags' short codes, in order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(EvaluationTag::name).collect()
    }
}

/// A stage's aggregate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// Whether every test-role case passed.
    pub passed: bool,
    /// The score the stage awards for this run.
    pub score:  u32,
}

/// Executes one stage's cases and classifies their outcomes.
pub struct StageRunner<'a> {
    /// The stage under execution.
    stage:    &'a EvaluationStage,
    /// The registry tag references resolve against.
    registry: &'a TagRegistry,
}

impl<'a> StageRunner<'a> {
    /// Pairs a stage with the registry its tags resolve against.
    pub fn new(stage: &'a EvaluationStage, registry: &'a TagRegistry) -> Self {
        Self { stage, registry }
    }

    /// Runs the stage against the submission directory.
    ///
    /// Separate-mode stages bind their own artifact around the run; a
    /// binding failure marks every case `unknown` without starting any
    /// of them. Append-mode stages run against whatever their bodies
    /// captured, with no submission bound.
    pub fn run(&self, workdir: &Path) -> Vec<ResultRecord> {
        match self.stage.mode() {
            StageMode::Append => self.run_with(None, None),
            StageMode::Separate => match BoundSubmission::bind(workdir, self.stage) {
                Ok(bound) => self.run_with(Some(bound.source()), bound.answer()),
                Err(e) => {
                    warn!(
                        stage = self.stage.name(),
                        "Stage setup failed, cases were never started: {e:#}"
                    );
                    self.unknown_records()
                }
            },
        }
    }

    /// Runs every case against an already-bound submission.
    pub fn run_with(
        &self,
        submission: Option<&str>,
        answer: Option<&Answer>,
    ) -> Vec<ResultRecord> {
        self.stage
            .cases()
            .iter()
            .map(|case| self.run_case(case, submission, answer))
            .collect()
    }

    /// One `unknown` record per case, for setup failures.
    fn unknown_records(&self) -> Vec<ResultRecord> {
        self.stage
            .cases()
            .iter()
            .map(|case| ResultRecord {
                name:   case.name().to_string(),
                status: Status::Unknown,
                tags:   Vec::new(),
                err:    String::new(),
                msg:    String::new(),
            })
            .collect()
    }

    /// Executes one case inside the engine's fault boundary.
    fn run_case(
        &self,
        case: &EvaluationCase,
        submission: Option<&str>,
        answer: Option<&Answer>,
    ) -> ResultRecord {
        let mut ctx = CaseContext::new(submission, answer);
        let (ok_seed, fail_seed) = match case.role() {
            CaseRole::Test => (Some(TagRef::from("CO")), Some(TagRef::from("IO"))),
            CaseRole::Check => (None, case.fixed_fail_tag().cloned()),
        };
        ctx.seed(ok_seed, fail_seed, case.declared_error_tag_rules());

        let body_result = panic::catch_unwind(AssertUnwindSafe(|| case.execute(&mut ctx)));
        match body_result {
            Ok(result) => match self.classify(case, &ctx, result) {
                Ok(record) => record,
                Err(e) => {
                    warn!(case = case.name(), "Classification failed: {e:#}");
                    Self::engine_fault_record(case, format!("{e:#}"))
                }
            },
            Err(payload) => {
                let text = panic_text(payload.as_ref());
                warn!(case = case.name(), "Case body panicked: {text}");
                Self::engine_fault_record(case, format!("RuntimeError: {text}"))
            }
        }
    }

    /// Maps a body outcome plus the context's final tag state to a record.
    fn classify(
        &self,
        case: &EvaluationCase,
        ctx: &CaseContext,
        result: Result<(), CaseFailure>,
    ) -> anyhow::Result<ResultRecord> {
        let name = case.name().to_string();
        match result {
            Ok(()) => {
                let tags = match ctx.ok_tag() {
                    Some(tag) => vec![self.registry.resolve(tag)?],
                    None => Vec::new(),
                };
                Ok(ResultRecord {
                    name,
                    status: Status::Pass,
                    tags,
                    err: String::new(),
                    // Messages logged on the way to a pass are noise.
                    msg: String::new(),
                })
            }
            Err(CaseFailure::Assertion(what)) => {
                let tags = match ctx.fail_tag() {
                    Some(tag) => vec![self.registry.resolve(tag)?],
                    None => Vec::new(),
                };
                Ok(ResultRecord {
                    name,
                    status: Status::Fail,
                    tags,
                    err: format!("AssertionError: {what}"),
                    msg: ctx.message().to_string(),
                })
            }
            Err(CaseFailure::Exception(error)) => {
                // Every rule whose class is a superclass of the raised
                // class applies, in registration order, without
                // duplicates.
                let mut tags: Vec<EvaluationTag> = Vec::new();
                for (kind, tag) in ctx.error_tag_rules() {
                    if error.kind.is_subclass_of(*kind) {
                        let tag = self.registry.resolve(tag)?;
                        if !tags.iter().any(|t| t.name() == tag.name()) {
                            tags.push(tag);
                        }
                    }
                }
                Ok(ResultRecord {
                    name,
                    status: Status::Error,
                    tags,
                    err: error.formatted(),
                    msg: ctx.message().to_string(),
                })
            }
        }
    }

    /// A record for a fault in the engine itself, never the learner.
    fn engine_fault_record(case: &EvaluationCase, err: String) -> ResultRecord {
        ResultRecord {
            name: case.name().to_string(),
            status: Status::Error,
            tags: Vec::new(),
            err,
            msg: String::new(),
        }
    }
}

/// Renders a panic payload as text.
fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "case body panicked".to_string()
    }
}

/// Aggregates a stage's records into its pass verdict and score.
///
/// The stage passes iff every test-role case passed; check-role records
/// never affect the verdict.
pub fn aggregate(stage: &EvaluationStage, records: &[ResultRecord]) -> StageOutcome {
    let passed = stage
        .cases()
        .iter()
        .zip(records)
        .filter(|(case, _)| case.role() == CaseRole::Test)
        .all(|(_, record)| record.status == Status::Pass);
    StageOutcome {
        passed,
        score: if passed { stage.score() } else { stage.unsuccessful_score() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        case::{CaseError, ExceptionKind},
        tags::predefined_tags,
    };

    fn run_single(case: EvaluationCase) -> ResultRecord {
        let stage = EvaluationStage::builder("stage").case(case).build().unwrap();
        let registry = predefined_tags();
        let runner = StageRunner::new(&stage, &registry);
        runner.run_with(Some("x = 1\n"), None).remove(0)
    }

    #[test]
    fn passing_tests_carry_the_correct_tag_and_no_message() {
        let record = run_single(EvaluationCase::test("t", |ctx| {
            ctx.log("scratch note");
            ctx.assert_eq(2 + 2, 4)
        }));
        assert_eq!(record.status, Status::Pass);
        assert_eq!(record.tag_names(), vec!["CO"]);
        assert_eq!(record.err, "");
        assert_eq!(record.msg, "");
    }

    #[test]
    fn failing_tests_carry_the_incorrect_tag_and_keep_messages() {
        let record = run_single(EvaluationCase::test("t", |ctx| {
            ctx.log("expected 5");
            ctx.assert_eq(2 + 2, 5)
        }));
        assert_eq!(record.status, Status::Fail);
        assert_eq!(record.tag_names(), vec!["IO"]);
        assert!(record.err.starts_with("AssertionError:"));
        assert_eq!(record.msg, "expected 5");
    }

    #[test]
    fn error_rules_apply_in_registration_order_across_the_hierarchy() {
        let case = EvaluationCase::test("t", |_| {
            Err(CaseError::new(ExceptionKind::ZeroDivisionError, "division by zero").into())
        })
        .error_tag("ND", ExceptionKind::ArithmeticError)
        .error_tag("NF", ExceptionKind::Exception)
        .error_tag("IM", ExceptionKind::ImportError);
        let record = run_single(case);
        assert_eq!(record.status, Status::Error);
        assert_eq!(record.tag_names(), vec!["ND", "NF"]);
        assert_eq!(record.err, "ZeroDivisionError: division by zero");
    }

    #[test]
    fn checks_pass_silently_unless_an_ok_tag_is_set() {
        let silent = run_single(EvaluationCase::check("c", None, |_| Ok(())));
        assert_eq!(silent.status, Status::Pass);
        assert!(silent.tags.is_empty());

        let tagged = run_single(EvaluationCase::check("c", None, |ctx| {
            ctx.set_ok_tag("QE");
            Ok(())
        }));
        assert_eq!(tagged.tag_names(), vec!["QE"]);
    }

    #[test]
    fn check_fail_tags_are_fixed_at_declaration() {
        let record = run_single(EvaluationCase::check("c", Some("TE".into()), |ctx| {
            ctx.assert_true(false, "toplevel is clean")
        }));
        assert_eq!(record.status, Status::Fail);
        assert_eq!(record.tag_names(), vec!["TE"]);
    }

    #[test]
    fn panics_become_error_records_instead_of_unwinding() {
        let record = run_single(EvaluationCase::test("t", |_| panic!("engine fault")));
        assert_eq!(record.status, Status::Error);
        assert!(record.err.contains("engine fault"));
    }

    #[test]
    fn unresolvable_tags_become_error_records() {
        let record = run_single(EvaluationCase::check("c", None, |ctx| {
            ctx.set_ok_tag("NOPE");
            Ok(())
        }));
        assert_eq!(record.status, Status::Error);
        assert!(record.err.contains("NOPE"));
    }

    #[test]
    fn setup_failures_mark_every_case_unknown() {
        let stage = EvaluationStage::builder("stage")
            .mode(StageMode::Separate)
            .case(EvaluationCase::test("a", |_| Ok(())))
            .case(EvaluationCase::test("b", |_| Ok(())))
            .build()
            .unwrap();
        let registry = predefined_tags();
        let runner = StageRunner::new(&stage, &registry);

        let empty = std::env::temp_dir().join("kadai-runner-empty");
        std::fs::create_dir_all(&empty).unwrap();
        let records = runner.run(&empty);
        std::fs::remove_dir_all(&empty).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == Status::Unknown));
    }

    #[test]
    fn aggregation_ignores_check_roles() {
        let stage = EvaluationStage::builder("stage")
            .score(2)
            .case(EvaluationCase::check("c", None, |ctx| {
                ctx.assert_true(false, "informational only")
            }))
            .case(EvaluationCase::test("t", |_| Ok(())))
            .build()
            .unwrap();
        let registry = predefined_tags();
        let records = StageRunner::new(&stage, &registry).run_with(None, None);
        let outcome = aggregate(&stage, &records);
        assert!(outcome.passed);
        assert_eq!(outcome.score, 2);
    }

    #[test]
    fn any_failing_test_fails_the_stage() {
        let stage = EvaluationStage::builder("stage")
            .score(3)
            .unsuccessful_score(1)
            .case(EvaluationCase::test("ok", |_| Ok(())))
            .case(EvaluationCase::test("bad", |ctx| ctx.assert_eq(1, 2)))
            .build()
            .unwrap();
        let registry = predefined_tags();
        let records = StageRunner::new(&stage, &registry).run_with(None, None);
        let outcome = aggregate(&stage, &records);
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 1);
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Pass).unwrap(), "\"pass\"");
        assert_eq!(serde_json::to_string(&Status::Unknown).unwrap(), "\"unknown\"");
    }
}
