#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Evaluation stages: ordered collections of cases sharing a score
//! budget, required files, and an execution mode.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::case::EvaluationCase;

/// Relative path of the shared support library every stage requires at
/// grading time.
pub const SUPPORT_LIBRARY: &str = ".judge/judge_util.py";

/// How a stage binds the learner's submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// Cases execute directly against an already-loaded submission
    /// context merged by an earlier stage.
    Append,
    /// The stage owns its own isolated submission artifact, loaded and
    /// torn down around the stage's run.
    Separate,
}

impl StageMode {
    /// The mode name used in judge settings.
    pub fn as_str(self) -> &'static str {
        match self {
            StageMode::Append => "append",
            StageMode::Separate => "separate",
        }
    }
}

/// The shape of the submission artifact an exercise produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseStyle {
    /// A packaged notebook whose answer cell holds the graded code.
    Notebook,
    /// A plain source file.
    Script,
}

impl ExerciseStyle {
    /// The well-known file name the artifact is graded under.
    pub fn submission_file_name(self) -> &'static str {
        match self {
            ExerciseStyle::Notebook => "submission.ipynb",
            ExerciseStyle::Script => "submission.py",
        }
    }
}

/// An independently-scored, orderable unit of grading containing one or
/// more cases.
#[derive(Debug)]
pub struct EvaluationStage {
    /// Unique within an exercise; human label and machine state name.
    name:               String,
    /// How the submission is bound around the run.
    mode:               StageMode,
    /// Score awarded when every test-role case passes.
    score:              u32,
    /// Score awarded otherwise; at most `score`.
    unsuccessful_score: u32,
    /// Relative paths the stage needs present at grading time.
    required_files:     Vec<String>,
    /// Submission artifact shape.
    exercise_style:     ExerciseStyle,
    /// Whether to execute the answer as an importable unit before the
    /// cases run.
    exec_answer:        bool,
    /// Cases in declaration order.
    cases:              Vec<EvaluationCase>,
}

impl EvaluationStage {
    /// Starts a stage declaration with the given state name.
    pub fn builder(name: impl Into<String>) -> StageBuilder {
        StageBuilder {
            name:               name.into(),
            mode:               StageMode::Append,
            score:              1,
            unsuccessful_score: 0,
            required_files:     Vec::new(),
            exercise_style:     ExerciseStyle::Notebook,
            exec_answer:        false,
            cases:              Vec::new(),
        }
    }

    /// The stage's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stage's execution mode.
    pub fn mode(&self) -> StageMode {
        self.mode
    }

    /// Score awarded on aggregate success.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Score awarded on aggregate failure.
    pub fn unsuccessful_score(&self) -> u32 {
        self.unsuccessful_score
    }

    /// Files the stage needs at grading time, support library included.
    pub fn required_files(&self) -> &[String] {
        &self.required_files
    }

    /// Submission artifact shape.
    pub fn exercise_style(&self) -> ExerciseStyle {
        self.exercise_style
    }

    /// Whether the stage executes the answer before its cases run.
    pub fn exec_answer(&self) -> bool {
        self.exec_answer
    }

    /// Cases in declaration order.
    pub fn cases(&self) -> &[EvaluationCase] {
        &self.cases
    }
}

/// Builder for [`EvaluationStage`]; score ordering and name invariants
/// are checked in [`StageBuilder::build`], at configuration-build time,
/// so declarations may be assembled in any order.
#[derive(Debug)]
pub struct StageBuilder {
    /// See [`EvaluationStage::name`].
    name:               String,
    /// See [`EvaluationStage::mode`].
    mode:               StageMode,
    /// See [`EvaluationStage::score`].
    score:              u32,
    /// See [`EvaluationStage::unsuccessful_score`].
    unsuccessful_score: u32,
    /// See [`EvaluationStage::required_files`].
    required_files:     Vec<String>,
    /// See [`EvaluationStage::exercise_style`].
    exercise_style:     ExerciseStyle,
    /// See [`EvaluationStage::exec_answer`].
    exec_answer:        bool,
    /// See [`EvaluationStage::cases`].
    cases:              Vec<EvaluationCase>,
}

impl StageBuilder {
    /// Sets the execution mode.
    pub fn mode(mut self, mode: StageMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the score awarded on aggregate success.
    pub fn score(mut self, score: u32) -> Self {
        self.score = score;
        self
    }

    /// Sets the score awarded on aggregate failure.
    pub fn unsuccessful_score(mut self, unsuccessful_score: u32) -> Self {
        self.unsuccessful_score = unsuccessful_score;
        self
    }

    /// Adds a required file.
    pub fn required_file(mut self, path: impl Into<String>) -> Self {
        self.required_files.push(path.into());
        self
    }

    /// Sets the submission artifact shape.
    pub fn exercise_style(mut self, style: ExerciseStyle) -> Self {
        self.exercise_style = style;
        self
    }

    /// Requests answer execution before the cases run.
    pub fn exec_answer(mut self, exec_answer: bool) -> Self {
        self.exec_answer = exec_answer;
        self
    }

    /// Appends a case; cases run in declaration order.
    pub fn case(mut self, case: EvaluationCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Validates the declaration and produces the stage.
    pub fn build(mut self) -> Result<EvaluationStage> {
        ensure!(!self.name.is_empty(), "Stage name must not be empty");
        ensure!(
            self.name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "Stage name `{}` is not usable as a machine state name",
            self.name
        );
        ensure!(
            self.unsuccessful_score <= self.score,
            "Stage `{}`: unsuccessful_score {} exceeds score {}",
            self.name,
            self.unsuccessful_score,
            self.score
        );
        for (i, case) in self.cases.iter().enumerate() {
            ensure!(
                !self.cases[..i].iter().any(|c| c.name() == case.name()),
                "Stage `{}` declares case `{}` twice",
                self.name,
                case.name()
            );
        }
        if !self.required_files.iter().any(|f| f == SUPPORT_LIBRARY) {
            self.required_files.insert(0, SUPPORT_LIBRARY.to_string());
        }

        Ok(EvaluationStage {
            name:               self.name,
            mode:               self.mode,
            score:              self.score,
            unsuccessful_score: self.unsuccessful_score,
            required_files:     self.required_files,
            exercise_style:     self.exercise_style,
            exec_answer:        self.exec_answer,
            cases:              self.cases,
        })
    }
}

/// Checks that stage names are pairwise distinct within one exercise.
pub fn validate_stage_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        ensure!(!seen.contains(&name), "Stage names conflict: `{name}` is declared twice");
        seen.push(name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_ordering_is_checked_at_build_time() {
        // Every valid pair builds; the violated inequality never does.
        for (score, unsuccessful) in [(1, 0), (1, 1), (5, 3), (0, 0)] {
            assert!(
                EvaluationStage::builder("stage")
                    .score(score)
                    .unsuccessful_score(unsuccessful)
                    .build()
                    .is_ok()
            );
        }
        for (score, unsuccessful) in [(1, 2), (0, 1), (3, 10)] {
            assert!(
                EvaluationStage::builder("stage")
                    .score(score)
                    .unsuccessful_score(unsuccessful)
                    .build()
                    .is_err()
            );
        }
    }

    #[test]
    fn support_library_is_always_required() {
        let stage = EvaluationStage::builder("precheck")
            .required_file("data/reference.txt")
            .build()
            .unwrap();
        assert!(stage.required_files().contains(&SUPPORT_LIBRARY.to_string()));
        assert!(stage.required_files().contains(&"data/reference.txt".to_string()));
    }

    #[test]
    fn stage_names_must_be_distinct() {
        assert!(validate_stage_names(["precheck", "given", "hidden"]).is_ok());
        assert!(validate_stage_names(["precheck", "precheck"]).is_err());
    }

    #[test]
    fn malformed_state_names_are_rejected() {
        assert!(EvaluationStage::builder("").build().is_err());
        assert!(EvaluationStage::builder("has space").build().is_err());
        assert!(EvaluationStage::builder("ok_name-2").build().is_ok());
    }
}
