#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Submission artifact binding: loading the learner's work in the shape
//! the stage expects, and tearing down anything derived from it.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::warn;

use crate::{
    interp::Answer,
    notebook::{self, find_named_cell},
    stage::{EvaluationStage, ExerciseStyle},
};

/// The learner's submission, extracted into plain source.
#[derive(Debug, Clone)]
pub struct SubmissionArtifact {
    /// The file the source was extracted from.
    path:   PathBuf,
    /// The extracted source code.
    source: String,
    /// The shape the artifact was loaded as.
    style:  ExerciseStyle,
}

impl SubmissionArtifact {
    /// Loads the artifact the given style expects from `dir`.
    ///
    /// For scripts this is the file's contents; for notebooks it is the
    /// source of the single answer cell.
    pub fn load(dir: &Path, style: ExerciseStyle) -> Result<Self> {
        let path = dir.join(style.submission_file_name());
        let source = match style {
            ExerciseStyle::Script => fs::read_to_string(&path)
                .with_context(|| format!("Could not read submission {}", path.display()))?,
            ExerciseStyle::Notebook => {
                let (cells, _) = notebook::load_cells(&path)?;
                let cell = find_named_cell(&cells, "answer_cell")
                    .with_context(|| format!("In submission {}", path.display()))?;
                let raw = cell
                    .get("source")
                    .with_context(|| format!("Answer cell in {} has no source", path.display()))?;
                notebook::join_source(raw)
            }
        };
        Ok(Self { path, source, style })
    }

    /// The file the source was extracted from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The extracted source code.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The shape the artifact was loaded as.
    pub fn style(&self) -> ExerciseStyle {
        self.style
    }
}

/// A submission bound for one stage run.
///
/// Dropping the binding removes any file derived during setup, so a
/// failed answer load still cleans up after itself.
#[derive(Debug)]
pub struct BoundSubmission {
    /// The extracted submission source.
    source:  String,
    /// The executed answer, when the stage requested `exec_answer`.
    answer:  Option<Answer>,
    /// A module file written during binding, removed on drop.
    derived: Option<PathBuf>,
}

impl BoundSubmission {
    /// Binds the submission in `dir` according to the stage's
    /// declaration.
    ///
    /// Any error here is a stage-setup failure: no case has started yet.
    pub fn bind(dir: &Path, stage: &EvaluationStage) -> Result<Self> {
        let artifact = SubmissionArtifact::load(dir, stage.exercise_style())?;
        let mut bound = Self {
            source:  artifact.source().to_string(),
            answer:  None,
            derived: None,
        };
        if stage.exec_answer() {
            // A notebook answer cell has no module file of its own, so
            // one is materialized next to the notebook and removed when
            // the binding drops.
            let module = match artifact.style() {
                ExerciseStyle::Script => "submission",
                ExerciseStyle::Notebook => {
                    let path = dir.join("answer.py");
                    fs::write(&path, bound.source.as_bytes()).with_context(|| {
                        format!("Could not materialize answer module {}", path.display())
                    })?;
                    bound.derived = Some(path);
                    "answer"
                }
            };
            bound.answer = Some(Answer::load(dir, module)?);
        }
        Ok(bound)
    }

    /// The extracted submission source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The executed answer, when the stage requested one.
    pub fn answer(&self) -> Option<&Answer> {
        self.answer.as_ref()
    }
}

impl Drop for BoundSubmission {
    fn drop(&mut self) {
        if let Some(path) = self.derived.take()
            && let Err(e) = fs::remove_file(&path)
        {
            warn!("Could not remove derived module {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::notebook::answer_cell_metadata;

    fn write_submission_notebook(dir: &Path, answer_source: &str) {
        let cells = vec![
            json!({"cell_type": "markdown", "metadata": {}, "source": ["# Exercise\n"]}),
            json!({
                "cell_type": "code",
                "execution_count": null,
                "metadata": answer_cell_metadata(),
                "outputs": [],
                "source": [answer_source],
            }),
        ];
        let nb = json!({"cells": cells, "metadata": {}, "nbformat": 4, "nbformat_minor": 4});
        fs::write(dir.join("submission.ipynb"), nb.to_string()).unwrap();
    }

    #[test]
    fn notebook_artifacts_extract_the_answer_cell() {
        let dir = std::env::temp_dir().join("kadai-sub-notebook");
        fs::create_dir_all(&dir).unwrap();
        write_submission_notebook(&dir, "def f(x):\n    return x + 1\n");

        let artifact = SubmissionArtifact::load(&dir, ExerciseStyle::Notebook).unwrap();
        assert!(artifact.source().contains("return x + 1"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn script_artifacts_read_the_file_verbatim() {
        let dir = std::env::temp_dir().join("kadai-sub-script");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("submission.py"), "x = 1\n").unwrap();

        let artifact = SubmissionArtifact::load(&dir, ExerciseStyle::Script).unwrap();
        assert_eq!(artifact.source(), "x = 1\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_artifacts_are_setup_failures() {
        let dir = std::env::temp_dir().join("kadai-sub-missing");
        fs::create_dir_all(&dir).unwrap();
        assert!(SubmissionArtifact::load(&dir, ExerciseStyle::Script).is_err());
        assert!(SubmissionArtifact::load(&dir, ExerciseStyle::Notebook).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
