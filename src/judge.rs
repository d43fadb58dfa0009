#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Judge setting generation: turns an exercise's stage declarations
//! into the state-machine configuration the external judge consumes.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::stage::{EvaluationStage, StageMode, validate_stage_names};

/// The target state of a transition: another stage or a verdict.
pub const ACCEPT: &str = "accept";
/// The rejecting verdict state.
pub const REJECT: &str = "reject";

/// Deployment parameters a course supplies alongside its exercises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeParameters {
    /// Setting schema version the judge expects.
    pub schema_version:   String,
    /// Sandbox environment name.
    pub environment:      String,
    /// Runner the judge invokes inside the sandbox.
    pub runner:           String,
    /// Per-stage wall-clock limit, in seconds.
    pub time_limit:       u32,
    /// CPU count granted to the sandbox.
    pub cpu_limit:        u32,
    /// Memory granted to the sandbox, in MiB.
    pub memory_limit_mib: u32,
}

impl Default for JudgeParameters {
    fn default() -> Self {
        Self {
            schema_version:   "v3".to_string(),
            environment:      "python3".to_string(),
            runner:           "test_runner_py".to_string(),
            time_limit:       10,
            cpu_limit:        1,
            memory_limit_mib: 256,
        }
    }
}

impl JudgeParameters {
    /// Loads parameters from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read judge parameters {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid judge parameters in {}", path.display()))
    }
}

/// The stage facts the setting generator needs, decoupled from case
/// bodies so settings can also be generated from a static scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDecl {
    /// Stage name, used as the state name.
    pub name:               String,
    /// Score on aggregate success.
    pub score:              u32,
    /// Score on aggregate failure.
    pub unsuccessful_score: u32,
    /// Files the stage requires in the sandbox.
    pub required_files:     Vec<String>,
    /// Execution mode, forwarded as the runner's evaluation style.
    pub mode:               StageMode,
}

impl From<&EvaluationStage> for StageDecl {
    fn from(stage: &EvaluationStage) -> Self {
        Self {
            name:               stage.name().to_string(),
            score:              stage.score(),
            unsuccessful_score: stage.unsuccessful_score(),
            required_files:     stage.required_files().to_vec(),
            mode:               stage.mode(),
        }
    }
}

/// The complete judge setting document.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct JudgeSetting {
    /// Setting schema version.
    pub schema_version: String,
    /// Exercise identity.
    pub metadata:       Metadata,
    /// Everything the judge executes.
    pub judge:          Judge,
}

/// Exercise identity stamped into the setting.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct Metadata {
    /// Exercise key.
    pub name:    String,
    /// Content version, renewed whenever the definition changes.
    pub version: String,
}

/// The judge's execution plan.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct Judge {
    /// Applied to the uploaded artifact before anything runs.
    pub preprocess:  Preprocess,
    /// Sandbox environment.
    pub environment: Environment,
    /// Sandbox resource limits.
    pub sandbox:     Sandbox,
    /// The grading state machine.
    pub evaluation:  Evaluation,
}

/// Upload preprocessing.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct Preprocess {
    /// The well-known name the upload is renamed to.
    pub rename: String,
}

/// Sandbox environment identity.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct Environment {
    /// Environment name.
    pub name:    String,
    /// Pinned version; empty means the deployment default.
    #[builder(default)]
    pub version: String,
}

/// Sandbox resource limits.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct Sandbox {
    /// Sandbox implementation.
    pub name:    String,
    /// Limit options.
    pub options: SandboxOptions,
}

/// Resource limit options.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct SandboxOptions {
    /// CPU count.
    pub cpu_limit:     u32,
    /// Memory limit, rendered as `<N>MiB`.
    pub memory_limit:  String,
    /// Network policy.
    pub network_limit: String,
}

/// The grading state machine.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct Evaluation {
    /// The first stage to run.
    pub initial_state:       String,
    /// One descriptor per stage, keyed by stage name.
    pub states:              BTreeMap<String, StateDescriptor>,
    /// Total transition function over non-terminal states.
    pub transition_function: Vec<TransitionRule>,
}

/// One stage's runtime declaration.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct StateDescriptor {
    /// Runner invoked for this stage.
    pub runner:        RunnerDecl,
    /// Wall-clock limit, in seconds.
    pub time_limit:    u32,
    /// Files staged into the sandbox.
    pub require_files: Vec<String>,
}

/// Runner identity and options.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct RunnerDecl {
    /// Runner name.
    pub name:    String,
    /// Pinned version; empty means the deployment default.
    #[builder(default)]
    pub version: String,
    /// Runner options.
    pub options: RunnerOptions,
}

/// Runner options.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct RunnerOptions {
    /// The stage's execution mode.
    pub evaluation_style: String,
}

/// A stage run's aggregate outcome, as the judge reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every test-role case passed.
    Passed,
    /// Some test-role case did not pass.
    Failed,
}

/// One transition of the state machine.
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct TransitionRule {
    /// Source state.
    pub state:   String,
    /// Observed outcome.
    pub outcome: Outcome,
    /// Next state name, or the `accept`/`reject` verdict.
    pub next:    String,
    /// Score awarded when this transition is taken.
    pub score:   u32,
}

/// Generates the setting for one exercise from its stage declarations.
///
/// Stages run in declaration order. A passing stage awards its score and
/// advances; the last one accepts. A failing stage awards its
/// unsuccessful score and rejects, so every non-terminal state has
/// exactly one transition per outcome.
pub fn generate_setting(
    exercise_key: &str,
    version: &str,
    stages: &[StageDecl],
    params: &JudgeParameters,
) -> Result<JudgeSetting> {
    anyhow::ensure!(!stages.is_empty(), "Exercise `{exercise_key}` declares no stages");
    validate_stage_names(stages.iter().map(|s| s.name.as_str()))?;

    let mut states = BTreeMap::new();
    let mut transitions = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        states.insert(
            stage.name.clone(),
            StateDescriptor::builder()
                .runner(
                    RunnerDecl::builder()
                        .name(params.runner.clone())
                        .options(
                            RunnerOptions::builder()
                                .evaluation_style(stage.mode.as_str().to_string())
                                .build(),
                        )
                        .build(),
                )
                .time_limit(params.time_limit)
                .require_files(stage.required_files.clone())
                .build(),
        );

        let next = match stages.get(i + 1) {
            Some(following) => following.name.clone(),
            None => ACCEPT.to_string(),
        };
        transitions.push(
            TransitionRule::builder()
                .state(stage.name.clone())
                .outcome(Outcome::Passed)
                .next(next)
                .score(stage.score)
                .build(),
        );
        transitions.push(
            TransitionRule::builder()
                .state(stage.name.clone())
                .outcome(Outcome::Failed)
                .next(REJECT.to_string())
                .score(stage.unsuccessful_score)
                .build(),
        );
    }

    Ok(JudgeSetting::builder()
        .schema_version(params.schema_version.clone())
        .metadata(
            Metadata::builder()
                .name(exercise_key.to_string())
                .version(version.to_string())
                .build(),
        )
        .judge(
            Judge::builder()
                .preprocess(
                    Preprocess::builder()
                        .rename("submission.ipynb".to_string())
                        .build(),
                )
                .environment(Environment::builder().name(params.environment.clone()).build())
                .sandbox(
                    Sandbox::builder()
                        .name("Firejail".to_string())
                        .options(
                            SandboxOptions::builder()
                                .cpu_limit(params.cpu_limit)
                                .memory_limit(format!("{}MiB", params.memory_limit_mib))
                                .network_limit("disable".to_string())
                                .build(),
                        )
                        .build(),
                )
                .evaluation(
                    Evaluation::builder()
                        .initial_state(stages[0].name.clone())
                        .states(states)
                        .transition_function(transitions)
                        .build(),
                )
                .build(),
        )
        .build())
}

/// Writes a setting as pretty-printed JSON.
pub fn save_setting(path: &Path, setting: &JudgeSetting) -> Result<()> {
    let mut text = serde_json::to_string_pretty(setting)?;
    text.push('\n');
    fs::write(path, text)
        .with_context(|| format!("Could not write judge setting {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::SUPPORT_LIBRARY;

    fn decl(name: &str, score: u32, unsuccessful: u32) -> StageDecl {
        StageDecl {
            name:               name.to_string(),
            score,
            unsuccessful_score: unsuccessful,
            required_files:     vec![SUPPORT_LIBRARY.to_string()],
            mode:               StageMode::Separate,
        }
    }

    #[test]
    fn transition_function_is_total_over_non_terminal_states() {
        let stages = [decl("precheck", 0, 0), decl("given", 1, 0), decl("hidden", 2, 0)];
        let setting =
            generate_setting("ex1-1", "v1", &stages, &JudgeParameters::default()).unwrap();

        let evaluation = &setting.judge.evaluation;
        assert_eq!(evaluation.initial_state, "precheck");
        assert_eq!(evaluation.states.len(), 3);
        // Exactly one rule per (state, outcome) pair.
        for stage in &stages {
            for outcome in [Outcome::Passed, Outcome::Failed] {
                let count = evaluation
                    .transition_function
                    .iter()
                    .filter(|t| t.state == stage.name && t.outcome == outcome)
                    .count();
                assert_eq!(count, 1, "{} / {outcome:?}", stage.name);
            }
        }
    }

    #[test]
    fn passing_chains_forward_and_the_last_stage_accepts() {
        let stages = [decl("given", 1, 0), decl("hidden", 2, 1)];
        let setting =
            generate_setting("ex1-1", "v1", &stages, &JudgeParameters::default()).unwrap();

        let rules = &setting.judge.evaluation.transition_function;
        let pass_of = |state: &str| {
            rules
                .iter()
                .find(|t| t.state == state && t.outcome == Outcome::Passed)
                .unwrap()
        };
        let fail_of = |state: &str| {
            rules
                .iter()
                .find(|t| t.state == state && t.outcome == Outcome::Failed)
                .unwrap()
        };
        assert_eq!(pass_of("given").next, "hidden");
        assert_eq!(pass_of("hidden").next, ACCEPT);
        assert_eq!(pass_of("hidden").score, 2);
        assert_eq!(fail_of("hidden").next, REJECT);
        assert_eq!(fail_of("hidden").score, 1);
    }

    #[test]
    fn declarations_carry_over_from_executable_stages() {
        let stage = EvaluationStage::builder("precheck")
            .mode(StageMode::Separate)
            .score(3)
            .unsuccessful_score(1)
            .build()
            .unwrap();
        let decl = StageDecl::from(&stage);
        assert_eq!(decl.name, "precheck");
        assert_eq!(decl.score, 3);
        assert_eq!(decl.unsuccessful_score, 1);
        assert_eq!(decl.mode, StageMode::Separate);
        assert!(decl.required_files.contains(&SUPPORT_LIBRARY.to_string()));

        let setting =
            generate_setting("ex1-1", "v1", &[decl], &JudgeParameters::default()).unwrap();
        assert_eq!(setting.judge.evaluation.initial_state, "precheck");
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let stages = [decl("given", 1, 0), decl("given", 1, 0)];
        assert!(generate_setting("ex1-1", "v1", &stages, &JudgeParameters::default()).is_err());
    }

    #[test]
    fn settings_serialize_with_the_expected_shape() {
        let stages = [decl("given", 1, 0)];
        let setting =
            generate_setting("ex2-3", "deadbeef", &stages, &JudgeParameters::default()).unwrap();
        let value = serde_json::to_value(&setting).unwrap();

        assert_eq!(value["schema_version"], "v3");
        assert_eq!(value["metadata"]["name"], "ex2-3");
        assert_eq!(value["judge"]["sandbox"]["options"]["memory_limit"], "256MiB");
        assert_eq!(value["judge"]["sandbox"]["options"]["network_limit"], "disable");
        assert_eq!(
            value["judge"]["evaluation"]["states"]["given"]["runner"]["options"]
                ["evaluation_style"],
            "separate"
        );
        assert_eq!(
            value["judge"]["evaluation"]["transition_function"][0]["outcome"],
            "passed"
        );
    }
}
