//! Building forms and judge configurations from an exercise master.

use std::{fs, path::Path, path::PathBuf};

use kadai::{
    bundle::{
        VersionPolicy, cleanup_master, content_version, create_configuration,
        create_separate_form, load_sources,
    },
    judge::JudgeParameters,
    notebook,
    rawcheck::rawcheck_stage_source,
    stage::StageMode,
};
use serde_json::{Value, json};

const TESTCODE: &str = "\
import sys
sys.path.append('.judge')
import judge_util

Hidden = judge_util.teststage(score=2)
Hidden.mode = 'separate'

@judge_util.test_method(Hidden)
def double_of_three(self):
    self.assertEqual(double(3), 6)
";

fn master_cells() -> Vec<Value> {
    fn marker(name: &str) -> Value {
        json!({"cell_type": "markdown", "metadata": {},
               "source": [format!("***CONTENT_TYPE: {name}***")]})
    }
    vec![
        marker("DESCRIPTION"),
        json!({"cell_type": "markdown", "metadata": {},
               "source": ["# Doubling\n", "Implement `double`."]}),
        marker("ANSWER_CELL_CONTENT"),
        json!({"cell_type": "code", "execution_count": null, "metadata": {}, "outputs": [],
               "source": ["def double(x):\n", "    ...\n"]}),
        marker("EXAMPLE_ANSWERS"),
        json!({"cell_type": "code", "execution_count": null, "metadata": {}, "outputs": [],
               "source": ["def double(x):\n", "    return x * 2\n"]}),
        marker("INSTRUCTIVE_TEST"),
        json!({"cell_type": "code", "execution_count": null, "metadata": {}, "outputs": [],
               "source": ["assert double(2) == 4\n"]}),
        marker("SYSTEM_TESTCODE"),
        json!({"cell_type": "code", "execution_count": null, "metadata": {}, "outputs": [],
               "source": [TESTCODE]}),
    ]
}

fn write_master(dir: &Path, key: &str) -> PathBuf {
    let path = dir.join(format!("{key}.ipynb"));
    let nb = json!({
        "cells": master_cells(),
        "metadata": {
            "judge_master": {
                "autograde": true,
                "deadlines": {},
                "exercise_key": key,
                "title": "Doubling",
                "version": "v0",
            },
            "kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"},
            "language_info": {"name": ""},
        },
        "nbformat": 4,
        "nbformat_minor": 4,
    });
    fs::write(&path, nb.to_string()).unwrap();
    path
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kadai-build-{name}"));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn load_single(dir: &Path, key: &str) -> kadai::exercise::Exercise {
    let builtins = vec![rawcheck_stage_source().unwrap()];
    let (mut separates, bundles) =
        load_sources(&[dir.join(format!("{key}.ipynb"))], &builtins).unwrap();
    assert!(bundles.is_empty());
    separates.remove(0)
}

#[test]
fn masters_load_with_builtin_and_declared_stages() {
    let dir = temp_dir("load");
    write_master(&dir, "ex1-1");

    let exercise = load_single(&dir, "ex1-1");
    assert_eq!(exercise.key, "ex1-1");
    assert_eq!(exercise.title, "Doubling");
    assert_eq!(exercise.version, "v0");
    assert_eq!(exercise.stages.len(), 2);
    assert_eq!(exercise.stages[0].decl.name, "RawCheck");
    assert_eq!(exercise.stages[1].decl.name, "Hidden");
    assert_eq!(exercise.stages[1].decl.score, 2);
    assert_eq!(exercise.stages[1].decl.mode, StageMode::Separate);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn separate_forms_embed_the_banner_and_distributed_tests() {
    let dir = temp_dir("form");
    write_master(&dir, "ex1-1");

    let exercise = load_single(&dir, "ex1-1");
    let (cells, metadata) = create_separate_form(&exercise);

    // Description, answer cell, instructive test; never the test code.
    assert_eq!(cells.len(), 3);
    let answer = notebook::join_source(&cells[1]["source"]);
    assert!(answer.contains("<[ ex1-1 ]>"));
    assert!(answer.contains("def double(x):"));
    let all_sources: String = cells
        .iter()
        .map(|c| notebook::join_source(&c["source"]))
        .collect();
    assert!(!all_sources.contains("teststage"));
    assert_eq!(metadata["judge_submission"]["exercises"]["ex1-1"], "v0");
    assert_eq!(metadata["judge_submission"]["extraction"], true);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn configurations_carry_settings_stage_modules_and_the_archive() {
    let dir = temp_dir("conf");
    write_master(&dir, "ex1-1");
    fs::create_dir_all(dir.join(".judge")).unwrap();
    fs::write(dir.join(".judge/judge_util.py"), "# support library\n").unwrap();

    let exercise = load_single(&dir, "ex1-1");
    let conf_dir = dir.join("autograde");
    create_configuration(
        std::slice::from_ref(&exercise),
        &JudgeParameters::default(),
        &conf_dir,
    )
    .unwrap();

    let setting: Value =
        serde_json::from_str(&fs::read_to_string(conf_dir.join("ex1-1/setting.json")).unwrap())
            .unwrap();
    assert_eq!(setting["metadata"]["name"], "ex1-1");
    assert_eq!(setting["judge"]["evaluation"]["initial_state"], "RawCheck");
    let transitions = setting["judge"]["evaluation"]["transition_function"]
        .as_array()
        .unwrap();
    let rawcheck_pass = transitions
        .iter()
        .find(|t| t["state"] == "RawCheck" && t["outcome"] == "passed")
        .unwrap();
    assert_eq!(rawcheck_pass["next"], "Hidden");
    let hidden_pass = transitions
        .iter()
        .find(|t| t["state"] == "Hidden" && t["outcome"] == "passed")
        .unwrap();
    assert_eq!(hidden_pass["next"], "accept");
    assert_eq!(hidden_pass["score"], 2);

    let hidden_module = fs::read_to_string(conf_dir.join("ex1-1/Hidden.py")).unwrap();
    assert!(hidden_module.contains("judge_util.teststage(score=2)"));
    assert!(hidden_module.trim_end().ends_with("judge_util.unittest_main()"));

    // The support library travels with the configuration.
    assert!(conf_dir.join("ex1-1/.judge/judge_util.py").exists());
    assert!(conf_dir.with_extension("zip").exists());
    // The trial notebook sits next to the per-exercise directory.
    assert!(conf_dir.join("ex1-1.ipynb").exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn version_renewal_rewrites_the_master_metadata() {
    let dir = temp_dir("renew");
    let path = write_master(&dir, "ex1-1");

    let mut exercise = load_single(&dir, "ex1-1");
    let expected = content_version(&exercise).unwrap();
    cleanup_master(&mut exercise, &VersionPolicy::ContentHash).unwrap();
    assert_eq!(exercise.version, expected);

    let (_, metadata) = notebook::load_cells(&path).unwrap();
    assert_eq!(notebook::master_metadata_version(&metadata), expected);

    // A second cleanup with the same content is a fixed point.
    cleanup_master(&mut exercise, &VersionPolicy::ContentHash).unwrap();
    assert_eq!(exercise.version, expected);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn masters_without_test_code_get_a_dummy_stage() {
    let dir = temp_dir("dummy");
    let key = "ex2-1";
    let path = dir.join(format!("{key}.ipynb"));
    let cells: Vec<Value> = master_cells().into_iter().take(8).collect();
    let nb = json!({
        "cells": cells,
        "metadata": {"judge_master": {"autograde": true, "deadlines": {},
                     "exercise_key": key, "title": "Doubling", "version": "v0"}},
        "nbformat": 4,
        "nbformat_minor": 4,
    });
    fs::write(&path, nb.to_string()).unwrap();

    let exercise = load_single(&dir, key);
    assert_eq!(exercise.stages.len(), 2);
    assert_eq!(exercise.stages[1].decl.name, "Dummy");

    fs::remove_dir_all(&dir).unwrap();
}
