#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Form and configuration generation: submission forms, the judge
//! configuration directory and archive, master cleanup, and content-hash
//! version renewal.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use regex::Regex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::info;
use zip::{ZipWriter, write::SimpleFileOptions};

use crate::{
    exercise::{Exercise, load_exercise, StageSource},
    judge::{JudgeParameters, StageDecl, generate_setting, save_setting},
    notebook::{
        self, Cell, master_metadata, master_metadata_deadlines, submission_metadata,
    },
    stage::SUPPORT_LIBRARY,
};

/// The per-bundle introduction notebook, when present.
const INTRODUCTION_FILE: &str = "intro.ipynb";

/// The line appended to every stage module so the judge can run it.
const STAGE_MAIN_LINE: &str = "judge_util.unittest_main()";

/// How master versions are renewed during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Keep the current version.
    Keep,
    /// Replace it with the content hash of the exercise definition.
    ContentHash,
    /// Replace it with a fixed string.
    Fixed(String),
}

/// The content-hash version of an exercise definition.
///
/// Hashes the distributed parts only, so editing test code or examples
/// never invalidates submissions already collected.
pub fn content_version(exercise: &Exercise) -> Result<String> {
    let definition = json!({
        "description": exercise.description.iter().map(Cell::to_ipynb).collect::<Vec<_>>(),
        "answer_cell": exercise.answer_cell().to_ipynb(),
        "instructive_test": exercise.instructive_test.iter().map(Cell::to_ipynb).collect::<Vec<_>>(),
    });
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(&definition)?.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Rewrites an exercise master in place: normalized cells, refreshed
/// metadata, and a possibly renewed version.
pub fn cleanup_master(exercise: &mut Exercise, policy: &VersionPolicy) -> Result<()> {
    let path = exercise.dir.join(format!("{}.ipynb", exercise.key));
    let (raw_cells, metadata) = notebook::load_cells(&path)?;
    let cells: Vec<Value> = notebook::normalized_cells(&raw_cells)?
        .iter()
        .map(Cell::to_ipynb)
        .collect();

    let new_version = match policy {
        VersionPolicy::Keep => exercise.version.clone(),
        VersionPolicy::ContentHash => content_version(exercise)?,
        VersionPolicy::Fixed(version) => version.clone(),
    };
    if new_version != exercise.version {
        info!("Renewing version of {}", exercise.key);
        exercise.version = new_version;
    }

    let deadlines = master_metadata_deadlines(&metadata);
    let metadata = master_metadata(
        &exercise.key,
        true,
        &exercise.version,
        &exercise.title,
        &deadlines,
    );
    notebook::save_as_notebook(&path, cells, metadata)
}

/// Updates master deadlines from a key-to-deadlines map, leaving masters
/// whose key is absent untouched.
pub fn update_deadlines(
    exercises: &[Exercise],
    new_deadlines: &BTreeMap<String, Value>,
) -> Result<()> {
    for exercise in exercises {
        let Some(deadlines) = new_deadlines.get(&exercise.key) else {
            continue;
        };
        let path = exercise.dir.join(format!("{}.ipynb", exercise.key));
        let (cells, metadata) = notebook::load_cells(&path)?;
        if *deadlines == master_metadata_deadlines(&metadata) {
            continue;
        }
        info!("Renewing deadlines of {}", exercise.key);
        let metadata = master_metadata(
            &exercise.key,
            true,
            &exercise.version,
            &exercise.title,
            deadlines,
        );
        notebook::save_as_notebook(&path, cells, metadata)?;
    }
    Ok(())
}

/// Generates the submission form for one separate exercise.
pub fn create_separate_form(exercise: &Exercise) -> (Vec<Value>, Value) {
    let mut cells: Vec<Value> = exercise.description.iter().map(Cell::to_ipynb).collect();
    cells.push(answer_cell_ipynb(exercise));
    cells.extend(exercise.instructive_test.iter().map(Cell::to_ipynb));

    let mut versions = BTreeMap::new();
    versions.insert(exercise.key.clone(), exercise.version.clone());
    (cells, submission_metadata(&versions, true))
}

/// Generates one bundled form covering every exercise of a directory.
pub fn create_bundled_form(dir: &Path, exercises: &[Exercise]) -> Result<(Vec<Value>, Value)> {
    let mut cells: Vec<Value> = bundled_intro(dir)?.iter().map(Cell::to_ipynb).collect();
    let mut versions = BTreeMap::new();
    for exercise in exercises {
        cells.extend(exercise.description.iter().map(Cell::to_ipynb));
        cells.push(answer_cell_ipynb(exercise));
        cells.extend(exercise.instructive_test.iter().map(Cell::to_ipynb));
        versions.insert(exercise.key.clone(), exercise.version.clone());
    }
    Ok((cells, submission_metadata(&versions, true)))
}

/// The bundle's introduction cells: `intro.ipynb` when present, a bare
/// directory-name heading otherwise.
fn bundled_intro(dir: &Path) -> Result<Vec<Cell>> {
    let intro = dir.join(INTRODUCTION_FILE);
    if intro.exists() {
        let (raw_cells, _) = notebook::load_cells(&intro)?;
        notebook::normalized_cells(&raw_cells)
    } else {
        let dirname = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(vec![Cell::markdown(format!("# {dirname}"))])
    }
}

/// Generates the all-filled form used to smoke-test grading.
pub fn create_filled_form(exercises: &[Exercise]) -> (Vec<Value>, Value) {
    let cells = exercises
        .iter()
        .map(|ex| {
            let mut cell = ex.answer_cell_filled().to_ipynb();
            cell["metadata"] = notebook::answer_cell_metadata();
            cell
        })
        .collect();
    let versions = exercises
        .iter()
        .map(|ex| (ex.key.clone(), ex.version.clone()))
        .collect();
    (cells, submission_metadata(&versions, true))
}

/// The exercise's answer cell in ipynb form, tagged so grading can find
/// it after upload.
fn answer_cell_ipynb(exercise: &Exercise) -> Value {
    let mut cell = exercise.answer_cell().to_ipynb();
    cell["metadata"] = notebook::answer_cell_metadata();
    cell
}

/// Writes one exercise's judge configuration under `conf_dir`.
///
/// Produces the trial notebook, `setting.json`, one `<stage>.py` per
/// stage module, and copies of every required file.
fn create_exercise_configuration(
    exercise: &Exercise,
    params: &JudgeParameters,
    conf_dir: &Path,
) -> Result<()> {
    let tests_dir = conf_dir.join(&exercise.key);
    fs::create_dir_all(&tests_dir)
        .with_context(|| format!("Could not create {}", tests_dir.display()))?;

    // Trial notebook: the description plus the unfilled answer template.
    let mut trial_cells: Vec<Value> =
        exercise.description.iter().map(Cell::to_ipynb).collect();
    trial_cells.push(exercise.answer_cell_content.to_ipynb());
    let (_, metadata) =
        notebook::load_cells(&exercise.dir.join(format!("{}.ipynb", exercise.key)))?;
    notebook::save_as_notebook(
        &conf_dir.join(format!("{}.ipynb", exercise.key)),
        trial_cells,
        metadata,
    )?;

    let decls: Vec<StageDecl> = exercise
        .stages
        .iter()
        .map(|stage| {
            let mut decl = stage.decl.clone();
            if !decl.required_files.iter().any(|f| f == SUPPORT_LIBRARY) {
                decl.required_files.insert(0, SUPPORT_LIBRARY.to_string());
            }
            decl
        })
        .collect();
    let setting = generate_setting(&exercise.key, &exercise.version, &decls, params)?;
    save_setting(&tests_dir.join("setting.json"), &setting)?;

    for stage in &exercise.stages {
        let path = tests_dir.join(format!("{}.py", stage.decl.name));
        let mut module = stage.source.clone();
        module.push('\n');
        module.push_str(STAGE_MAIN_LINE);
        module.push('\n');
        fs::write(&path, module)
            .with_context(|| format!("Could not write stage module {}", path.display()))?;
    }

    for file in decls.iter().flat_map(|d| d.required_files.iter()) {
        let src = exercise.dir.join(file);
        let dest = tests_dir.join(file);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        fs::copy(&src, &dest).with_context(|| {
            format!("Required file `{file}` is missing from {}", exercise.dir.display())
        })?;
    }
    Ok(())
}

/// Rebuilds the configuration directory for every exercise and archives
/// it as `<conf_dir>.zip`.
pub fn create_configuration(
    exercises: &[Exercise],
    params: &JudgeParameters,
    conf_dir: &Path,
) -> Result<()> {
    if conf_dir.exists() {
        fs::remove_dir_all(conf_dir)
            .with_context(|| format!("Could not clear {}", conf_dir.display()))?;
    }
    for exercise in exercises {
        info!("Creating configuration for {}", exercise.key);
        create_exercise_configuration(exercise, params, conf_dir)?;
    }

    let archive_path = conf_dir.with_extension("zip");
    info!("Creating configuration archive {}", archive_path.display());
    let file = fs::File::create(&archive_path)
        .with_context(|| format!("Could not create {}", archive_path.display()))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for entry in walk_files(conf_dir)? {
        let name = entry
            .strip_prefix(conf_dir)
            .context("Archive entry escapes the configuration directory")?
            .to_string_lossy()
            .replace('\\', "/");
        archive.start_file(name, options)?;
        archive.write_all(&fs::read(&entry)?)?;
    }
    archive.finish()?;
    Ok(())
}

/// Every regular file under `root`, in sorted order.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*", root.display());
    let mut files = Vec::new();
    for entry in glob::glob(&pattern)
        .with_context(|| format!("Invalid archive pattern `{pattern}`"))?
    {
        let path = entry?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Copies the support library into each exercise directory under
/// `libdir`, so `Separate` stages can import it at grading time.
pub fn place_library(exercises: &[Exercise], library_file: &Path, libdir: &str) -> Result<()> {
    let mut dirs: Vec<&Path> = exercises.iter().map(|ex| ex.dir.as_path()).collect();
    dirs.sort();
    dirs.dedup();
    for dir in dirs {
        let dest_dir = dir.join(libdir);
        fs::create_dir_all(&dest_dir)
            .with_context(|| format!("Could not create {}", dest_dir.display()))?;
        let file_name = library_file
            .file_name()
            .context("Library path has no file name")?;
        fs::copy(library_file, dest_dir.join(file_name))
            .with_context(|| format!("Could not place library into {}", dest_dir.display()))?;
        info!("Placed {} into {}", file_name.to_string_lossy(), dest_dir.display());
    }
    Ok(())
}

/// Loads exercise masters from the given paths.
///
/// A directory is a bundle: every `<dirname>[-_]*.ipynb` inside it is
/// loaded and distributed as one form. A file is a separate exercise.
/// Exercise keys must be globally distinct.
pub fn load_sources(
    paths: &[PathBuf],
    builtin_stages: &[StageSource],
) -> Result<(Vec<Exercise>, BTreeMap<PathBuf, Vec<Exercise>>)> {
    let mut separates = Vec::new();
    let mut bundles: BTreeMap<PathBuf, Vec<Exercise>> = BTreeMap::new();
    let mut seen_keys: BTreeMap<String, PathBuf> = BTreeMap::new();

    let mut sorted = paths.to_vec();
    sorted.sort();
    for path in &sorted {
        if path.is_dir() {
            let dirname = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pattern = Regex::new(&format!("^({}[-_].*)\\.ipynb$", regex::escape(&dirname)))?;
            info!("Loading bundle {}", path.display());

            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("Could not list {}", path.display()))?
                .map(|e| e.map(|e| e.path()))
                .collect::<std::io::Result<_>>()?;
            entries.sort();
            for entry in entries {
                let Some(file_name) = entry.file_name().map(|n| n.to_string_lossy().into_owned())
                else {
                    continue;
                };
                let Some(captures) = pattern.captures(&file_name) else {
                    continue;
                };
                let key = captures[1].to_string();
                check_key(&mut seen_keys, &key, &entry)?;
                bundles
                    .entry(path.clone())
                    .or_default()
                    .push(load_exercise(path, &key, builtin_stages)?);
                info!("Loaded {}", entry.display());
            }
        } else {
            if path.extension().is_none_or(|e| e != "ipynb") {
                info!("Skipping {}", path.display());
                continue;
            }
            let key = path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .context("Master path has no file name")?;
            let dir = path.parent().unwrap_or(Path::new("."));
            check_key(&mut seen_keys, &key, path)?;
            separates.push(load_exercise(dir, &key, builtin_stages)?);
            info!("Loaded {}", path.display());
        }
    }
    Ok((separates, bundles))
}

/// Rejects a key already claimed by another master.
fn check_key(seen: &mut BTreeMap<String, PathBuf>, key: &str, path: &Path) -> Result<()> {
    if let Some(existing) = seen.get(key) {
        anyhow::bail!(
            "Exercise key `{key}` conflicts between {} and {}",
            path.display(),
            existing.display()
        );
    }
    ensure!(!key.is_empty(), "Empty exercise key for {}", path.display());
    seen.insert(key.to_string(), path.to_path_buf());
    Ok(())
}
