#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # kadai
//!
//! Command line interface for the exercise-authoring and auto-grading
//! toolchain: `build` turns exercise masters into submission forms and
//! judge configurations, `check` runs the built-in raw check over a
//! submission, and `legend` prints the predefined tag registry.

use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{Context, Result, ensure};
use bpaf::*;
use kadai::{
    bundle::{
        VersionPolicy, cleanup_master, create_bundled_form, create_configuration,
        create_filled_form, create_separate_form, load_sources, place_library, update_deadlines,
    },
    exercise::{StageSource, scan_stage_source},
    judge::JudgeParameters,
    notebook::save_as_notebook,
    rawcheck::{rawcheck_stage, rawcheck_stage_source},
    report::{render_json, render_report},
    runner::StageRunner,
    stage::ExerciseStyle,
    submission::SubmissionArtifact,
    tags::predefined_tags,
};
use tracing::{Level, info, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Options of the `build` command.
#[derive(Debug, Clone)]
struct BuildOpts {
    /// Master sources: `.ipynb` files or bundle directories.
    sources:           Vec<PathBuf>,
    /// Judge environment parameters; enables configuration output.
    configuration:     Option<PathBuf>,
    /// Renew versions with the content hash of each definition.
    renew_version:     bool,
    /// Renew versions with a fixed string instead.
    set_version:       Option<String>,
    /// Target directory for generated forms.
    form_dir:          Option<PathBuf>,
    /// Path of the generated all-filled form.
    filled_form:       Option<PathBuf>,
    /// Place the support library into this directory of each master.
    library_placement: Option<String>,
    /// The support library file to place.
    library:           Option<PathBuf>,
    /// Built-in stage module files prepended to every exercise.
    builtin_teststage: Vec<PathBuf>,
    /// JSON file mapping exercise keys to deadline settings.
    deadlines:         Option<PathBuf>,
}

/// Options of the `check` command.
#[derive(Debug, Clone)]
struct CheckOpts {
    /// Submission file or directory.
    path: PathBuf,
    /// Emit the judge's JSON records instead of the report.
    json: bool,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Generate forms and configurations from masters.
    Build(BuildOpts),
    /// Run the built-in raw check over a submission.
    Check(CheckOpts),
    /// Print the predefined tag registry.
    Legend,
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    let sources = short('s')
        .long("source")
        .help("Master source: an ipynb file (separate) or a directory (bundle)")
        .argument::<PathBuf>("PATH")
        .some("at least one --source is required");
    let configuration = short('c')
        .long("configuration")
        .help("Create judge configurations with the parameters in this JSON file")
        .argument::<PathBuf>("JUDGE_ENV_JSON")
        .optional();
    let renew_version = short('n')
        .long("renew-version")
        .help("Renew the version of every exercise to its content hash")
        .switch();
    let set_version = long("set-version")
        .help("Renew the version of every exercise to this string")
        .argument::<String>("VERSION")
        .optional();
    let form_dir = short('f')
        .long("form-dir")
        .help("Write generated forms into this directory")
        .argument::<PathBuf>("DIR")
        .optional();
    let filled_form = long("filled-form")
        .help("Generate an all-filled form at this path")
        .argument::<PathBuf>("FILE")
        .optional();
    let library_placement = long("library-placement")
        .help("Place the support library into this directory of each master (needs --library)")
        .argument::<String>("LIBDIR")
        .optional();
    let library = long("library")
        .help("The support library file to place")
        .argument::<PathBuf>("FILE")
        .optional();
    let builtin_teststage = long("builtin-teststage")
        .help("Built-in stage module file (default: the bundled raw check)")
        .argument::<PathBuf>("FILE")
        .many();
    let deadlines = short('d')
        .long("deadlines")
        .help("JSON file of deadline settings, keyed by exercise")
        .argument::<PathBuf>("FILE")
        .optional();

    let build = construct!(BuildOpts {
        sources,
        configuration,
        renew_version,
        set_version,
        form_dir,
        filled_form,
        library_placement,
        library,
        builtin_teststage,
        deadlines,
    })
    .to_options()
    .command("build")
    .help("Generate forms and judge configurations from exercise masters")
    .map(Cmd::Build);

    let path = positional::<PathBuf>("PATH")
        .help("Submission file (.py or .ipynb) or a directory holding one");
    let json = long("json")
        .help("Emit the judge's JSON records instead of the report")
        .switch();
    let check = construct!(CheckOpts { path, json })
    .to_options()
    .command("check")
    .help("Run the built-in raw check over a submission")
    .map(Cmd::Check);

    let legend = pure(Cmd::Legend)
        .to_options()
        .command("legend")
        .help("Print the predefined tag registry");

    construct!([build, check, legend])
        .to_options()
        .descr("Exercise-authoring and auto-grading toolchain")
        .run()
}

/// Runs the `build` command.
fn build(opts: BuildOpts) -> Result<()> {
    let builtins: Vec<StageSource> = if opts.builtin_teststage.is_empty() {
        vec![rawcheck_stage_source()?]
    } else {
        opts.builtin_teststage
            .iter()
            .map(|path| {
                let source = fs::read_to_string(path)
                    .with_context(|| format!("Could not read {}", path.display()))?;
                scan_stage_source(&source)
                    .with_context(|| format!("In built-in stage module {}", path.display()))
            })
            .collect::<Result<_>>()?
    };

    let (mut separates, mut bundles) = load_sources(&opts.sources, &builtins)?;

    let policy = match (&opts.set_version, opts.renew_version) {
        (Some(version), _) => VersionPolicy::Fixed(version.clone()),
        (None, true) => VersionPolicy::ContentHash,
        (None, false) => VersionPolicy::Keep,
    };
    info!("Cleaning up exercise masters");
    for exercise in separates
        .iter_mut()
        .chain(bundles.values_mut().flatten())
    {
        cleanup_master(exercise, &policy)?;
    }

    let all: Vec<_> = bundles
        .values()
        .flatten()
        .chain(separates.iter())
        .cloned()
        .collect();

    if let Some(path) = &opts.deadlines {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let new_deadlines: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)
            .with_context(|| format!("Invalid deadline settings in {}", path.display()))?;
        update_deadlines(&all, &new_deadlines)?;
    }

    info!("Creating bundled forms");
    for (dir, exercises) in &bundles {
        let (cells, metadata) = create_bundled_form(dir, exercises)?;
        let dirname = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = match &opts.form_dir {
            Some(form_dir) => form_dir.join(format!("{dirname}.ipynb")),
            None => dir.join(format!("form_{dirname}.ipynb")),
        };
        save_as_notebook(&path, cells, metadata)?;
        info!("Generated {}", path.display());
    }

    info!("Creating separate forms");
    for exercise in &separates {
        let (cells, metadata) = create_separate_form(exercise);
        let path = match &opts.form_dir {
            Some(form_dir) => form_dir.join(format!("{}.ipynb", exercise.key)),
            None => exercise.dir.join(format!("form_{}.ipynb", exercise.key)),
        };
        save_as_notebook(&path, cells, metadata)?;
        info!("Generated {}", path.display());
    }

    if let Some(libdir) = &opts.library_placement {
        let library = opts
            .library
            .as_ref()
            .context("--library-placement needs --library FILE")?;
        place_library(&all, library, libdir)?;
    }

    if let Some(path) = &opts.configuration {
        let params = JudgeParameters::load(path)?;
        info!("Creating configurations with {params:?}");
        create_configuration(&all, &params, &PathBuf::from("autograde"))?;
    }

    if let Some(path) = &opts.filled_form {
        info!("Creating filled form {}", path.display());
        let (cells, metadata) = create_filled_form(&all);
        save_as_notebook(path, cells, metadata)?;
    }

    Ok(())
}

/// Runs the `check` command.
fn check(opts: CheckOpts) -> Result<()> {
    let stage = rawcheck_stage()?;
    let registry = predefined_tags();
    let runner = StageRunner::new(&stage, &registry);

    let records = if opts.path.is_dir() {
        runner.run(&opts.path)
    } else {
        let style = match opts.path.extension().and_then(|e| e.to_str()) {
            Some("ipynb") => ExerciseStyle::Notebook,
            Some("py") => ExerciseStyle::Script,
            _ => anyhow::bail!("Expected a .py or .ipynb submission"),
        };
        let dir = opts
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        ensure!(
            opts.path.file_name().and_then(|n| n.to_str())
                == Some(style.submission_file_name()),
            "Submission must be named `{}`",
            style.submission_file_name()
        );
        let artifact = SubmissionArtifact::load(dir, style)?;
        runner.run_with(Some(artifact.source()), None)
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&render_json(&records)?)?);
    } else {
        println!("{}", render_report(stage.name(), &records));
    }
    Ok(())
}

fn main() -> Result<()> {
    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer = LevelFilter::from_level(Level::INFO);
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    match options() {
        Cmd::Build(opts) => build(opts),
        Cmd::Check(opts) => check(opts),
        Cmd::Legend => {
            println!("{}", predefined_tags().legend());
            Ok(())
        }
    }
}
