#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Exercise masters: typed content fields, `CONTENT_TYPE` splitting,
//! and the static scan of stage declarations in test-code cells.

use std::{collections::BTreeMap, path::{Path, PathBuf}, sync::LazyLock};

use anyhow::{Context, Result, bail, ensure};
use regex::Regex;

use crate::{
    analysis::Parser,
    judge::StageDecl,
    notebook::{self, Cell, CellType},
    stage::{ExerciseStyle, StageMode, validate_stage_names},
};

/// The marker splitting a master notebook into fields.
static CONTENT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*\*CONTENT_TYPE:\s*(.+?)\*\*\*").expect("valid marker pattern"));

/// A Markdown heading line, capturing its text.
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s+(.*)$").expect("valid heading pattern"));

/// The banner prepended to every generated answer cell.
const ANSWER_CELL_FORMAT: &str = "\
##########################################################
##  <[ {exercise_key} ]>  Answer cell
##  Never edit this comment
##########################################################

{content}";

/// Fallback stage declaration used when a master has no test code.
const DUMMY_STAGE_SOURCE: &str = "\
import sys
sys.path.append('.judge')
import judge_util

Dummy = judge_util.teststage()
";

/// The typed content fields of a master notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldKey {
    /// Leading warning prose; never consumed.
    Warning,
    /// The exercise description shown to learners.
    Description,
    /// The template placed in the generated answer cell.
    AnswerCellContent,
    /// Reference answers, used by the all-filled form.
    ExampleAnswers,
    /// Tests distributed to learners inside the form.
    InstructiveTest,
    /// Stage modules consumed by the judge, never distributed.
    SystemTestcode,
    /// Author scratch space; never consumed.
    Playground,
}

/// Structural constraints a field's cells must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldProps {
    /// Exactly one cell.
    pub single:          bool,
    /// One or more cells.
    pub list:            bool,
    /// May be empty (with `list`: any count).
    pub optional:        bool,
    /// The first cell must be a Markdown heading.
    pub markdown_headed: bool,
    /// Only code cells allowed.
    pub code:            bool,
    /// Contents are never validated or consumed.
    pub ignored:         bool,
}

impl FieldKey {
    /// Parses a `CONTENT_TYPE` marker name.
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "WARNING" => FieldKey::Warning,
            "DESCRIPTION" => FieldKey::Description,
            "ANSWER_CELL_CONTENT" => FieldKey::AnswerCellContent,
            "EXAMPLE_ANSWERS" => FieldKey::ExampleAnswers,
            "INSTRUCTIVE_TEST" => FieldKey::InstructiveTest,
            "SYSTEM_TESTCODE" => FieldKey::SystemTestcode,
            "PLAYGROUND" => FieldKey::Playground,
            other => bail!("Unknown CONTENT_TYPE `{other}`"),
        })
    }

    /// The marker name.
    pub fn name(self) -> &'static str {
        match self {
            FieldKey::Warning => "WARNING",
            FieldKey::Description => "DESCRIPTION",
            FieldKey::AnswerCellContent => "ANSWER_CELL_CONTENT",
            FieldKey::ExampleAnswers => "EXAMPLE_ANSWERS",
            FieldKey::InstructiveTest => "INSTRUCTIVE_TEST",
            FieldKey::SystemTestcode => "SYSTEM_TESTCODE",
            FieldKey::Playground => "PLAYGROUND",
        }
    }

    /// The field's structural constraints.
    pub fn properties(self) -> FieldProps {
        /// Shorthand constructor for a property set.
        const fn props(
            single: bool,
            list: bool,
            optional: bool,
            markdown_headed: bool,
            code: bool,
            ignored: bool,
        ) -> FieldProps {
            FieldProps { single, list, optional, markdown_headed, code, ignored }
        }
        match self {
            FieldKey::Warning => props(false, false, false, false, false, true),
            FieldKey::Description => props(false, true, false, true, false, false),
            FieldKey::AnswerCellContent => props(true, false, false, false, true, false),
            FieldKey::ExampleAnswers => props(false, true, true, false, false, false),
            FieldKey::InstructiveTest => props(false, true, true, false, false, false),
            FieldKey::SystemTestcode => props(false, true, true, false, true, false),
            FieldKey::Playground => props(false, false, false, false, false, true),
        }
    }
}

/// Splits a master's cells into fields at `CONTENT_TYPE` markers and
/// validates each field against its properties.
pub fn split_into_fields(raw_cells: &[serde_json::Value]) -> Result<BTreeMap<FieldKey, Vec<Cell>>> {
    let mut fields: BTreeMap<FieldKey, Vec<Cell>> = BTreeMap::new();
    let mut current: Option<FieldKey> = None;

    for cell in notebook::normalized_cells(raw_cells)? {
        if cell.cell_type == CellType::Markdown {
            let markers: Vec<_> = CONTENT_TYPE_RE.captures_iter(&cell.source).collect();
            ensure!(
                markers.len() <= 1,
                "Multiple field markers found in cell `{}`",
                cell.source
            );
            if let Some(marker) = markers.first() {
                let key = FieldKey::parse(&marker[1])?;
                ensure!(!fields.contains_key(&key), "Field `{}` appears twice", key.name());
                fields.insert(key, Vec::new());
                current = Some(key);
                continue;
            }
        }
        let key = current.context("Cell appears before the first field marker")?;
        fields
            .get_mut(&key)
            .context("Field buffer missing for current key")?
            .push(cell);
    }

    for (key, cells) in &fields {
        validate_field(*key, cells)?;
    }
    Ok(fields)
}

/// Checks one field's cells against the field's properties.
fn validate_field(key: FieldKey, cells: &[Cell]) -> Result<()> {
    let props = key.properties();
    if props.ignored {
        return Ok(());
    }
    if props.list && props.optional {
        // Any count.
    } else if props.optional {
        ensure!(cells.len() <= 1, "Field `{}` must have at most 1 cell", key.name());
    } else if props.list {
        ensure!(!cells.is_empty(), "Field `{}` must not be empty", key.name());
    } else if props.single {
        ensure!(cells.len() == 1, "Field `{}` must have exactly 1 cell", key.name());
    }
    if props.code {
        ensure!(
            cells.iter().all(|c| c.cell_type == CellType::Code),
            "Field `{}` must contain only code cells",
            key.name()
        );
    }
    if props.markdown_headed
        && let Some(first) = cells.first()
    {
        ensure!(
            first.cell_type == CellType::Markdown,
            "Field `{}` must start with a Markdown cell",
            key.name()
        );
        let first_line = first.source.lines().next().unwrap_or_default();
        ensure!(
            HEADING_RE.is_match(first_line),
            "Field `{}` does not start with a Markdown heading: `{first_line}`",
            key.name()
        );
    }
    Ok(())
}

/// One stage module as authored: its scanned declaration plus the source
/// written to `<stage>.py` in the configuration directory.
#[derive(Debug, Clone)]
pub struct StageSource {
    /// The facts the setting generator needs.
    pub decl:           StageDecl,
    /// Submission artifact shape declared in the `teststage(...)` header.
    pub exercise_style: ExerciseStyle,
    /// Whether the stage executes the answer before its cases.
    pub exec_answer:    bool,
    /// The stage module's Python source.
    pub source:         String,
}

/// Statically reads a stage declaration out of a test-code module.
///
/// The module must bind exactly one `teststage(...)` result to a
/// top-level name; keyword arguments in the header and later attribute
/// assignments on the bound name refine the declaration. Nothing is
/// executed.
pub fn scan_stage_source(source: &str) -> Result<StageSource> {
    let parser = Parser::new(source.trim())?;
    ensure!(!parser.has_syntax_error(), "Test-code cell does not parse");

    let decls = parser.query(
        "(assignment \
           left: (identifier) @var \
           right: (call function: (_) @func arguments: (argument_list) @args))",
    )?;
    let decls: Vec<_> = decls
        .into_iter()
        .filter(|c| {
            c.get("func")
                .is_some_and(|f| f == "teststage" || f.ends_with(".teststage"))
        })
        .collect();
    ensure!(
        decls.len() == 1,
        "Each test-code cell must declare exactly one stage, found {}",
        decls.len()
    );
    let var = decls[0].get("var").context("Stage binding has no name")?.clone();
    let args = decls[0].get("args").map(String::as_str).unwrap_or("()");

    let mut name = var.clone();
    let mut mode = StageMode::Append;
    let mut score: u32 = 1;
    let mut unsuccessful_score: u32 = 0;
    let mut required_files: Vec<String> = Vec::new();
    let mut exercise_style = ExerciseStyle::Notebook;
    let mut exec_answer = false;

    for (key, value) in parse_keyword_args(args) {
        match key.as_str() {
            "score" => score = parse_py_int(&value)?,
            "unsuccessful_score" => unsuccessful_score = parse_py_int(&value)?,
            "exercise_style" => exercise_style = parse_py_style(&value)?,
            "exec_answer" => exec_answer = parse_py_bool(&value)?,
            other => bail!("Unknown teststage argument `{other}`"),
        }
    }

    let attrs = parser.query(
        "(assignment \
           left: (attribute object: (identifier) @obj attribute: (identifier) @attr) \
           right: (_) @value)",
    )?;
    for captures in attrs {
        if captures.get("obj") != Some(&var) {
            continue;
        }
        let attr = captures.get("attr").context("Attribute assignment has no name")?;
        let value = captures.get("value").context("Attribute assignment has no value")?;
        match attr.as_str() {
            "name" => name = parse_py_str(value)?,
            "mode" => mode = parse_py_mode(&parse_py_str(value)?)?,
            "score" => score = parse_py_int(value)?,
            "unsuccessful_score" => unsuccessful_score = parse_py_int(value)?,
            "required_files" => required_files = parse_py_str_list(value)?,
            other => bail!("Unknown stage attribute `{other}`"),
        }
    }

    ensure!(
        unsuccessful_score <= score,
        "Stage `{name}`: unsuccessful_score {unsuccessful_score} exceeds score {score}"
    );

    let mut source = source.trim().to_string();
    source.push('\n');
    Ok(StageSource {
        decl: StageDecl { name, score, unsuccessful_score, required_files, mode },
        exercise_style,
        exec_answer,
        source,
    })
}

/// Splits a call's argument-list text into `(name, value)` pairs.
fn parse_keyword_args(args: &str) -> Vec<(String, String)> {
    args.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parses a Python integer literal.
fn parse_py_int(value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .with_context(|| format!("Expected a non-negative integer, got `{value}`"))
}

/// Parses a Python boolean literal.
fn parse_py_bool(value: &str) -> Result<bool> {
    match value.trim() {
        "True" => Ok(true),
        "False" => Ok(false),
        other => bail!("Expected True or False, got `{other}`"),
    }
}

/// Parses a Python string literal.
fn parse_py_str(value: &str) -> Result<String> {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .with_context(|| format!("Expected a string literal, got `{value}`"))?;
    Ok(inner.to_string())
}

/// Parses a Python list of string literals.
fn parse_py_str_list(value: &str) -> Result<Vec<String>> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .with_context(|| format!("Expected a list literal, got `{value}`"))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_py_str)
        .collect()
}

/// Maps an `ExerciseStyle` expression to a style.
fn parse_py_style(value: &str) -> Result<ExerciseStyle> {
    if value.ends_with("AS_IS") {
        Ok(ExerciseStyle::Script)
    } else if value.ends_with("FORMATTED") {
        Ok(ExerciseStyle::Notebook)
    } else {
        bail!("Unknown exercise style `{value}`")
    }
}

/// Maps a stage mode string to a mode.
fn parse_py_mode(value: &str) -> Result<StageMode> {
    match value {
        "append" => Ok(StageMode::Append),
        "separate" => Ok(StageMode::Separate),
        other => bail!("Unknown stage mode `{other}`"),
    }
}

/// A fully loaded exercise master.
#[derive(Debug, Clone)]
pub struct Exercise {
    /// The exercise key, shared by the master's file name.
    pub key:                 String,
    /// The master's directory.
    pub dir:                 PathBuf,
    /// Content version from the master's metadata.
    pub version:             String,
    /// Title from the description's first heading.
    pub title:               String,
    /// Description cells shown to learners.
    pub description:         Vec<Cell>,
    /// The answer cell's template content.
    pub answer_cell_content: Cell,
    /// Reference answers, possibly empty.
    pub example_answers:     Vec<Cell>,
    /// Distributed tests, possibly empty.
    pub instructive_test:    Vec<Cell>,
    /// Stage modules in grading order, built-in stages first.
    pub stages:              Vec<StageSource>,
}

impl Exercise {
    /// The generated answer cell, carrying the template content.
    pub fn answer_cell(&self) -> Cell {
        Cell::code(answer_cell_banner(&self.key, &self.answer_cell_content.source))
    }

    /// The answer cell filled with the first example answer, falling
    /// back to the template when no example exists.
    pub fn answer_cell_filled(&self) -> Cell {
        let content = self
            .example_answers
            .first()
            .map(|c| c.source.as_str())
            .unwrap_or(self.answer_cell_content.source.as_str());
        Cell::code(answer_cell_banner(&self.key, content))
    }
}

/// Renders the answer-cell banner around the given content.
fn answer_cell_banner(exercise_key: &str, content: &str) -> String {
    ANSWER_CELL_FORMAT
        .replace("{exercise_key}", exercise_key)
        .replace("{content}", content)
}

/// Loads an exercise master from `dir/<key>.ipynb`.
///
/// `builtin_stages` are prepended to the master's own stages; when the
/// master declares no test code a dummy always-accepting stage is
/// scanned instead, so every exercise has at least one stage.
pub fn load_exercise(dir: &Path, key: &str, builtin_stages: &[StageSource]) -> Result<Exercise> {
    let path = dir.join(format!("{key}.ipynb"));
    let (raw_cells, metadata) = notebook::load_cells(&path)?;
    let version = notebook::master_metadata_version(&metadata);

    let mut fields = split_into_fields(&raw_cells)
        .with_context(|| format!("In master {}", path.display()))?;

    let description = fields.remove(&FieldKey::Description).unwrap_or_default();
    ensure!(!description.is_empty(), "Master `{key}` has no DESCRIPTION field");
    let title = {
        let first_line = description[0].source.lines().next().unwrap_or_default();
        HEADING_RE
            .captures(first_line)
            .map(|c| c[1].to_string())
            .with_context(|| format!("Master `{key}` description has no title heading"))?
    };

    let answer_cell_content = fields
        .remove(&FieldKey::AnswerCellContent)
        .and_then(|mut cells| (!cells.is_empty()).then(|| cells.remove(0)))
        .with_context(|| format!("Master `{key}` has no ANSWER_CELL_CONTENT field"))?;

    let mut stages: Vec<StageSource> = builtin_stages.to_vec();
    let testcode = fields.remove(&FieldKey::SystemTestcode).unwrap_or_default();
    if testcode.is_empty() {
        stages.push(scan_stage_source(DUMMY_STAGE_SOURCE)?);
    } else {
        for cell in &testcode {
            stages.push(
                scan_stage_source(&cell.source)
                    .with_context(|| format!("In a SYSTEM_TESTCODE cell of `{key}`"))?,
            );
        }
    }
    validate_stage_names(stages.iter().map(|s| s.decl.name.as_str()))
        .with_context(|| format!("In master `{key}`"))?;

    Ok(Exercise {
        key: key.to_string(),
        dir: dir.to_path_buf(),
        version,
        title,
        description,
        answer_cell_content,
        example_answers: fields.remove(&FieldKey::ExampleAnswers).unwrap_or_default(),
        instructive_test: fields.remove(&FieldKey::InstructiveTest).unwrap_or_default(),
        stages,
    })
}
