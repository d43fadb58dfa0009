#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The built-in raw check: a `Separate` stage vetting the submission's
//! top level before any exercise-specific stage runs.

use anyhow::Result;

use crate::{
    analysis::Parser,
    case::{CaseError, CaseFailure, EvaluationCase, ExceptionKind},
    exercise::{StageSource, scan_stage_source},
    stage::{EvaluationStage, StageMode},
};

/// Modules a submission may import without tripping the UMI tag.
///
/// Covers the standard library subset course submissions actually use
/// plus the support library itself.
const RESOLVABLE_MODULES: &[&str] = &[
    "abc", "bisect", "collections", "copy", "dataclasses", "datetime", "decimal", "enum",
    "fractions", "functools", "heapq", "itertools", "json", "judge_util", "math", "operator",
    "pathlib", "random", "re", "statistics", "string", "sys", "textwrap", "typing", "unicodedata",
];

/// The built-in stage module distributed alongside generated
/// configurations, declaring the same checks for the external judge.
pub const RAWCHECK_SOURCE: &str = r#"import judge_util

RawCheck = judge_util.teststage()
RawCheck.mode = 'separate'

@judge_util.check_method(RawCheck, 'TE')
def toplevel_check(self):
    try:
        def canary_open(*args, **kwargs):
            judge_util.set_fail_tag(self, 'IOT')
            self.fail()
        exec(self.submission, {'__name__': '__main__', 'open': canary_open})
    except SyntaxError as e:
        if '!' in e.text:
            judge_util.set_fail_tag(self, 'SCE')
        elif '%' in e.text:
            judge_util.set_fail_tag(self, 'MCE')
        else:
            judge_util.set_fail_tag(self, 'SE')
        import traceback
        judge_util.set_unsuccessful_message(self, ''.join(traceback.format_exception(None, e, None)))
        self.fail()
    except FileNotFoundError:
        judge_util.set_fail_tag(self, 'IOT')
        self.fail()
    except ModuleNotFoundError:
        judge_util.set_fail_tag(self, 'UMI')
        self.fail()
    except Exception:
        self.fail()

@judge_util.check_method(RawCheck)
def question_exists(self):
    if judge_util.flag_assignment_exists(self.submission, 'QUESTION_EXISTS'):
        judge_util.set_ok_tag(self, 'QE')
"#;

/// The built-in stage declaration, for prepending to every exercise.
pub fn rawcheck_stage_source() -> Result<StageSource> {
    scan_stage_source(RAWCHECK_SOURCE)
}

/// Parses the submission, mapping a parse failure to a typed error.
fn parse_submission(source: &str) -> Result<Parser, CaseFailure> {
    Parser::new(source)
        .map_err(|e| CaseError::new(ExceptionKind::RuntimeError, format!("{e:#}")).into())
}

/// The executable raw-check stage used by local grading.
///
/// Checks are static renditions of the distributed module: syntax
/// errors are classified by the offending line (`!` shell escapes SCE,
/// `%` magics MCE, anything else SE), top-level file IO gets IOT,
/// unresolvable imports get UMI, and the `QUESTION_EXISTS = True`
/// marker earns QE.
pub fn rawcheck_stage() -> Result<EvaluationStage> {
    let toplevel_check = EvaluationCase::check("toplevel_check", Some("TE".into()), |ctx| {
        let parser = parse_submission(ctx.submission()?)?;

        if let Some((line, text)) = parser.first_error_line() {
            if text.contains('!') {
                ctx.set_fail_tag("SCE");
            } else if text.contains('%') {
                ctx.set_fail_tag("MCE");
            } else {
                ctx.set_fail_tag("SE");
            }
            ctx.log(format!("SyntaxError: invalid syntax (line {line}): {text}"));
            return ctx.assert_true(false, "submission parses");
        }

        if parser.has_toplevel_open_call() {
            ctx.set_fail_tag("IOT");
            return ctx.assert_true(false, "top level performs no file IO");
        }

        let unresolvable: Vec<String> = parser
            .imported_modules()
            .into_iter()
            .filter(|m| {
                let root = m.split('.').next().unwrap_or(m);
                !RESOLVABLE_MODULES.contains(&root)
            })
            .collect();
        if !unresolvable.is_empty() {
            ctx.set_fail_tag("UMI");
            ctx.log(format!("Unresolvable import(s): {}", unresolvable.join(", ")));
            return ctx.assert_true(false, "all imports resolve");
        }
        Ok(())
    });

    let question_exists = EvaluationCase::check("question_exists", None, |ctx| {
        let parser = parse_submission(ctx.submission()?)?;
        if parser.flag_assignment_exists("QUESTION_EXISTS") {
            ctx.set_ok_tag("QE");
        }
        Ok(())
    });

    EvaluationStage::builder("RawCheck")
        .mode(StageMode::Separate)
        .case(toplevel_check)
        .case(question_exists)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runner::{StageRunner, Status},
        tags::predefined_tags,
    };

    fn run_rawcheck(submission: &str) -> Vec<crate::runner::ResultRecord> {
        let stage = rawcheck_stage().unwrap();
        let registry = predefined_tags();
        StageRunner::new(&stage, &registry).run_with(Some(submission), None)
    }

    #[test]
    fn distributed_module_scans_as_a_separate_stage() {
        let stage = rawcheck_stage_source().unwrap();
        assert_eq!(stage.decl.name, "RawCheck");
        assert_eq!(stage.decl.mode, StageMode::Separate);
    }

    #[test]
    fn clean_submissions_pass_both_checks() {
        let records = run_rawcheck("import math\n\ndef f(x):\n    return math.sqrt(x)\n");
        assert!(records.iter().all(|r| r.status == Status::Pass));
    }

    #[test]
    fn shell_escapes_get_sce() {
        let records = run_rawcheck("!ls\n");
        assert_eq!(records[0].status, Status::Fail);
        assert_eq!(records[0].tag_names(), vec!["SCE"]);
    }

    #[test]
    fn magics_get_mce_and_plain_syntax_errors_get_se() {
        let magic = run_rawcheck("%timeit f(1)\n");
        assert_eq!(magic[0].tag_names(), vec!["MCE"]);

        let broken = run_rawcheck("def f(:\n    pass\n");
        assert_eq!(broken[0].tag_names(), vec!["SE"]);
    }

    #[test]
    fn toplevel_io_gets_iot() {
        let records = run_rawcheck("data = open('input.txt').read()\n");
        assert_eq!(records[0].status, Status::Fail);
        assert_eq!(records[0].tag_names(), vec!["IOT"]);
    }

    #[test]
    fn unresolvable_imports_get_umi() {
        let records = run_rawcheck("import cupy\n");
        assert_eq!(records[0].status, Status::Fail);
        assert_eq!(records[0].tag_names(), vec!["UMI"]);
    }

    #[test]
    fn question_marker_earns_qe() {
        let records = run_rawcheck("QUESTION_EXISTS = True\n");
        assert_eq!(records[1].status, Status::Pass);
        assert_eq!(records[1].tag_names(), vec!["QE"]);
    }
}
