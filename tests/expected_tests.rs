//! Data-driven tests: compiles every tests/cases/*.jade and compares the output
//! against the neighbouring .expected.php file. Templates under tests/cases/errors
//! must fail; their .expected.txt holds `<error kind> at line <n>`.
//!
//! Run with: cargo test --test expected_tests
//! Filter like any test binary: cargo test --test expected_tests -- mixins

use jade_transpiler::Compiler;
use libtest_mimic::{Arguments, Failed, Trial};
use std::fs;
use std::path::{Path, PathBuf};

fn cases_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("cases")
}

fn collect(pattern: &str) -> Vec<PathBuf> {
    let pattern = cases_dir().join(pattern);
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .expect("valid glob pattern")
        .filter_map(Result::ok)
        .collect();
    files.sort();
    files
}

fn name(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("case").to_string()
}

fn check_output(path: &Path) -> Result<(), Failed> {
    let expected_path = path.with_extension("expected.php");
    let expected = fs::read_to_string(&expected_path)
        .map_err(|e| format!("missing expected file {}: {e}", expected_path.display()))?;

    let actual = Compiler::default().compile_file(path).map_err(|e| {
        let source = fs::read_to_string(path).unwrap_or_default();
        e.render(&source, &path.display().to_string())
    })?;

    if actual.trim() != expected.trim() {
        return Err(format!(
            "output mismatch\n--- expected ---\n{}\n--- actual ---\n{}",
            expected.trim(),
            actual.trim()
        )
        .into());
    }
    Ok(())
}

fn check_error(path: &Path) -> Result<(), Failed> {
    let expected_path = path.with_extension("expected.txt");
    let expected = fs::read_to_string(&expected_path)
        .map_err(|e| format!("missing expected file {}: {e}", expected_path.display()))?;

    match Compiler::default().compile_file(path) {
        Ok(output) => Err(format!("expected an error, got output:\n{output}").into()),
        Err(err) => {
            let diagnostic = err
                .diagnostic()
                .ok_or_else(|| format!("expected a diagnostic, got: {err}"))?;
            let actual = format!("{} at line {}", diagnostic.kind.as_str(), diagnostic.position.line);
            if actual != expected.trim() {
                return Err(format!("expected `{}`, got `{actual}`", expected.trim()).into());
            }
            Ok(())
        }
    }
}

fn main() {
    let args = Arguments::from_args();

    let mut trials: Vec<Trial> = collect("*.jade")
        .into_iter()
        .map(|path| Trial::test(name(&path), move || check_output(&path)))
        .collect();
    trials.extend(
        collect("errors/*.jade")
            .into_iter()
            .map(|path| Trial::test(format!("errors::{}", name(&path)), move || check_error(&path))),
    );

    libtest_mimic::run(&args, trials).exit();
}
