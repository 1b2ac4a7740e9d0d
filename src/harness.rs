use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};

use crate::config::{Dialect, Options};

fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

#[test]
fn runs_program_fixtures() -> Result<()> {
    let programs_dir = Path::new("tests/programs");
    let mut programs = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("xl" | "xb")
        ) {
            programs.push(path);
        }
    }

    ensure!(
        !programs.is_empty(),
        "No .xl or .xb programs found in {}",
        programs_dir.display()
    );
    programs.sort();

    for path in programs {
        let source =
            fs::read_to_string(&path).with_context(|| format!("Reading {}", path.display()))?;
        let options = Options::new(Dialect::from_path(&path));
        let input_path = path.with_extension("in");
        let input = if input_path.exists() {
            fs::read_to_string(&input_path)
                .with_context(|| format!("Reading {}", input_path.display()))?
        } else {
            String::new()
        };

        let expected_error_path = path.with_extension("err");
        if expected_error_path.exists() {
            let expected_error = fs::read_to_string(&expected_error_path)
                .with_context(|| format!("Reading {}", expected_error_path.display()))?;
            let expected_error = expected_error.trim();
            let error = match crate::compile(&source, options) {
                Ok(_) => anyhow::bail!("Expected error for {}", path.display()),
                Err(err) => err.to_string(),
            };
            ensure!(
                error.contains(expected_error),
                "Expected error containing '{expected_error}', got '{error}' in {}",
                path.display()
            );
            continue;
        }

        let expected_path = path.with_extension("out");
        let expected = fs::read_to_string(&expected_path)
            .with_context(|| format!("Reading {}", expected_path.display()))?;
        let program = crate::compile(&source, options)
            .with_context(|| format!("Compiling {}", path.display()))?;
        let execution = program.run_captured(&input);
        assert_eq!(
            normalize_output(&execution.output),
            normalize_output(&expected),
            "Output mismatch for {}",
            path.display()
        );
    }

    Ok(())
}
