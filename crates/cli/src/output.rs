//! Output formatting for CLI

use anyhow::{Context, Result};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use std::path::{Path, PathBuf};

use uiproof_engine::{SuiteSummary, TestResult, TestStatus};

pub const RESULTS_FILE: &str = "test-results.json";

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Write the full summary as pretty JSON into `dir`
pub fn write_results(dir: &Path, summary: &SuiteSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(RESULTS_FILE);
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn print_summary(summary: &SuiteSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(vec!["Test", "Status", "Actions", "Expectations", "Failures", "Duration"]);
            for result in &summary.results {
                table.add_row(summary_row(result));
            }
            println!("{table}");

            for result in &summary.results {
                if let Some(error) = &result.error {
                    print_error(&format!("{}: {}", result.test_id, error.message));
                }
                for failure in result.failures.iter().filter(|f| f.critical) {
                    print_error(&format!("{}: {}", result.test_id, failure.message));
                }
                for failure in result.failures.iter().filter(|f| !f.critical) {
                    print_warning(&format!("{}: {}", result.test_id, failure.message));
                }
            }

            println!(
                "{} test(s): {} passed, {} partial, {} failed, {} errored ({} ms)",
                summary.total,
                summary.passed,
                summary.partial,
                summary.failed,
                summary.errored,
                summary.duration_ms
            );
        }
    }
    Ok(())
}

/// Actions and expectations as `succeeded/total`
fn summary_row(result: &TestResult) -> Vec<String> {
    let actions_succeeded = result.action_outcomes.iter().filter(|a| a.success).count();
    let expectations_passed = result.expectation_results.iter().filter(|e| e.passed).count();
    vec![
        result.test_id.clone(),
        status_cell(result.status),
        format!("{}/{}", actions_succeeded, result.action_outcomes.len()),
        format!("{}/{}", expectations_passed, result.expectation_results.len()),
        result.failures.len().to_string(),
        format!("{} ms", result.duration_ms),
    ]
}

fn status_cell(status: TestStatus) -> String {
    let icon = match status {
        TestStatus::Passed => "✅",
        TestStatus::PartialPass => "⚠️",
        TestStatus::Failed => "❌",
        TestStatus::Errored => "💥",
    };
    format!("{} {}", icon, status)
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uiproof_engine::{ActionOutcome, TestDefinition};

    fn outcome(id: &str, success: bool) -> ActionOutcome {
        ActionOutcome {
            action_id: id.to_string(),
            action_type: "click".to_string(),
            success,
            duration_ms: 5,
            error: (!success).then(|| "Element not found: #x".to_string()),
        }
    }

    #[test]
    fn test_summary_row_counts_successful_actions() {
        let definition = TestDefinition::new("checkout", "Checkout", "http://shop.test/");
        let mut result = TestResult::start(&definition);
        result.action_outcomes = vec![outcome("a1", true), outcome("a2", false), outcome("a3", true)];
        result.actions_executed = 3;

        let row = summary_row(&result);
        assert_eq!(row[0], "checkout");
        assert_eq!(row[2], "2/3");
        assert_eq!(row[3], "0/0");
    }

    #[test]
    fn test_write_results_creates_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("out");
        let path = write_results(&dir, &SuiteSummary::default()).unwrap();

        assert_eq!(path, dir.join(RESULTS_FILE));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["total"], 0);
        assert!(written["results"].as_array().unwrap().is_empty());
    }
}
