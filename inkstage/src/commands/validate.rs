// inkstage/src/commands/validate.rs
//
// USE CASE: Check every source against its quality rules, stage nothing.

use std::path::PathBuf;

use anyhow::Context;
use inkstage_core::application::validate_sources;

use super::load_config;

pub fn execute(project_dir: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;

    let reports = validate_sources(&config, &project_dir).context("Validation aborted")?;

    let mut failed = 0;
    for report in &reports {
        println!("\n🧪 {} ({} rows)", report.source_name, report.total_rows);
        if report.is_clean() {
            println!("   ✅ No issue");
        }
        for warning in &report.warnings {
            println!("   ⚠️  {}", warning);
        }
        for error in &report.errors {
            println!("   ❌ {}", error);
        }
        if report.has_errors() {
            failed += 1;
        }
    }

    if failed > 0 {
        eprintln!("\n❌ {} source(s) would be rejected.", failed);
        std::process::exit(1);
    }
    println!("\n✨ All sources pass the quality gate.");
    Ok(())
}
