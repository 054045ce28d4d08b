//! Advisory caption checks.

use std::path::PathBuf;

use subgenius_caption_model::lint;
use subgenius_common::config::AppConfig;

use super::{load_captions, load_style};

pub fn run(config: &AppConfig, captions: PathBuf, style: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Checking captions in: {}", captions.display());

    let list = load_captions(&captions)?;
    let style = load_style(config, style)?;
    let issues = lint(list.records(), &style);

    println!("  Captions: {}", list.len());
    if issues.is_empty() {
        println!("\nNo issues found.");
    } else {
        println!("\nIssues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        println!(
            "\n{} issue(s) found. Captions still render as written.",
            issues.len()
        );
    }
    Ok(())
}
