use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use website_cloner::cli::CloneCommand;
use website_cloner::{clone_page, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CloneCommand::parse();
    logging::init_logging(args.verbose);

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    progress_bar.enable_steady_tick(Duration::from_millis(100));
    progress_bar.set_message(format!("Cloning {}", args.url.as_deref().unwrap_or_default()));

    let output = match clone_page(args.url.as_deref(), &args.options()).await {
        Ok(output) => output,
        Err(err) => {
            progress_bar.finish_and_clear();
            if args.json_errors {
                println!("{}", serde_json::to_string_pretty(&err.report())?);
                std::process::exit(if err.is_client_error() { 2 } else { 1 });
            }
            return Err(err.into());
        }
    };

    let path = args.output_path(&output.file_name);
    output
        .write_to(&path)
        .with_context(|| format!("Failed to write archive: {:?}", path))?;
    progress_bar.finish_and_clear();

    let failed = output.failed_count();
    println!(
        "✅ Cloned {} assets ({} failed) into {}",
        output.assets.len(),
        if failed == 0 { failed.to_string().green() } else { failed.to_string().red() },
        path.display().to_string().blue()
    );
    for asset in output.assets.iter().filter(|a| a.failure.is_some()) {
        println!(
            "⚠️  {} -> {}",
            asset.source,
            asset.failure.as_deref().unwrap_or_default().yellow()
        );
    }

    Ok(())
}
