use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::cloner::{CloneOptions, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_REDIRECTS};
use crate::downloader::DEFAULT_USER_AGENT;

#[derive(Parser, Debug)]
#[command(
    name = "website-cloner",
    about = "A CLI utility to clone a single web page for offline use",
    version,
    long_about = "Downloads one page together with every image, script, stylesheet, media file and icon it references (including assets referenced from its stylesheets), rewrites the references to local paths and packs everything into a single zip archive."
)]
pub struct CloneCommand {
    /// The URL of the page to clone (http:// or https://)
    pub url: Option<String>,

    /// Where to write the archive [default: <host>_clone.zip]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum concurrent asset downloads
    #[arg(short = 'c', long, default_value_t = DEFAULT_MAX_CONCURRENT, value_parser = parse_positive)]
    pub max_concurrent: usize,

    /// Timeout for each request in seconds
    #[arg(long, default_value_t = 20, value_parser = parse_positive)]
    pub timeout: usize,

    /// Maximum redirects followed per request
    #[arg(long, default_value_t = DEFAULT_MAX_REDIRECTS)]
    pub max_redirects: usize,

    /// User agent string to use for requests
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Print failures as a JSON error report on stdout
    #[arg(long)]
    pub json_errors: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl CloneCommand {
    pub fn options(&self) -> CloneOptions {
        CloneOptions {
            max_concurrent: self.max_concurrent,
            timeout: Duration::from_secs(self.timeout as u64),
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Explicit `--output`, or the suggested archive name in the current directory.
    pub fn output_path(&self, suggested: &str) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from(suggested))
    }
}
