use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::archive::package;
use crate::css::{is_stylesheet, rewrite_css, scan_css_references};
use crate::downloader::{AssetRegistry, AssetState, AssetTable, Fetcher, HttpFetcher, DEFAULT_USER_AGENT};
use crate::error::{CloneError, Result};
use crate::html_parser::Page;
use crate::naming::archive_file_name;

pub const DEFAULT_MAX_CONCURRENT: usize = 6;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Upper bound on asset downloads in flight at once.
    pub max_concurrent: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// One line of the clone report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetSummary {
    pub source: String,
    pub local_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug)]
pub struct CloneOutput {
    /// Zip archive bytes.
    pub archive: Vec<u8>,
    /// Suggested download name, `<host>_clone.zip`.
    pub file_name: String,
    pub assets: Vec<AssetSummary>,
}

impl CloneOutput {
    pub fn failed_count(&self) -> usize {
        self.assets.iter().filter(|a| a.failure.is_some()).count()
    }

    /// Writes the archive to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.archive)?;
        tracing::debug!(path = %path.display(), bytes = self.archive.len(), "wrote archive");
        Ok(())
    }
}

/// Checks the requested target before any network activity happens.
pub fn validate_target(raw: Option<&str>) -> Result<Url> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(CloneError::MissingUrl)?;
    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        return Err(CloneError::InvalidUrl(raw.to_string()));
    }
    Url::parse(raw).map_err(|_| CloneError::InvalidUrl(raw.to_string()))
}

/// Clones `target` over HTTP.
pub async fn clone_page(target: Option<&str>, options: &CloneOptions) -> Result<CloneOutput> {
    let url = validate_target(target)?;
    let fetcher = HttpFetcher::new(options.timeout, options.max_redirects, &options.user_agent)
        .map_err(CloneError::Client)?;
    WebsiteCloner::new(&fetcher, options.max_concurrent).run(url).await
}

/// Clones `target` through any transport.
pub async fn clone_with<F: Fetcher>(
    fetcher: &F,
    target: Option<&str>,
    options: &CloneOptions,
) -> Result<CloneOutput> {
    let url = validate_target(target)?;
    WebsiteCloner::new(fetcher, options.max_concurrent).run(url).await
}

/// Runs the stages in order: discovery, stylesheet expansion, rewrite,
/// packaging. Each stage starts only after the previous one has settled.
pub struct WebsiteCloner<'f, F> {
    fetcher: &'f F,
    max_concurrent: usize,
}

impl<'f, F: Fetcher> WebsiteCloner<'f, F> {
    pub fn new(fetcher: &'f F, max_concurrent: usize) -> Self {
        Self { fetcher, max_concurrent }
    }

    pub async fn run(&self, url: Url) -> Result<CloneOutput> {
        tracing::info!(url = %url, "fetching page");
        let html = self
            .fetcher
            .fetch_text(&url)
            .await
            .map_err(|source| CloneError::PageFetch { url: url.to_string(), source })?;

        let page = Page::parse(url.clone(), &html);
        let registry = AssetRegistry::new(self.fetcher, self.max_concurrent);

        let discovery = page.discover();
        tracing::info!(
            candidates = discovery.candidates.len(),
            stylesheets = discovery.stylesheets.len(),
            "discovered assets"
        );
        registry.ensure_all(&discovery.candidates).await;

        for stylesheet in &discovery.stylesheets {
            self.expand_stylesheet(&registry, stylesheet).await;
        }

        let mut assets = registry.into_entries();
        if assets.is_empty() {
            tracing::info!("page references no downloadable assets");
        }
        let stylesheets = rewrite_stylesheets(&mut assets);
        let references = page.rewrite(|u| assets.local_name(u));
        tracing::info!(references, stylesheets, "rewrote references");

        let archive = package(&page.to_html()?, &assets)?;
        let summary = summarize(&assets);
        tracing::info!(
            assets = assets.len(),
            failed = summary.iter().filter(|a| a.failure.is_some()).count(),
            bytes = archive.len(),
            "packaged archive"
        );

        Ok(CloneOutput {
            archive,
            file_name: archive_file_name(url.as_str()),
            assets: summary,
        })
    }

    /// Fetches one stylesheet's text and downloads everything it references.
    /// Children are not expanded further.
    async fn expand_stylesheet(&self, registry: &AssetRegistry<'f, F>, stylesheet: &Url) {
        match self.fetcher.fetch_text(stylesheet).await {
            Ok(css) => {
                registry.ensure_downloaded(stylesheet).await;
                let children = scan_css_references(&css, stylesheet);
                registry.attach_text(stylesheet, css);
                tracing::debug!(stylesheet = %stylesheet, children = children.len(), "expanding stylesheet");
                registry.ensure_all(&children).await;
            }
            Err(err) => {
                tracing::warn!(stylesheet = %stylesheet, error = %err, "could not read stylesheet text");
                registry.ensure_downloaded(stylesheet).await;
            }
        }
    }
}

/// Gives every downloaded stylesheet a `.css` name and points its references
/// at local copies, each resolved against the stylesheet's own URL. Returns
/// the number of stylesheets processed.
pub fn rewrite_stylesheets(assets: &mut AssetTable) -> usize {
    let sheets: Vec<Url> = assets
        .entries()
        .filter(|e| !e.is_failed() && is_stylesheet(&e.source, e.captured_text()))
        .map(|e| e.source.clone())
        .collect();

    // Names first, so stylesheets importing each other see final names.
    for sheet in &sheets {
        let Some(name) = assets.local_name(sheet) else {
            continue;
        };
        if !name.to_ascii_lowercase().ends_with(".css") {
            assets.rename(sheet, format!("{name}.css"));
        }
    }

    let mut rewritten = Vec::with_capacity(sheets.len());
    for sheet in &sheets {
        let Some(entry) = assets.get(sheet) else {
            continue;
        };
        let AssetState::Succeeded { bytes, text } = &entry.state else {
            continue;
        };
        let original = match text {
            Some(text) => text.as_str(),
            None => match std::str::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => continue,
            },
        };
        let updated = rewrite_css(original, sheet, |u| assets.local_name(u));
        if text.is_some() || updated != original {
            rewritten.push((sheet.clone(), updated));
        }
    }

    for (sheet, updated) in rewritten {
        if let Some(entry) = assets.get_mut(&sheet) {
            if let AssetState::Succeeded { bytes, .. } = &mut entry.state {
                *bytes = updated.into_bytes();
            }
        }
    }

    sheets.len()
}

fn summarize(assets: &AssetTable) -> Vec<AssetSummary> {
    assets
        .entries()
        .map(|entry| AssetSummary {
            source: entry.source.to_string(),
            local_name: entry.local_name.clone(),
            failure: match &entry.state {
                AssetState::Succeeded { .. } => None,
                AssetState::Failed { reason } => Some(reason.clone()),
                AssetState::Pending => Some("download never completed".to_string()),
            },
        })
        .collect()
}
