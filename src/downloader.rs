use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::{redirect, Client, ClientBuilder};
use thiserror::Error;
use tokio::sync::{OnceCell, Semaphore};
use url::Url;

use crate::naming::{local_name_for, placeholder_name};

pub const DEFAULT_USER_AGENT: &str = "WebsiteCloner/1.0";

/// Why a single fetch did not produce a body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_redirect() {
            FetchError::TooManyRedirects
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Transport used by the pipeline. Implementations must fail on non-2xx
/// responses rather than hand back an error page as content.
pub trait Fetcher {
    fn fetch_bytes(&self, url: &Url) -> impl Future<Output = Result<Vec<u8>, FetchError>>;
    fn fetch_text(&self, url: &Url) -> impl Future<Output = Result<String, FetchError>>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_redirects: usize, user_agent: &str) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(redirect::Policy::limited(max_redirects))
            .build()?;

        Ok(Self { client })
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let body = self.get(url).await?.bytes().await?;
        Ok(body.to_vec())
    }

    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        Ok(self.get(url).await?.text().await?)
    }
}

/// Outcome of one asset's fetch. `Pending` only exists while the fetch is in
/// flight and is never observed once the registry is drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetState {
    Pending,
    Succeeded { bytes: Vec<u8>, text: Option<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub source: Url,
    pub local_name: String,
    pub state: AssetState,
}

impl AssetEntry {
    pub fn is_failed(&self) -> bool {
        matches!(self.state, AssetState::Failed { .. })
    }

    pub fn captured_text(&self) -> Option<&str> {
        match &self.state {
            AssetState::Succeeded { text, .. } => text.as_deref(),
            _ => None,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    counter: usize,
    entries: IndexMap<String, AssetEntry>,
    fetches: HashMap<String, Arc<OnceCell<()>>>,
    taken_names: HashSet<String>,
}

impl RegistryState {
    /// Creates the entry for `url` and hands back the cell guarding its fetch.
    fn register(&mut self, url: &Url) -> (String, Arc<OnceCell<()>>) {
        self.counter += 1;
        let name = unique_name(&self.taken_names, local_name_for(url, self.counter), self.counter);
        claim(&mut self.taken_names, &name);

        let key = url.as_str().to_string();
        self.entries.insert(
            key.clone(),
            AssetEntry {
                source: url.clone(),
                local_name: name.clone(),
                state: AssetState::Pending,
            },
        );
        let cell = Arc::new(OnceCell::new());
        self.fetches.insert(key, cell.clone());
        (name, cell)
    }
}

/// A name is owned together with its failure placeholder, so a success
/// member can never land on another entry's `.FAILED.txt` path.
fn claim(taken: &mut HashSet<String>, name: &str) {
    taken.insert(name.to_string());
    taken.insert(placeholder_name(name));
}

fn release(taken: &mut HashSet<String>, name: &str) {
    taken.remove(name);
    taken.remove(&placeholder_name(name));
}

fn is_taken(taken: &HashSet<String>, name: &str) -> bool {
    taken.contains(name) || taken.contains(&placeholder_name(name))
}

/// Returns `name`, or `name` with `-<counter>` inserted before its extension
/// when another entry already owns it.
pub(crate) fn unique_name(taken: &HashSet<String>, name: String, counter: usize) -> String {
    if !is_taken(taken, &name) {
        return name;
    }
    let path = Path::new(&name);
    let candidate = match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!("{}-{counter}.{}", stem.to_string_lossy(), ext.to_string_lossy()),
        _ => format!("{name}-{counter}"),
    };
    if is_taken(taken, &candidate) {
        format!("{counter}-{candidate}")
    } else {
        candidate
    }
}

/// Deduplicating asset store plus the bounded fetch scheduler that fills it.
///
/// `ensure_downloaded` is the only way entries get created. Callers may run
/// any number of them concurrently (e.g. through `join_all`); at most
/// `max_concurrent` fetches are in flight and waiters are admitted in FIFO
/// order.
pub struct AssetRegistry<'f, F> {
    fetcher: &'f F,
    permits: Semaphore,
    state: Mutex<RegistryState>,
}

impl<'f, F: Fetcher> AssetRegistry<'f, F> {
    pub fn new(fetcher: &'f F, max_concurrent: usize) -> Self {
        Self {
            fetcher,
            permits: Semaphore::new(max_concurrent.max(1)),
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        // A poisoned lock only means another caller panicked mid-update;
        // the map itself is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes sure `url` has a settled entry and returns its local name.
    ///
    /// The first caller for a URL creates the entry and performs the fetch;
    /// later callers never touch the network, though a caller arriving while
    /// the first fetch is still in flight waits for it to settle.
    pub async fn ensure_downloaded(&self, url: &Url) -> String {
        let (name, cell) = {
            let mut state = self.lock();
            let existing = state.entries.get(url.as_str()).map(|e| e.local_name.clone());
            match existing {
                Some(name) => {
                    let cell = state.fetches.get(url.as_str()).cloned();
                    (name, cell)
                }
                None => {
                    let (name, cell) = state.register(url);
                    (name, Some(cell))
                }
            }
        };

        if let Some(cell) = cell {
            cell.get_or_init(|| self.fetch_into_entry(url)).await;
        }

        name
    }

    async fn fetch_into_entry(&self, url: &Url) {
        let outcome = match self.permits.acquire().await {
            Ok(_permit) => self.fetcher.fetch_bytes(url).await,
            Err(err) => Err(FetchError::Transport(err.to_string())),
        };

        let state = match outcome {
            Ok(bytes) => {
                tracing::debug!(url = %url, size = bytes.len(), "downloaded asset");
                AssetState::Succeeded { bytes, text: None }
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "asset download failed");
                AssetState::Failed { reason: err.to_string() }
            }
        };

        if let Some(entry) = self.lock().entries.get_mut(url.as_str()) {
            entry.state = state;
        }
    }

    /// Submits every URL and waits until all of them have settled.
    pub async fn ensure_all<'u, I>(&self, urls: I)
    where
        I: IntoIterator<Item = &'u Url>,
    {
        futures::future::join_all(urls.into_iter().map(|url| self.ensure_downloaded(url))).await;
    }

    /// Records the raw text of a stylesheet on its (settled, successful) entry.
    pub fn attach_text(&self, url: &Url, css: String) {
        if let Some(entry) = self.lock().entries.get_mut(url.as_str()) {
            if let AssetState::Succeeded { text, .. } = &mut entry.state {
                *text = Some(css);
            }
        }
    }

    /// Hands the settled entries to the later stages, keyed by source URL in
    /// creation order.
    pub fn into_entries(self) -> AssetTable {
        let state = self.state.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        AssetTable {
            entries: state.entries,
            taken_names: state.taken_names,
            counter: state.counter,
        }
    }
}

/// Registry contents after every fetch has settled. Owned by the rewrite and
/// packaging stages, which run strictly after the network phase.
#[derive(Debug, Default)]
pub struct AssetTable {
    entries: IndexMap<String, AssetEntry>,
    taken_names: HashSet<String>,
    counter: usize,
}

impl AssetTable {
    pub fn get(&self, url: &Url) -> Option<&AssetEntry> {
        self.entries.get(url.as_str())
    }

    pub fn get_mut(&mut self, url: &Url) -> Option<&mut AssetEntry> {
        self.entries.get_mut(url.as_str())
    }

    pub fn local_name(&self, url: &Url) -> Option<String> {
        self.get(url)
            .map(|e| e.local_name.clone())
            .filter(|name| !name.is_empty())
    }

    pub fn entries(&self) -> impl Iterator<Item = &AssetEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renames `url`'s entry to `name`, disambiguating against other entries.
    /// Returns the name actually assigned.
    pub fn rename(&mut self, url: &Url, name: String) -> Option<String> {
        let current = self.entries.get(url.as_str())?.local_name.clone();
        if current == name {
            return Some(current);
        }
        self.counter += 1;
        release(&mut self.taken_names, &current);
        let name = unique_name(&self.taken_names, name, self.counter);
        claim(&mut self.taken_names, &name);
        let entry = self.entries.get_mut(url.as_str())?;
        entry.local_name = name.clone();
        Some(name)
    }
}
