use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::{Captures, Regex};
use url::Url;

use crate::naming::{local_href, resolve_asset_url};

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(['"]?)([^'")]*)['"]?\s*\)"#).expect("url() pattern is valid")
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(['"])([^'"]+)['"]"#).expect("@import pattern is valid")
});

/// Collects every `url(...)` and `@import "..."` target in `css`, resolved
/// against `base` (the URL of the stylesheet itself, or the page for inline
/// styles). Unresolvable matches are dropped.
pub fn scan_css_references(css: &str, base: &Url) -> IndexSet<Url> {
    let url_targets = URL_RE.captures_iter(css).map(|caps| caps.get(2));
    let import_targets = IMPORT_RE.captures_iter(css).map(|caps| caps.get(2));

    url_targets
        .chain(import_targets)
        .flatten()
        .filter_map(|target| resolve_asset_url(base, target.as_str()))
        .collect()
}

/// Substitutes every reference in `css` that `lookup` knows a local name for
/// with `assets/<name>`, keeping the original quoting. References are resolved
/// against `base` before the lookup; everything else is left untouched.
pub fn rewrite_css<F>(css: &str, base: &Url, lookup: F) -> String
where
    F: Fn(&Url) -> Option<String>,
{
    let local = |target: &str| {
        resolve_asset_url(base, target)
            .and_then(|url| lookup(&url))
            .map(|name| local_href(&name, target))
    };

    let rewritten = URL_RE.replace_all(css, |caps: &Captures| match local(&caps[2]) {
        Some(href) => format!("url({q}{href}{q})", q = &caps[1]),
        None => caps[0].to_string(),
    });

    IMPORT_RE
        .replace_all(&rewritten, |caps: &Captures| match local(&caps[2]) {
            Some(href) => format!("@import {q}{href}{q}", q = &caps[1]),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Whether a registry entry should be treated as a stylesheet.
pub fn is_stylesheet(source: &Url, captured_text: Option<&str>) -> bool {
    captured_text.is_some() || source.path().to_ascii_lowercase().ends_with(".css")
}
