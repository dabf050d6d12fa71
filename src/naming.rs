use std::path::Path;

use mime::Mime;
use url::Url;

/// Folder inside the archive that holds every downloaded asset.
pub const ASSETS_DIR: &str = "assets";

/// Appended to an asset's local name for its failure placeholder.
const FAILED_SUFFIX: &str = ".FAILED.txt";

/// Directory or file stems that strongly suggest a media type when the URL
/// itself carries no extension (e.g. `/css?family=Inter`).
const PATH_HINTS: &[(&str, &str)] = &[
    ("css", "text/css"),
    ("stylesheet", "text/css"),
    ("js", "application/javascript"),
    ("javascript", "application/javascript"),
    ("svg", "image/svg+xml"),
    ("json", "application/json"),
];

/// Resolves a possibly-relative reference against `base`.
///
/// Handles bare paths, protocol-relative references, query/fragment suffixes
/// and already-absolute input.
pub fn resolve_url(base: &Url, reference: &str) -> Result<Url, url::ParseError> {
    let reference = reference.trim();
    if reference.starts_with("http://") || reference.starts_with("https://") {
        Url::parse(reference)
    } else if let Some(rest) = reference.strip_prefix("//") {
        // Protocol-relative URL
        Url::parse(&format!("{}://{}", base.scheme(), rest))
    } else {
        base.join(reference)
    }
}

/// Resolves a reference that may point at a downloadable asset.
///
/// Returns `None` for empty and fragment-only references, for anything that
/// does not resolve, and for schemes other than `http`/`https` (`data:`,
/// `javascript:`, `mailto:`, ...). The fragment is dropped: it never reaches
/// the server, so `sprite.svg#a` and `sprite.svg#b` are one asset.
pub fn resolve_asset_url(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }
    let mut url = resolve_url(base, reference).ok()?;
    match url.scheme() {
        "http" | "https" => {
            url.set_fragment(None);
            Some(url)
        }
        _ => None,
    }
}

/// Derives a filesystem-safe file name for `url`.
///
/// Never returns an empty string; the result only contains `[A-Za-z0-9._-]`.
/// `counter` is used for URLs whose path yields no usable name.
pub fn local_name_for(url: &Url, counter: usize) -> String {
    derive_name(url, counter).unwrap_or_else(|| format!("asset_{counter}"))
}

fn derive_name(url: &Url, counter: usize) -> Option<String> {
    let segment = url.path_segments()?.next_back().unwrap_or_default();

    let mut name = if segment.is_empty() {
        format!("asset-{counter}")
    } else {
        segment.to_string()
    };

    if Path::new(&name).extension().is_none() {
        if let Some(ext) = infer_extension(url.path()) {
            name.push('.');
            name.push_str(ext);
        }
    }

    let sanitized = sanitize_file_name(&name);
    if sanitized.chars().all(|c| c == '.') {
        return None;
    }
    Some(sanitized)
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Best-effort extension for an extensionless URL path.
pub fn infer_extension(path: &str) -> Option<&'static str> {
    let mime = mime_guess::from_path(path)
        .first()
        .or_else(|| mime_from_path_hint(path))?;
    canonical_extension(&mime)
}

fn mime_from_path_hint(path: &str) -> Option<Mime> {
    let lower = path.to_ascii_lowercase();
    lower
        .split('/')
        .rev()
        .filter(|segment| !segment.is_empty())
        .find_map(|segment| {
            PATH_HINTS
                .iter()
                .find(|(hint, _)| *hint == segment)
                .and_then(|(_, mime)| mime.parse::<Mime>().ok())
        })
}

/// Maps a media type to the extension a browser expects for it.
pub fn canonical_extension(mime: &Mime) -> Option<&'static str> {
    let ext = match mime.essence_str() {
        "text/css" => "css",
        "text/javascript" | "application/javascript" | "application/x-javascript" => "js",
        "text/html" => "html",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "font/woff" => "woff",
        "font/woff2" => "woff2",
        "application/json" => "json",
        _ => return mime_guess::get_mime_extensions(mime).and_then(|exts| exts.first().copied()),
    };
    Some(ext)
}

/// Reference written into rewritten markup and stylesheets for a local asset.
fn asset_href(local_name: &str) -> String {
    format!("{ASSETS_DIR}/{local_name}")
}

/// Local replacement for `reference`, keeping its fragment (`#icon`) if any.
pub fn local_href(local_name: &str, reference: &str) -> String {
    match reference.trim().split_once('#') {
        Some((_, fragment)) if !fragment.is_empty() => format!("{}#{fragment}", asset_href(local_name)),
        _ => asset_href(local_name),
    }
}

/// Archive member name of the placeholder written for a failed asset.
pub fn placeholder_name(local_name: &str) -> String {
    format!("{local_name}{FAILED_SUFFIX}")
}

/// File name offered for the packaged archive: `<sanitized-host>_clone.zip`.
pub fn archive_file_name(target: &str) -> String {
    let host = Url::parse(target)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "site".to_string());
    let host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{host}_clone.zip")
}
