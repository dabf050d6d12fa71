use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Mutex;

use clap::Parser;
use url::Url;
use website_cloner::{clone_with, CloneCommand, CloneError, CloneOptions, CloneOutput, FetchError, Fetcher};

/// In-memory site. Unknown URLs answer 404; URLs marked as timing out fail
/// with a timeout. Every call is recorded.
#[derive(Default)]
struct FakeSite {
    pages: HashMap<String, Vec<u8>>,
    timeouts: HashSet<String>,
    text_failures: HashSet<String>,
    byte_calls: Mutex<Vec<String>>,
    text_calls: Mutex<Vec<String>>,
}

impl FakeSite {
    fn with(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.as_bytes().to_vec());
        self
    }

    fn timing_out(mut self, url: &str) -> Self {
        self.timeouts.insert(url.to_string());
        self
    }

    fn text_failing(mut self, url: &str) -> Self {
        self.text_failures.insert(url.to_string());
        self
    }

    fn respond(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        if self.timeouts.contains(url.as_str()) {
            return Err(FetchError::Timeout);
        }
        self.pages.get(url.as_str()).cloned().ok_or(FetchError::Status(404))
    }

    fn byte_fetches(&self, url: &str) -> usize {
        self.byte_calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    fn total_calls(&self) -> usize {
        self.byte_calls.lock().unwrap().len() + self.text_calls.lock().unwrap().len()
    }
}

impl Fetcher for FakeSite {
    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.byte_calls.lock().unwrap().push(url.to_string());
        tokio::task::yield_now().await;
        self.respond(url)
    }

    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        self.text_calls.lock().unwrap().push(url.to_string());
        tokio::task::yield_now().await;
        if self.text_failures.contains(url.as_str()) {
            return Err(FetchError::Transport("connection reset".to_string()));
        }
        self.respond(url).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn read_archive(output: &CloneOutput) -> BTreeMap<String, String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(output.archive.clone())).unwrap();
    let mut files = BTreeMap::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        files.insert(file.name().to_string(), String::from_utf8_lossy(&content).into_owned());
    }
    files
}

async fn clone(site: &FakeSite, url: &str) -> CloneOutput {
    clone_with(site, Some(url), &CloneOptions::default()).await.unwrap()
}

#[tokio::test]
async fn test_image_and_inline_style_are_localized() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<html><head><style>.hero{background:url('/hero.jpg')}</style></head>
            <body><img src="/logo.png"><div style="background:url('/bg.jpg')"></div></body></html>"#,
        )
        .with("https://example.com/logo.png", "LOGO")
        .with("https://example.com/bg.jpg", "BG")
        .with("https://example.com/hero.jpg", "HERO");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    let names: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["assets/bg.jpg", "assets/hero.jpg", "assets/logo.png", "index.html"]);
    assert_eq!(files["assets/logo.png"], "LOGO");

    let index = &files["index.html"];
    assert!(index.contains(r#"<img src="assets/logo.png">"#));
    assert!(index.contains("url('assets/bg.jpg')"));
    assert!(index.contains("url('assets/hero.jpg')"));
    assert_eq!(output.file_name, "example.com_clone.zip");
    assert_eq!(output.failed_count(), 0);
}

#[tokio::test]
async fn test_stylesheet_children_resolve_against_stylesheet() {
    let site = FakeSite::default()
        .with(
            "https://example.com/blog/post.html",
            r#"<link rel="stylesheet" href="/s.css"><p>hi</p>"#,
        )
        .with(
            "https://example.com/s.css",
            "@import url('/fonts/base.css'); .a{background:url(../img/x.png)}",
        )
        .with("https://example.com/fonts/base.css", "body{font-family:serif}")
        .with("https://example.com/img/x.png", "X");

    let output = clone(&site, "https://example.com/blog/post.html").await;
    let files = read_archive(&output);

    assert!(files.contains_key("assets/s.css"));
    assert!(files.contains_key("assets/base.css"));
    assert_eq!(files["assets/x.png"], "X");

    let css = &files["assets/s.css"];
    assert_eq!(css, "@import url('assets/base.css'); .a{background:url(assets/x.png)}");
    assert!(files["index.html"].contains(r#"href="assets/s.css""#));

    // One binary fetch per URL, plus the text read of the stylesheet.
    assert_eq!(site.byte_fetches("https://example.com/s.css"), 1);
    assert_eq!(site.byte_fetches("https://example.com/img/x.png"), 1);
}

#[tokio::test]
async fn test_imported_stylesheets_are_not_expanded() {
    let site = FakeSite::default()
        .with("https://example.com/", r#"<link rel="stylesheet" href="/s.css">"#)
        .with("https://example.com/s.css", "@import 'nested.css';")
        .with("https://example.com/nested.css", ".b{background:url(deep.png)}")
        .with("https://example.com/deep.png", "DEEP");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    assert!(files.contains_key("assets/nested.css"));
    assert!(!files.contains_key("assets/deep.png"));
    assert_eq!(site.byte_fetches("https://example.com/deep.png"), 0);
    assert_eq!(files["assets/s.css"], "@import 'assets/nested.css';");
}

#[tokio::test]
async fn test_shared_asset_is_fetched_once_and_named_once() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<link rel="stylesheet" href="/css/site.css"><img src="/img/shared.png">"#,
        )
        .with("https://example.com/css/site.css", ".x{background:url('../img/shared.png')}")
        .with("https://example.com/img/shared.png", "SHARED");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    assert_eq!(site.byte_fetches("https://example.com/img/shared.png"), 1);
    assert_eq!(
        output.assets.iter().filter(|a| a.source == "https://example.com/img/shared.png").count(),
        1
    );
    assert_eq!(files.keys().filter(|k| k.contains("shared")).count(), 1);
    assert!(files["index.html"].contains(r#"src="assets/shared.png""#));
    assert_eq!(files["assets/site.css"], ".x{background:url('assets/shared.png')}");
}

#[tokio::test]
async fn test_distinct_sources_never_share_a_file() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<img src="/a/logo.png"><img src="https://cdn.example.com/b/logo.png">"#,
        )
        .with("https://example.com/a/logo.png", "A")
        .with("https://cdn.example.com/b/logo.png", "B");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    assert_eq!(files["assets/logo.png"], "A");
    assert_eq!(files["assets/logo-2.png"], "B");
    let index = &files["index.html"];
    assert!(index.contains(r#"src="assets/logo.png""#));
    assert!(index.contains(r#"src="assets/logo-2.png""#));
}

#[tokio::test]
async fn test_failed_asset_becomes_placeholder() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<img src="/slow.png"><img src="/ok.png"><script src="/gone.js"></script>"#,
        )
        .with("https://example.com/ok.png", "OK")
        .timing_out("https://example.com/slow.png");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    let names: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(
        names,
        vec!["assets/gone.js.FAILED.txt", "assets/ok.png", "assets/slow.png.FAILED.txt", "index.html"]
    );

    let placeholder = &files["assets/slow.png.FAILED.txt"];
    assert!(placeholder.contains("https://example.com/slow.png"));
    assert!(placeholder.contains("request timed out"));
    assert!(files["assets/gone.js.FAILED.txt"].contains("HTTP 404"));

    let slow = output
        .assets
        .iter()
        .find(|a| a.source == "https://example.com/slow.png")
        .unwrap();
    assert_eq!(slow.failure.as_deref(), Some("request timed out"));
    assert_eq!(output.failed_count(), 2);
}

#[tokio::test]
async fn test_stylesheet_text_failure_falls_back_to_binary() {
    let site = FakeSite::default()
        .with("https://example.com/", r#"<link rel="stylesheet" href="/s.css">"#)
        .with("https://example.com/s.css", ".a{background:url(a.png)}")
        .with("https://example.com/a.png", "A")
        .text_failing("https://example.com/s.css");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    assert!(files.contains_key("assets/s.css"));
    assert!(!files.contains_key("assets/a.png"));
    assert_eq!(site.byte_fetches("https://example.com/a.png"), 0);
}

#[tokio::test]
async fn test_extensionless_stylesheet_gets_css_suffix_once() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<link rel="stylesheet" href="/theme?v=1"><link rel="stylesheet" href="/main.css">"#,
        )
        .with("https://example.com/theme?v=1", "p{color:red}")
        .with("https://example.com/main.css", "p{margin:0}");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    assert_eq!(files["assets/theme.css"], "p{color:red}");
    assert!(files.contains_key("assets/main.css"));
    assert!(!files.keys().any(|k| k.ends_with(".css.css")));
    assert!(files["index.html"].contains(r#"href="assets/theme.css""#));
}

#[tokio::test]
async fn test_archive_is_reproducible() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<link rel="stylesheet" href="/s.css"><img src="/a.png"><img src="/b.png"><img src="/missing.png">"#,
        )
        .with("https://example.com/s.css", ".x{background:url(c.png)}")
        .with("https://example.com/a.png", "A")
        .with("https://example.com/b.png", "B")
        .with("https://example.com/c.png", "C");

    let first = clone(&site, "https://example.com/").await;
    let second = clone(&site, "https://example.com/").await;

    assert_eq!(first.archive, second.archive);
}

#[tokio::test]
async fn test_invalid_url_makes_no_network_calls() {
    let site = FakeSite::default();

    let err = clone_with(&site, Some("not-a-url"), &CloneOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::InvalidUrl(_)));
    assert!(err.is_client_error());

    let err = clone_with(&site, None, &CloneOptions::default()).await.unwrap_err();
    assert!(matches!(err, CloneError::MissingUrl));

    assert_eq!(site.total_calls(), 0);
}

#[tokio::test]
async fn test_page_fetch_failure_is_fatal() {
    let site = FakeSite::default().timing_out("https://example.com/");

    let err = clone_with(&site, Some("https://example.com/"), &CloneOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CloneError::PageFetch { .. }));
    assert!(!err.is_client_error());
    assert_eq!(err.status_code(), 502);
    assert_eq!(err.report().details.as_deref(), Some("request timed out"));
}

#[tokio::test]
async fn test_archive_is_written_to_output_path() {
    let site = FakeSite::default()
        .with("https://example.com/", r#"<img src="/logo.png">"#)
        .with("https://example.com/logo.png", "LOGO");
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("site.zip");

    let args = CloneCommand::try_parse_from([
        "website-cloner",
        "https://example.com/",
        "-o",
        target.to_str().unwrap(),
    ])
    .unwrap();
    let output = clone_with(&site, args.url.as_deref(), &args.options()).await.unwrap();
    let path = args.output_path(&output.file_name);
    output.write_to(&path).unwrap();

    assert_eq!(path, target);
    let mut zip = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
    let mut logo = String::new();
    zip.by_name("assets/logo.png").unwrap().read_to_string(&mut logo).unwrap();
    assert_eq!(logo, "LOGO");
    assert!(zip.by_name("index.html").is_ok());
}

#[tokio::test]
async fn test_default_output_path_uses_suggested_name() {
    let site = FakeSite::default().with("https://example.com/", "<p>hi</p>");
    let dir = tempfile::tempdir().unwrap();

    let args = CloneCommand::try_parse_from(["website-cloner", "https://example.com/"]).unwrap();
    let output = clone_with(&site, args.url.as_deref(), &args.options()).await.unwrap();
    let path = dir.path().join(args.output_path(&output.file_name));
    output.write_to(&path).unwrap();

    assert!(path.ends_with("example.com_clone.zip"));
    assert_eq!(std::fs::read(&path).unwrap(), output.archive);
}

#[tokio::test]
async fn test_linked_downloads_are_localized() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<a href="/files/guide.svg">Guide</a><a href="/about">About</a>"#,
        )
        .with("https://example.com/files/guide.svg", "<svg/>");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    assert_eq!(files["assets/guide.svg"], "<svg/>");
    assert!(files["index.html"].contains(r#"<a href="assets/guide.svg">"#));
    assert!(files["index.html"].contains(r#"<a href="/about">"#));
    assert_eq!(site.byte_fetches("https://example.com/about"), 0);
}

#[tokio::test]
async fn test_fragments_of_one_resource_share_a_file() {
    let site = FakeSite::default()
        .with(
            "https://example.com/",
            r#"<img src="/sprite.svg#a"><img src="/sprite.svg#b">"#,
        )
        .with("https://example.com/sprite.svg", "<svg/>");

    let output = clone(&site, "https://example.com/").await;
    let files = read_archive(&output);

    assert_eq!(site.byte_fetches("https://example.com/sprite.svg"), 1);
    let names: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["assets/sprite.svg", "index.html"]);
    assert!(files["index.html"].contains(r#"src="assets/sprite.svg#a""#));
    assert!(files["index.html"].contains(r#"src="assets/sprite.svg#b""#));
}
