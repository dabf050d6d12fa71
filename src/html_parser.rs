use std::path::Path;

use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, Attribute, ParseOpts};
use indexmap::IndexSet;
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use url::Url;

use crate::css::{rewrite_css, scan_css_references};
use crate::error::CloneError;
use crate::naming::{local_href, resolve_asset_url};

/// Elements whose `src` attribute is an asset reference.
const SRC_TAGS: &[&str] = &["img", "script", "audio", "video", "source", "track", "iframe", "embed"];

/// `<a href>` targets with one of these extensions are downloads, not pages.
const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "woff", "woff2", "ttf", "eot", "mp4", "webm", "ico",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrKind {
    /// The whole value is one reference.
    Reference,
    /// A hyperlink, an asset only when it points at a static file.
    Link,
    /// Comma-separated `url descriptor` candidates.
    SrcSet,
    /// CSS declarations that may contain `url(...)`.
    Style,
}

/// What the discovery pass found on a page.
#[derive(Debug, Default, Clone)]
pub struct Discovery {
    /// Every distinct asset URL referenced by the markup, in document order.
    pub candidates: IndexSet<Url>,
    /// `<link rel="stylesheet">` targets, in document order.
    pub stylesheets: Vec<Url>,
}

/// A parsed page. The tree is owned here and only mutated by [`Page::rewrite`].
pub struct Page {
    url: Url,
    dom: RcDom,
}

impl Page {
    pub fn parse(url: Url, html: &str) -> Self {
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
        Self { url, dom }
    }

    /// Collects every asset URL referenced from markup attributes, inline
    /// style attributes and `<style>` elements, plus the ordered stylesheet list.
    pub fn discover(&self) -> Discovery {
        let mut found = Discovery::default();
        let mut stylesheets = IndexSet::new();

        walk(&self.dom.document, &mut |node| match &node.data {
            NodeData::Element { name, attrs, .. } => {
                let tag = &*name.local;
                let attrs = attrs.borrow();
                let rel = attr_value(&attrs, "rel");

                for (attr, kind) in discovery_slots(tag, rel) {
                    if let Some(value) = attr_value(&attrs, attr) {
                        self.collect(value, kind, &mut found.candidates);
                    }
                }

                if tag == "link" && rel.is_some_and(is_stylesheet_rel) {
                    if let Some(href) = attr_value(&attrs, "href").and_then(|v| resolve_asset_url(&self.url, v)) {
                        stylesheets.insert(href);
                    }
                }

                if tag == "style" {
                    for child in node.children.borrow().iter() {
                        if let NodeData::Text { contents } = &child.data {
                            self.collect(&contents.borrow(), AttrKind::Style, &mut found.candidates);
                        }
                    }
                }
            }
            _ => {}
        });

        found.candidates.shift_remove(&self.url);
        found.stylesheets = stylesheets.into_iter().collect();
        found
    }

    fn collect(&self, value: &str, kind: AttrKind, into: &mut IndexSet<Url>) {
        match kind {
            AttrKind::Reference => into.extend(resolve_asset_url(&self.url, value)),
            AttrKind::Link => into.extend(resolve_asset_url(&self.url, value).filter(is_static_file)),
            AttrKind::SrcSet => into.extend(
                srcset_candidates(value)
                    .filter_map(|(reference, _)| resolve_asset_url(&self.url, reference)),
            ),
            AttrKind::Style => into.extend(scan_css_references(value, &self.url)),
        }
    }

    /// Points every reference that `lookup` knows a local name for at
    /// `assets/<name>`. Unknown references are left as they are.
    ///
    /// Covers `src` on any element, `href` on any `<link>` or `<a>`,
    /// `poster`, `srcset`, inline styles and `<style>` elements. Returns the number of
    /// attribute or text values changed.
    pub fn rewrite<F>(&self, lookup: F) -> usize
    where
        F: Fn(&Url) -> Option<String>,
    {
        let mut changed = 0;

        walk(&self.dom.document, &mut |node| {
            let NodeData::Element { name, attrs, .. } = &node.data else {
                return;
            };
            let tag = &*name.local;

            for attr in attrs.borrow_mut().iter_mut() {
                let Some(kind) = rewrite_kind(tag, &attr.name.local) else {
                    continue;
                };
                if let Some(updated) = self.rewrite_value(&attr.value, kind, &lookup) {
                    attr.value = StrTendril::from_slice(&updated);
                    changed += 1;
                }
            }

            if tag == "style" {
                for child in node.children.borrow().iter() {
                    if let NodeData::Text { contents } = &child.data {
                        let updated = self.rewrite_value(&contents.borrow(), AttrKind::Style, &lookup);
                        if let Some(updated) = updated {
                            *contents.borrow_mut() = StrTendril::from_slice(&updated);
                            changed += 1;
                        }
                    }
                }
            }
        });

        changed
    }

    fn rewrite_value<F>(&self, value: &str, kind: AttrKind, lookup: &F) -> Option<String>
    where
        F: Fn(&Url) -> Option<String>,
    {
        let local = |reference: &str| {
            resolve_asset_url(&self.url, reference)
                .and_then(|url| lookup(&url))
                .map(|name| local_href(&name, reference))
        };

        let updated = match kind {
            AttrKind::Reference | AttrKind::Link => local(value)?,
            AttrKind::SrcSet => srcset_candidates(value)
                .map(|(reference, descriptor)| {
                    let reference = local(reference).unwrap_or_else(|| reference.to_string());
                    match descriptor {
                        Some(descriptor) => format!("{reference} {descriptor}"),
                        None => reference,
                    }
                })
                .collect::<Vec<_>>()
                .join(", "),
            AttrKind::Style => rewrite_css(value, &self.url, lookup),
        };

        (updated != value).then_some(updated)
    }

    /// Serializes the (possibly rewritten) tree back to markup.
    pub fn to_html(&self) -> Result<String, CloneError> {
        let mut out = Vec::new();
        let document: SerializableHandle = self.dom.document.clone().into();
        serialize(&mut out, &document, SerializeOpts::default())
            .map_err(|e| CloneError::Parse(format!("failed to serialize page: {e}")))?;
        String::from_utf8(out).map_err(|e| CloneError::Parse(format!("serialized page is not UTF-8: {e}")))
    }
}

fn walk<V>(node: &Handle, visit: &mut V)
where
    V: FnMut(&Handle),
{
    visit(node);
    for child in node.children.borrow().iter() {
        walk(child, visit);
    }
}

fn attr_value<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|attr| &*attr.name.local == name)
        .map(|attr| &*attr.value)
}

fn rel_tokens(rel: &str) -> impl Iterator<Item = String> + '_ {
    rel.split_ascii_whitespace().map(str::to_ascii_lowercase)
}

fn is_stylesheet_rel(rel: &str) -> bool {
    rel_tokens(rel).any(|token| token == "stylesheet")
}

fn is_icon_rel(rel: &str) -> bool {
    rel_tokens(rel).any(|token| token.contains("icon"))
}

/// Attributes scanned during discovery for an element.
fn discovery_slots(tag: &str, rel: Option<&str>) -> Vec<(&'static str, AttrKind)> {
    let mut slots = vec![("style", AttrKind::Style)];
    if SRC_TAGS.contains(&tag) {
        slots.push(("src", AttrKind::Reference));
    }
    if tag == "link" && rel.is_some_and(|rel| is_stylesheet_rel(rel) || is_icon_rel(rel)) {
        slots.push(("href", AttrKind::Reference));
    }
    if tag == "video" {
        slots.push(("poster", AttrKind::Reference));
    }
    if matches!(tag, "img" | "source") {
        slots.push(("srcset", AttrKind::SrcSet));
    }
    if tag == "a" {
        slots.push(("href", AttrKind::Link));
    }
    slots
}

fn is_static_file(url: &Url) -> bool {
    let file = url.path_segments().and_then(|mut s| s.next_back()).unwrap_or_default();
    Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| STATIC_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Attributes considered by the rewrite pass. Broader than discovery: any
/// `src`, `<link href>` and `<a href>` is rewritten when the registry knows it.
fn rewrite_kind(tag: &str, attr: &str) -> Option<AttrKind> {
    match (tag, attr) {
        (_, "style") => Some(AttrKind::Style),
        (_, "src") => Some(AttrKind::Reference),
        ("link", "href") | ("video", "poster") => Some(AttrKind::Reference),
        ("a", "href") => Some(AttrKind::Link),
        ("img" | "source", "srcset") => Some(AttrKind::SrcSet),
        _ => None,
    }
}

/// Splits a `srcset` value into `(url, descriptor)` pairs.
fn srcset_candidates(srcset: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| match candidate.split_once(char::is_whitespace) {
            Some((url, descriptor)) => (url, Some(descriptor.trim())),
            None => (candidate, None),
        })
}
