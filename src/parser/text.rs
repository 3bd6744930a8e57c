use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Node};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2",
    "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section", "table", "tr",
    "ul",
];

/// Elements whose content is never rendered as text.
const HIDDEN_TAGS: &[&str] = &["noscript", "script", "style", "template"];

/// Collapse runs of whitespace and trim.
pub fn squash(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Inline text of an element on one line; `None` when empty.
pub fn inline_text(el: ElementRef<'_>) -> Option<String> {
    let text = squash(&el.text().collect::<Vec<_>>().join(" "));
    (!text.is_empty()).then_some(text)
}

/// Visible text of an element with one line per block element, roughly what
/// a browser's innerText gives.
pub fn block_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(el, &mut raw);

    raw.lines()
        .map(squash)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// A block element breaks the line where it opens and where it closes.
fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(&WHITESPACE.replace_all(t, " ")),
            Node::Element(e) if HIDDEN_TAGS.contains(&e.name()) => {}
            Node::Element(e) => {
                let block = BLOCK_TAGS.contains(&e.name());
                if block {
                    out.push('\n');
                }
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}
