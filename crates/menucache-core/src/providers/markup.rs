//! Low-level HTML scanning helpers for the legacy calendar page.
//!
//! Deliberately naive: a regex tokenizer over start/end tags plus
//! depth matching on tag names. Enough for the calendar's markup, which is
//! machine generated and well nested.

use std::sync::OnceLock;

use regex::Regex;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(/?)([A-Za-z][A-Za-z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#)
            .expect("valid tag regex")
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("valid attribute regex")
    })
}

/// One start or end tag in a document.
#[derive(Debug, Clone)]
pub struct Tag<'a> {
    /// Lowercased tag name.
    pub name: String,
    pub attrs: &'a str,
    /// Byte offset of `<`.
    pub start: usize,
    /// Byte offset just past `>`.
    pub end: usize,
    pub closing: bool,
    pub self_closing: bool,
}

impl<'a> Tag<'a> {
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        attr(self.attrs, name)
    }

    pub fn classes(&self) -> Vec<&'a str> {
        self.attr("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().iter().any(|c| c.eq_ignore_ascii_case(class))
    }

    pub fn is_open(&self) -> bool {
        !self.closing && !self.self_closing
    }
}

/// All tags in document order.
pub fn tags(html: &str) -> Vec<Tag<'_>> {
    tag_regex()
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Tag {
                name: caps.get(2)?.as_str().to_ascii_lowercase(),
                attrs: caps.get(3).map(|m| m.as_str()).unwrap_or(""),
                start: whole.start(),
                end: whole.end(),
                closing: !caps.get(1).map(|m| m.as_str()).unwrap_or("").is_empty(),
                self_closing: !caps.get(4).map(|m| m.as_str()).unwrap_or("").is_empty(),
            })
        })
        .collect()
}

/// Value of attribute `name` (case-insensitive) inside a tag's attribute text.
pub fn attr<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    attr_regex().captures_iter(attrs).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
    })
}

/// Index of the tag that closes `tags[open]`, matching nested tags of the
/// same name. `None` if the document ends first.
pub fn closing_index(tags: &[Tag<'_>], open: usize) -> Option<usize> {
    let name = &tags.get(open)?.name;
    let mut depth = 0usize;
    for (i, tag) in tags.iter().enumerate().skip(open + 1) {
        if &tag.name != name {
            continue;
        }
        if tag.closing {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
        } else if !tag.self_closing {
            depth += 1;
        }
    }
    None
}

/// Byte range of the content between `tags[open]` and its closing tag.
/// Unclosed elements run to `limit`.
pub fn inner_range(tags: &[Tag<'_>], open: usize, limit: usize) -> (usize, usize) {
    let start = tags[open].end;
    let end = closing_index(tags, open)
        .map(|i| tags[i].start)
        .unwrap_or(limit)
        .min(limit);
    (start, end.max(start))
}

/// Remove all HTML tags `<...>` from the string, then collapse whitespace.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    normalize_ws(&normalize_entities(&out))
}

/// Minimal entity decoding for the entities the calendar emits.
pub fn normalize_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace('\u{a0}', " ")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Collapse sequences of whitespace into a single space and trim.
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
