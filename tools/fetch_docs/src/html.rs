//! Extraction of the readable part of a documentation page.

use crate::DocsError;
use htmd::HtmlToMarkdown;

const MAIN_CONTENT_ID: &str = "mainContent";
const UNTITLED: &str = "Untitled Section";

/// Elements whose contents are text, not markup.
const RAW_TEXT: [&str; 2] = ["script", "style"];

/// The element of `page` whose id is `mainContent`, including its tags, if there is one. An
/// unterminated element runs to the end of the page.
pub(crate) fn main_content(page: &str) -> Option<&str> {
    let mut tags = Tags { page, pos: 0 };
    let (start, name) = tags.find_map(|tag| match tag {
        Tag::Open {
            start,
            name,
            attrs,
            self_closing: false,
        } if attributes(attrs)
            .iter()
            .any(|(key, value)| key.eq_ignore_ascii_case("id") && *value == MAIN_CONTENT_ID) =>
        {
            Some((start, name))
        }
        _ => None,
    })?;
    let mut depth = 1usize;
    for tag in tags {
        match tag {
            Tag::Open {
                name: other,
                self_closing: false,
                ..
            } if other.eq_ignore_ascii_case(name) => depth += 1,
            Tag::Close { name: other, end } if other.eq_ignore_ascii_case(name) => {
                depth -= 1;
                if depth == 0 {
                    return Some(&page[start..end]);
                }
            }
            _ => {}
        }
    }
    Some(&page[start..])
}

#[derive(Debug)]
enum Tag<'a> {
    Open {
        start: usize,
        name: &'a str,
        attrs: &'a str,
        self_closing: bool,
    },
    Close {
        name: &'a str,
        end: usize,
    },
}

/// The tags of a page in document order. Comments, doctypes and the bodies of raw-text
/// elements are skipped.
struct Tags<'a> {
    page: &'a str,
    pos: usize,
}

impl<'a> Iterator for Tags<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        let page = self.page;
        loop {
            let start = self.pos + page.get(self.pos..)?.find('<')?;
            let rest = &page[start..];
            if rest.starts_with("<!--") {
                self.pos = rest.find("-->").map_or(page.len(), |i| start + i + "-->".len());
                continue;
            }
            let close = rest.starts_with("</");
            let name_start = start + if close { 2 } else { 1 };
            let name_len = page[name_start..]
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(page.len() - name_start);
            if name_len == 0 {
                // A stray '<' in text, or a doctype.
                self.pos = start + 1;
                continue;
            }
            let name = &page[name_start..name_start + name_len];
            let attrs_start = name_start + name_len;
            let Some(gt) = tag_end(&page[attrs_start..]) else {
                self.pos = page.len();
                return None;
            };
            let attrs = &page[attrs_start..attrs_start + gt];
            let end = attrs_start + gt + 1;
            self.pos = end;
            if close {
                return Some(Tag::Close { name, end });
            }
            let self_closing = attrs.trim_end().ends_with('/');
            if !self_closing && RAW_TEXT.iter().any(|raw| raw.eq_ignore_ascii_case(name)) {
                self.pos = raw_text_end(page, end, name);
            }
            return Some(Tag::Open {
                start,
                name,
                attrs,
                self_closing,
            });
        }
    }
}

/// Offset of the `>` closing a tag, ignoring any inside quoted attribute values.
fn tag_end(attrs: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in attrs.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Where the closing tag of the raw-text element `name` whose body starts at `from` begins.
fn raw_text_end(page: &str, from: usize, name: &str) -> usize {
    let mut pos = from;
    while let Some(i) = page[pos..].find("</") {
        let at = pos + i + 2;
        if page
            .get(at..at + name.len())
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
        {
            return pos + i;
        }
        pos = at;
    }
    page.len()
}

/// The `(name, value)` pairs of a tag's attribute text. Attributes without a value have an
/// empty one.
fn attributes(attrs: &str) -> Vec<(&str, &str)> {
    let mut found = Vec::new();
    let mut rest = attrs;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '/');
        if rest.is_empty() {
            return found;
        }
        let name_len = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        rest = rest[name_len..].trim_start();
        let Some(value) = rest.strip_prefix('=') else {
            found.push((name, ""));
            continue;
        };
        let value = value.trim_start();
        let (value, remaining) = match value.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let quoted = &value[1..];
                match quoted.find(q) {
                    Some(i) => (&quoted[..i], &quoted[i + 1..]),
                    None => (quoted, ""),
                }
            }
            _ => {
                let i = value
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(value.len());
                (&value[..i], &value[i..])
            }
        };
        found.push((name, value));
        rest = remaining;
    }
}

/// Converts an HTML fragment to Markdown, dropping page chrome.
pub(crate) fn to_markdown(fragment: &str) -> Result<String, DocsError> {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "header", "footer"])
        .build();
    converter
        .convert(fragment)
        .map(|markdown| markdown.trim().to_string())
        .map_err(DocsError::Convert)
}

/// The first level-one heading of a Markdown document.
pub(crate) fn title(markdown: &str) -> &str {
    markdown
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(UNTITLED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_main_content() {
        let page = r#"<html><body><div class="nav">menu</div>
<div class="x" id="mainContent"><h1>Install</h1><div class="alert"><p>Note</p></div><p>Body</p></div>
<div>after</div></body></html>"#;
        let main = main_content(page).unwrap();
        assert!(main.starts_with(r#"<div class="x" id="mainContent">"#));
        assert!(main.ends_with("<p>Body</p></div>"));
        assert!(!main.contains("after"));
        assert_eq!(main_content("<div>no main</div>"), None);
    }

    #[test]
    fn markup_in_scripts_and_comments_is_not_counted() {
        let page = r#"<div id="mainContent"><!-- <div> left open -->
<script>document.write("<div>"); var end = "</div>";</script>
<STYLE>.x::after { content: "</div>"; }</STYLE>
<p>Body</p></div><div>after</div>"#;
        let main = main_content(page).unwrap();
        assert!(main.ends_with("<p>Body</p></div>"), "{main}");
        assert!(!main.contains("after"));
    }

    #[test]
    fn follows_the_element_carrying_the_id() {
        let page = r#"<main data-x='a>b' id='mainContent'><divider>x</divider><div><main>inner</main></div>
<h1>Title</h1></main><p>footer</p>"#;
        let main = main_content(page).unwrap();
        assert!(main.starts_with("<main data-x='a>b' id='mainContent'>"));
        assert!(main.ends_with("<h1>Title</h1></main>"), "{main}");

        // Only an id attribute counts, not text or other attributes that mention it.
        let page = r#"<p>id="mainContent"</p><div data-id="mainContent">no</div><div id=mainContent>yes</div>"#;
        assert_eq!(main_content(page), Some("<div id=mainContent>yes</div>"));

        assert_eq!(
            main_content(r#"<!DOCTYPE html><div id="mainContent"><p>cut off"#),
            Some(r#"<div id="mainContent"><p>cut off"#)
        );
    }

    #[test]
    fn parses_attributes() {
        assert_eq!(
            attributes(r#" class="a b" hidden id = 'x' data-n=3 /"#),
            [("class", "a b"), ("hidden", ""), ("id", "x"), ("data-n", "3")]
        );
    }

    #[test]
    fn markdown_title() {
        assert_eq!(title("intro\n# Installing on Python \n## Setup"), "Installing on Python");
        assert_eq!(title("## Only a subheading"), UNTITLED);
    }

    #[test]
    fn converts_and_skips_chrome() {
        let markdown = to_markdown(
            "<div><nav>Tabs</nav><h1>Title</h1><script>var x;</script><p>Add the layer.</p></div>",
        )
        .unwrap();
        assert!(markdown.contains("# Title"));
        assert!(markdown.contains("Add the layer."));
        assert!(!markdown.contains("Tabs"));
        assert!(!markdown.contains("var x"));
    }
}
