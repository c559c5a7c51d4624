//! Markdown to sanitized HTML, with citation links resolved to in-page anchors

use oracle_wire::{Source, Turn};
use pulldown_cmark::{BrokenLink, CowStr, Event, LinkType, Options, Parser, Tag, TagEnd};
use pulldown_cmark_escape::{escape_href, escape_html};

/// CSS class carried by every citation link
pub const CITATION_CLASS: &str = "citation_link";

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Render markdown as sanitized HTML.
///
/// Raw HTML in the input is escaped, links with unsafe schemes lose their
/// target, and citation links (`[2](...)` or a bare `[2]`) point at
/// `#citation_2`.
pub fn render_markdown(text: &str) -> String {
    render_answer(text, &[])
}

/// Render an assistant answer; citation links get the matching source's
/// excerpt as their title.
pub fn render_answer(text: &str, sources: &[Source]) -> String {
    // Bare `[n]` has no definition; resolve it to the citation anchor
    let mut callback = |link: BrokenLink| {
        citation_ordinal(&link.reference)
            .map(|n| (CowStr::from(citation_href(n)), CowStr::from("")))
    };
    let parser = Parser::new_with_broken_link_callback(text, options(), Some(&mut callback));

    let events = sanitize(parser, sources);

    let mut html = String::with_capacity(text.len() + text.len() / 2);
    pulldown_cmark::html::push_html(&mut html, events.into_iter());
    html
}

/// Render the source list: one anchor target per source, in arrival order.
pub fn render_sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut html = String::from("<ol class=\"sources\">\n");
    for source in sources {
        let label = escape(&source.citation);
        html.push_str(&format!("<li id=\"{}\">", escape(&source.anchor())));
        if is_safe_url(&source.url) {
            html.push_str(&format!(
                "<a href=\"{}\" title=\"{}\">{}</a>",
                escape_url(&source.url),
                escape(&source.origin_text),
                label
            ));
        } else {
            html.push_str(&label);
        }
        html.push_str("</li>\n");
    }
    html.push_str("</ol>\n");
    html
}

/// Render a whole transcript
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut html = String::new();
    for turn in turns {
        match turn {
            Turn::User(text) => {
                html.push_str("<div class=\"user_turn\">\n<p>");
                html.push_str(&escape(text));
                html.push_str("</p>\n</div>\n");
            }
            Turn::Assistant(text, sources) => {
                html.push_str("<div class=\"assistant_turn\">\n");
                html.push_str(&render_answer(text, sources));
                html.push_str(&render_sources(sources));
                html.push_str("</div>\n");
            }
        }
    }
    html
}

fn options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Escape raw HTML and rewrite links. Generated citation anchors are the only
/// HTML events that survive.
fn sanitize<'a>(parser: impl Iterator<Item = Event<'a>>, sources: &[Source]) -> Vec<Event<'a>> {
    let mut out = Vec::new();
    // Open links and images, innermost last, with the events seen inside them
    let mut pending: Vec<(Tag<'a>, Vec<Event<'a>>)> = Vec::new();

    for event in parser {
        let event = match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        };

        match event {
            Event::Start(tag @ (Tag::Link { .. } | Tag::Image { .. })) => {
                pending.push((tag, Vec::new()));
            }
            Event::End(TagEnd::Link | TagEnd::Image) => {
                if let Some((tag, inner)) = pending.pop() {
                    let target = match pending.last_mut() {
                        Some((_, parent)) => parent,
                        None => &mut out,
                    };
                    finish_link(tag, inner, sources, target);
                }
            }
            other => match pending.last_mut() {
                Some((_, inner)) => inner.push(other),
                None => out.push(other),
            },
        }
    }

    // Unterminated links: keep their contents
    for (_, inner) in pending {
        out.extend(inner);
    }
    out
}

fn finish_link<'a>(
    tag: Tag<'a>,
    inner: Vec<Event<'a>>,
    sources: &[Source],
    out: &mut Vec<Event<'a>>,
) {
    match tag {
        Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        } => {
            if let Some(n) = citation_ordinal(&plain_text(&inner)) {
                let title = if title.is_empty() {
                    source_title(sources, n)
                } else {
                    title.to_string()
                };
                out.push(Event::InlineHtml(citation_anchor(n, &title).into()));

                // `[1][2]` parses as one reference link: text `1`, label `2`
                if link_type == LinkType::ReferenceUnknown {
                    if let Some(m) = citation_ordinal(&id) {
                        let title = source_title(sources, m);
                        out.push(Event::InlineHtml(citation_anchor(m, &title).into()));
                    }
                }
            } else if is_safe_url(&dest_url) {
                out.push(Event::Start(Tag::Link {
                    link_type,
                    dest_url,
                    title,
                    id,
                }));
                out.extend(inner);
                out.push(Event::End(TagEnd::Link));
            } else {
                tracing::debug!("Dropping link with unsafe target: {}", dest_url);
                out.extend(inner);
            }
        }
        Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        } => {
            if is_safe_url(&dest_url) {
                out.push(Event::Start(Tag::Image {
                    link_type,
                    dest_url,
                    title,
                    id,
                }));
                out.extend(inner);
                out.push(Event::End(TagEnd::Image));
            } else {
                tracing::debug!("Dropping image with unsafe source: {}", dest_url);
                out.extend(inner);
            }
        }
        _ => out.extend(inner),
    }
}

fn plain_text(events: &[Event<'_>]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Text(t) | Event::Code(t) => Some(t.as_ref()),
            _ => None,
        })
        .collect()
}

fn citation_ordinal(text: &str) -> Option<usize> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn citation_href(n: usize) -> String {
    format!("#citation_{}", n)
}

fn citation_anchor(n: usize, title: &str) -> String {
    if title.is_empty() {
        format!(
            "<a href=\"{}\" class=\"{}\">{}</a>",
            citation_href(n),
            CITATION_CLASS,
            n
        )
    } else {
        format!(
            "<a href=\"{}\" class=\"{}\" title=\"{}\">{}</a>",
            citation_href(n),
            CITATION_CLASS,
            escape(title),
            n
        )
    }
}

fn source_title(sources: &[Source], ordinal: usize) -> String {
    sources
        .iter()
        .find(|s| s.ordinal == ordinal)
        .map(|s| s.origin_text.clone())
        .unwrap_or_default()
}

/// Relative URLs and fragments are safe; absolute ones need an allowed scheme.
fn is_safe_url(url: &str) -> bool {
    let url = url.trim();
    let scheme_end = match url.find(':') {
        Some(i) => i,
        None => return true,
    };
    if url[..scheme_end].contains(['/', '?', '#']) {
        return true;
    }
    let scheme = url[..scheme_end].to_ascii_lowercase();
    SAFE_SCHEMES.contains(&scheme.as_str())
}

/// Escape text for an element body or a quoted attribute
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing to a String cannot fail
    let _ = escape_html(&mut out, text);
    out
}

fn escape_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let _ = escape_href(&mut out, url);
    out
}
