//! RSS/Atom extraction over an event-driven XML reader.
//!
//! Hardened for untrusted input: oversize documents are rejected before
//! parsing, element depth is bounded, external entities are never resolved
//! (the reader does not expand them), and any malformed document yields an
//! empty item list so a broken feed degrades that source to zero instead of
//! aborting the pipeline.

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use crate::config::FeedKind;
use crate::models::ParsedItem;

/// Inputs larger than this are rejected before parsing.
pub const MAX_FEED_BYTES: usize = 10 * 1024 * 1024;
/// Maximum nested element depth tolerated.
pub const MAX_ELEMENT_DEPTH: usize = 1000;

/// Parse feed bytes of the declared kind into ordered items. Infallible by
/// design: every failure mode returns an empty list.
pub fn parse_feed(kind: FeedKind, data: &[u8]) -> Vec<ParsedItem> {
    if data.is_empty() {
        return Vec::new();
    }
    if data.len() > MAX_FEED_BYTES {
        warn!(bytes = data.len(), "feed exceeds size cap, skipping");
        return Vec::new();
    }

    let result = match kind {
        FeedKind::Rss => parse_items(data, b"item", b"description", b"pubDate", false),
        FeedKind::Atom => parse_items(data, b"entry", b"summary", b"updated", true),
    };

    match result {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "feed parse failed, treating as empty");
            Vec::new()
        }
    }
}

/// Shared extraction loop. RSS matches qualified names (so `media:title`
/// does not shadow `title`); Atom matches local names to tolerate prefixed
/// documents, with `content`/`published` as fallbacks for
/// `summary`/`updated`.
fn parse_items(
    data: &[u8],
    item_tag: &[u8],
    summary_tag: &[u8],
    date_tag: &[u8],
    atom: bool,
) -> Result<Vec<ParsedItem>, quick_xml::Error> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut in_item = false;

    let mut title = String::new();
    let mut summary = String::new();
    let mut summary_fallback = String::new();
    let mut date = String::new();
    let mut date_fallback = String::new();

    let mut current: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                if depth > MAX_ELEMENT_DEPTH {
                    warn!("feed exceeds element depth bound, skipping");
                    return Ok(Vec::new());
                }

                let name = e.name();
                let tag: &[u8] = if atom { name.local_name().into_inner() } else { name.as_ref() };

                if tag == item_tag {
                    in_item = true;
                    title.clear();
                    summary.clear();
                    summary_fallback.clear();
                    date.clear();
                    date_fallback.clear();
                } else if in_item {
                    current = if tag == b"title" {
                        Some(Field::Title)
                    } else if tag == summary_tag {
                        Some(Field::Summary)
                    } else if atom && tag == b"content" {
                        Some(Field::SummaryFallback)
                    } else if tag == date_tag {
                        Some(Field::Date)
                    } else if atom && tag == b"published" {
                        Some(Field::DateFallback)
                    } else {
                        None
                    };
                }
            }
            Event::Text(e) => {
                if let Some(field) = current {
                    let text = e.unescape().unwrap_or_default();
                    field
                        .target(&mut title, &mut summary, &mut summary_fallback, &mut date, &mut date_fallback)
                        .push_str(text.as_ref());
                }
            }
            Event::CData(e) => {
                if let Some(field) = current {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    field
                        .target(&mut title, &mut summary, &mut summary_fallback, &mut date, &mut date_fallback)
                        .push_str(&text);
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                let name = e.name();
                let tag: &[u8] = if atom { name.local_name().into_inner() } else { name.as_ref() };

                if tag == item_tag && in_item {
                    in_item = false;
                    let summary_value = if summary.is_empty() {
                        summary_fallback.clone()
                    } else {
                        summary.clone()
                    };
                    let date_value = if date.is_empty() {
                        date_fallback.clone()
                    } else {
                        date.clone()
                    };
                    items.push(ParsedItem {
                        title: title.trim().to_string(),
                        summary: summary_value.trim().to_string(),
                        published_raw: date_value.trim().to_string(),
                    });
                }
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Summary,
    SummaryFallback,
    Date,
    DateFallback,
}

impl Field {
    fn target<'a>(
        self,
        title: &'a mut String,
        summary: &'a mut String,
        summary_fallback: &'a mut String,
        date: &'a mut String,
        date_fallback: &'a mut String,
    ) -> &'a mut String {
        match self {
            Field::Title => title,
            Field::Summary => summary,
            Field::SummaryFallback => summary_fallback,
            Field::Date => date,
            Field::DateFallback => date_fallback,
        }
    }
}
