//! Markup helpers for the mobile place pages: structural markers, list-page
//! candidate links, detail-page tabs and labelled info rows.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

use crate::error::ScraperError;

/// Present once a search result list has rendered.
pub const LIST_READY: &str = "div.place_business_list_wrapper";
/// Banner shown when a search returns no places.
pub const EMPTY_RESULT: &str = "div.FYvSc";
/// Present once a place detail page has rendered.
pub const DETAIL_READY: &str = "div.place_fixed_maintab";
/// Readiness marker for the address-search page, which has no list wrapper.
pub const ADDRESS_READY: &str = "header";

const LIST_LINKS: &str = "div.place_business_list_wrapper > ul > li a[href]";
const TAB_LINKS: &str = "div.place_fixed_maintab a[href]";
const TITLE: &str = "div.zD5Nm > div#_title";
const INFO_ROWS: &str = "div.PIbes > div.O8qbU";
const INFO_LABEL: &str = "strong > span.place_blind";
const INFO_VALUE: &str = "div.vV_z_";

const EMPTY_RESULT_TEXT: &str = "조건에 맞는 업체가 없습니다";

static PLACE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(?:restaurant|place)/(\d+)").expect("valid regex"));

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, ScraperError> {
    Selector::parse(selector).map_err(|_| ScraperError::InvalidSelector {
        selector: selector.to_owned(),
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index of the first selector in `selectors` that matches `html`.
///
/// # Errors
///
/// Returns [`ScraperError::InvalidSelector`] if a selector does not parse.
pub fn first_match(html: &str, selectors: &[&str]) -> Result<Option<usize>, ScraperError> {
    let document = Html::parse_document(html);
    for (i, raw) in selectors.iter().enumerate() {
        let selector = parse_selector(raw)?;
        if document.select(&selector).next().is_some() {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// Text a user would see: everything outside `<script>`, `<style>` and
/// `<noscript>`, whitespace-joined.
#[must_use]
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        let trimmed = text.trim();
        if !hidden && !trimmed.is_empty() {
            parts.push(trimmed.to_owned());
        }
    }
    parts.join(" ")
}

/// Place links on a search-result list, cut to `/restaurant/{id}` and
/// deduplicated, in page order.
#[must_use]
pub fn list_candidate_links(html: &str) -> Vec<String> {
    static LINKS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(LIST_LINKS).expect("valid selector"));

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| PLACE_LINK_RE.find(href.trim()))
        .map(|m| m.as_str().to_owned())
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// Numeric place id in a `/restaurant/{id}` or `/place/{id}` link.
#[must_use]
pub fn place_id_from_link(link: &str) -> Option<String> {
    let path = link
        .split_once("://")
        .and_then(|(_, rest)| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or(link);
    PLACE_LINK_RE
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Whether a list page says the search found nothing. Real result links
/// always win over the banner, and the banner text only counts when it is
/// visible.
#[must_use]
pub fn is_empty_result(html: &str) -> bool {
    static EMPTY: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(EMPTY_RESULT).expect("valid selector"));

    if !list_candidate_links(html).is_empty() {
        return false;
    }
    let document = Html::parse_document(html);
    document.select(&EMPTY).next().is_some() || visible_text(html).contains(EMPTY_RESULT_TEXT)
}

/// Links of the fixed tab bar on a detail page; blanks and `#` anchors dropped.
#[must_use]
pub fn tab_links(html: &str) -> Vec<String> {
    static TABS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(TAB_LINKS).expect("valid selector"));

    let document = Html::parse_document(html);
    document
        .select(&TABS)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Title and labelled info rows of a detail page.
///
/// Known labels map to `address`, `phone`, `status`/`hours` and `homepages`;
/// any other label is kept verbatim with the row's text as value.
#[must_use]
pub fn place_info(html: &str) -> Map<String, Value> {
    static SELECTORS: LazyLock<[Selector; 4]> = LazyLock::new(|| {
        [TITLE, INFO_ROWS, INFO_LABEL, INFO_VALUE]
            .map(|s| Selector::parse(s).expect("valid selector"))
    });
    let [title_sel, rows_sel, label_sel, value_sel] = &*SELECTORS;

    let document = Html::parse_document(html);
    let mut info = Map::new();

    if let Some(title) = document.select(title_sel).next() {
        info.insert("title".to_owned(), Value::String(text_of(title)));
    }

    for row in document.select(rows_sel) {
        let (Some(label), Some(value)) = (
            row.select(label_sel).next(),
            row.select(value_sel).next(),
        ) else {
            continue;
        };
        let label = text_of(label);
        match label.as_str() {
            "주소" => {
                info.insert("address".to_owned(), first_text(value, "span.LDgIH"));
            }
            "전화번호" => {
                info.insert("phone".to_owned(), first_text(value, "span.xlx7Q"));
            }
            "영업시간" => {
                info.insert("status".to_owned(), first_text(value, "em"));
                info.insert("hours".to_owned(), first_text(value, "time"));
            }
            "홈페이지" => {
                let links = Selector::parse("a.place_bluelink")
                    .map(|sel| {
                        value
                            .select(&sel)
                            .filter_map(|a| a.value().attr("href"))
                            .map(|href| Value::String(href.to_owned()))
                            .collect()
                    })
                    .unwrap_or_default();
                info.insert("homepages".to_owned(), Value::Array(links));
            }
            _ => {
                info.insert(label, Value::String(text_of(value)));
            }
        }
    }

    info
}

fn first_text(scope: ElementRef<'_>, selector: &str) -> Value {
    Selector::parse(selector)
        .ok()
        .and_then(|sel| scope.select(&sel).next())
        .map(text_of)
        .filter(|t| !t.is_empty())
        .map_or(Value::Null, Value::String)
}

#[cfg(test)]
#[path = "page_test.rs"]
mod tests;
