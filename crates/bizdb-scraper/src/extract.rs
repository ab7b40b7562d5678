//! Recovery of client-side hydration state from rendered page markup.
//!
//! Place pages serialize their data store into `<script>` blocks in one of
//! two shapes:
//!
//! - a one-shot assignment, `window.__APOLLO_STATE__ = {...};`, whose
//!   top-level keys are entity ids of the form `Type:id`;
//! - incremental streaming blocks, `window.__RQ_STREAMING_STATE__.push({...})`,
//!   each carrying `queries[].state.data.items[]`.
//!
//! Extraction is pure and never fails: a missing marker, a marker with no
//! literal, or a literal that does not parse all degrade to fewer entities.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>(.*?)</script>").expect("valid regex"));

pub const APOLLO_STATE_GLOBAL: &str = "window.__APOLLO_STATE__";
pub const STREAMING_STATE_GLOBAL: &str = "window.__RQ_STREAMING_STATE__";

/// One entity recovered from embedded state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntity {
    /// `Type:id`, e.g. `PlaceSummary:1234`.
    pub key: String,
    pub type_name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<StateEntity>,
    /// State literals located in the markup.
    pub blocks_found: usize,
    /// Literals that parsed as JSON.
    pub blocks_parsed: usize,
}

impl Extraction {
    #[must_use]
    pub fn first(&self, type_name: &str) -> Option<&StateEntity> {
        self.entities.iter().find(|e| e.type_name == type_name)
    }

    pub fn of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a StateEntity> {
        self.entities.iter().filter(move |e| e.type_name == type_name)
    }
}

/// Anything that can turn page markup into state entities.
pub trait Extractor {
    fn extract(&self, markup: &str) -> Extraction;
}

/// How the state global is written in the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMarker {
    /// `{global} = {...};`
    Assignment(String),
    /// `{global}.push({...})`, possibly repeated.
    Push(String),
}

impl StateMarker {
    fn global(&self) -> &str {
        match self {
            StateMarker::Assignment(g) | StateMarker::Push(g) => g,
        }
    }
}

/// How the object literal is cut out of the script text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiteralStrategy {
    /// Lazy match up to the statement terminator.
    Regex,
    /// Delimiter scan that respects strings and nesting.
    #[default]
    Balanced,
}

#[derive(Debug, Clone)]
pub struct EmbeddedStateExtractor {
    marker: StateMarker,
    strategy: LiteralStrategy,
    type_prefix: Option<String>,
    anchor: Regex,
    terminated: Regex,
}

impl EmbeddedStateExtractor {
    #[must_use]
    pub fn new(marker: StateMarker, strategy: LiteralStrategy) -> Self {
        let global = regex::escape(marker.global());
        let (anchor, terminated) = match marker {
            StateMarker::Assignment(_) => (
                format!(r"{global}\s*=\s*"),
                format!(r"(?s){global}\s*=\s*(\{{.*?\}})\s*;"),
            ),
            StateMarker::Push(_) => (
                format!(r"{global}\s*\.\s*push\s*\(\s*"),
                format!(r"(?s){global}\s*\.\s*push\s*\(\s*(\{{.*?\}})\s*\)"),
            ),
        };
        Self {
            marker,
            strategy,
            type_prefix: None,
            anchor: Regex::new(&anchor).expect("escaped global is a valid regex"),
            terminated: Regex::new(&terminated).expect("escaped global is a valid regex"),
        }
    }

    /// Extractor for the one-shot Apollo store.
    #[must_use]
    pub fn apollo() -> Self {
        Self::new(
            StateMarker::Assignment(APOLLO_STATE_GLOBAL.to_owned()),
            LiteralStrategy::default(),
        )
    }

    /// Extractor for incremental streaming blocks.
    #[must_use]
    pub fn streaming() -> Self {
        Self::new(
            StateMarker::Push(STREAMING_STATE_GLOBAL.to_owned()),
            LiteralStrategy::default(),
        )
    }

    /// Keep only entities whose key starts with `prefix` (e.g. `"PlaceSummary:"`).
    #[must_use]
    pub fn with_type_prefix(mut self, prefix: &str) -> Self {
        self.type_prefix = Some(prefix.to_owned());
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: LiteralStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn literals<'a>(&self, script: &'a str) -> Vec<&'a str> {
        match self.strategy {
            LiteralStrategy::Regex => self
                .terminated
                .captures_iter(script)
                .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
                .collect(),
            LiteralStrategy::Balanced => self
                .anchor
                .find_iter(script)
                .filter_map(|m| extract_balanced_object(&script[m.end()..]))
                .collect(),
        }
    }

    /// `streamed` counts streaming items across every block of the page and
    /// names items that carry no id of their own.
    fn entities_of(&self, block: Value, out: &mut Vec<StateEntity>, streamed: &mut usize) {
        match self.marker {
            StateMarker::Assignment(_) => {
                let Value::Object(map) = block else {
                    return;
                };
                for (key, value) in map {
                    if !value.is_object() {
                        continue;
                    }
                    let type_name = key.split(':').next().unwrap_or_default().to_owned();
                    out.push(StateEntity {
                        key,
                        type_name,
                        value,
                    });
                }
            }
            StateMarker::Push(_) => {
                let Some(queries) = block.get("queries").and_then(Value::as_array) else {
                    return;
                };
                for query in queries {
                    let Some(items) = query
                        .pointer("/state/data/items")
                        .and_then(Value::as_array)
                    else {
                        continue;
                    };
                    for item in items.iter().filter(|i| i.is_object()) {
                        out.push(streaming_entity(item, *streamed));
                        *streamed += 1;
                    }
                }
            }
        }
    }

    fn keep(&self, entity: &StateEntity) -> bool {
        self.type_prefix
            .as_deref()
            .is_none_or(|prefix| entity.key.starts_with(prefix))
    }
}

impl Extractor for EmbeddedStateExtractor {
    fn extract(&self, markup: &str) -> Extraction {
        let mut extraction = Extraction::default();
        let global = self.marker.global();
        let mut streamed = 0;

        for cap in SCRIPT_RE.captures_iter(markup) {
            let Some(script) = cap.get(1).map(|m| m.as_str()) else {
                continue;
            };
            if !script.contains(global) {
                continue;
            }

            let literals = self.literals(script);
            if literals.is_empty() {
                tracing::debug!(global, "state marker present without a literal");
            }

            for literal in literals {
                extraction.blocks_found += 1;
                let block: Value = match serde_json::from_str(literal) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(
                            global,
                            block = extraction.blocks_found,
                            error = %err,
                            "skipping unparseable state block"
                        );
                        continue;
                    }
                };
                extraction.blocks_parsed += 1;

                let mut entities = Vec::new();
                self.entities_of(block, &mut entities, &mut streamed);
                extraction
                    .entities
                    .extend(entities.into_iter().filter(|e| self.keep(e)));
            }
        }

        tracing::debug!(
            global,
            blocks_found = extraction.blocks_found,
            blocks_parsed = extraction.blocks_parsed,
            entities = extraction.entities.len(),
            "embedded state extracted"
        );
        extraction
    }
}

fn streaming_entity(item: &Value, position: usize) -> StateEntity {
    let type_name = item
        .get("__typename")
        .and_then(Value::as_str)
        .unwrap_or("Item")
        .to_owned();
    let id = match item.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => position.to_string(),
    };
    StateEntity {
        key: format!("{type_name}:{id}"),
        type_name,
        value: item.clone(),
    }
}

/// Cut a balanced JSON object off the start of `s`.
///
/// Tracks nesting depth outside string literals and honours escapes.
/// Returns `None` when `s` does not start with `{` or the object never
/// closes.
pub(crate) fn extract_balanced_object(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape = false;
    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            ']' => depth -= 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[path = "extract_test.rs"]
mod tests;
