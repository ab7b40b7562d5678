//! Fields read from a place detail page.

use bizdb_scraper::{page, EmbeddedStateExtractor, Extractor};
use serde_json::{Map, Value};

const PLACE_DETAIL_PREFIX: &str = "PlaceDetailBase:";

/// `(state field, place_info key)` pairs copied from the embedded detail entity.
const STATE_FIELDS: &[(&str, &str)] = &[
    ("name", "title"),
    ("roadAddress", "address"),
    ("phone", "phone"),
];

/// Info rows and tab links of a detail page.
///
/// When the page embeds a `PlaceDetailBase` entity its name, road address,
/// phone and coordinates replace whatever the DOM rows said.
pub(crate) fn detail_fields(html: &str) -> (Map<String, Value>, Vec<String>) {
    let mut info = page::place_info(html);

    let state = EmbeddedStateExtractor::apollo()
        .with_type_prefix(PLACE_DETAIL_PREFIX)
        .extract(html);
    if let Some(entity) = state.entities.first() {
        overlay_state(&mut info, &entity.value);
    } else if state.blocks_found > state.blocks_parsed {
        tracing::debug!("detail state present but unparseable; keeping page text");
    }

    (info, page::tab_links(html))
}

fn overlay_state(info: &mut Map<String, Value>, entity: &Value) {
    for (from, to) in STATE_FIELDS {
        if let Some(text) = entity
            .get(*from)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            info.insert((*to).to_owned(), Value::String(text.to_owned()));
        }
    }
    if let Some(coordinate) = entity.get("coordinate").filter(|c| c.is_object()) {
        info.insert("coordinate".to_owned(), coordinate.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &str = r#"
<html><body>
  <div class="zD5Nm"><div id="_title"><span>Seoul BBQ</span></div></div>
  <div class="place_fixed_maintab"><a href="/restaurant/1234/home">Home</a></div>
  <div class="PIbes">
    <div class="O8qbU"><strong><span class="place_blind">전화번호</span></strong>
      <div class="vV_z_"><span class="xlx7Q">02-000-0000</span></div></div>
  </div>
  STATE
</body></html>
"#;

    #[test]
    fn page_rows_used_without_state() {
        let (info, tabs) = detail_fields(&DETAIL.replace("STATE", ""));
        assert_eq!(info["title"], "Seoul BBQ");
        assert_eq!(info["phone"], "02-000-0000");
        assert_eq!(tabs, vec!["/restaurant/1234/home"]);
    }

    #[test]
    fn embedded_entity_wins_over_page_rows() {
        let script = r#"<script>window.__APOLLO_STATE__ = {"PlaceDetailBase:1234": {"id": "1234", "name": "Seoul BBQ Gangnam", "roadAddress": "서울 강남구 테헤란로 152", "phone": "02-123-4567", "coordinate": {"x": "127.03", "y": "37.50"}}, "ROOT_QUERY": {}};</script>"#;
        let (info, _) = detail_fields(&DETAIL.replace("STATE", script));
        assert_eq!(info["title"], "Seoul BBQ Gangnam");
        assert_eq!(info["address"], "서울 강남구 테헤란로 152");
        assert_eq!(info["phone"], "02-123-4567");
        assert_eq!(info["coordinate"]["x"], "127.03");
    }

    #[test]
    fn blank_state_fields_do_not_erase_rows() {
        let script = r#"<script>window.__APOLLO_STATE__ = {"PlaceDetailBase:1234": {"name": "", "phone": null}};</script>"#;
        let (info, _) = detail_fields(&DETAIL.replace("STATE", script));
        assert_eq!(info["title"], "Seoul BBQ");
        assert_eq!(info["phone"], "02-000-0000");
    }

    #[test]
    fn malformed_state_keeps_page_rows() {
        let script = r#"<script>window.__APOLLO_STATE__ = {"PlaceDetailBase:1": {"name": </script>"#;
        let (info, _) = detail_fields(&DETAIL.replace("STATE", script));
        assert_eq!(info["title"], "Seoul BBQ");
    }
}
