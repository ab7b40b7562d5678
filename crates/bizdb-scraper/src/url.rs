//! Target URLs on the mobile place site.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

// Unreserved characters stay literal, everything else is escaped.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Map centre sent with every search; results are ranked by distance to it.
const SEARCH_X: &str = "126";
const SEARCH_Y: &str = "37";

#[derive(Debug, Clone)]
pub struct PlaceUrls {
    base_url: String,
}

impl PlaceUrls {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Restaurant list search for a free-text query.
    #[must_use]
    pub fn search(&self, query: &str) -> String {
        format!(
            "{}/restaurant/list?query={}&x={SEARCH_X}&y={SEARCH_Y}",
            self.base_url,
            utf8_percent_encode(query, QUERY)
        )
    }

    /// Address search, which embeds `PlaceSummary` entities in its state.
    #[must_use]
    pub fn address_search(&self, query: &str) -> String {
        format!(
            "{}/place/searchByAddress/addressPlace?query={}&x={SEARCH_X}&y={SEARCH_Y}",
            self.base_url,
            utf8_percent_encode(query, QUERY)
        )
    }

    #[must_use]
    pub fn detail(&self, place_id: &str) -> String {
        format!("{}/place/{place_id}", self.base_url)
    }

    /// Absolute form of a site-relative link; absolute links pass through.
    #[must_use]
    pub fn absolute(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_owned()
        } else if link.starts_with('/') {
            format!("{}{link}", self.base_url)
        } else {
            format!("{}/{link}", self.base_url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_encodes_hangul_and_spaces() {
        let urls = PlaceUrls::new("https://m.place.naver.com/");
        assert_eq!(
            urls.search("정담 손만두"),
            "https://m.place.naver.com/restaurant/list?query=%EC%A0%95%EB%8B%B4%20%EC%86%90%EB%A7%8C%EB%91%90&x=126&y=37"
        );
    }

    #[test]
    fn address_search_and_detail_urls() {
        let urls = PlaceUrls::new("https://m.place.naver.com");
        assert_eq!(
            urls.address_search("Teheran-ro 152"),
            "https://m.place.naver.com/place/searchByAddress/addressPlace?query=Teheran-ro%20152&x=126&y=37"
        );
        assert_eq!(urls.detail("1234"), "https://m.place.naver.com/place/1234");
    }

    #[test]
    fn absolute_joins_relative_links_once() {
        let urls = PlaceUrls::new("https://m.place.naver.com");
        assert_eq!(
            urls.absolute("/restaurant/1?entry=pll"),
            "https://m.place.naver.com/restaurant/1?entry=pll"
        );
        assert_eq!(
            urls.absolute("https://other.example/x"),
            "https://other.example/x"
        );
    }
}
