//! Pagination parameters and envelope links.

use serde_json::{json, Map, Value};

use crate::config::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
}

impl PageParams {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// Reads `page` and `limit` from the query. Non-numeric or non-positive
/// input keeps the default; the limit is capped by the configured ceiling.
pub fn page_params(params: &[(String, String)], default_limit: i64) -> PageParams {
    let read = |name: &str| -> Option<i64> {
        params
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.parse().ok())
            .filter(|n| *n > 0)
    };
    let mut limit = read("limit").unwrap_or(default_limit);
    if let Some(max) = config().api.max_limit {
        limit = limit.min(max);
    }
    PageParams {
        page: read("page").unwrap_or(1),
        limit,
    }
}

/// Rebuilds the request link with `page` swapped out; every other
/// parameter is carried through re-encoded.
fn page_link(path: &str, params: &[(String, String)], page: i64) -> String {
    let mut encoder = url::form_urlencoded::Serializer::new(String::new());
    let mut seen_page = false;
    for (key, value) in params {
        if key == "page" {
            encoder.append_pair("page", &page.to_string());
            seen_page = true;
        } else {
            encoder.append_pair(key, value);
        }
    }
    if !seen_page {
        encoder.append_pair("page", &page.to_string());
    }
    format!("{}?{}", path, encoder.finish())
}

/// Collection envelope metadata: `next` is always present, `previous`
/// only past the first page.
pub fn meta(path: &str, params: &[(String, String)], page: PageParams) -> Value {
    let mut out = Map::new();
    out.insert("page".to_string(), json!(page.page));
    out.insert("limit".to_string(), json!(page.limit));
    out.insert(
        "next".to_string(),
        json!(page_link(path, params, page.page + 1)),
    );
    if page.page > 1 {
        out.insert(
            "previous".to_string(),
            json!(page_link(path, params, page.page - 1)),
        );
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn junk_input_keeps_defaults() {
        let p = page_params(&params(&[("page", "abc"), ("limit", "-5")]), 25);
        assert_eq!(p, PageParams { page: 1, limit: 25 });
    }

    #[test]
    fn limit_is_capped() {
        let p = page_params(&params(&[("limit", "999999")]), 25);
        assert!(p.limit <= 1000);
    }

    #[test]
    fn offset_is_zero_based() {
        let p = page_params(&params(&[("page", "3"), ("limit", "10")]), 25);
        assert_eq!(p.offset(), 20);
    }

    #[test]
    fn meta_links_swap_page_and_keep_the_rest() {
        let q = params(&[("limit", "10"), ("page", "2"), ("search", "a b")]);
        let m = meta("/things", &q, PageParams { page: 2, limit: 10 });
        assert_eq!(m["page"], 2);
        assert_eq!(
            m["next"],
            "/things?limit=10&page=3&search=a+b".to_string()
        );
        assert_eq!(
            m["previous"],
            "/things?limit=10&page=1&search=a+b".to_string()
        );
    }

    #[test]
    fn first_page_has_no_previous() {
        let m = meta("/things", &[], PageParams { page: 1, limit: 25 });
        assert!(m.get("previous").is_none());
        assert_eq!(m["next"], "/things?page=2".to_string());
    }
}
