use axum::http::{HeaderMap, header};

pub const REQUESTED_WITH: &str = "x-requested-with";

/// Wire format for an error response, decided once at ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Html,
}

impl ResponseFormat {
    /// Precedence:
    /// 1. an AJAX marker or an explicit JSON preference in `Accept`;
    /// 2. a path under `api_prefix`, unless `Accept` prefers a `text/*` type;
    /// 3. HTML.
    pub fn negotiate(headers: &HeaderMap, path: &str, api_prefix: &str) -> Self {
        let accept = headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .map(MediaRanges::parse)
            .unwrap_or_default();

        let ajax = headers
            .get(REQUESTED_WITH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"));

        if ajax || accept.prefers_json() {
            return ResponseFormat::Json;
        }
        if path.starts_with(api_prefix) && !accept.prefers_text() {
            return ResponseFormat::Json;
        }
        ResponseFormat::Html
    }
}

/// `Accept` header media ranges with their quality values.
#[derive(Debug, Default)]
struct MediaRanges(Vec<(String, f32)>);

impl MediaRanges {
    fn parse(raw: &str) -> Self {
        let ranges = raw
            .split(',')
            .filter_map(|item| {
                let mut parts = item.split(';');
                let media = parts.next()?.trim().to_ascii_lowercase();
                if media.is_empty() {
                    return None;
                }
                let quality = parts
                    .filter_map(|param| param.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((media, quality))
            })
            .collect();
        Self(ranges)
    }

    fn quality(&self, matches: impl Fn(&str) -> bool) -> f32 {
        self.0
            .iter()
            .filter(|(media, _)| matches(media))
            .map(|(_, q)| *q)
            .fold(0.0, f32::max)
    }

    fn prefers_json(&self) -> bool {
        let json = self.quality(|m| m == "application/json" || m.ends_with("+json"));
        let html = self.quality(|m| m == "text/html" || m == "application/xhtml+xml");
        json > 0.0 && json >= html
    }

    /// The most preferred range is a `text/*` type.
    fn prefers_text(&self) -> bool {
        self.0
            .iter()
            .fold(None::<&(String, f32)>, |best, range| match best {
                Some(b) if b.1 >= range.1 => Some(b),
                _ => Some(range),
            })
            .is_some_and(|(media, q)| *q > 0.0 && media.starts_with("text/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    const BROWSER: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

    #[test]
    fn test_browser_gets_html() {
        let h = headers(&[("accept", BROWSER)]);
        assert_eq!(ResponseFormat::negotiate(&h, "/app/orders", "/api/"), ResponseFormat::Html);
    }

    #[test]
    fn test_json_accept_gets_json() {
        let h = headers(&[("accept", "application/json")]);
        assert_eq!(ResponseFormat::negotiate(&h, "/app/orders", "/api/"), ResponseFormat::Json);
    }

    #[test]
    fn test_ajax_marker_gets_json() {
        let h = headers(&[("accept", "*/*"), ("x-requested-with", "XMLHttpRequest")]);
        assert_eq!(ResponseFormat::negotiate(&h, "/app/orders", "/api/"), ResponseFormat::Json);
    }

    #[test]
    fn test_api_path_defaults_to_json() {
        assert_eq!(
            ResponseFormat::negotiate(&HeaderMap::new(), "/api/resource/Item", "/api/"),
            ResponseFormat::Json
        );
        let h = headers(&[("accept", "*/*")]);
        assert_eq!(ResponseFormat::negotiate(&h, "/api/method/ping", "/api/"), ResponseFormat::Json);
    }

    #[test]
    fn test_api_path_with_text_preference_gets_html() {
        let h = headers(&[("accept", "text/plain")]);
        assert_eq!(ResponseFormat::negotiate(&h, "/api/method/ping", "/api/"), ResponseFormat::Html);
        let h = headers(&[("accept", BROWSER)]);
        assert_eq!(ResponseFormat::negotiate(&h, "/api/method/ping", "/api/"), ResponseFormat::Html);
    }

    #[test]
    fn test_low_quality_json_loses_to_html() {
        let h = headers(&[("accept", "text/html, application/json;q=0.1")]);
        assert_eq!(ResponseFormat::negotiate(&h, "/desk", "/api/"), ResponseFormat::Html);
    }
}
