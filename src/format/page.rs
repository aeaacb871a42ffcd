use crate::common::Indicator;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// Renders branded HTML error pages.
///
/// Structure is constant (title, body, indicator colour); only content varies
/// by status. `body` is already-escaped HTML.
pub trait PageRenderer: Send + Sync + 'static {
    fn render_html_page(
        &self,
        title: &str,
        body: &str,
        status: StatusCode,
        indicator: Indicator,
    ) -> Response;

    /// Where the "Session Expired" page sends users to re-authenticate.
    fn login_path(&self) -> &str {
        "/login"
    }
}

#[derive(Debug, Clone)]
pub struct DefaultPageRenderer {
    brand: String,
    login_path: String,
}

impl DefaultPageRenderer {
    pub fn new(brand: impl Into<String>, login_path: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            login_path: login_path.into(),
        }
    }
}

impl Default for DefaultPageRenderer {
    fn default() -> Self {
        Self::new("Faultline", "/login")
    }
}

impl PageRenderer for DefaultPageRenderer {
    fn render_html_page(
        &self,
        title: &str,
        body: &str,
        status: StatusCode,
        indicator: Indicator,
    ) -> Response {
        let title = escape_html(title);
        let brand = escape_html(&self.brand);
        let page = format!(
            r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} | {brand}</title>
<style>
body {{ font-family: system-ui, sans-serif; background: #f4f5f6; margin: 0; }}
.page-card {{ max-width: 720px; margin: 10vh auto; background: #fff; border-radius: 8px; padding: 2rem; }}
.indicator {{ display: inline-block; width: 10px; height: 10px; border-radius: 50%; margin-right: .5rem; }}
.indicator.red {{ background: #e24c4c; }}
.indicator.orange {{ background: #f8814f; }}
.indicator.yellow {{ background: #ecc30b; }}
.indicator.green {{ background: #28a745; }}
.indicator.blue, .indicator.info {{ background: #2490ef; }}
pre {{ overflow-x: auto; background: #1e1e1e; color: #eee; padding: 1rem; font-size: 12px; }}
</style>
</head>
<body>
<div class="page-card" data-status="{status}">
<h4><span class="indicator {indicator}"></span>{title}</h4>
<div class="page-card-body">{body}</div>
<footer><small>{brand}</small></footer>
</div>
</body>
</html>
"#,
            status = status.as_u16(),
            indicator = indicator,
        );
        (status, Html(page)).into_response()
    }

    fn login_path(&self) -> &str {
        &self.login_path
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
