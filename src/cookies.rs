//! Netscape `cookies.txt` support, so the browser session can reuse the same
//! login that yt-dlp gets through `--cookies`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Cookie in the shape WebDriver's `POST /session/{id}/cookie` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    #[serde(rename = "httpOnly")]
    pub http_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl BrowserCookie {
    /// True when the cookie would be sent to `host`.
    pub fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let host = host.to_ascii_lowercase();
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
    }
}

pub fn parse_netscape_cookies(content: &str) -> Vec<BrowserCookie> {
    content.lines().filter_map(parse_cookie_line).collect()
}

fn parse_cookie_line(line: &str) -> Option<BrowserCookie> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
        Some(rest) => (rest, true),
        None => (line, false),
    };
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split('\t').collect();
    let [domain, _subdomains, path, secure, expiry, name, value] = fields.as_slice() else {
        return None;
    };
    if name.is_empty() {
        return None;
    }
    Some(BrowserCookie {
        name: (*name).to_string(),
        value: (*value).to_string(),
        domain: (*domain).to_string(),
        path: if path.is_empty() { "/" } else { path }.to_string(),
        secure: secure.eq_ignore_ascii_case("TRUE"),
        http_only,
        // 0 marks a session cookie.
        expiry: expiry.parse::<u64>().ok().filter(|value| *value > 0),
    })
}

pub fn load_cookie_file(path: &Path) -> Result<Vec<BrowserCookie>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_netscape_cookies(&content))
}

pub fn cookies_for_host(cookies: &[BrowserCookie], host: &str) -> Vec<BrowserCookie> {
    cookies
        .iter()
        .filter(|cookie| cookie.matches_host(host))
        .cloned()
        .collect()
}
