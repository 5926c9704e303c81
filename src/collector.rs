//! Profile page scraping: load a page in the browser, scroll, and gather the
//! post/video links it exposes.

use crate::browser::BrowserDriver;
use crate::cookies::{BrowserCookie, cookies_for_host};
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::{Url, form_urlencoded};

pub const DEFAULT_SCROLL_COUNT: u32 = 4;
pub const DEFAULT_INITIAL_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_SCROLL_WAIT: Duration = Duration::from_secs(7);

/// Returns `{hrefs, videoIds, location}` for the anchors matching
/// `arguments[0]`; video ids are only gathered when `arguments[1]` is true.
pub const LINKS_SCRIPT: &str = r#"
const hrefs = Array.from(document.querySelectorAll(arguments[0]))
    .map(a => a.href)
    .filter(Boolean);
const videoIds = arguments[1]
    ? Array.from(document.querySelectorAll('[data-video-id]'))
        .map(el => el.getAttribute('data-video-id'))
        .filter(Boolean)
    : [];
return { hrefs, videoIds, location: window.location.href };
"#;
pub const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";
pub const HEIGHT_SCRIPT: &str = "return document.body.scrollHeight;";

/// Absolute http(s) URL with query, fragment and trailing slashes removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateUrl(String);

impl CandidateUrl {
    /// `{origin}/video.php?v={id}`, the form Facebook exposes through
    /// `data-video-id` attributes. Ids are query-encoded, so any non-empty
    /// token is kept; whitespace inside one means the attribute held
    /// something other than an id.
    pub fn from_video_id(origin: &Url, id: &str) -> Option<Self> {
        let id = id.trim();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return None;
        }
        let origin = origin.origin();
        if !origin.is_tuple() {
            return None;
        }
        let id: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
        Some(Self(format!(
            "{}/video.php?v={id}",
            origin.ascii_serialization()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host(&self) -> Option<String> {
        Url::parse(&self.0)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

impl fmt::Display for CandidateUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CandidateUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves `raw` against `base` and strips everything that makes two links
/// to the same post differ.
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Option<CandidateUrl> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(CandidateUrl(url.as_str().trim_end_matches('/').to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPatterns {
    pub path_fragments: Vec<String>,
    pub include_video_ids: bool,
    pub required_host: Option<String>,
}

impl LinkPatterns {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path_fragments: fragments.into_iter().map(Into::into).collect(),
            include_video_ids: false,
            required_host: None,
        }
    }

    pub fn css_selector(&self) -> String {
        self.path_fragments
            .iter()
            .map(|fragment| format!("a[href*=\"{}\"]", fragment.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn host_allowed(&self, candidate: &CandidateUrl) -> bool {
        match &self.required_host {
            Some(required) => candidate
                .host()
                .is_some_and(|host| host.contains(required.as_str())),
            None => true,
        }
    }

    fn href_matches(&self, href: &str) -> bool {
        self.path_fragments
            .iter()
            .any(|fragment| href.contains(fragment.as_str()))
    }

    /// Turns one `LINKS_SCRIPT` result into candidates.
    pub fn extract(&self, found: &PageLinks, page_url: &Url) -> BTreeSet<CandidateUrl> {
        let base = found
            .location
            .as_deref()
            .and_then(|location| Url::parse(location).ok())
            .unwrap_or_else(|| page_url.clone());
        let mut candidates: BTreeSet<CandidateUrl> = found
            .hrefs
            .iter()
            .filter(|href| self.href_matches(href))
            .filter_map(|href| normalize_url(href, Some(&base)))
            .collect();
        if self.include_video_ids {
            candidates.extend(
                found
                    .video_ids
                    .iter()
                    .filter_map(|id| CandidateUrl::from_video_id(&base, id)),
            );
        }
        candidates.retain(|candidate| self.host_allowed(candidate));
        candidates
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageLinks {
    pub hrefs: Vec<String>,
    pub video_ids: Vec<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollSettings {
    /// Upper bound on scroll passes after the first query.
    pub scroll_count: u32,
    /// Settle time after the page loads.
    pub initial_wait: Duration,
    /// Pause after each scroll so lazy-loaded items can render.
    pub scroll_wait: Duration,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            scroll_count: DEFAULT_SCROLL_COUNT,
            initial_wait: DEFAULT_INITIAL_WAIT,
            scroll_wait: DEFAULT_SCROLL_WAIT,
        }
    }
}

pub struct LinkCollector {
    patterns: LinkPatterns,
    scroll: ScrollSettings,
    cookies: Vec<BrowserCookie>,
    sleep: fn(Duration),
}

impl LinkCollector {
    pub fn new(patterns: LinkPatterns, scroll: ScrollSettings) -> Self {
        Self {
            patterns,
            scroll,
            cookies: Vec::new(),
            sleep: thread::sleep,
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<BrowserCookie>) -> Self {
        self.cookies = cookies;
        self
    }

    #[cfg(test)]
    fn without_sleeping(mut self) -> Self {
        self.sleep = |_| {};
        self
    }

    /// Gathers candidates from `page_url`. The driver is quit whether or not
    /// collection succeeds.
    pub fn collect(
        &self,
        driver: &mut dyn BrowserDriver,
        page_url: &str,
    ) -> Result<BTreeSet<CandidateUrl>> {
        let result = self.collect_inner(driver, page_url);
        if let Err(err) = driver.quit() {
            warn!("failed to close the browser: {err:#}");
        }
        result
    }

    /// Same as [`collect`](Self::collect) but logs errors and yields an empty set.
    pub fn collect_or_empty(
        &self,
        driver: &mut dyn BrowserDriver,
        page_url: &str,
    ) -> BTreeSet<CandidateUrl> {
        self.collect(driver, page_url).unwrap_or_else(|err| {
            warn!("link collection failed: {err:#}");
            BTreeSet::new()
        })
    }

    fn collect_inner(
        &self,
        driver: &mut dyn BrowserDriver,
        page_url: &str,
    ) -> Result<BTreeSet<CandidateUrl>> {
        let url = Url::parse(page_url).with_context(|| format!("invalid page url {page_url}"))?;
        driver.navigate(url.as_str())?;
        self.inject_cookies(driver, &url)?;
        (self.sleep)(self.scroll.initial_wait);

        let mut found = self.query_links(driver, &url)?;
        println!("   Initial pass: {} unique links", found.len());
        let mut last_height = page_height(driver)?;
        for pass in 1..=self.scroll.scroll_count {
            driver.execute_script(SCROLL_SCRIPT, Vec::new())?;
            (self.sleep)(self.scroll.scroll_wait);
            found.extend(self.query_links(driver, &url)?);
            println!("   Scroll {pass}: {} unique links", found.len());
            let height = page_height(driver)?;
            if height <= last_height {
                debug!(pass, height, "page stopped growing");
                break;
            }
            last_height = height;
        }
        info!(page = %url, links = found.len(), "link collection finished");
        Ok(found)
    }

    fn inject_cookies(&self, driver: &mut dyn BrowserDriver, url: &Url) -> Result<()> {
        let Some(host) = url.host_str() else {
            return Ok(());
        };
        let cookies = cookies_for_host(&self.cookies, host);
        if cookies.is_empty() {
            return Ok(());
        }
        for cookie in &cookies {
            if let Err(err) = driver.add_cookie(cookie) {
                warn!("skipping cookie {}: {err:#}", cookie.name);
            }
        }
        debug!(count = cookies.len(), "cookies injected, reloading page");
        driver.navigate(url.as_str())
    }

    fn query_links(
        &self,
        driver: &mut dyn BrowserDriver,
        page_url: &Url,
    ) -> Result<BTreeSet<CandidateUrl>> {
        let value = driver.execute_script(
            LINKS_SCRIPT,
            vec![
                json!(self.patterns.css_selector()),
                json!(self.patterns.include_video_ids),
            ],
        )?;
        let found: PageLinks =
            serde_json::from_value(value).context("unexpected link query result")?;
        Ok(self.patterns.extract(&found, page_url))
    }
}

fn page_height(driver: &mut dyn BrowserDriver) -> Result<u64> {
    let value = driver.execute_script(HEIGHT_SCRIPT, Vec::new())?;
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|height| height.max(0.0) as u64))
        .ok_or_else(|| anyhow!("page height is not a number: {value}"))
}

/// Site presets for scraping and extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Instagram,
    Facebook,
    TikTok,
    Generic,
}

const TIKTOK_API_HOSTNAME: &str = "tiktok:api_hostname=api16-normal-c-useast1a.tiktokv.com";

impl Platform {
    pub fn detect(url: &str) -> Self {
        let host = Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();
        let is = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
        if is("instagram.com") {
            Self::Instagram
        } else if is("facebook.com") || is("fb.watch") {
            Self::Facebook
        } else if is("tiktok.com") {
            Self::TikTok
        } else {
            Self::Generic
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::TikTok => "tiktok",
            Self::Generic => "generic",
        }
    }

    pub fn link_patterns(self) -> LinkPatterns {
        match self {
            Self::Instagram => LinkPatterns::new(["/reel/", "/p/"]),
            Self::Facebook => LinkPatterns {
                include_video_ids: true,
                required_host: Some("facebook.com".to_string()),
                ..LinkPatterns::new(["/videos/", "/reel/"])
            },
            Self::TikTok => LinkPatterns::new(["/video/"]),
            Self::Generic => LinkPatterns::new(["/reel/", "/p/", "/videos/", "/video/"]),
        }
    }

    /// Extractor yt-dlp is pinned to with `--ies`.
    pub fn forced_extractor(self) -> Option<&'static str> {
        match self {
            Self::Instagram => Some("instagram"),
            _ => None,
        }
    }

    pub fn extractor_args(self) -> Vec<String> {
        match self {
            Self::TikTok => vec![TIKTOK_API_HOSTNAME.to_string()],
            _ => Vec::new(),
        }
    }

    pub fn default_impersonate(self) -> Option<&'static str> {
        match self {
            Self::TikTok => Some("chrome"),
            _ => None,
        }
    }

    /// Whether the browser workflow refuses to run without a cookie file.
    pub fn requires_cookies(self) -> bool {
        matches!(self, Self::Instagram | Self::Facebook)
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "instagram" | "ig" => Ok(Self::Instagram),
            "facebook" | "fb" => Ok(Self::Facebook),
            "tiktok" => Ok(Self::TikTok),
            "generic" => Ok(Self::Generic),
            other => bail!("unknown platform `{other}`"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses the profile URL typed by the operator, rewriting
/// `web.facebook.com` to `www.facebook.com`.
pub fn canonical_profile_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("no profile URL given");
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let mut url = Url::parse(&with_scheme).with_context(|| format!("invalid URL {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("unsupported URL scheme in {raw}");
    }
    if url.host_str() == Some("web.facebook.com") {
        url.set_host(Some("www.facebook.com"))
            .context("rewriting facebook host")?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::VecDeque;

    #[test]
    fn normalize_strips_query_fragment_and_trailing_slash() {
        let url = normalize_url("https://www.instagram.com/reel/C4xABC123/?igsh=abc#top", None)
            .unwrap();
        assert_eq!(url.as_str(), "https://www.instagram.com/reel/C4xABC123");
        let root = normalize_url("https://example.com/", None).unwrap();
        assert_eq!(root.as_str(), "https://example.com");
    }

    #[test]
    fn normalize_resolves_relative_links() {
        let base = Url::parse("https://www.tiktok.com/@someone").unwrap();
        let url = normalize_url("/@someone/video/7300000000000000000?lang=en", Some(&base)).unwrap();
        assert_eq!(url.as_str(), "https://www.tiktok.com/@someone/video/7300000000000000000");
    }

    #[test]
    fn normalize_rejects_other_schemes() {
        assert!(normalize_url("javascript:void(0)", None).is_none());
        assert!(normalize_url("mailto:someone@example.com", None).is_none());
        assert!(normalize_url("", None).is_none());
        assert!(normalize_url("not a url", None).is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "https://www.instagram.com/p/abc/",
            "https://WWW.Example.com/a//?x=1",
            "http://example.com",
            "https://example.com/path/to/video/#frag",
            "https://example.com:8443/v/1/",
        ];
        for input in inputs {
            let once = normalize_url(input, None).unwrap();
            let twice = normalize_url(once.as_str(), None).unwrap();
            assert_eq!(once, twice, "{input}");
        }
    }

    #[test]
    fn video_ids_become_video_php_links() {
        let origin = Url::parse("https://www.facebook.com/somepage/videos").unwrap();
        let url = CandidateUrl::from_video_id(&origin, "123456").unwrap();
        assert_eq!(url.as_str(), "https://www.facebook.com/video.php?v=123456");
        let url = CandidateUrl::from_video_id(&origin, "abc-123_x.y").unwrap();
        assert_eq!(url.as_str(), "https://www.facebook.com/video.php?v=abc-123_x.y");
        let url = CandidateUrl::from_video_id(&origin, "a&b=c").unwrap();
        assert_eq!(url.as_str(), "https://www.facebook.com/video.php?v=a%26b%3Dc");
        assert!(CandidateUrl::from_video_id(&origin, "12 34").is_none());
        assert!(CandidateUrl::from_video_id(&origin, "  ").is_none());
        assert!(CandidateUrl::from_video_id(&origin, "").is_none());
    }

    #[test]
    fn css_selector_lists_every_fragment() {
        assert_eq!(
            Platform::Instagram.link_patterns().css_selector(),
            r#"a[href*="/reel/"], a[href*="/p/"]"#
        );
    }

    #[test]
    fn facebook_patterns_keep_only_facebook_hosts() {
        let patterns = Platform::Facebook.link_patterns();
        let page = Url::parse("https://www.facebook.com/page/videos").unwrap();
        let found = PageLinks {
            hrefs: vec![
                "https://www.facebook.com/page/videos/111/?t=3".into(),
                "https://l.example.com/videos/222".into(),
                "https://www.facebook.com/about".into(),
            ],
            video_ids: vec!["333".into()],
            location: Some("https://www.facebook.com/page/videos".into()),
        };
        let urls: Vec<String> = patterns
            .extract(&found, &page)
            .into_iter()
            .map(|url| url.to_string())
            .collect();
        assert_eq!(
            urls,
            [
                "https://www.facebook.com/page/videos/111",
                "https://www.facebook.com/video.php?v=333"
            ]
        );
    }

    #[test]
    fn platform_detection_and_presets() {
        assert_eq!(Platform::detect("https://www.instagram.com/someone/"), Platform::Instagram);
        assert_eq!(Platform::detect("https://web.facebook.com/page"), Platform::Facebook);
        assert_eq!(Platform::detect("https://www.tiktok.com/@x"), Platform::TikTok);
        assert_eq!(Platform::detect("https://example.com/x"), Platform::Generic);
        assert_eq!(Platform::detect("https://notinstagram.com/x"), Platform::Generic);
        assert!(Platform::Instagram.requires_cookies());
        assert!(!Platform::TikTok.requires_cookies());
        assert_eq!("FB".parse::<Platform>().unwrap(), Platform::Facebook);
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn canonical_profile_url_rewrites_facebook_web_host() {
        let url = canonical_profile_url("https://web.facebook.com/somepage/videos").unwrap();
        assert_eq!(url.as_str(), "https://www.facebook.com/somepage/videos");
        let url = canonical_profile_url("www.instagram.com/someone").unwrap();
        assert_eq!(url.as_str(), "https://www.instagram.com/someone");
        assert!(canonical_profile_url("  ").is_err());
        assert!(canonical_profile_url("ftp://example.com").is_err());
    }

    /// Replays one `LINKS_SCRIPT` result and one height per query.
    #[derive(Default)]
    struct FixtureBrowser {
        pages: VecDeque<Vec<&'static str>>,
        heights: VecDeque<u64>,
        navigations: Vec<String>,
        cookies: Vec<String>,
        scrolls: usize,
        quit_calls: usize,
        fail_links: bool,
    }

    impl BrowserDriver for FixtureBrowser {
        fn navigate(&mut self, url: &str) -> Result<()> {
            self.navigations.push(url.to_string());
            Ok(())
        }

        fn execute_script(&mut self, script: &str, _args: Vec<Value>) -> Result<Value> {
            if script == SCROLL_SCRIPT {
                self.scrolls += 1;
                return Ok(Value::Null);
            }
            if script == HEIGHT_SCRIPT {
                return Ok(json!(self.heights.pop_front().unwrap_or(1000)));
            }
            if self.fail_links {
                bail!("no such window");
            }
            let hrefs = self.pages.pop_front().unwrap_or_default();
            Ok(json!({ "hrefs": hrefs, "videoIds": [], "location": "https://www.instagram.com/someone/" }))
        }

        fn add_cookie(&mut self, cookie: &BrowserCookie) -> Result<()> {
            self.cookies.push(cookie.name.clone());
            Ok(())
        }

        fn quit(&mut self) -> Result<()> {
            self.quit_calls += 1;
            Ok(())
        }
    }

    fn collector(scroll_count: u32) -> LinkCollector {
        let scroll = ScrollSettings {
            scroll_count,
            ..ScrollSettings::default()
        };
        LinkCollector::new(Platform::Instagram.link_patterns(), scroll).without_sleeping()
    }

    #[test]
    fn collects_unique_links_across_scroll_passes() {
        let mut browser = FixtureBrowser {
            pages: VecDeque::from([
                vec!["https://www.instagram.com/reel/A/?igsh=1", "https://www.instagram.com/p/B/"],
                vec!["https://www.instagram.com/reel/A/", "https://www.instagram.com/p/C/"],
                vec!["https://www.instagram.com/p/C/?x=2", "https://www.instagram.com/explore/"],
            ]),
            heights: VecDeque::from([1000, 2000, 3000]),
            ..FixtureBrowser::default()
        };
        let links = collector(2)
            .collect(&mut browser, "https://www.instagram.com/someone/")
            .unwrap();
        let links: Vec<&str> = links.iter().map(CandidateUrl::as_str).collect();
        assert_eq!(
            links,
            [
                "https://www.instagram.com/p/B",
                "https://www.instagram.com/p/C",
                "https://www.instagram.com/reel/A"
            ]
        );
        assert_eq!(browser.scrolls, 2);
        assert_eq!(browser.quit_calls, 1);
    }

    #[test]
    fn stops_when_page_height_stops_growing() {
        let mut browser = FixtureBrowser {
            heights: VecDeque::from([1000, 1000, 5000]),
            ..FixtureBrowser::default()
        };
        collector(10)
            .collect(&mut browser, "https://www.instagram.com/someone/")
            .unwrap();
        assert_eq!(browser.scrolls, 1);
    }

    #[test]
    fn cookies_are_injected_then_page_reloaded() {
        let cookies = crate::cookies::parse_netscape_cookies(
            ".instagram.com\tTRUE\t/\tTRUE\t0\tsessionid\tabc\n\
             .facebook.com\tTRUE\t/\tTRUE\t0\tc_user\t1\n",
        );
        let mut browser = FixtureBrowser::default();
        collector(0)
            .with_cookies(cookies)
            .collect(&mut browser, "https://www.instagram.com/someone/")
            .unwrap();
        assert_eq!(browser.cookies, ["sessionid"]);
        assert_eq!(browser.navigations.len(), 2);
    }

    #[test]
    fn browser_errors_yield_empty_set_and_still_quit() {
        let mut browser = FixtureBrowser {
            fail_links: true,
            ..FixtureBrowser::default()
        };
        let links = collector(3).collect_or_empty(&mut browser, "https://www.instagram.com/someone/");
        assert!(links.is_empty());
        assert_eq!(browser.quit_calls, 1);
    }
}
