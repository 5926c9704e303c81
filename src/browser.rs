#![forbid(unsafe_code)]

//! Minimal W3C WebDriver client. Only the handful of commands the link
//! collector needs are implemented: open a session, navigate, run a script,
//! inject cookies and quit.

use crate::cookies::BrowserCookie;
use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_WINDOW_SIZE: (u32, u32) = (1920, 1080);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Page automation used by the collector. Tests substitute a scripted fixture.
pub trait BrowserDriver {
    fn navigate(&mut self, url: &str) -> Result<()>;
    fn execute_script(&mut self, script: &str, args: Vec<Value>) -> Result<Value>;
    fn add_cookie(&mut self, cookie: &BrowserCookie) -> Result<()>;
    /// Ends the session. Calling it twice is harmless.
    fn quit(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserOptions {
    pub window_size: (u32, u32),
    pub headless: bool,
    pub request_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            headless: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub fn chrome_arguments(options: &BrowserOptions) -> Vec<String> {
    let (width, height) = options.window_size;
    let mut args = vec![
        format!("--window-size={width},{height}"),
        "--log-level=3".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args
}

pub fn session_capabilities(options: &BrowserOptions) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": chrome_arguments(options) }
            }
        }
    })
}

/// Pulls `value` out of a WebDriver response body, turning error payloads
/// into `Err`.
pub fn unwrap_response(body: Value) -> Result<Value> {
    let Value::Object(mut map) = body else {
        bail!("unexpected WebDriver response: {body}");
    };
    let value = map.remove("value").unwrap_or(Value::Null);
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        bail!("webdriver error `{error}`: {message}");
    }
    Ok(value)
}

fn session_id_from(value: &Value) -> Result<String> {
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("WebDriver did not return a session id: {value}"))
}

/// Chrome session driven through a chromedriver endpoint.
pub struct WebDriverSession {
    agent: ureq::Agent,
    endpoint: String,
    session_id: Option<String>,
}

impl WebDriverSession {
    pub fn start(endpoint: &str, options: &BrowserOptions) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout(options.request_timeout)
            .build();
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let mut session = Self {
            agent,
            endpoint,
            session_id: None,
        };
        let value = session
            .send("POST", "/session", Some(session_capabilities(options)))
            .with_context(|| format!("starting browser session at {}", session.endpoint))?;
        let id = session_id_from(&value)?;
        debug!(session = %id, "browser session started");
        session.session_id = Some(id);
        Ok(session)
    }

    fn session_path(&self, suffix: &str) -> Result<String> {
        match &self.session_id {
            Some(id) => Ok(format!("/session/{id}{suffix}")),
            None => bail!("browser session already closed"),
        }
    }

    fn send(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.endpoint);
        let request = self.agent.request(method, &url);
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body: Value = response.into_json().unwrap_or(Value::Null);
                return match unwrap_response(body) {
                    Err(err) => Err(err.context(format!("{method} {path} returned {code}"))),
                    Ok(_) => Err(anyhow!("{method} {path} returned {code}")),
                };
            }
            Err(err) => return Err(anyhow!(err).context(format!("{method} {path}"))),
        };
        let body: Value = response
            .into_json()
            .with_context(|| format!("decoding response of {method} {path}"))?;
        unwrap_response(body)
    }
}

impl BrowserDriver for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        let path = self.session_path("/url")?;
        self.send("POST", &path, Some(json!({ "url": url })))
            .with_context(|| format!("navigating to {url}"))?;
        Ok(())
    }

    fn execute_script(&mut self, script: &str, args: Vec<Value>) -> Result<Value> {
        let path = self.session_path("/execute/sync")?;
        self.send(
            "POST",
            &path,
            Some(json!({ "script": script, "args": args })),
        )
    }

    fn add_cookie(&mut self, cookie: &BrowserCookie) -> Result<()> {
        let path = self.session_path("/cookie")?;
        self.send("POST", &path, Some(json!({ "cookie": cookie })))
            .with_context(|| format!("adding cookie {}", cookie.name))?;
        Ok(())
    }

    fn quit(&mut self) -> Result<()> {
        let Some(id) = self.session_id.take() else {
            return Ok(());
        };
        self.send("DELETE", &format!("/session/{id}"), None)
            .context("closing browser session")?;
        debug!(session = %id, "browser session closed");
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Err(err) = self.quit() {
            warn!("failed to close browser session: {err:#}");
        }
    }
}
