use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorParams, SetDownloadBehaviorBehavior,
};
use chromiumoxide::page::Page;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::DriverError;

/// How long element waits may take before the run is considered dead.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);
/// Profile pages fire a burst of slow backend calls; give them more room.
pub const LONG_WAIT: Duration = Duration::from_secs(5 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The back office blocks all input behind this overlay while any
/// DataTables request is in flight.
const BLOCKING_OVERLAY: &str = "body > div.blockUI.blockOverlay";

/// One authenticated browsing session. Owns the Chromium instance; tabs are
/// handed out as [`Tab`] values. CDP commands, navigations included, run
/// under a [`LONG_WAIT`] timeout so a slow profile-page load does not abort
/// the run early.
pub struct Session {
    browser: Browser,
}

// Headful on purpose: the back office serves file downloads and same-origin
// dialog iframes that old headless mode mishandles. The request timeout
// bounds every CDP command; profile navigations can take minutes, so it is
// raised to LONG_WAIT instead of the default 30 seconds.
fn browser_config() -> Result<BrowserConfig> {
    BrowserConfig::builder()
        .with_head()
        .window_size(1280, 1024)
        .viewport(None)
        .request_timeout(LONG_WAIT)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))
}

impl Session {
    pub async fn launch() -> Result<Self> {
        info!("launching browser");

        let (browser, mut handler) = Browser::launch(browser_config()?)
            .await
            .context("failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    error!("browser handler error: {e:?}");
                }
            }
        });

        Ok(Self { browser })
    }

    /// Open a fresh tab with the Network domain enabled so response waiters
    /// can observe traffic.
    pub async fn new_tab(&self) -> Result<Tab> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open tab")?;
        page.execute(EnableParams::default())
            .await
            .context("failed to enable network events")?;
        Ok(Tab { page })
    }

    /// Fixed form-submit login against the back office.
    pub async fn login(&self, tab: &Tab, config: &Config) -> Result<()> {
        info!(url = %config.base_url, "logging in");
        tab.goto(&config.base_url).await?;
        tab.type_into("#Username", &config.auth_username).await?;
        tab.type_into("#Password", &config.auth_password).await?;
        tab.click("#logon").await?;
        tab.page
            .wait_for_navigation()
            .await
            .context("login navigation did not complete")?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

/// One browser tab plus the small capability set the extractors consume:
/// navigate, type, click, select, evaluate, wait, match responses, configure
/// downloads.
pub struct Tab {
    page: Page,
}

impl Tab {
    pub async fn goto(&self, url: &str) -> Result<()> {
        debug!(url, "navigating");
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigating to {url}"))?;
        Ok(())
    }

    pub async fn type_into(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("field {selector} not found"))?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("element {selector} not found"))?;
        element.click().await?;
        Ok(())
    }

    /// Select a `<select>` option by value and fire the change event the
    /// DataTables widgets listen on.
    pub async fn select_value(&self, selector: &str, value: &str) -> Result<()> {
        let picked: bool = self
            .eval(&format!(
                r#"
                (() => {{
                    const el = document.querySelector('{selector}');
                    if (!el) return false;
                    el.value = '{value}';
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }})()
                "#
            ))
            .await?;
        if !picked {
            bail!("select {selector} not found");
        }
        Ok(())
    }

    /// Evaluate a read-only accessor in page context and return plain data.
    pub async fn eval<T: DeserializeOwned>(&self, js: &str) -> Result<T> {
        let value = self
            .page
            .evaluate(js)
            .await
            .context("script evaluation failed")?
            .into_value::<T>()
            .context("script returned an unexpected shape")?;
        Ok(value)
    }

    /// Wait until `selector` is present in the DOM.
    pub async fn wait_for_selector(&self, selector: &str, limit: Duration) -> Result<()> {
        self.wait_for_condition(selector, "present", limit, &format!(
            "document.querySelector('{selector}') !== null"
        ))
        .await
    }

    /// Wait until `selector` is absent from the DOM or not rendered.
    pub async fn wait_for_hidden(&self, selector: &str, limit: Duration) -> Result<()> {
        self.wait_for_condition(selector, "hidden", limit, &format!(
            r#"(() => {{
                const el = document.querySelector('{selector}');
                return el === null || el.offsetParent === null;
            }})()"#
        ))
        .await
    }

    /// Wait until `selector` is present and rendered.
    pub async fn wait_for_visible(&self, selector: &str, limit: Duration) -> Result<()> {
        self.wait_for_condition(selector, "visible", limit, &format!(
            r#"(() => {{
                const el = document.querySelector('{selector}');
                return el !== null && el.offsetParent !== null;
            }})()"#
        ))
        .await
    }

    /// Wait until an arbitrary read-only page expression turns true.
    pub async fn wait_for_js(&self, what: &str, js: &str, limit: Duration) -> Result<()> {
        self.wait_for_condition(what, "ready", limit, js).await
    }

    async fn wait_for_condition(
        &self,
        selector: &str,
        condition: &'static str,
        limit: Duration,
        js: &str,
    ) -> Result<()> {
        debug!(selector, condition, "waiting for element");
        let poll = async {
            loop {
                if self.eval::<bool>(js).await.unwrap_or(false) {
                    return;
                }
                sleep(POLL_INTERVAL).await;
            }
        };
        timeout(limit, poll).await.map_err(|_| DriverError::ElementTimeout {
            selector: selector.to_string(),
            condition,
            timeout: limit,
        })?;
        Ok(())
    }

    /// Wait for the blocking overlay to clear.
    pub async fn wait_for_overlay_clear(&self) -> Result<()> {
        debug!("waiting for the blocking overlay to clear");
        self.wait_for_hidden(BLOCKING_OVERLAY, DEFAULT_WAIT).await
    }

    /// Run a UI action, then wait for the blocking overlay to clear. The
    /// overlay wait happens even when the action failed, so a half-finished
    /// action never leaves the next caller racing the overlay; the action's
    /// own error still wins.
    pub async fn settled<T, F>(&self, action: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = action.await;
        let cleared = self.wait_for_overlay_clear().await;
        let value = outcome?;
        cleared?;
        Ok(value)
    }

    /// Subscribe to network responses *before* triggering the UI action
    /// whose response we need. A generic network-idle wait is not enough
    /// here: several unrelated calls fire concurrently on these views, so
    /// each waiter matches one URL fragment.
    pub async fn expect_response(&self, fragment: &str) -> Result<ResponseWaiter> {
        self.expect_response_any(&[fragment]).await
    }

    /// Like [`Tab::expect_response`], matching whichever fragment shows up
    /// first (the KYC download endpoint answers on a success URL or an
    /// error URL).
    pub async fn expect_response_any(&self, fragments: &[&str]) -> Result<ResponseWaiter> {
        let events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to subscribe to network responses")?;
        Ok(ResponseWaiter {
            page: self.page.clone(),
            events: events.boxed(),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
        })
    }

    /// Route this tab's file downloads into `dir`.
    pub async fn set_download_dir(&self, dir: &Path) -> Result<()> {
        debug!(dir = %dir.display(), "configuring download directory");
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.display().to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("invalid download behavior params: {e}"))?;
        self.page
            .execute(params)
            .await
            .context("failed to set download behavior")?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        self.page.close().await?;
        Ok(())
    }
}

/// A pending match against one specific network response.
pub struct ResponseWaiter {
    page: Page,
    events: BoxStream<'static, Arc<EventResponseReceived>>,
    fragments: Vec<String>,
}

impl ResponseWaiter {
    fn describe(&self) -> String {
        self.fragments.join("|")
    }

    /// Await the first response whose URL contains one of the fragments.
    pub async fn wait(self, limit: Duration) -> Result<MatchedResponse> {
        let label = self.describe();
        debug!(fragment = %label, "waiting for response");
        let ResponseWaiter {
            page,
            mut events,
            fragments,
        } = self;

        let outcome = timeout(limit, async {
            while let Some(event) = events.next().await {
                debug!(url = %event.response.url, "observed response");
                if fragments.iter().any(|f| event.response.url.contains(f)) {
                    return Some(event);
                }
            }
            None
        })
        .await;

        match outcome {
            Err(_) => Err(DriverError::ResponseTimeout {
                fragment: label,
                timeout: limit,
            }
            .into()),
            Ok(None) => bail!("response event stream closed while waiting for `{label}`"),
            Ok(Some(event)) => Ok(MatchedResponse {
                page,
                url: event.response.url.clone(),
                request_id: event.request_id.clone(),
            }),
        }
    }

    /// Await the matching response and parse its body as JSON.
    pub async fn wait_json(self, limit: Duration) -> Result<Value> {
        let matched = self.wait(limit).await?;
        matched.body_json().await
    }
}

pub struct MatchedResponse {
    page: Page,
    pub url: String,
    request_id: RequestId,
}

impl MatchedResponse {
    /// Fetch the response body via CDP. The body is not always available the
    /// instant the response event arrives, so retry briefly.
    pub async fn body_json(&self) -> Result<Value> {
        let mut last_err = anyhow::anyhow!("response body never became available");
        for _ in 0..10 {
            match self
                .page
                .execute(GetResponseBodyParams::new(self.request_id.clone()))
                .await
            {
                Ok(body) => {
                    if body.base64_encoded {
                        bail!("unexpected binary body for {}", self.url);
                    }
                    return serde_json::from_str(&body.body)
                        .with_context(|| format!("parsing response body of {}", self.url));
                }
                Err(e) => {
                    last_err = e.into();
                    sleep(Duration::from_millis(200)).await;
                }
            }
        }
        Err(last_err).with_context(|| format!("fetching response body of {}", self.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigations_get_the_long_command_timeout() {
        // A profile-page goto is a CDP command like any other; the default
        // 30 s command timeout would abort it (after the attempt was already
        // counted), so the config must carry the raised timeout.
        let config = browser_config().unwrap();
        let rendered = format!("{config:?}");
        assert!(
            rendered.contains(&format!("request_timeout: {:?}", LONG_WAIT)),
            "browser config lost the long command timeout: {rendered}"
        );
    }
}
