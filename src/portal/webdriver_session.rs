use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thirtyfour::components::SelectElement;
use thirtyfour::prelude::*;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::BrowserSession;
use crate::config::Settings;

const WAIT_INTERVAL: Duration = Duration::from_millis(250);

// Everything the page has fetched so far, including frames and embedded viewers.
const RESOURCE_PROBE: &str = r#"
    var urls = performance.getEntriesByType('resource').map(function (e) { return e.name; });
    urls.push(window.location.href);
    document.querySelectorAll('iframe, frame, embed, object').forEach(function (el) {
        var src = el.src || el.data;
        if (src) { urls.push(src); }
    });
    return urls;
"#;

const RESET_PROBE: &str = r#"
    performance.setResourceTimingBufferSize(2000);
    performance.clearResourceTimings();
    return true;
"#;

const CLICK_SCRIPT: &str = "arguments[0].click(); return true;";

/// Chrome driven over WebDriver.
///
/// WebDriver has no response events, so responses are observed by probing the
/// page's resource timing buffer and any popup windows the portal opens.
pub struct WebDriverSession {
    driver: WebDriver,
    main_window: WindowHandle,
    typing_delay: Duration,
    seen: Mutex<HashSet<String>>,
}

impl WebDriverSession {
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        if settings.headless {
            caps.add_chrome_arg("--headless=new")?;
        }
        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--window-size=1920,1080")?;
        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        if settings.accept_invalid_certs {
            caps.add_chrome_arg("--ignore-certificate-errors")?;
        }

        info!("Connecting to WebDriver at {}", settings.webdriver_url);
        let driver = WebDriver::new(&settings.webdriver_url, caps)
            .await
            .context("Failed to connect to WebDriver")?;

        driver
            .set_page_load_timeout(settings.page_load_timeout)
            .await?;
        driver.set_script_timeout(Duration::from_secs(30)).await?;

        let main_window = driver.window().await?;

        Ok(Self {
            driver,
            main_window,
            typing_delay: settings.typing_delay,
            seen: Mutex::new(HashSet::new()),
        })
    }

    fn forget_seen(&self) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }

    /// Puts focus back on the portal tab.
    async fn focus_main(&self) -> Result<()> {
        self.driver
            .switch_to_window(self.main_window.clone())
            .await
            .context("Failed to focus the portal window")?;
        Ok(())
    }
}

/// Window handling needed to read and close popups
#[async_trait]
trait PopupWindows: Send + Sync {
    type Handle: Clone + PartialEq + Send + Sync;

    async fn window_handles(&self) -> Result<Vec<Self::Handle>>;
    async fn focus_window(&self, handle: &Self::Handle) -> Result<()>;
    async fn focused_url(&self) -> Result<String>;
    async fn close_focused(&self) -> Result<()>;
}

#[async_trait]
impl PopupWindows for WebDriver {
    type Handle = WindowHandle;

    async fn window_handles(&self) -> Result<Vec<WindowHandle>> {
        Ok(self.windows().await?)
    }

    async fn focus_window(&self, handle: &WindowHandle) -> Result<()> {
        Ok(self.switch_to_window(handle.clone()).await?)
    }

    async fn focused_url(&self) -> Result<String> {
        Ok(self.current_url().await?.to_string())
    }

    async fn close_focused(&self) -> Result<()> {
        Ok(self.close_window().await?)
    }
}

async fn read_popup<W: PopupWindows>(windows: &W, handle: &W::Handle) -> Result<Option<String>> {
    windows.focus_window(handle).await?;
    let url = windows.focused_url().await?;
    if url == "about:blank" {
        return Ok(None);
    }

    debug!("Popup window at {}", url);
    if let Err(e) = windows.close_focused().await {
        warn!("Failed to close popup {}: {:#}", url, e);
    }
    Ok(Some(url))
}

/// URLs of popup windows; loaded popups are closed once read.
///
/// Popups that vanish mid-read are skipped. Focus always returns to `main`.
async fn drain_popups<W: PopupWindows>(windows: &W, main: &W::Handle) -> Result<Vec<String>> {
    let handles = windows.window_handles().await?;
    let mut urls = Vec::new();

    for handle in handles.iter().filter(|h| *h != main) {
        match read_popup(windows, handle).await {
            Ok(Some(url)) => urls.push(url),
            Ok(None) => {}
            Err(e) => debug!("Popup went away before it could be read: {:#}", e),
        }
    }

    windows.focus_window(main).await?;
    Ok(urls)
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        if let Err(e) = self.focus_main().await {
            warn!("{:#}", e);
        }
        self.driver.set_page_load_timeout(timeout).await?;
        self.driver
            .goto(url)
            .await
            .with_context(|| format!("Failed to load {}", url))?;
        self.forget_seen();
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.driver
            .query(By::Css(selector))
            .wait(timeout, WAIT_INTERVAL)
            .first()
            .await
            .with_context(|| format!("Timed out waiting for {}", selector))?;
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        let elem = self
            .driver
            .find(By::Css(selector))
            .await
            .with_context(|| format!("Could not find {}", selector))?;
        let select = SelectElement::new(&elem).await?;
        select
            .select_by_value(value)
            .await
            .with_context(|| format!("Could not select {} on {}", value, selector))?;
        Ok(())
    }

    async fn clear_and_type(&self, selector: &str, text: &str) -> Result<()> {
        let elem = self
            .driver
            .find(By::Css(selector))
            .await
            .with_context(|| format!("Could not find {}", selector))?;

        elem.clear().await?;
        for ch in text.chars() {
            elem.send_keys(ch.to_string()).await?;
            sleep(self.typing_delay).await;
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let elem = self
            .driver
            .find(By::Css(selector))
            .await
            .with_context(|| format!("Could not find {}", selector))?;

        // A script click returns immediately instead of blocking on the next page load.
        self.driver
            .execute(CLICK_SCRIPT, vec![elem.to_json()?])
            .await
            .with_context(|| format!("Failed to click {}", selector))?;
        Ok(())
    }

    async fn arm_interception(&self) -> Result<()> {
        self.forget_seen();
        self.driver
            .execute(RESET_PROBE, vec![])
            .await
            .context("Failed to reset resource timings")?;
        Ok(())
    }

    async fn observed_responses(&self) -> Result<Vec<String>> {
        let ret = self
            .driver
            .execute(RESOURCE_PROBE, vec![])
            .await
            .context("Failed to read resource timings")?;
        let mut urls: Vec<String> = ret.convert()?;
        urls.extend(drain_popups(&self.driver, &self.main_window).await?);

        let mut seen = self
            .seen
            .lock()
            .map_err(|_| anyhow::anyhow!("response log poisoned"))?;
        Ok(urls.into_iter().filter(|url| seen.insert(url.clone())).collect())
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.driver.source().await?)
    }

    async fn close(self) -> Result<()> {
        self.driver.quit().await?;
        Ok(())
    }
}
