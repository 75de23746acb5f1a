//! Long-lived headless Chrome session.
//!
//! One browser process and one isolated browser context are shared by every
//! extraction for the lifetime of the service. Each render gets its own
//! short-lived page inside that context, which is closed on every exit path.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──render()──▶ ad filter, browser, context ──▶ page per call
//!   │                                                  │
//!   └────shutdown()──▶ dispose context, close browser ◀┘
//! ```
//!
//! Launching is lazy and retried on the next call if it fails. If the browser
//! connection drops, the next call relaunches. URLs on a blocked ad host are
//! refused before any browser work. After `shutdown()` the session refuses
//! further work.

use crate::error::ExtractError;
use crate::extract::adfilter::{AdFilterConfig, AdFilterRegistry};
use crate::extract::{PageRenderer, RenderedPage};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, SetBlockedUrLsParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// How the headless browser is launched and how long pages get to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Chrome/Chromium binary. Auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    /// User agent for every page. Defaults to a desktop Chrome string for the
    /// host platform.
    pub user_agent: Option<String>,
    pub navigation_timeout_secs: u64,
    /// Extra wait after the load event so late network requests can settle.
    pub settle_millis: u64,
    /// Required when running as root inside containers.
    pub no_sandbox: bool,
    pub extra_args: Vec<String>,
    pub adblock: AdFilterConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            user_agent: None,
            navigation_timeout_secs: 30,
            settle_millis: 750,
            no_sandbox: false,
            extra_args: Vec::new(),
            adblock: AdFilterConfig::default(),
        }
    }
}

impl RenderConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(default_user_agent)
    }

    /// Network-domain override applied to every page.
    pub fn user_agent_override(&self) -> SetUserAgentOverrideParams {
        SetUserAgentOverrideParams::new(self.user_agent())
    }
}

/// Desktop Chrome user agent matching the host platform.
pub fn default_user_agent() -> String {
    let platform = if cfg!(target_os = "macos") {
        "Macintosh; Intel Mac OS X 10_15_7"
    } else if cfg!(target_os = "windows") {
        "Windows NT 10.0; Win64; x64"
    } else {
        "X11; Linux x86_64"
    };
    format!(
        "Mozilla/5.0 ({platform}) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/131.0.0.0 Safari/537.36"
    )
}

struct Engine {
    browser: Browser,
    handler: JoinHandle<()>,
}

#[derive(Default)]
struct SessionState {
    engine: Option<Engine>,
    context: Option<BrowserContextId>,
    blocker: Option<Arc<AdFilterRegistry>>,
    shut_down: bool,
}

/// Shared headless browser used by the content extractor.
///
/// Renders are serialized through an internal lock, so at most one page is
/// open at a time.
pub struct RenderSession {
    config: RenderConfig,
    http: reqwest::Client,
    state: Mutex<SessionState>,
}

impl RenderSession {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Whether the browser is currently running.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.engine.is_some()
    }

    async fn ensure_blocker(
        &self,
        state: &mut SessionState,
    ) -> Result<Arc<AdFilterRegistry>, ExtractError> {
        if state.shut_down {
            return Err(ExtractError::SessionClosed);
        }
        if let Some(blocker) = &state.blocker {
            return Ok(Arc::clone(blocker));
        }
        let registry = Arc::new(AdFilterRegistry::load(&self.config.adblock, &self.http).await);
        state.blocker = Some(Arc::clone(&registry));
        Ok(registry)
    }

    async fn ensure_browser(&self, state: &mut SessionState) -> Result<(), ExtractError> {
        if state.engine.as_ref().is_some_and(|e| e.handler.is_finished()) {
            warn!("Browser connection lost; relaunching");
            state.engine = None;
            state.context = None;
        }

        if state.engine.is_none() {
            state.engine = Some(self.launch().await?);
        }

        if state.context.is_none() {
            if let Some(engine) = &state.engine {
                let created = engine
                    .browser
                    .execute(CreateBrowserContextParams::default())
                    .await?;
                debug!(context = ?created.result.browser_context_id, "Created browser context");
                state.context = Some(created.result.browser_context_id);
            }
        }

        Ok(())
    }

    #[instrument(level = "info", skip_all)]
    async fn launch(&self) -> Result<Engine, ExtractError> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-dev-shm-usage")
            .arg("--block-new-web-contents")
            .request_timeout(self.config.navigation_timeout() + Duration::from_secs(5));
        for arg in &self.config.extra_args {
            builder = builder.arg(arg.as_str());
        }
        if let Some(path) = &self.config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        let browser_config = builder.build().map_err(ExtractError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ExtractError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler error");
                }
            }
        });

        info!("Headless browser launched");
        Ok(Engine { browser, handler })
    }

    /// Navigate an already-open page and return its HTML.
    async fn load(
        &self,
        page: &Page,
        url: &str,
        blocker: &AdFilterRegistry,
    ) -> Result<String, ExtractError> {
        page.set_user_agent(self.config.user_agent_override()).await?;

        let patterns = blocker.blocked_url_patterns();
        if !patterns.is_empty() {
            page.execute(EnableParams::default()).await?;
            page.execute(SetBlockedUrLsParams::new(patterns.to_vec())).await?;
        }

        let timeout = self.config.navigation_timeout();
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(navigated) => {
                navigated?;
            }
            Err(_) => {
                return Err(ExtractError::Timeout {
                    url: url.to_string(),
                    timeout,
                });
            }
        }

        if self.config.settle_millis > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_millis)).await;
        }

        Ok(page.content().await?)
    }
}

#[async_trait]
impl PageRenderer for RenderSession {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn render(&self, url: &str) -> Result<RenderedPage, ExtractError> {
        let mut state = self.state.lock().await;
        let blocker = self.ensure_blocker(&mut state).await?;
        if blocker.is_blocked(url) {
            return Err(ExtractError::Blocked(url.to_string()));
        }
        self.ensure_browser(&mut state).await?;

        let (Some(engine), Some(context)) = (&state.engine, &state.context) else {
            return Err(ExtractError::SessionClosed);
        };

        let mut params = CreateTargetParams::new("about:blank");
        params.browser_context_id = Some(context.clone());
        let page = engine.browser.new_page(params).await?;

        let loaded = self.load(&page, url, &blocker).await;
        if let Err(e) = page.close().await {
            debug!(error = %e, "Failed to close page (non-fatal)");
        }

        let html = loaded?;
        debug!(bytes = html.len(), "Rendered page");
        Ok(RenderedPage { html, blocker })
    }

    #[instrument(level = "info", skip_all)]
    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        state.blocker = None;

        let context = state.context.take();
        let Some(mut engine) = state.engine.take() else {
            debug!("Render session was never started");
            return;
        };

        if let Some(id) = context {
            if let Err(e) = engine.browser.execute(DisposeBrowserContextParams::new(id)).await {
                warn!(error = %e, "Failed to dispose browser context");
            }
        }
        if let Err(e) = engine.browser.close().await {
            warn!(error = %e, "Failed to close browser");
        }
        if let Err(e) = engine.browser.wait().await {
            warn!(error = %e, "Failed waiting for browser process to exit");
        }
        if tokio::time::timeout(Duration::from_secs(5), &mut engine.handler)
            .await
            .is_err()
        {
            engine.handler.abort();
        }

        info!("Render session closed");
    }
}
