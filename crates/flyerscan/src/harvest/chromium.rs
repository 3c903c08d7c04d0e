//! `chromiumoxide` implementation of the browser contract.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;

use super::browser::{BrowserLauncher, BrowserSession};
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::session::SessionCookie;

const IMAGE_SOURCES_JS: &str =
    "Array.from(document.images).map(img => img.currentSrc || img.src).filter(Boolean)";

const HEADER_TEXT_JS: &str = r#"[document.title]
    .concat(Array.from(document.querySelectorAll('h1, h2, [role="main"] h1')).slice(0, 8).map(e => e.innerText))
    .join('\n')"#;

const VISIBLE_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

const SCROLL_JS: &str = "window.scrollTo(0, document.body.scrollHeight); true";

fn browser_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Browser(e.to_string())
}

pub struct ChromiumLauncher {
    headless: bool,
    executable: Option<String>,
}

impl ChromiumLauncher {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            headless: config.headless,
            executable: config.chrome_executable.clone(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, HarvestError> {
        let mut builder = BrowserConfig::builder();
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(HarvestError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(HarvestError::Launch(e.to_string()));
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            closed: false,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    closed: bool,
}

impl ChromiumSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T, HarvestError> {
        self.page
            .evaluate(js)
            .await
            .map_err(browser_err)?
            .into_value::<T>()
            .map_err(browser_err)
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), HarvestError> {
        let params = cookies
            .iter()
            .map(|c| {
                CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .secure(c.secure)
                    .http_only(c.http_only)
                    .build()
                    .map_err(HarvestError::Browser)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.page.set_cookies(params).await.map_err(browser_err)?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), HarvestError> {
        self.page.goto(url).await.map_err(browser_err)?;
        self.page.wait_for_navigation().await.map_err(browser_err)?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, HarvestError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(browser_err)?
            .unwrap_or_default())
    }

    async fn visible_text(&mut self) -> Result<String, HarvestError> {
        self.eval(VISIBLE_TEXT_JS).await
    }

    async fn header_text(&mut self) -> Result<String, HarvestError> {
        self.eval(HEADER_TEXT_JS).await
    }

    async fn image_sources(&mut self) -> Result<Vec<String>, HarvestError> {
        self.eval(IMAGE_SOURCES_JS).await
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), HarvestError> {
        let _: bool = self.eval(SCROLL_JS).await?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, HarvestError> {
        let cookies = self.page.get_cookies().await.map_err(browser_err)?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: (c.expires > 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn submit_login(
        &mut self,
        login_url: &str,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<(), HarvestError> {
        self.navigate(login_url).await?;

        self.page
            .find_element("input[name=\"email\"]")
            .await
            .map_err(browser_err)?
            .click()
            .await
            .map_err(browser_err)?
            .type_str(identifier)
            .await
            .map_err(browser_err)?;

        self.page
            .find_element("input[name=\"pass\"]")
            .await
            .map_err(browser_err)?
            .click()
            .await
            .map_err(browser_err)?
            .type_str(secret.expose_secret())
            .await
            .map_err(browser_err)?
            .press_key("Enter")
            .await
            .map_err(browser_err)?;

        self.page.wait_for_navigation().await.map_err(browser_err)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), HarvestError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.browser.close().await.map_err(browser_err);
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        result.map(|_| ())
    }
}
