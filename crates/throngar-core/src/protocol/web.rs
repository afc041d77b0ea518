//! Browser protocol adapter, driving a real browser over WebDriver via
//! `fantoccini`. The teacher has no browser automation at all; this is
//! learned from general `fantoccini` usage rather than a pack example,
//! since nothing in the retrieval pack drives a browser.

use std::time::{Duration, Instant};

use crate::error::ThrongarError;
use crate::model::{BrowserCommand, WebStep};
use crate::response::AdapterResponse;
use crate::template::{substitute, TemplateContext};
use fantoccini::{Client, ClientBuilder};

/// One VU's browser context. Fantoccini sessions are not `Sync`-shareable
/// across VUs, so each VU owns one for the lifetime of its run.
pub struct BrowserSession {
    client: Client,
    timeout: Duration,
}

impl BrowserSession {
    pub async fn connect(webdriver_url: &str, timeout: Duration) -> Result<Self, ThrongarError> {
        let client = ClientBuilder::native()
            .connect(webdriver_url)
            .await
            .map_err(|e| ThrongarError::ProtocolError(format!("webdriver connect failed: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub async fn close(self) -> Result<(), ThrongarError> {
        self.client
            .close()
            .await
            .map_err(|e| ThrongarError::ProtocolError(format!("webdriver close failed: {e}")))
    }
}

pub async fn execute(
    step: &WebStep,
    ctx: &TemplateContext<'_>,
    session: &BrowserSession,
) -> Result<AdapterResponse, ThrongarError> {
    let start = Instant::now();

    for command in &step.commands {
        run_command(command, ctx, session).await?;
    }

    let body = session
        .client
        .source()
        .await
        .map_err(|e| ThrongarError::ProtocolError(format!("failed to read page source: {e}")))?;

    Ok(AdapterResponse {
        status: Some(200),
        headers: Default::default(),
        body: Some(body.clone()),
        elapsed_ms: start.elapsed().as_millis() as u64,
        size_bytes: body.len() as u64,
    })
}

async fn run_command(
    command: &BrowserCommand,
    ctx: &TemplateContext<'_>,
    session: &BrowserSession,
) -> Result<(), ThrongarError> {
    use fantoccini::Locator;

    let result = tokio::time::timeout(session.timeout, async {
        match command {
            BrowserCommand::Navigate { url } => {
                let url = substitute(url, ctx)?;
                session
                    .client
                    .goto(&url)
                    .await
                    .map_err(|e| ThrongarError::ProtocolError(format!("navigate failed: {e}")))
            }
            BrowserCommand::Click { selector } => {
                let selector = substitute(selector, ctx)?;
                let element = session
                    .client
                    .find(Locator::Css(&selector))
                    .await
                    .map_err(|e| ThrongarError::ProtocolError(format!("element not found: {e}")))?;
                element
                    .click()
                    .await
                    .map_err(|e| ThrongarError::ProtocolError(format!("click failed: {e}")))
            }
            BrowserCommand::Type { selector, text } => {
                let selector = substitute(selector, ctx)?;
                let text = substitute(text, ctx)?;
                let mut element = session
                    .client
                    .find(Locator::Css(&selector))
                    .await
                    .map_err(|e| ThrongarError::ProtocolError(format!("element not found: {e}")))?;
                element
                    .send_keys(&text)
                    .await
                    .map_err(|e| ThrongarError::ProtocolError(format!("type failed: {e}")))
            }
            BrowserCommand::WaitForSelector { selector } => {
                let selector = substitute(selector, ctx)?;
                session
                    .client
                    .wait()
                    .for_element(Locator::Css(&selector))
                    .await
                    .map(|_| ())
                    .map_err(|e| ThrongarError::ProtocolError(format!("wait_for_selector failed: {e}")))
            }
            BrowserCommand::AssertText { selector, expected } => {
                let selector = substitute(selector, ctx)?;
                let expected = substitute(expected, ctx)?;
                let element = session
                    .client
                    .find(Locator::Css(&selector))
                    .await
                    .map_err(|e| ThrongarError::ProtocolError(format!("element not found: {e}")))?;
                let text = element
                    .text()
                    .await
                    .map_err(|e| ThrongarError::ProtocolError(format!("read text failed: {e}")))?;
                if text.contains(&expected) {
                    Ok(())
                } else {
                    Err(ThrongarError::CheckFailed(format!(
                        "expected selector text to contain '{expected}', got '{text}'"
                    )))
                }
            }
        }
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(ThrongarError::Timeout(session.timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_step_requires_at_least_one_command() {
        let step = WebStep {
            common: Default::default(),
            commands: vec![],
        };
        assert!(step.commands.is_empty());
    }
}
