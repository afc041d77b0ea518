pub mod custom;
pub mod rest;
pub mod soap;
pub mod wait;
pub mod web;

pub use rest::{HttpClient, HttpClientBuilder};

use crate::error::ThrongarError;
use crate::model::Step;
use crate::response::AdapterResponse;
use crate::template::TemplateContext;

/// Dispatch a step to its protocol adapter and return a normalized
/// response. REST/SOAP reuse the same pooled `HttpClient`; Web carries its
/// own `fantoccini` session; Wait/Custom/Script never touch the network.
pub async fn execute(
    step: &Step,
    ctx: &TemplateContext<'_>,
    http: &HttpClient,
    browser: Option<&web::BrowserSession>,
) -> Result<AdapterResponse, ThrongarError> {
    match step {
        Step::Rest(s) => rest::execute(s, ctx, http).await,
        Step::Soap(s) => soap::execute(s, ctx, http).await,
        Step::Web(s) => {
            let session = browser.ok_or_else(|| {
                ThrongarError::ProtocolError("web step requires a browser session".to_string())
            })?;
            web::execute(s, ctx, session).await
        }
        Step::Wait(s) => wait::execute(s, ctx).await,
        Step::Custom(s) => custom::execute(s, ctx).await,
        Step::Script(s) => custom::execute_script(s, ctx).await,
    }
}
