//! Wait step: pure think-time, no network or browser activity.

use std::time::{Duration, Instant};

use crate::error::ThrongarError;
use crate::model::WaitStep;
use crate::response::AdapterResponse;
use crate::template::{substitute, TemplateContext};
use rand::Rng;

pub async fn execute(step: &WaitStep, ctx: &TemplateContext<'_>) -> Result<AdapterResponse, ThrongarError> {
    let rendered = substitute(&step.duration, ctx)?;
    let duration = parse_duration_spec(&rendered)?;

    let start = Instant::now();
    tokio::time::sleep(duration).await;

    Ok(AdapterResponse {
        status: None,
        headers: Default::default(),
        body: None,
        elapsed_ms: start.elapsed().as_millis() as u64,
        size_bytes: 0,
    })
}

/// Parse the think-time grammar: `<n>` (seconds), `<n>-<m>` (uniform random
/// seconds in range), `<n>s`, `<n>ms`.
pub fn parse_duration_spec(spec: &str) -> Result<Duration, ThrongarError> {
    let spec = spec.trim();
    if let Some((lo, hi)) = spec.split_once('-') {
        let lo: u64 = lo.trim().parse().map_err(|_| invalid(spec))?;
        let hi: u64 = hi.trim().parse().map_err(|_| invalid(spec))?;
        if lo > hi {
            return Err(invalid(spec));
        }
        let picked = if lo == hi { lo } else { rand::thread_rng().gen_range(lo..=hi) };
        return Ok(Duration::from_secs(picked));
    }
    if let Some(ms) = spec.strip_suffix("ms") {
        return ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid(spec));
    }
    if let Some(s) = spec.strip_suffix('s') {
        return s.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid(spec));
    }
    spec.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid(spec))
}

fn invalid(spec: &str) -> ThrongarError {
    ThrongarError::ConfigInvalid(format!("invalid think-time expression '{spec}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_number_is_seconds() {
        assert_eq!(parse_duration_spec("5").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn explicit_seconds_suffix() {
        assert_eq!(parse_duration_spec("3s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn milliseconds_suffix() {
        assert_eq!(parse_duration_spec("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn range_picks_within_bounds() {
        for _ in 0..20 {
            let d = parse_duration_spec("1-3").unwrap();
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(3));
        }
    }

    #[test]
    fn invalid_expression_errors() {
        assert!(parse_duration_spec("banana").is_err());
        assert!(parse_duration_spec("5-2").is_err());
    }
}
