//! Virtual-user execution engine.
//!
//! Grounded in the teacher's `engine::virtual_user::run_virtual_user`: a
//! VU owns its own mutable context, loops over iterations, and checks a
//! shared cancellation signal between steps rather than only between
//! iterations. Retained and generalized here: per-step checks/extraction,
//! the `{{path}}` template context, and cooperative cancellation. Added:
//! retry-with-backoff, setup/teardown hooks, and weighted scenario
//! selection (grounded in `other_examples/lance0-kaioken`'s
//! `select_scenario`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checks::{evaluate_all as evaluate_checks, CheckOutcome};
use crate::extract::evaluate_all as evaluate_extracts;
use crate::model::{BackoffKind, GlobalConfig, Scenario, Step};
use crate::protocol::web::BrowserSession;
use crate::protocol::HttpClient;
use crate::providers::csv::CsvProvider;
use crate::result::TestResult;
use crate::template::TemplateContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuLifecycle {
    Spawning,
    Running,
    Thinking,
    Stopping,
    Terminated,
}

pub struct VuConfig {
    pub id: u32,
    pub scenarios: Arc<Vec<Scenario>>,
    pub global: Arc<GlobalConfig>,
    pub csv_providers: Arc<HashMap<String, Arc<CsvProvider>>>,
    pub result_tx: mpsc::Sender<TestResult>,
    pub cancel: CancellationToken,
    pub http: Arc<HttpClient>,
    /// Phase-level iteration cap (set for a `Basic` phase driven by
    /// `iterations` rather than `duration`), independent of a scenario's
    /// own `loop_count`.
    pub max_iterations: Option<u64>,
}

/// Select a scenario by weighted round-robin over `iteration_id`, mirroring
/// the pack's cumulative-weight roll.
pub fn select_scenario(scenarios: &[Scenario], iteration_id: u64) -> &Scenario {
    if scenarios.len() == 1 {
        return &scenarios[0];
    }
    let total_weight: u32 = scenarios.iter().map(|s| s.weight).sum();
    if total_weight == 0 {
        return &scenarios[0];
    }
    let roll = (iteration_id % total_weight as u64) as u32;
    let mut cumulative = 0u32;
    for scenario in scenarios {
        cumulative += scenario.weight;
        if roll < cumulative {
            return scenario;
        }
    }
    &scenarios[0]
}

pub async fn run_virtual_user(cfg: VuConfig) {
    let mut variables: HashMap<String, serde_json::Value> =
        cfg.global.variables.clone().into_iter().collect();
    if let Some(base_url) = &cfg.global.base_url {
        variables.insert("base_url".to_string(), serde_json::Value::String(base_url.clone()));
    }
    let mut extracted: HashMap<String, serde_json::Value> = HashMap::new();

    let mut browser: Option<BrowserSession> = None;
    if let Some(bc) = &cfg.global.browser {
        if let Some(url) = &bc.webdriver_url {
            browser = BrowserSession::connect(url, bc.timeout).await.ok();
        }
    }

    let mut iteration: u64 = 0;
    loop {
        if cfg.cancel.is_cancelled() {
            break;
        }
        if let Some(max) = cfg.max_iterations {
            if iteration >= max {
                break;
            }
        }

        let scenario = select_scenario(&cfg.scenarios, iteration).clone();

        if let Some(max) = scenario.loop_count {
            if iteration >= max {
                break;
            }
        }

        let csv_row = scenario
            .csv
            .as_ref()
            .and_then(|name| cfg.csv_providers.get(name))
            .and_then(|provider| provider.next_row(cfg.id).ok().flatten());

        if scenario.csv.is_some() && csv_row.is_none() {
            // `ExhaustionPolicy::StopVu` signalled this VU has no more rows.
            break;
        }

        if iteration == 0 {
            if run_steps(&cfg, &scenario.name, &scenario.setup, &variables, &mut extracted, csv_row.as_ref(), &mut browser)
                .await
                .is_err()
            {
                break;
            }
        }

        let cont = run_steps(&cfg, &scenario.name, &scenario.steps, &variables, &mut extracted, csv_row.as_ref(), &mut browser).await;
        if cont.is_err() && cfg.cancel.is_cancelled() {
            break;
        }

        if let Some(think_time) = &cfg.global.think_time {
            if let Ok(duration) = crate::protocol::wait::parse_duration_spec(think_time) {
                tokio::time::sleep(duration).await;
            }
        }

        iteration += 1;
    }

    let last_scenario = select_scenario(&cfg.scenarios, iteration.saturating_sub(1));
    let _ = run_steps(
        &cfg,
        &last_scenario.name,
        &last_scenario.teardown,
        &variables,
        &mut extracted,
        None,
        &mut browser,
    )
    .await;

    if let Some(session) = browser {
        let _ = session.close().await;
    }
}

async fn run_steps(
    cfg: &VuConfig,
    scenario_name: &str,
    steps: &[Step],
    variables: &HashMap<String, serde_json::Value>,
    extracted: &mut HashMap<String, serde_json::Value>,
    csv_row: Option<&HashMap<String, String>>,
    browser: &mut Option<BrowserSession>,
) -> Result<(), ()> {
    for step in steps {
        if cfg.cancel.is_cancelled() {
            return Err(());
        }
        run_one_step(cfg, scenario_name, step, variables, extracted, csv_row, browser.as_ref()).await;
    }
    Ok(())
}

async fn run_one_step(
    cfg: &VuConfig,
    scenario_name: &str,
    step: &Step,
    variables: &HashMap<String, serde_json::Value>,
    extracted: &mut HashMap<String, serde_json::Value>,
    csv_row: Option<&HashMap<String, String>>,
    browser: Option<&BrowserSession>,
) {
    let common = step.common();
    let retry = common.retry.clone();
    let max_attempts = retry.as_ref().map(|r| r.max_attempts).unwrap_or(1).max(1);

    let mut attempt = 1;
    loop {
        let ctx = TemplateContext {
            extracted,
            variables,
            csv_row,
            vu_id: cfg.id,
            iteration: 0,
        };

        let start = Instant::now();
        let outcome = crate::protocol::execute(step, &ctx, &cfg.http, browser).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (success, checks, status, error_kind, error_message, url, response_body, response_headers, size_bytes) =
            match &outcome {
                Ok(response) => {
                    let checks: Vec<CheckOutcome> = evaluate_checks(&common.checks, response);
                    let all_passed = checks.iter().all(|c| c.passed);
                    if all_passed {
                        if let Ok(values) = evaluate_extracts(&common.extract, response, true) {
                            extracted.extend(values);
                        }
                    }
                    (
                        all_passed,
                        checks,
                        response.status,
                        None,
                        None,
                        None,
                        response.body.clone(),
                        Some(response.headers.clone()),
                        response.size_bytes,
                    )
                }
                Err(e) => (false, vec![], None, Some(classify(e)), Some(e.to_string()), None, None, None, 0),
            };

        let action = step_kind(step);
        let result = TestResult {
            id: Uuid::new_v4(),
            vu_id: cfg.id,
            iteration: 0,
            scenario: scenario_name.to_string(),
            step: common.name.clone(),
            action: action.to_string(),
            timestamp: chrono::Utc::now(),
            duration_ms,
            success,
            status,
            error_kind,
            error_message,
            url,
            method: None,
            response_headers,
            response_body,
            response_size_bytes: size_bytes,
            custom_metrics: Default::default(),
            attempt,
        };

        let _ = cfg.result_tx.send(result).await;

        if success || attempt >= max_attempts {
            break;
        }

        if let Some(policy) = &retry {
            if let Some(delay) = policy.delay {
                let wait = match policy.backoff {
                    BackoffKind::Linear => delay * attempt,
                    BackoffKind::Exponential => delay * 2u32.pow(attempt - 1),
                };
                tokio::time::sleep(wait).await;
            }
        }
        attempt += 1;
    }
}

fn step_kind(step: &Step) -> &'static str {
    match step {
        Step::Rest(_) => "rest",
        Step::Soap(_) => "soap",
        Step::Web(_) => "web",
        Step::Wait(_) => "wait",
        Step::Custom(_) => "custom",
        Step::Script(_) => "script",
    }
}

fn classify(err: &crate::error::ThrongarError) -> String {
    match err {
        crate::error::ThrongarError::Timeout(_) => "timeout".to_string(),
        crate::error::ThrongarError::ProtocolError(_) => "protocol_error".to_string(),
        crate::error::ThrongarError::TemplateError(_) => "template_error".to_string(),
        crate::error::ThrongarError::CheckFailed(_) => "check_failed".to_string(),
        crate::error::ThrongarError::ExtractionFailed(_) => "extraction_failed".to_string(),
        _ => "error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scenario;

    fn scenario(name: &str, weight: u32) -> Scenario {
        Scenario {
            name: name.into(),
            weight,
            loop_count: None,
            csv: None,
            setup: vec![],
            steps: vec![],
            teardown: vec![],
        }
    }

    #[test]
    fn single_scenario_always_selected() {
        let scenarios = vec![scenario("only", 1)];
        assert_eq!(select_scenario(&scenarios, 0).name, "only");
        assert_eq!(select_scenario(&scenarios, 99).name, "only");
    }

    #[test]
    fn weighted_selection_is_deterministic_by_iteration() {
        let scenarios = vec![scenario("a", 1), scenario("b", 3)];
        // total weight 4: rolls 0 -> a, 1..=3 -> b
        assert_eq!(select_scenario(&scenarios, 0).name, "a");
        assert_eq!(select_scenario(&scenarios, 1).name, "b");
        assert_eq!(select_scenario(&scenarios, 3).name, "b");
        assert_eq!(select_scenario(&scenarios, 4).name, "a");
    }

    #[test]
    fn zero_total_weight_falls_back_to_first() {
        let scenarios = vec![scenario("a", 0), scenario("b", 0)];
        assert_eq!(select_scenario(&scenarios, 5).name, "a");
    }
}
