//! Configuration loading and validation.
//!
//! Grounded in the teacher's `plan::io`/`plan::validation` pair: a thin
//! async load function plus a separate validator that collects every
//! problem instead of bailing on the first one.

use crate::error::ThrongarError;
use crate::model::{Configuration, LoadPhase, Step};
use std::path::Path;

/// Load a configuration file (YAML, JSON or TOML — detected from the
/// extension) layered under `THRONGAR_*` environment overrides, then
/// validate it.
pub async fn load_config(path: impl AsRef<Path>) -> Result<Configuration, ThrongarError> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(ThrongarError::Io)?;

    let raw: config::Config = config::Config::builder()
        .add_source(config::File::from_str(&contents, detect_format(path)))
        .add_source(config::Environment::with_prefix("THRONGAR").separator("__"))
        .build()
        .map_err(|e| ThrongarError::ConfigInvalid(e.to_string()))?;

    let cfg: Configuration = raw
        .try_deserialize()
        .map_err(|e| ThrongarError::ConfigInvalid(e.to_string()))?;

    let problems = validate(&cfg);
    if !problems.is_empty() {
        return Err(ThrongarError::ConfigInvalid(problems.join("; ")));
    }

    Ok(cfg)
}

fn detect_format(path: &Path) -> config::FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => config::FileFormat::Yaml,
        Some("toml") => config::FileFormat::Toml,
        _ => config::FileFormat::Json,
    }
}

/// Collect every validation problem in a configuration instead of stopping
/// at the first one, mirroring `plan::validation::validate_plan`.
pub fn validate(cfg: &Configuration) -> Vec<String> {
    let mut problems = Vec::new();

    if cfg.name.trim().is_empty() {
        problems.push("configuration name must not be empty".to_string());
    }
    if cfg.scenarios.is_empty() {
        problems.push("at least one scenario is required".to_string());
    }

    for phase in cfg.load.phases() {
        validate_phase(&phase, &mut problems);
    }

    for scenario in &cfg.scenarios {
        if scenario.steps.is_empty() {
            problems.push(format!("scenario '{}' has no steps", scenario.name));
        }
        for step in scenario.setup.iter().chain(scenario.steps.iter()).chain(scenario.teardown.iter()) {
            validate_step(&scenario.name, step, &mut problems);
        }
        if let Some(csv) = &scenario.csv {
            if csv.trim().is_empty() {
                problems.push(format!("scenario '{}' has an empty csv reference", scenario.name));
            }
        }
    }

    if let Some(workers) = &cfg.workers {
        if workers.nodes.is_empty() {
            problems.push("workers section declared with no nodes".to_string());
        }
        for node in &workers.nodes {
            if node.capacity == 0 {
                problems.push(format!("worker {}:{} has zero capacity", node.host, node.port));
            }
        }
    }

    problems
}

fn validate_phase(phase: &LoadPhase, problems: &mut Vec<String>) {
    match phase {
        LoadPhase::Basic { vus, duration, iterations, .. } => {
            if *vus == 0 {
                problems.push("basic load phase requires vus > 0".to_string());
            }
            match (duration, iterations) {
                (None, None) => problems.push("basic load phase requires duration or iterations".to_string()),
                (Some(_), Some(_)) => {
                    problems.push("basic load phase accepts only one of duration or iterations".to_string())
                }
                _ => {}
            }
        }
        LoadPhase::Stepping { stages } if stages.is_empty() => {
            problems.push("stepping load phase requires at least one stage".to_string())
        }
        LoadPhase::Arrivals { rate, max_vus, .. } => {
            if *rate == 0 {
                problems.push("arrivals load phase requires rate > 0".to_string());
            }
            if *max_vus == 0 {
                problems.push("arrivals load phase requires max_vus > 0".to_string());
            }
        }
        _ => {}
    }
}

fn validate_step(scenario: &str, step: &Step, problems: &mut Vec<String>) {
    let name = step.name();
    if name.trim().is_empty() {
        problems.push(format!("scenario '{scenario}' has a step with an empty name"));
    }
    match step {
        Step::Rest(r) if r.url.trim().is_empty() => {
            problems.push(format!("scenario '{scenario}' step '{name}' has an empty url"))
        }
        Step::Soap(s) if s.url.trim().is_empty() => {
            problems.push(format!("scenario '{scenario}' step '{name}' has an empty url"))
        }
        Step::Web(w) if w.commands.is_empty() => {
            problems.push(format!("scenario '{scenario}' step '{name}' has no browser commands"))
        }
        _ => {}
    }
    if let Some(retry) = &step.common().retry {
        if retry.max_attempts == 0 {
            problems.push(format!(
                "scenario '{scenario}' step '{name}' retry.max_attempts must be > 0"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalConfig, LoadSpec, RestStep, Scenario, StepCommon};

    fn sample_config() -> Configuration {
        Configuration {
            name: "smoke".into(),
            description: String::new(),
            global: GlobalConfig::default(),
            load: LoadSpec::Single(LoadPhase::Basic {
                vus: 1,
                ramp_up: None,
                duration: Some(std::time::Duration::from_secs(1)),
                iterations: None,
            }),
            scenarios: vec![Scenario {
                name: "s1".into(),
                weight: 1,
                loop_count: Some(1),
                csv: None,
                setup: vec![],
                steps: vec![Step::Rest(RestStep {
                    common: StepCommon { name: "get".into(), ..Default::default() },
                    method: "GET".into(),
                    url: "{{base_url}}/".into(),
                    headers: Default::default(),
                    body: None,
                    auth: None,
                })],
                teardown: vec![],
            }],
            outputs: vec![],
            report: None,
            workers: None,
            debug: Default::default(),
            environments: Default::default(),
        }
    }

    #[test]
    fn valid_config_has_no_problems() {
        assert!(validate(&sample_config()).is_empty());
    }

    #[test]
    fn empty_name_is_a_problem() {
        let mut cfg = sample_config();
        cfg.name = String::new();
        assert!(validate(&cfg).iter().any(|p| p.contains("name")));
    }

    #[test]
    fn zero_vus_basic_phase_is_a_problem() {
        let mut cfg = sample_config();
        cfg.load = LoadSpec::Single(LoadPhase::Basic {
            vus: 0,
            ramp_up: None,
            duration: Some(std::time::Duration::from_secs(1)),
            iterations: None,
        });
        assert!(validate(&cfg).iter().any(|p| p.contains("vus > 0")));
    }

    #[test]
    fn scenario_without_steps_is_a_problem() {
        let mut cfg = sample_config();
        cfg.scenarios[0].steps.clear();
        assert!(validate(&cfg).iter().any(|p| p.contains("no steps")));
    }

    #[test]
    fn basic_phase_needs_exactly_one_of_duration_or_iterations() {
        let mut cfg = sample_config();
        cfg.load = LoadSpec::Single(LoadPhase::Basic { vus: 1, ramp_up: None, duration: None, iterations: None });
        assert!(validate(&cfg).iter().any(|p| p.contains("duration or iterations")));

        cfg.load = LoadSpec::Single(LoadPhase::Basic {
            vus: 1,
            ramp_up: None,
            duration: Some(std::time::Duration::from_secs(1)),
            iterations: Some(5),
        });
        assert!(validate(&cfg).iter().any(|p| p.contains("only one of")));
    }
}
