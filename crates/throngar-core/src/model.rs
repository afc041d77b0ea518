//! Core data model: configuration, steps, checks, extracts, load phases.
//!
//! Mirrors the teacher's tagged-variant convention (see the old `RequestBody`/
//! `LoopCount`/`Auth` enums) but sized to the scenario/step/phase shape this
//! engine actually drives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub global: GlobalConfig,
    pub load: LoadSpec,
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub outputs: Vec<OutputSinkConfig>,
    #[serde(default)]
    pub report: Option<ReportConfig>,
    #[serde(default)]
    pub workers: Option<WorkersConfig>,
    #[serde(default)]
    pub debug: DebugConfig,
    /// Named overlays selected with `run --env <name>`, each overriding the
    /// fields it sets on top of `global` (variables are merged, not
    /// replaced).
    #[serde(default)]
    pub environments: HashMap<String, GlobalConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub think_time: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub browser: Option<BrowserConfig>,
    #[serde(default)]
    pub faker: Option<FakerConfig>,
    #[serde(default)]
    pub max_response_body_size: Option<usize>,
}

impl GlobalConfig {
    /// Layer `overlay` on top of `self`: scalar fields in the overlay
    /// replace `self`'s, `variables` are merged with overlay entries
    /// winning on key collision.
    pub fn merge_overlay(&mut self, overlay: &GlobalConfig) {
        if overlay.base_url.is_some() {
            self.base_url = overlay.base_url.clone();
        }
        if overlay.timeout.is_some() {
            self.timeout = overlay.timeout;
        }
        if overlay.think_time.is_some() {
            self.think_time = overlay.think_time.clone();
        }
        if overlay.browser.is_some() {
            self.browser = overlay.browser.clone();
        }
        if overlay.faker.is_some() {
            self.faker = overlay.faker.clone();
        }
        if overlay.max_response_body_size.is_some() {
            self.max_response_body_size = overlay.max_response_body_size;
        }
        for (k, v) in &overlay.variables {
            self.variables.insert(k.clone(), v.clone());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_browser_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub webdriver_url: Option<String>,
}

fn default_browser_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakerConfig {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Load specification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoadSpec {
    Single(LoadPhase),
    Phases(Vec<LoadPhase>),
}

impl LoadSpec {
    pub fn phases(&self) -> Vec<LoadPhase> {
        match self {
            LoadSpec::Single(p) => vec![p.clone()],
            LoadSpec::Phases(ps) => ps.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum LoadPhase {
    /// A fixed number of VUs, optionally ramped up linearly, then either
    /// held for `duration` or run until every VU has completed `iterations`
    /// loops of its scenario. Exactly one of `duration`/`iterations` is set;
    /// `config::validate_phase` enforces that.
    Basic {
        vus: u32,
        #[serde(default, with = "humantime_serde::option")]
        ramp_up: Option<Duration>,
        #[serde(default, with = "humantime_serde::option")]
        duration: Option<Duration>,
        #[serde(default)]
        iterations: Option<u64>,
    },
    /// A sequence of stages, each ramping the VU count toward a target over
    /// the stage's duration.
    Stepping { stages: Vec<Stage> },
    /// A target request arrival rate, independent of how long requests take,
    /// backed by a pool of VUs bounded by `max_vus`.
    Arrivals {
        rate: u32,
        #[serde(with = "humantime_serde")]
        duration: Duration,
        max_vus: u32,
        #[serde(default)]
        pre_allocated_vus: Option<u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub target: u32,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Linear ramp to `target` over this long; step-function (spawn/drop
    /// immediately) when absent.
    #[serde(default, with = "humantime_serde::option")]
    pub ramp_up: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub loop_count: Option<u64>,
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(default)]
    pub setup: Vec<Step>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub teardown: Vec<Step>,
}

fn default_weight() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Rest(RestStep),
    Soap(SoapStep),
    Web(WebStep),
    Wait(WaitStep),
    Custom(CustomStep),
    Script(ScriptStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Rest(s) => &s.common.name,
            Step::Soap(s) => &s.common.name,
            Step::Web(s) => &s.common.name,
            Step::Wait(s) => &s.common.name,
            Step::Custom(s) => &s.common.name,
            Step::Script(s) => &s.common.name,
        }
    }

    pub fn common(&self) -> &StepCommon {
        match self {
            Step::Rest(s) => &s.common,
            Step::Soap(s) => &s.common,
            Step::Web(s) => &s.common,
            Step::Wait(s) => &s.common,
            Step::Custom(s) => &s.common,
            Step::Script(s) => &s.common,
        }
    }
}

/// Fields every step kind shares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepCommon {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub checks: Vec<Check>,
    #[serde(default)]
    pub extract: Vec<Extract>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<BodySpec>,
    #[serde(default)]
    pub auth: Option<Auth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodySpec {
    Json(serde_json::Value),
    Form(HashMap<String, String>),
    Raw(String),
    Xml(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer { token: String },
    Digest { username: String, password: String },
    OauthToken { token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub url: String,
    #[serde(default)]
    pub soap_action: Option<String>,
    /// Raw SOAP envelope body (may contain `{{path}}` placeholders).
    pub envelope: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub commands: Vec<BrowserCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserCommand {
    Navigate { url: String },
    Click { selector: String },
    Type { selector: String, text: String },
    WaitForSelector { selector: String },
    AssertText { selector: String, expected: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitStep {
    #[serde(flatten)]
    pub common: StepCommon,
    /// `<n>`, `<n>-<m>`, `<n>s`, `<n>ms` think-time grammar.
    pub duration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub handler: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub expression: String,
}

// ---------------------------------------------------------------------------
// Check / Extract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub source: CheckSource,
    pub op: CheckOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckSource {
    Status,
    Header { name: String },
    Body,
    JsonPath { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CheckOp {
    Equals { value: serde_json::Value },
    Contains { value: String },
    Exists,
    Lt { value: f64 },
    Lte { value: f64 },
    Gt { value: f64 },
    Gte { value: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extract {
    pub name: String,
    pub source: ExtractSource,
    /// When true, extraction runs even if the step's checks failed.
    #[serde(default)]
    pub always: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractSource {
    JsonPath { path: String },
    Regex { pattern: String, group: usize },
    Header { name: String },
    Css { selector: String, attribute: Option<String> },
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default, with = "humantime_serde::option")]
    pub delay: Option<Duration>,
    #[serde(default)]
    pub backoff: BackoffKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Linear,
    Exponential,
}

// ---------------------------------------------------------------------------
// Outputs / report / workers / debug
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputSinkConfig {
    Json { path: String },
    Csv { path: String },
    InfluxLineProtocol { url: String, bucket: String, token: Option<String> },
    Graphite { host: String, port: u16, prefix: Option<String> },
    Webhook { url: String, headers: HashMap<String, String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub percentiles: Vec<f64>,
    #[serde(default = "default_true")]
    pub live_progress: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub nodes: Vec<WorkerDescriptor>,
    #[serde(default)]
    pub strategy: DistributionStrategy,
    #[serde(default)]
    pub sync_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub region: Option<String>,
}

fn default_capacity() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    #[default]
    Even,
    CapacityBased,
    RoundRobin,
    Geographic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub capture_bodies: bool,
    #[serde(default)]
    pub max_response_body_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_spec_single_phase_roundtrip() {
        let json = r#"{"pattern":"basic","vus":10,"duration":"30s"}"#;
        let phase: LoadPhase = serde_json::from_str(json).unwrap();
        match phase {
            LoadPhase::Basic { vus, duration, .. } => {
                assert_eq!(vus, 10);
                assert_eq!(duration, Some(Duration::from_secs(30)));
            }
            _ => panic!("expected Basic"),
        }
    }

    #[test]
    fn load_spec_phases_vec() {
        let json = r#"[
            {"pattern":"basic","vus":1,"duration":"1s"},
            {"pattern":"stepping","stages":[{"target":5,"duration":"10s"}]}
        ]"#;
        let spec: LoadSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.phases().len(), 2);
    }

    #[test]
    fn step_tagged_union_roundtrip() {
        let json = r#"{"type":"wait","name":"pause","duration":"500ms"}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.name(), "pause");
        assert!(matches!(step, Step::Wait(_)));
    }

    #[test]
    fn rest_step_with_bearer_auth() {
        let json = r#"{
            "type":"rest","name":"login","method":"POST","url":"{{base_url}}/login",
            "auth":{"type":"bearer","token":"{{token}}"}
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        match step {
            Step::Rest(r) => assert!(matches!(r.auth, Some(Auth::Bearer { .. }))),
            _ => panic!("expected Rest"),
        }
    }

    #[test]
    fn check_op_gte_roundtrip() {
        let check = Check {
            name: "status ok".into(),
            source: CheckSource::Status,
            op: CheckOp::Gte { value: 200.0 },
        };
        let json = serde_json::to_string(&check).unwrap();
        let parsed: Check = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed.op, CheckOp::Gte { value } if value == 200.0));
    }

    #[test]
    fn scenario_weight_defaults_to_one() {
        let json = r#"{"name":"s1","steps":[]}"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.weight, 1);
    }
}
