//! Playbook surface: the YAML document the Broker consults.
//!
//! Deserialized straight off `serde_yaml`; the core never mutates a
//! playbook, it only reads it through these types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Closed set of task kinds the Executor Registry can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Http,
    Python,
    Postgres,
    Duckdb,
    Snowflake,
    Transfer,
    Secrets,
    Playbook,
    Workbook,
    Iterator,
    Save,
    ResultAggregation,
}

impl TaskKind {
    /// Kinds the Broker treats as actionable initial-dispatch / transition targets.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            TaskKind::Http
                | TaskKind::Python
                | TaskKind::Duckdb
                | TaskKind::Postgres
                | TaskKind::Secrets
                | TaskKind::Workbook
                | TaskKind::Playbook
                | TaskKind::Save
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    Async,
    Sequential,
}

impl Default for LoopMode {
    fn default() -> Self {
        LoopMode::Async
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoopSpec {
    #[serde(rename = "in")]
    pub in_expr: String,
    pub iterator: String,
    #[serde(default)]
    pub mode: LoopMode,
}

/// A step's retry configuration, accepted in three shapes on input:
/// `true`, an integer (`max_attempts`), or a full object.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum RetrySpec {
    Enabled(bool),
    MaxAttempts(u32),
    Full(RetryConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryConfig::default_initial_delay")]
    pub initial_delay: f64,
    #[serde(default = "RetryConfig::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "RetryConfig::default_max_delay")]
    pub max_delay: f64,
    #[serde(default = "RetryConfig::default_jitter")]
    pub jitter: bool,
    #[serde(default)]
    pub retry_when: Option<String>,
    #[serde(default)]
    pub stop_when: Option<String>,
}

impl RetryConfig {
    pub fn default_max_attempts() -> u32 {
        3
    }
    pub fn default_initial_delay() -> f64 {
        1.0
    }
    pub fn default_backoff_multiplier() -> f64 {
        2.0
    }
    pub fn default_max_delay() -> f64 {
        60.0
    }
    pub fn default_jitter() -> bool {
        true
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_delay: Self::default_initial_delay(),
            backoff_multiplier: Self::default_backoff_multiplier(),
            max_delay: Self::default_max_delay(),
            jitter: Self::default_jitter(),
            retry_when: None,
            stop_when: None,
        }
    }
}

impl From<RetrySpec> for Option<RetryConfig> {
    fn from(spec: RetrySpec) -> Self {
        match spec {
            RetrySpec::Enabled(false) => None,
            RetrySpec::Enabled(true) => Some(RetryConfig::default()),
            RetrySpec::MaxAttempts(n) => Some(RetryConfig {
                max_attempts: n,
                ..RetryConfig::default()
            }),
            RetrySpec::Full(cfg) => Some(cfg),
        }
    }
}

/// One outgoing edge from a step: `next: [ {when?, step|then|else, with?} ]`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Transition {
    #[serde(default)]
    pub when: Option<String>,
    #[serde(alias = "then", alias = "else")]
    pub step: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub with: serde_json::Value,
}

/// One node in the playbook's workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Step {
    #[serde(alias = "name")]
    pub step: String,
    #[serde(rename = "type")]
    pub task_type: TaskKind,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub headers: serde_json::Value,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub with: serde_json::Value,
    #[serde(default)]
    pub resource_path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub r#loop: Option<LoopSpec>,
    #[serde(default)]
    pub save: Option<serde_json::Value>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub retry: Option<RetrySpec>,
    #[serde(default)]
    pub next: Vec<Transition>,
}

impl Step {
    /// True for a step the Broker will enqueue as a job, per the actionable
    /// rule (python additionally requires a `code` field).
    pub fn is_actionable(&self) -> bool {
        if !self.task_type.is_actionable() {
            return false;
        }
        if matches!(self.task_type, TaskKind::Python) {
            return self.code.is_some();
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkbookEntry {
    pub name: String,
    pub tool: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub args: serde_json::Value,
}

/// The parsed playbook document itself.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Playbook {
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(alias = "steps")]
    pub workflow: Vec<Step>,
    #[serde(default)]
    pub workbook: Vec<WorkbookEntry>,
}

impl Playbook {
    pub fn step_by_name(&self, name: &str) -> Option<&Step> {
        self.workflow.iter().find(|s| s.step == name)
    }

    pub fn start_step(&self) -> Option<&Step> {
        self.step_by_name("start")
    }
}

/// Denormalized projection of a playbook, cached per execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WorkflowIndex {
    pub steps: HashMap<String, Step>,
}

impl From<&Playbook> for WorkflowIndex {
    fn from(playbook: &Playbook) -> Self {
        let steps = playbook
            .workflow
            .iter()
            .map(|s| (s.step.clone(), s.clone()))
            .collect();
        WorkflowIndex { steps }
    }
}
