use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `OUTREACH__` (nested keys separated by `__`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sequences: SequencesConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sms: SmsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            scheduler: SchedulerConfig::default(),
            sequences: SequencesConfig::default(),
            email: EmailConfig::default(),
            sms: SmsConfig::default(),
        }
    }
}

// ─── Scheduler Config ───────────────────────────────────────────────────────

/// Settings for the periodic due-step trigger and the batches it runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
}

fn default_scheduler_enabled() -> bool { true }
fn default_tick_interval_secs() -> u64 { 60 }
fn default_batch_cap() -> usize { 100 }
fn default_max_concurrency() -> usize { 16 }
fn default_step_timeout_ms() -> u64 { 10_000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            tick_interval_secs: default_tick_interval_secs(),
            batch_cap: default_batch_cap(),
            max_concurrency: default_max_concurrency(),
            step_timeout_ms: default_step_timeout_ms(),
        }
    }
}

// ─── Sequences Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SequencesConfig {
    /// Days after execution at which a task step's activity falls due.
    #[serde(default = "default_task_due_days")]
    pub task_due_days: u32,
    #[serde(default)]
    pub seed_demo: bool,
}

fn default_task_due_days() -> u32 { 1 }

impl Default for SequencesConfig {
    fn default() -> Self {
        Self {
            task_due_days: default_task_due_days(),
            seed_demo: false,
        }
    }
}

// ─── Channel Configs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_tracking")]
    pub open_tracking: bool,
    #[serde(default = "default_tracking")]
    pub click_tracking: bool,
}

fn default_from_email() -> String { "outreach@example.com".to_string() }
fn default_from_name() -> String { "Outreach".to_string() }
fn default_tracking() -> bool { true }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            from_name: default_from_name(),
            open_tracking: default_tracking(),
            click_tracking: default_tracking(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    #[serde(default = "default_from_number")]
    pub from_number: String,
}

fn default_from_number() -> String { "+15550100000".to_string() }

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            from_number: default_from_number(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("OUTREACH")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
