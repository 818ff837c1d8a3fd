//! Data models and structures
//!
//! Defines generation jobs, request/response shapes, provider tuning
//! parameters, and environment-driven configuration.

use crate::prompts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub original_image_url: String,
    pub style: String,
    pub room_type: String,
    pub prompt: String,
    pub status: JobStatus,
    /// Set only once the job is `completed`.
    pub generated_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a [`Job`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: String,
    pub original_image_url: String,
    pub style: String,
    pub room_type: String,
    pub prompt: String,
}

/// Incoming generate request. Every field is optional on the wire so that
/// missing values surface as `invalid_request` rather than a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateRequest {
    pub image_url: Option<String>,
    pub style: Option<String>,
    pub room_type: Option<String>,
    pub user_id: Option<String>,
}

impl GenerateRequest {
    pub fn new(image_url: &str, style: &str, room_type: &str, user_id: &str) -> Self {
        Self {
            image_url: Some(image_url.to_string()),
            style: Some(style.to_string()),
            room_type: Some(room_type.to_string()),
            user_id: Some(user_id.to_string()),
        }
    }
}

/// Successful result of `generate`: either finished or still processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationOutcome {
    pub id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerationOutcome {
    pub fn completed(id: Uuid, output_url: String) -> Self {
        Self {
            id,
            status: JobStatus::Completed,
            generated_image_url: Some(output_url),
            message: None,
        }
    }

    pub fn processing(id: Uuid) -> Self {
        Self {
            id,
            status: JobStatus::Processing,
            generated_image_url: None,
            message: Some("Generation is still processing; poll status for the result".to_string()),
        }
    }
}

pub const DEFAULT_MODEL_VERSION: &str =
    "a00d0b7dcbb9c3fbb34ba87d2d5b46c56969c84a628bf778a7fdaec30b1b99c5";
pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";

/// How long the provider may hold a submit open (`Prefer: wait=N`).
pub const DEFAULT_SUBMIT_WAIT: Duration = Duration::from_secs(30);
/// Longest wait the provider honours.
pub const MAX_SUBMIT_WAIT_SECS: u64 = 60;
/// Minimum headroom between the submit wait and the HTTP client timeout.
pub const SUBMIT_WAIT_HEADROOM: Duration = Duration::from_secs(5);

/// Provider tuning knobs. Derived from configuration, never from user input.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub model_version: String,
    pub guidance_scale: f64,
    /// How strongly the prompt overrides the source image structure.
    pub prompt_strength: f64,
    pub num_inference_steps: u32,
    pub negative_prompt: String,
    pub scheduler: String,
    pub num_outputs: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            guidance_scale: 7.5,
            prompt_strength: 0.6,
            num_inference_steps: 25,
            negative_prompt: prompts::NEGATIVE_PROMPT.trim().to_string(),
            scheduler: "K_EULER".to_string(),
            num_outputs: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            deadline: Duration::from_secs(60),
        }
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs the service in demo mode.
    pub replicate_api_token: Option<String>,
    pub replicate_api_base: String,
    pub model: ModelParams,
    pub poll: PollSettings,
    pub provider_timeout: Duration,
    pub submit_wait: Duration,
    pub starting_credits: u32,
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = ModelParams::default();

        let model = ModelParams {
            model_version: var("REPLICATE_MODEL_VERSION").unwrap_or(defaults.model_version),
            guidance_scale: parse_var(&var, "GUIDANCE_SCALE", defaults.guidance_scale)?,
            prompt_strength: parse_var(&var, "PROMPT_STRENGTH", defaults.prompt_strength)?,
            num_inference_steps: parse_var(
                &var,
                "NUM_INFERENCE_STEPS",
                defaults.num_inference_steps,
            )?,
            negative_prompt: var("NEGATIVE_PROMPT").unwrap_or(defaults.negative_prompt),
            scheduler: var("SCHEDULER").unwrap_or(defaults.scheduler),
            num_outputs: defaults.num_outputs,
        };

        if !(model.prompt_strength > 0.0 && model.prompt_strength <= 1.0) {
            return Err(crate::Error::Config(format!(
                "PROMPT_STRENGTH must be in (0, 1], got {}",
                model.prompt_strength
            )));
        }
        if model.num_inference_steps == 0 {
            return Err(crate::Error::Config(
                "NUM_INFERENCE_STEPS must be greater than zero".to_string(),
            ));
        }

        let poll = PollSettings {
            interval: Duration::from_millis(parse_var(&var, "POLL_INTERVAL_MS", 500u64)?),
            deadline: Duration::from_secs(parse_var(&var, "POLL_DEADLINE_SECS", 60u64)?),
        };
        if poll.interval.is_zero() || poll.deadline.is_zero() {
            return Err(crate::Error::Config(
                "POLL_INTERVAL_MS and POLL_DEADLINE_SECS must be greater than zero".to_string(),
            ));
        }

        let provider_timeout = Duration::from_secs(parse_var(&var, "PROVIDER_TIMEOUT_SECS", 60u64)?);
        let submit_wait = Duration::from_secs(parse_var(
            &var,
            "SUBMIT_WAIT_SECS",
            DEFAULT_SUBMIT_WAIT.as_secs(),
        )?);
        if submit_wait.is_zero() || submit_wait.as_secs() > MAX_SUBMIT_WAIT_SECS {
            return Err(crate::Error::Config(format!(
                "SUBMIT_WAIT_SECS must be between 1 and {}, got {}",
                MAX_SUBMIT_WAIT_SECS,
                submit_wait.as_secs()
            )));
        }
        // A submit still inside the provider's wait window must not hit the
        // client timeout, or an accepted job is reported as a dispatch failure.
        if provider_timeout < submit_wait + SUBMIT_WAIT_HEADROOM {
            return Err(crate::Error::Config(format!(
                "PROVIDER_TIMEOUT_SECS ({}) must exceed SUBMIT_WAIT_SECS ({}) by at least {}s",
                provider_timeout.as_secs(),
                submit_wait.as_secs(),
                SUBMIT_WAIT_HEADROOM.as_secs()
            )));
        }

        Ok(Self {
            replicate_api_token: var("REPLICATE_API_TOKEN"),
            replicate_api_base: var("REPLICATE_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model,
            poll,
            provider_timeout,
            submit_wait,
            starting_credits: parse_var(&var, "STARTING_CREDITS", 5u32)?,
            bind_addr: parse_var(
                &var,
                "BIND_ADDR",
                SocketAddr::from(([127, 0, 0, 1], 3000)),
            )?,
            database_path: var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("room_restyle.db")),
        })
    }
}

fn parse_var<F, T>(var: &F, key: &str, default: T) -> crate::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| crate::Error::Config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> crate::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_job_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert_eq!("failed".parse::<JobStatus>(), Ok(JobStatus::Failed));
        assert!("pending".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_generate_request_accepts_camel_case_and_missing_fields() {
        let req: GenerateRequest =
            serde_json::from_str(r#"{"imageUrl":"https://img/x.png","roomType":"kitchen"}"#)
                .unwrap();
        assert_eq!(req.image_url.as_deref(), Some("https://img/x.png"));
        assert_eq!(req.room_type.as_deref(), Some("kitchen"));
        assert!(req.style.is_none());
        assert!(req.user_id.is_none());
    }

    #[test]
    fn test_outcome_skips_empty_fields() {
        let outcome = GenerationOutcome {
            id: Uuid::nil(),
            status: JobStatus::Processing,
            generated_image_url: None,
            message: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("generated_image_url"));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_config_defaults_without_token_is_demo_mode() {
        let config = config_from(&[]).unwrap();
        assert!(config.replicate_api_token.is_none());
        assert_eq!(config.replicate_api_base, DEFAULT_API_BASE);
        assert_eq!(config.model, ModelParams::default());
        assert_eq!(config.poll, PollSettings::default());
        assert_eq!(config.starting_credits, 5);
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.submit_wait, DEFAULT_SUBMIT_WAIT);
        assert!(config.provider_timeout >= config.submit_wait + SUBMIT_WAIT_HEADROOM);
        assert_eq!(config.database_path, PathBuf::from("room_restyle.db"));
    }

    #[test]
    fn test_config_rejects_timeout_inside_submit_wait() {
        let err = config_from(&[("SUBMIT_WAIT_SECS", "60"), ("PROVIDER_TIMEOUT_SECS", "60")])
            .unwrap_err();
        assert!(err.to_string().contains("PROVIDER_TIMEOUT_SECS"));

        let err = config_from(&[("SUBMIT_WAIT_SECS", "90"), ("PROVIDER_TIMEOUT_SECS", "120")])
            .unwrap_err();
        assert!(err.to_string().contains("SUBMIT_WAIT_SECS"));

        let config =
            config_from(&[("SUBMIT_WAIT_SECS", "50"), ("PROVIDER_TIMEOUT_SECS", "55")]).unwrap();
        assert_eq!(config.submit_wait, Duration::from_secs(50));
    }

    #[test]
    fn test_config_blank_token_is_treated_as_absent() {
        let config = config_from(&[("REPLICATE_API_TOKEN", "  ")]).unwrap();
        assert!(config.replicate_api_token.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let config = config_from(&[
            ("REPLICATE_API_TOKEN", "r8_token"),
            ("GUIDANCE_SCALE", "9"),
            ("PROMPT_STRENGTH", "0.8"),
            ("NUM_INFERENCE_STEPS", "40"),
            ("POLL_INTERVAL_MS", "1000"),
            ("POLL_DEADLINE_SECS", "30"),
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("DATABASE_PATH", "/var/lib/restyle/jobs.db"),
        ])
        .unwrap();
        assert_eq!(config.replicate_api_token.as_deref(), Some("r8_token"));
        assert_eq!(config.model.guidance_scale, 9.0);
        assert_eq!(config.model.prompt_strength, 0.8);
        assert_eq!(config.model.num_inference_steps, 40);
        assert_eq!(config.poll.interval, Duration::from_secs(1));
        assert_eq!(config.poll.deadline, Duration::from_secs(30));
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.database_path, PathBuf::from("/var/lib/restyle/jobs.db"));
    }

    #[test]
    fn test_config_rejects_malformed_numbers() {
        let err = config_from(&[("NUM_INFERENCE_STEPS", "many")]).unwrap_err();
        assert!(err.to_string().contains("NUM_INFERENCE_STEPS"));

        let err = config_from(&[("PROMPT_STRENGTH", "1.5")]).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));

        let err = config_from(&[("POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
