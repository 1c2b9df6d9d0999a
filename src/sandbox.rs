//! HTTP client for the code execution sandbox
//!
//! The sandbox compiles and runs untrusted code behind a language-agnostic
//! execute endpoint. One invocation means one POST carrying the resolved
//! language, version, a single source file, stdin and the configured
//! compile/run ceilings. The client never retries; callers decide what a
//! failed execution means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::languages;

/// Sandbox configuration, loaded from the environment
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Full URL of the execute endpoint
    pub base_url: String,
    /// Run phase wall-clock ceiling in milliseconds
    pub run_timeout_ms: u32,
    /// Compile phase wall-clock ceiling in milliseconds
    pub compile_timeout_ms: u32,
    /// Run phase memory ceiling, -1 for unlimited
    pub run_memory_limit: i64,
    /// Compile phase memory ceiling, -1 for unlimited
    pub compile_memory_limit: i64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:2000/api/v2/execute".to_string(),
            run_timeout_ms: 5_000,
            compile_timeout_ms: 10_000,
            run_memory_limit: -1,
            compile_memory_limit: -1,
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("SANDBOX_URL").unwrap_or(defaults.base_url),
            run_timeout_ms: env_number("SANDBOX_RUN_TIMEOUT_MS", defaults.run_timeout_ms),
            compile_timeout_ms: env_number(
                "SANDBOX_COMPILE_TIMEOUT_MS",
                defaults.compile_timeout_ms,
            ),
            run_memory_limit: env_number("SANDBOX_RUN_MEMORY_LIMIT", defaults.run_memory_limit),
            compile_memory_limit: env_number(
                "SANDBOX_COMPILE_MEMORY_LIMIT",
                defaults.compile_memory_limit,
            ),
        }
    }
}

fn env_number<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring non-numeric {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Request body for the sandbox execute endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub version: String,
    pub files: Vec<FileEntry>,
    pub stdin: String,
    pub args: Vec<String>,
    pub compile_timeout: u32,
    pub run_timeout: u32,
    pub compile_memory_limit: i64,
    pub run_memory_limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub content: String,
}

/// Response from the sandbox execute endpoint.
///
/// Every field tolerates absence: runtimes differ in what they report,
/// and unknown extra fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<PhaseOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<PhaseOutput>,
}

/// Output of one sandbox phase (compile or run)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseOutput {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    /// Exit code; some runtimes omit it on clean termination
    #[serde(default)]
    pub code: Option<i32>,
    /// Interleaved stdout/stderr as the sandbox saw it
    #[serde(default)]
    pub output: Option<String>,
    /// Signal name on abnormal termination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

/// Errors from the sandbox HTTP layer
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout)
    #[error("sandbox request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The sandbox answered with a non-2xx status
    #[error("sandbox returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Seam for driving code execution; the worker only sees this trait.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run `source_code` under `language` with optional stdin. The
    /// language may be an alias or carry a version suffix; it is
    /// normalized before the sandbox sees it.
    async fn execute(
        &self,
        language: &str,
        source_code: &str,
        stdin: Option<&str>,
    ) -> Result<ExecutionResponse, SandboxError>;
}

/// HTTP client for a single sandbox endpoint
pub struct SandboxClient {
    http: reqwest::Client,
    config: SandboxConfig,
}

impl SandboxClient {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(SandboxConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn build_request(
        &self,
        language: &str,
        source_code: &str,
        stdin: Option<&str>,
    ) -> ExecutionRequest {
        let spec = languages::resolve(language);
        ExecutionRequest {
            language: spec.language,
            version: spec.version,
            files: vec![FileEntry {
                name: spec.source_file,
                content: source_code.to_string(),
            }],
            stdin: stdin.unwrap_or_default().to_string(),
            args: Vec::new(),
            compile_timeout: self.config.compile_timeout_ms,
            run_timeout: self.config.run_timeout_ms,
            compile_memory_limit: self.config.compile_memory_limit,
            run_memory_limit: self.config.run_memory_limit,
        }
    }
}

#[async_trait]
impl CodeExecutor for SandboxClient {
    async fn execute(
        &self,
        language: &str,
        source_code: &str,
        stdin: Option<&str>,
    ) -> Result<ExecutionResponse, SandboxError> {
        let request = self.build_request(language, source_code, stdin);
        debug!(
            "Sending {} execution to sandbox at {}",
            request.language, self.config.base_url
        );

        let response = self
            .http
            .post(&self.config.base_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SandboxError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(parse_execution_response(&body))
    }
}

/// Parse a 2xx sandbox body. An unparseable body is a failed execution
/// with no phases, not an error: the caller grades it as a failure.
pub(crate) fn parse_execution_response(body: &str) -> ExecutionResponse {
    match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Unparseable sandbox response: {}. Body: {}", e, body);
            ExecutionResponse::default()
        }
    }
}

/// Serialize a sandbox response for the submission results document.
pub fn serialize_response(response: &ExecutionResponse) -> String {
    match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            warn!("Unable to serialize sandbox response: {}", e);
            "{}".to_string()
        }
    }
}
