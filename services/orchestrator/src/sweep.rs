//! Sweep driver.
//!
//! Invokes the external load generator exactly once per run with the
//! full ordered list of load levels; the tool sequences the levels
//! internally. Before running, the driver reads the server's build
//! identifier and folds it into the run metadata so every result
//! artifact is self-describing.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{DecodeOptions, RunConfig};

/// Sweep errors. Any of these is reported verbatim as a failed sweep;
/// there is no retry.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to launch load generator: {0}")]
    Launch(#[from] std::io::Error),

    #[error("load generator exited with status {code}")]
    NonZeroExit { code: i32 },

    #[error("load generator terminated by signal")]
    Signalled,
}

/// One load-generator invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepParams {
    /// Target server base URL.
    pub target_url: String,

    /// Tokenizer / model identity.
    pub model_id: String,

    /// Ordered load levels, passed as one multi-rate sweep.
    pub rates: Vec<f64>,

    /// Measurement duration per level.
    pub duration: Duration,

    /// Warm-up duration before measurement.
    pub warmup: Duration,

    /// Free-form metadata folded into the result artifact.
    pub metadata: String,

    /// Dataset repository and file the prompts are sampled from.
    pub dataset: String,
    pub dataset_file: String,

    /// Directory the result artifact is written into.
    pub results_dir: PathBuf,

    /// Decode-shape constraints, constant across all levels.
    pub decode: DecodeOptions,
}

impl SweepParams {
    /// Build invocation parameters from the run config.
    pub fn from_config(config: &RunConfig, target_url: String, metadata: String) -> Self {
        Self {
            target_url,
            model_id: config.model_id.clone(),
            rates: config.rates.clone(),
            duration: config.duration,
            warmup: config.warmup,
            metadata,
            dataset: config.dataset.clone(),
            dataset_file: config.dataset_file.clone(),
            results_dir: config.results_dir.clone(),
            decode: config.decode_options.clone(),
        }
    }
}

/// Completed load-generator invocation. The artifact itself is written
/// by the external binary; only the exit status is inspected here.
#[derive(Debug, Clone, Copy)]
pub struct SweepRun {
    pub exit_code: i32,
}

/// Load generator interface.
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Run one sweep to completion.
    async fn run(&self, params: &SweepParams) -> Result<SweepRun, SweepError>;
}

/// Response shape of the server's info endpoint. Consumed as opaque
/// metadata only; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    sha: Option<String>,
}

/// Read an identifying version token from the server.
///
/// A server that does not expose `/info` still gets benchmarked; the
/// metadata degrades to "unknown" rather than failing the run.
pub async fn fetch_server_version(client: &reqwest::Client, base_url: &str) -> String {
    let url = format!("{base_url}/info");
    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            match response.json::<ServerInfo>().await {
                Ok(info) => {
                    let version = info
                        .version
                        .or(info.sha)
                        .unwrap_or_else(|| "unknown".to_string());
                    debug!(url = %url, version = %version, "Fetched server version");
                    version
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Malformed info payload");
                    "unknown".to_string()
                }
            }
        }
        Ok(response) => {
            warn!(url = %url, status = %response.status(), "Info endpoint not available");
            "unknown".to_string()
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to reach info endpoint");
            "unknown".to_string()
        }
    }
}

/// Compose the run metadata string.
///
/// Key=value pairs, comma-joined, as the downstream result tooling
/// expects them.
pub fn run_metadata(engine: &str, tensor_parallel: u32, version: &str) -> String {
    format!("engine={engine},tp={tensor_parallel},version={version}")
}

/// Load generator that invokes the external benchmark binary.
pub struct ProcessLoadGenerator {
    binary: String,
}

impl ProcessLoadGenerator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Argument vector for one invocation.
    fn command_args(params: &SweepParams) -> Vec<String> {
        let decode = &params.decode;

        let mut args = vec![
            "--tokenizer-name".to_string(),
            params.model_id.clone(),
            "--url".to_string(),
            params.target_url.clone(),
            "--duration".to_string(),
            format!("{}s", params.duration.as_secs()),
            "--warmup".to_string(),
            format!("{}s", params.warmup.as_secs()),
            "--benchmark-kind".to_string(),
            "rates".to_string(),
        ];

        for rate in &params.rates {
            args.push("--rates".to_string());
            args.push(rate.to_string());
        }

        args.extend([
            "--decode-options".to_string(),
            format!(
                "num_tokens={},min_tokens={},max_tokens={},variance={}",
                decode.num_tokens, decode.min_tokens, decode.max_tokens, decode.variance
            ),
            "--extra-meta".to_string(),
            params.metadata.clone(),
            "--dataset".to_string(),
            params.dataset.clone(),
            "--dataset-file".to_string(),
            params.dataset_file.clone(),
            "--no-console".to_string(),
            "--results-dir".to_string(),
            params.results_dir.display().to_string(),
        ]);

        args
    }
}

#[async_trait]
impl LoadGenerator for ProcessLoadGenerator {
    async fn run(&self, params: &SweepParams) -> Result<SweepRun, SweepError> {
        // Result sink glue: the directory must exist before the child
        // tries to write into it.
        tokio::fs::create_dir_all(&params.results_dir).await?;

        let args = Self::command_args(params);
        info!(
            binary = %self.binary,
            target_url = %params.target_url,
            rates = ?params.rates,
            metadata = %params.metadata,
            "Starting load-generation sweep"
        );

        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await?;

        match status.code() {
            Some(0) => {
                info!(results_dir = %params.results_dir.display(), "Sweep completed");
                Ok(SweepRun { exit_code: 0 })
            }
            Some(code) => Err(SweepError::NonZeroExit { code }),
            None => Err(SweepError::Signalled),
        }
    }
}

/// Scripted load generator for tests: pops one exit code per run.
pub struct MockLoadGenerator {
    exit_codes: Mutex<VecDeque<i32>>,
    run_calls: AtomicU64,
    last_params: Mutex<Option<SweepParams>>,
}

impl MockLoadGenerator {
    /// Create a mock whose runs all succeed.
    pub fn succeeding() -> Self {
        Self::with_exit_codes(vec![])
    }

    /// Create a mock that exits with the given codes, in order, then 0.
    pub fn with_exit_codes(codes: Vec<i32>) -> Self {
        Self {
            exit_codes: Mutex::new(codes.into_iter().collect()),
            run_calls: AtomicU64::new(0),
            last_params: Mutex::new(None),
        }
    }

    pub fn run_calls(&self) -> u64 {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<SweepParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoadGenerator for MockLoadGenerator {
    async fn run(&self, params: &SweepParams) -> Result<SweepRun, SweepError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());

        let code = self.exit_codes.lock().unwrap().pop_front().unwrap_or(0);
        if code == 0 {
            Ok(SweepRun { exit_code: 0 })
        } else {
            Err(SweepError::NonZeroExit { code })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_params() -> SweepParams {
        let config = crate::config::tests::valid_config();
        SweepParams::from_config(
            &config,
            "http://127.0.0.1:8500".to_string(),
            run_metadata("vllm", 1, "v0.6.3"),
        )
    }

    #[test]
    fn metadata_is_self_describing() {
        let meta = run_metadata("vllm", 4, "abc123");
        assert_eq!(meta, "engine=vllm,tp=4,version=abc123");
    }

    #[test]
    fn command_args_carry_all_rates_in_order() {
        let params = test_params();
        let args = ProcessLoadGenerator::command_args(&params);

        let rate_values: Vec<&String> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| *flag == "--rates")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(rate_values, vec!["1", "2"]);
    }

    #[test]
    fn command_args_hold_decode_shape_constant() {
        let params = test_params();
        let args = ProcessLoadGenerator::command_args(&params);

        let idx = args.iter().position(|a| a == "--decode-options").unwrap();
        assert_eq!(
            args[idx + 1],
            "num_tokens=800,min_tokens=50,max_tokens=800,variance=100"
        );
        assert!(args.contains(&"--benchmark-kind".to_string()));
        assert!(args.contains(&"rates".to_string()));
    }

    #[test]
    fn command_args_pass_target_and_sink_through() {
        let params = test_params();
        let args = ProcessLoadGenerator::command_args(&params);

        assert!(args.contains(&"http://127.0.0.1:8500".to_string()));
        assert!(args.contains(&"engine=vllm,tp=1,version=v0.6.3".to_string()));
        assert!(args.contains(&"results".to_string()));
    }

    #[tokio::test]
    async fn version_fetch_reads_info_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"version": "0.6.3", "sha": "deadbeef"})),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        assert_eq!(fetch_server_version(&client, &server.uri()).await, "0.6.3");
    }

    #[tokio::test]
    async fn version_fetch_falls_back_to_sha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"sha": "deadbeef"})),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        assert_eq!(
            fetch_server_version(&client, &server.uri()).await,
            "deadbeef"
        );
    }

    #[tokio::test]
    async fn version_fetch_degrades_to_unknown() {
        let client = reqwest::Client::new();
        assert_eq!(
            fetch_server_version(&client, "http://127.0.0.1:9").await,
            "unknown"
        );
    }

    #[tokio::test]
    async fn mock_load_generator_scripts_failures() {
        let loadgen = MockLoadGenerator::with_exit_codes(vec![1]);
        let params = test_params();

        assert!(matches!(
            loadgen.run(&params).await,
            Err(SweepError::NonZeroExit { code: 1 })
        ));
        assert!(loadgen.run(&params).await.is_ok());
        assert_eq!(loadgen.run_calls(), 2);
    }

    #[tokio::test]
    async fn process_load_generator_creates_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let results_dir = dir.path().join("nested").join("results");

        let params = SweepParams {
            results_dir: results_dir.clone(),
            ..test_params()
        };

        // `true` ignores its arguments and exits 0; good enough to prove
        // the sink directory is created and the exit status is read.
        let loadgen = ProcessLoadGenerator::new("true");
        let run = loadgen.run(&params).await.unwrap();

        assert_eq!(run.exit_code, 0);
        assert!(results_dir.is_dir());
    }

    #[tokio::test]
    async fn process_load_generator_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let params = SweepParams {
            results_dir: dir.path().to_path_buf(),
            ..test_params()
        };

        let loadgen = ProcessLoadGenerator::new("false");
        assert!(matches!(
            loadgen.run(&params).await,
            Err(SweepError::NonZeroExit { .. })
        ));
    }
}
