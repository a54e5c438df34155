//! Run configuration for the orchestrator.
//!
//! Configuration is parsed once at startup and validated before any
//! allocation is attempted; a bad configuration never touches the
//! scheduler.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

/// Maximum in-flight requests the server is started with.
///
/// Conservative constant for the hardware class; held fixed so sweeps
/// are comparable across runs.
pub const MAX_CONCURRENT_REQUESTS: u32 = 128;

/// Configuration errors, all fatal before allocation.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("model id must not be empty")]
    EmptyModelId,

    #[error("parallelism factor must be at least 1")]
    ZeroParallelism,

    #[error("at least one load level (request rate) is required")]
    NoLoadLevels,

    #[error("load levels must be finite and non-negative, got {0}")]
    InvalidLoadLevel(f64),
}

/// Command-line / environment arguments.
#[derive(Debug, Parser)]
#[command(name = "sweep-orchestrator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Model identifier (also used as the tokenizer name).
    #[arg(long, env = "SWP_MODEL_ID")]
    pub model_id: String,

    /// Tensor-parallel degree for the serving workload.
    #[arg(long, env = "SWP_TENSOR_PARALLEL")]
    pub tensor_parallel: u32,

    /// Load level (requests per second); repeat for a multi-rate sweep.
    #[arg(long = "rate", env = "SWP_RATES", value_delimiter = ',')]
    pub rates: Vec<f64>,

    /// Measurement duration per load level, in seconds.
    #[arg(long, default_value_t = 120)]
    pub duration_secs: u64,

    /// Warm-up duration before measurement, in seconds.
    #[arg(long, default_value_t = 30)]
    pub warmup_secs: u64,

    /// Dataset repository the load generator samples prompts from.
    #[arg(long, default_value = "hlarcher/inference-benchmarker")]
    pub dataset: String,

    /// File within the dataset repository.
    #[arg(long, default_value = "share_gpt_turns.json")]
    pub dataset_file: String,

    /// Directory the load generator writes result artifacts into.
    #[arg(long, env = "SWP_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    /// Serving binary launched in the server group.
    #[arg(long, env = "SWP_SERVER_BIN", default_value = "vllm-server")]
    pub server_bin: String,

    /// Load-generator binary invoked for the sweep.
    #[arg(long, env = "SWP_BENCHMARK_BIN", default_value = "inference-benchmarker")]
    pub benchmark_bin: String,

    /// Engine name folded into the result metadata.
    #[arg(long, env = "SWP_ENGINE", default_value = "vllm")]
    pub engine: String,

    /// Accelerators requested for the server group.
    #[arg(long, default_value_t = 1)]
    pub server_gpus: u32,

    /// Readiness timeout, in seconds.
    #[arg(long, default_value_t = 600)]
    pub readiness_timeout_secs: u64,

    /// Readiness poll interval, in seconds.
    #[arg(long, default_value_t = 1)]
    pub probe_interval_secs: u64,
}

/// Decode-shape constraints passed to the load generator.
///
/// Held constant across all load levels so results are comparable.
/// Values follow the chat profile of the original benchmark tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    pub num_tokens: u32,
    pub min_tokens: u32,
    pub max_tokens: u32,
    pub variance: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            num_tokens: 800,
            min_tokens: 50,
            max_tokens: 800,
            variance: 100,
        }
    }
}

/// Immutable, validated input for one orchestration run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model_id: String,
    pub tensor_parallel: u32,
    pub rates: Vec<f64>,
    pub duration: Duration,
    pub warmup: Duration,
    pub dataset: String,
    pub dataset_file: String,
    pub results_dir: PathBuf,
    pub server_bin: String,
    pub benchmark_bin: String,
    pub engine: String,
    pub server_gpus: u32,
    pub readiness_timeout: Duration,
    pub probe_interval: Duration,
    pub decode_options: DecodeOptions,
}

impl RunConfig {
    /// Build a validated config from parsed arguments.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let config = Self {
            model_id: cli.model_id,
            tensor_parallel: cli.tensor_parallel,
            rates: cli.rates,
            duration: Duration::from_secs(cli.duration_secs),
            warmup: Duration::from_secs(cli.warmup_secs),
            dataset: cli.dataset,
            dataset_file: cli.dataset_file,
            results_dir: cli.results_dir,
            server_bin: cli.server_bin,
            benchmark_bin: cli.benchmark_bin,
            engine: cli.engine,
            server_gpus: cli.server_gpus,
            readiness_timeout: Duration::from_secs(cli.readiness_timeout_secs),
            probe_interval: Duration::from_secs(cli.probe_interval_secs),
            decode_options: DecodeOptions::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid inputs before any resource is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_id.trim().is_empty() {
            return Err(ConfigError::EmptyModelId);
        }
        if self.tensor_parallel == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        if self.rates.is_empty() {
            return Err(ConfigError::NoLoadLevels);
        }
        for &rate in &self.rates {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::InvalidLoadLevel(rate));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_config() -> RunConfig {
        RunConfig {
            model_id: "meta-llama/Llama-3.1-8B-Instruct".to_string(),
            tensor_parallel: 1,
            rates: vec![1.0, 2.0],
            duration: Duration::from_secs(120),
            warmup: Duration::from_secs(30),
            dataset: "hlarcher/inference-benchmarker".to_string(),
            dataset_file: "share_gpt_turns.json".to_string(),
            results_dir: PathBuf::from("results"),
            server_bin: "vllm-server".to_string(),
            benchmark_bin: "inference-benchmarker".to_string(),
            engine: "vllm".to_string(),
            server_gpus: 1,
            readiness_timeout: Duration::from_secs(600),
            probe_interval: Duration::from_secs(1),
            decode_options: DecodeOptions::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_model_id_rejected() {
        let config = RunConfig {
            model_id: "  ".to_string(),
            ..valid_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyModelId));
    }

    #[test]
    fn zero_parallelism_rejected() {
        let config = RunConfig {
            tensor_parallel: 0,
            ..valid_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroParallelism));
    }

    #[test]
    fn empty_rate_list_rejected() {
        let config = RunConfig {
            rates: vec![],
            ..valid_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoLoadLevels));
    }

    #[rstest::rstest]
    #[case(vec![1.0, -0.5])]
    #[case(vec![f64::NAN])]
    #[case(vec![f64::INFINITY])]
    fn bad_rates_rejected(#[case] rates: Vec<f64>) {
        let config = RunConfig {
            rates,
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLoadLevel(_))
        ));
    }

    #[test]
    fn zero_rate_is_allowed() {
        let config = RunConfig {
            rates: vec![0.0],
            ..valid_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cli_defaults_parse() {
        let cli = Cli::parse_from([
            "sweep-orchestrator",
            "--model-id",
            "m",
            "--tensor-parallel",
            "2",
            "--rate",
            "1,2,4",
        ]);
        let config = RunConfig::from_cli(cli).unwrap();
        assert_eq!(config.rates, vec![1.0, 2.0, 4.0]);
        assert_eq!(config.duration, Duration::from_secs(120));
        assert_eq!(config.warmup, Duration::from_secs(30));
        assert_eq!(config.decode_options.num_tokens, 800);
    }
}
