//! Command-line materialization for the managed programs.
//!
//! The engine and benchmark configs are flattened through their serde
//! representation: every set field becomes a `--kebab-case-flag value`
//! pair, so the config structs are the single source of flag names.

use inferbench_config::{BenchmarkConfig, Config, VllmConfig};
use inferbench_utils::constants::{ENGINE_PORT, METRICS_PATH};
use serde_json::Value;
use tracing::warn;

/// Fixed install path of the inference engine binary.
pub const ENGINE_PATH: &str = "/usr/local/bin/vllm";

/// Fixed install path of the benchmark interpreter.
pub const INTERPRETER_PATH: &str = "/opt/pytorch/bin/python3";

/// Benchmark driver script installed by the image build.
pub const BENCHMARK_SCRIPT: &str = "/home/ubuntu/ec2/cpu/benchmark.py";

/// Environment variable carrying the Hugging Face token. Secrets travel
/// through the environment, never argv.
const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// A materialized invocation: program, argument vector, environment.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Start a spec for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Loggable rendering of the invocation. Environment values are
    /// deliberately absent.
    #[must_use]
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Build the inference engine invocation: `vllm serve <model> --flags…`.
#[must_use]
pub fn engine_command(vllm: &VllmConfig, token: &str) -> CommandSpec {
    let mut spec = CommandSpec::new(ENGINE_PATH)
        .args(["serve", vllm.model.as_str()])
        .env(HF_TOKEN_ENV, token);
    spec.args.extend(flag_args(vllm, &["model"]));
    spec
}

/// Build the benchmark invocation against the engine at `target_ip`.
///
/// Appends the result-file contract (`--save_result`,
/// `--result_filename`) so the collector always finds the document at the
/// well-known path.
#[must_use]
pub fn benchmark_command(config: &Config, target_ip: &str) -> CommandSpec {
    let bench: &BenchmarkConfig = &config.benchmark;
    let mut spec = CommandSpec::new(INTERPRETER_PATH)
        .args([
            BENCHMARK_SCRIPT.to_string(),
            "--base-url".to_string(),
            format!("http://{target_ip}:{ENGINE_PORT}"),
        ])
        .env(HF_TOKEN_ENV, bench.token.as_str());

    spec.args.extend(flag_args(bench, &["token"]));

    if let Some(vllm) = &config.vllm {
        spec = spec.args(["--model", vllm.model.as_str()]);
    }

    spec.args(["--save_result", "true", "--result_filename", METRICS_PATH])
}

/// Flatten a config struct into `--flag value` pairs via serde. Fields in
/// `skip` and unset options are omitted. Key order follows the serde_json
/// map, which is sorted, so output is deterministic.
fn flag_args<T: serde::Serialize>(section: &T, skip: &[&str]) -> Vec<String> {
    let Ok(Value::Object(map)) = serde_json::to_value(section) else {
        warn!("Config section did not serialize to an object; no flags generated");
        return Vec::new();
    };

    let mut args = Vec::new();
    for (key, value) in &map {
        if skip.contains(&key.as_str()) || value.is_null() {
            continue;
        }

        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                warn!(key = %key, value = %other, "Unsupported flag value type");
                continue;
            }
        };

        args.push(format!("--{key}"));
        args.push(rendered);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        toml::from_str(
            r#"
            bench_id = "bench-1"
            provider = "aws"
            inference_engine = "vllm"
            api_key = "secret"

            [aws]
            region = "eu-west-3"
            cpu_instance_type = "c5.2xlarge"
            gpu_instance_type = "g5.xlarge"
            gpu_ami = "ami-gpu"
            cpu_ami = "ami-cpu"
            access_key = "AKIA"
            secret_key = "shhh"

            [vllm]
            model = "meta-llama/Llama-3.1-8B"
            max-model-len = 4096
            enforce-eager = true

            [benchmark]
            token = "hf_secret"
            dataset-name = "sharegpt"
            dataset-path = "anon/ShareGPT"
            hf-revision = "main"
            hf-split = "train"
            num-prompts = 100
            seed = 7
        "#,
        )
        .unwrap()
    }

    #[test]
    fn engine_command_serves_the_model_with_flags() {
        let config = test_config();
        let spec = engine_command(config.vllm.as_ref().unwrap(), "hf_secret");

        assert_eq!(spec.program, ENGINE_PATH);
        assert_eq!(spec.args[0], "serve");
        assert_eq!(spec.args[1], "meta-llama/Llama-3.1-8B");

        let joined = spec.args.join(" ");
        assert!(joined.contains("--max-model-len 4096"));
        assert!(joined.contains("--enforce-eager true"));
        // The model is positional, never a flag.
        assert!(!joined.contains("--model"));
        assert_eq!(spec.env, vec![("HF_TOKEN".to_string(), "hf_secret".to_string())]);
    }

    #[test]
    fn benchmark_command_targets_the_engine_and_saves_results() {
        let config = test_config();
        let spec = benchmark_command(&config, "10.0.0.7");

        assert_eq!(spec.program, INTERPRETER_PATH);
        assert_eq!(spec.args[0], BENCHMARK_SCRIPT);

        let joined = spec.args.join(" ");
        assert!(joined.contains("--base-url http://10.0.0.7:8000"));
        assert!(joined.contains("--num-prompts 100"));
        assert!(joined.contains("--model meta-llama/Llama-3.1-8B"));
        assert!(joined.contains("--save_result true"));
        assert!(joined.contains(&format!("--result_filename {METRICS_PATH}")));
    }

    #[test]
    fn secrets_never_reach_argv() {
        let config = test_config();
        let spec = benchmark_command(&config, "10.0.0.7");

        assert!(!spec.args.iter().any(|a| a.contains("hf_secret")));
        assert!(!spec.args.iter().any(|a| a == "--token"));
        assert!(spec.env.iter().any(|(k, v)| k == "HF_TOKEN" && v == "hf_secret"));
    }

    #[test]
    fn display_omits_the_environment() {
        let spec = CommandSpec::new("/bin/true")
            .args(["--verbose"])
            .env("SECRET", "value");
        assert_eq!(spec.display(), "/bin/true --verbose");
    }
}
