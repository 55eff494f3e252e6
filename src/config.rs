use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "codegrade", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    pub problems: Vec<ProblemSeed>,
}

impl Config {
    /// Rejects configurations that would make scoring or limits undefined.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for problem in &self.problems {
            if !seen.insert(problem.id) {
                anyhow::bail!("duplicate problem id {}", problem.id);
            }
            if problem.max_score <= 0 {
                anyhow::bail!("problem {}: max_score must be positive", problem.id);
            }
            if problem.time_limit_s == 0 || problem.memory_limit_mb == 0 {
                anyhow::bail!("problem {}: time and memory limits must be positive", problem.id);
            }
            for (idx, case) in problem.cases.iter().enumerate() {
                if case.weight <= 0 {
                    anyhow::bail!("problem {} case {}: weight must be positive", problem.id, idx);
                }
            }
        }
        if self.executor.workers == 0 {
            anyhow::bail!("executor.workers must not be 0");
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    /// Upper bound on how long a blocking submission may wait for a free
    /// execution slot before the request is rejected as busy.
    #[serde(default = "default_wait_timeout_s")]
    pub wait_timeout_s: u64,
}

#[derive(Deserialize, Debug)]
pub struct ExecutorConfig {
    /// Number of concurrently running sandbox workers.
    #[serde(default = "default_workers")]
    pub workers: u8,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SandboxConfig {
    /// Permits falling back to unsandboxed local execution when no isolation
    /// backend is reachable. Development and test environments only; when
    /// false (the default) the service refuses to start without a backend.
    #[serde(default)]
    pub allow_unsandboxed: bool,
    #[serde(default)]
    pub images: SandboxImages,
}

/// Per-language container images used by the isolation backend.
#[derive(Deserialize, Debug, Clone)]
pub struct SandboxImages {
    #[serde(default = "default_python_image")]
    pub python: String,
    #[serde(default = "default_javascript_image")]
    pub javascript: String,
    #[serde(default = "default_java_image")]
    pub java: String,
}

impl Default for SandboxImages {
    fn default() -> Self {
        Self {
            python: default_python_image(),
            javascript: default_javascript_image(),
            java: default_java_image(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProblemSeed {
    pub id: i64,
    pub title: String,
    pub statement: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_max_score")]
    pub max_score: i64,
    #[serde(default = "default_time_limit_s")]
    pub time_limit_s: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    /// Per-language starter code shown to the user in the editor.
    #[serde(default = "default_python_template")]
    pub python_template: String,
    #[serde(default = "default_javascript_template")]
    pub javascript_template: String,
    #[serde(default = "default_java_template")]
    pub java_template: String,
    pub cases: Vec<TestCaseSeed>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestCaseSeed {
    pub input_data: String,
    pub expected_output: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_sample: bool,
}

fn default_workers() -> u8 {
    2
}

fn default_wait_timeout_s() -> u64 {
    60
}

fn default_python_image() -> String {
    "python:3.11-alpine".to_string()
}

fn default_javascript_image() -> String {
    "node:18-alpine".to_string()
}

fn default_java_image() -> String {
    "openjdk:17-alpine".to_string()
}

fn default_difficulty() -> String {
    "easy".to_string()
}

fn default_category() -> String {
    "other".to_string()
}

fn default_max_score() -> i64 {
    100
}

fn default_time_limit_s() -> u64 {
    5
}

fn default_memory_limit_mb() -> u32 {
    256
}

fn default_weight() -> i64 {
    1
}

fn default_python_template() -> String {
    "def solution():\n    pass".to_string()
}

fn default_javascript_template() -> String {
    "function solution() {\n    \n}".to_string()
}

fn default_java_template() -> String {
    "class Solution {\n    public void solution() {\n        \n    }\n}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "server": { "bind_address": "127.0.0.1", "bind_port": 12345 },
        "executor": { "workers": 3 },
        "sandbox": { "allow_unsandboxed": true },
        "problems": [
            {
                "id": 1,
                "title": "Add One",
                "statement": "Return the input plus one.",
                "difficulty": "easy",
                "category": "math",
                "cases": [
                    { "input_data": "5", "expected_output": "6", "is_sample": true },
                    { "input_data": "41", "expected_output": "42", "weight": 3, "is_hidden": true }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_config_deserialization() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.bind_address, Some("127.0.0.1".to_string()));
        assert_eq!(config.server.wait_timeout_s, 60);
        assert_eq!(config.executor.workers, 3);
        assert!(config.sandbox.allow_unsandboxed);
        assert_eq!(config.sandbox.images.python, "python:3.11-alpine");
        assert_eq!(config.problems[0].max_score, 100);
        assert_eq!(config.problems[0].time_limit_s, 5);
        assert_eq!(config.problems[0].python_template, "def solution():\n    pass");
        assert_eq!(config.problems[0].cases[1].weight, 3);
        assert!(config.problems[0].cases[1].is_hidden);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_nonpositive_weight() {
        let mut config: Config = serde_json::from_str(SAMPLE).unwrap();
        config.problems[0].cases[0].weight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_problem_ids() {
        let mut config: Config = serde_json::from_str(SAMPLE).unwrap();
        let copy = config.problems[0].clone();
        config.problems.push(copy);
        assert!(config.validate().is_err());
    }
}
