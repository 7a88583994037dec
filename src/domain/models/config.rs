use serde::{Deserialize, Serialize};

use crate::infrastructure::logging::LogConfig;

/// Main configuration structure for metaopt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Task whose candidate is being improved (`meta_optimization` improves an improver)
    #[serde(default = "default_task")]
    pub task: String,

    /// Downstream task used by the meta utility
    #[serde(default = "default_subtask")]
    pub subtask: String,

    /// Promote each accepted candidate to become the improver
    #[serde(default = "default_true")]
    pub iterative: bool,

    /// Read (and write back) task seed algorithms instead of always generating them
    #[serde(default = "default_true")]
    pub use_seed_algorithm: bool,

    /// Recorded in the run identifier
    #[serde(default = "default_true")]
    pub use_improver: bool,

    /// Number of improvement iterations per run
    #[serde(default = "default_n_iterations")]
    pub n_iterations: u32,

    /// Evaluate resumed artifacts with exceptions propagated before trusting them
    #[serde(default = "default_true")]
    pub validate_on_resume: bool,

    /// Language model budget configuration
    #[serde(default)]
    pub language_model: LanguageModelConfig,

    /// Utility budget configuration
    #[serde(default)]
    pub utility: UtilityConfig,

    /// Sandbox and worker pool configuration
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Interpreter used to run candidates
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Generative service configuration
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_task() -> String {
    "meta_optimization".to_string()
}

fn default_subtask() -> String {
    "parity_noise".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_n_iterations() -> u32 {
    6
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task: default_task(),
            subtask: default_subtask(),
            iterative: true,
            use_seed_algorithm: true,
            use_improver: true,
            n_iterations: default_n_iterations(),
            validate_on_resume: true,
            language_model: LanguageModelConfig::default(),
            utility: UtilityConfig::default(),
            sandbox: SandboxConfig::default(),
            runtime: RuntimeConfig::default(),
            generator: GeneratorConfig::default(),
            paths: PathsConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Budget settings for every `LanguageModel` handed to an improver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LanguageModelConfig {
    /// Memoize identical (role, message, temperature) prompts within an attempt
    #[serde(default)]
    pub use_cache: bool,

    /// Upper bound on responses returned by a single call
    #[serde(default = "default_max_responses_per_call")]
    pub max_responses_per_call: u32,

    /// Calls allowed per language model instance
    #[serde(default = "default_call_budget")]
    pub call_budget: u32,

    /// Temperature used for seed generation
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

const fn default_max_responses_per_call() -> u32 {
    6
}

const fn default_call_budget() -> u32 {
    4
}

const fn default_temperature() -> f64 {
    0.7
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            use_cache: false,
            max_responses_per_call: default_max_responses_per_call(),
            call_budget: default_call_budget(),
            temperature: default_temperature(),
        }
    }
}

/// Utility budgets and meta-utility trial count
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UtilityConfig {
    /// Calls allowed to the meta utility per evaluation context
    #[serde(default = "default_utility_budget")]
    pub meta_budget: u32,

    /// Calls allowed to a task utility per evaluation context
    #[serde(default = "default_utility_budget")]
    pub budget: u32,

    /// Improver trials averaged by the meta utility
    #[serde(default = "default_meta_tests")]
    pub meta_tests: u32,

    /// Deadline for a single scoring program run (`null` disables it)
    #[serde(default = "default_utility_timeout_secs")]
    pub timeout_secs: Option<u64>,

    /// Score assigned to failures when exceptions are handled
    #[serde(default)]
    pub fail_value: f64,
}

const fn default_utility_budget() -> u32 {
    // max_responses_per_call * call_budget + 1
    25
}

const fn default_meta_tests() -> u32 {
    5
}

#[allow(clippy::unnecessary_wraps)]
const fn default_utility_timeout_secs() -> Option<u64> {
    Some(10 * 60)
}

impl Default for UtilityConfig {
    fn default() -> Self {
        Self {
            meta_budget: default_utility_budget(),
            budget: default_utility_budget(),
            meta_tests: default_meta_tests(),
            timeout_secs: default_utility_timeout_secs(),
            fail_value: 0.0,
        }
    }
}

/// Worker pool and execution guard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    /// Run the improver inside a deadline-bounded worker pool
    #[serde(default)]
    pub use_timeout_in_improver: bool,

    /// Wait for worker teardown when a pool is stopped
    #[serde(default)]
    pub join_pools: bool,

    /// Deadline for one improver invocation
    #[serde(default = "default_improver_timeout_secs")]
    pub improver_timeout_secs: u64,

    /// Concurrent workers per pool
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Load attempts before a transient failure becomes permanent
    #[serde(default = "default_load_attempts")]
    pub load_attempts: u32,

    /// Deadline for the runtime's syntax check
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,

    /// Address space limit per worker in megabytes
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,

    /// CPU time limit per worker in seconds
    #[serde(default)]
    pub cpu_limit_secs: Option<u64>,

    /// Open file descriptor limit per worker
    #[serde(default = "default_max_open_files")]
    pub max_open_files: Option<u64>,

    /// Largest file a worker may write, in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: Option<u64>,

    /// Process limit per worker (applies per user on Linux)
    #[serde(default)]
    pub max_processes: Option<u64>,

    /// Identifiers that reveal an attempt to build a nested worker pool
    #[serde(default = "default_forbidden_identifiers")]
    pub forbidden_identifiers: Vec<String>,

    /// Interpreter operations nulled out before candidate code is imported
    #[serde(default = "default_disabled_operations")]
    pub disabled_operations: Vec<String>,

    /// Environment variables forwarded into workers
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
}

const fn default_improver_timeout_secs() -> u64 {
    2 * 60 * 60
}

const fn default_max_workers() -> usize {
    4
}

const fn default_load_attempts() -> u32 {
    10
}

const fn default_check_timeout_secs() -> u64 {
    30
}

#[allow(clippy::unnecessary_wraps)]
const fn default_max_open_files() -> Option<u64> {
    Some(256)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_max_file_size_mb() -> Option<u64> {
    Some(64)
}

fn default_forbidden_identifiers() -> Vec<String> {
    crate::services::sandbox::guard::DEFAULT_FORBIDDEN_IDENTIFIERS
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_disabled_operations() -> Vec<String> {
    crate::services::sandbox::guard::DEFAULT_DISABLED_OPERATIONS
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_env_passthrough() -> Vec<String> {
    ["PATH", "LANG", "LC_ALL", "PYTHONPATH", "VIRTUAL_ENV"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            use_timeout_in_improver: false,
            join_pools: false,
            improver_timeout_secs: default_improver_timeout_secs(),
            max_workers: default_max_workers(),
            load_attempts: default_load_attempts(),
            check_timeout_secs: default_check_timeout_secs(),
            memory_limit_mb: None,
            cpu_limit_secs: None,
            max_open_files: default_max_open_files(),
            max_file_size_mb: default_max_file_size_mb(),
            max_processes: None,
            forbidden_identifiers: default_forbidden_identifiers(),
            disabled_operations: default_disabled_operations(),
            env_passthrough: default_env_passthrough(),
        }
    }
}

/// How candidate programs are wrapped for the worker protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HarnessKind {
    /// The bundled Python harness loads the candidate and speaks the protocol
    Python,
    /// The candidate speaks the protocol itself
    Raw,
}

/// Interpreter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Interpreter executable
    #[serde(default = "default_runtime_program")]
    pub program: String,

    /// Arguments placed before the script path
    #[serde(default)]
    pub args: Vec<String>,

    /// Source file extension for candidates and artifacts
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Protocol wrapper
    #[serde(default = "default_harness")]
    pub harness: HarnessKind,
}

fn default_runtime_program() -> String {
    "python3".to_string()
}

fn default_extension() -> String {
    "py".to_string()
}

const fn default_harness() -> HarnessKind {
    HarnessKind::Python
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: default_runtime_program(),
            args: vec![],
            extension: default_extension(),
            harness: default_harness(),
        }
    }
}

/// Generative service provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorProvider {
    AnthropicApi,
    Mock,
}

impl GeneratorProvider {
    /// Highest sampling temperature the provider accepts.
    pub const fn max_temperature(self) -> f64 {
        match self {
            Self::AnthropicApi => 1.0,
            Self::Mock => 2.0,
        }
    }
}

/// Generative service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorConfig {
    /// Which adapter serves generation requests
    #[serde(default = "default_provider")]
    pub provider: GeneratorProvider,

    /// Model identifier sent to the service
    #[serde(default = "default_model")]
    pub model: String,

    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (falls back to `ANTHROPIC_API_KEY`)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Max tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,

    /// Client-side request rate
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Retries for transient HTTP failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Canned responses served round-robin by the mock provider
    #[serde(default)]
    pub mock_responses: Vec<String>,
}

const fn default_provider() -> GeneratorProvider {
    GeneratorProvider::AnthropicApi
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

const fn default_max_tokens() -> u32 {
    4096
}

const fn default_request_timeout_secs() -> u64 {
    300
}

const fn default_requests_per_second() -> u32 {
    4
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_request_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            max_retries: default_max_retries(),
            mock_responses: vec![],
        }
    }
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    /// Root of per-run artifact directories
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// Root of task directories
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: String,

    /// Root of per-load scratch directories
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

fn default_results_dir() -> String {
    "results".to_string()
}

fn default_tasks_dir() -> String {
    "tasks".to_string()
}

fn default_scratch_dir() -> String {
    "temp".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            tasks_dir: default_tasks_dir(),
            scratch_dir: default_scratch_dir(),
        }
    }
}
