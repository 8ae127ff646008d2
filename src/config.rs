//! Unified configuration for docket.
//!
//! Reads `.docket/docket.toml`, then applies environment overrides, then
//! CLI flags. Every section has defaults so an empty file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! path = ".docket/docket.db"
//! lease_ttl_secs = 900
//!
//! [models]
//! fast = "claude-haiku-4-5"
//! slow = "claude-opus-4-1"
//! request_timeout_secs = 120
//!
//! [concurrency]
//! max_model_calls = 8
//!
//! [breakers.case_law]
//! failure_threshold = 3
//! success_threshold = 2
//! open_timeout_secs = 60
//!
//! [rate_limits.fast_model]
//! capacity = 60
//! refill_tokens = 60
//! refill_interval_ms = 60000
//!
//! [tiers.C]
//! quality_threshold = 3.3
//! cost_cap_usd = 75.0
//! failure_ceiling = 7
//! batch_size = 3
//! min_composite = 0.80
//!
//! [routing.overrides."C:VII"]
//! model = "slow"
//! thinking_budget = 16000
//!
//! [holds]
//! reminder_hours = 24
//! escalation_hours = 72
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use docket_common::Tier;
use serde::{Deserialize, Serialize};

use crate::gateway::ModelTier;
use crate::phase::RoutingTable;
use crate::resilience::Dependency;

/// Name of the config file inside the state directory.
pub const CONFIG_FILE: &str = "docket.toml";

/// Default state directory relative to the working directory.
pub const STATE_DIR: &str = ".docket";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long a per-order lease is honoured before another worker may steal it.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(STATE_DIR).join("docket.db")
}

fn default_lease_ttl_secs() -> u64 {
    900
}

impl StoreConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs as i64)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_fast_model")]
    pub fast: String,
    #[serde(default = "default_slow_model")]
    pub slow: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_fast_model() -> String {
    "claude-haiku-4-5".to_string()
}

fn default_slow_model() -> String {
    "claude-opus-4-1".to_string()
}

fn default_api_base() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_model(),
            slow: default_slow_model(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl ModelsConfig {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Slow => &self.slow,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseLawConfig {
    #[serde(default = "default_case_law_url")]
    pub base_url: String,
    #[serde(default = "default_case_law_token_env")]
    pub token_env: String,
    #[serde(default = "default_case_law_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_case_law_url() -> String {
    "https://www.courtlistener.com/api/rest/v4".to_string()
}

fn default_case_law_token_env() -> String {
    "CASE_LAW_API_TOKEN".to_string()
}

fn default_case_law_timeout_secs() -> u64 {
    20
}

impl Default for CaseLawConfig {
    fn default() -> Self {
        Self {
            base_url: default_case_law_url(),
            token_env: default_case_law_token_env(),
            timeout_secs: default_case_law_timeout_secs(),
        }
    }
}

impl CaseLawConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Global cap on simultaneous model invocations across all orders.
    #[serde(default = "default_max_model_calls")]
    pub max_model_calls: usize,
}

fn default_max_model_calls() -> usize {
    8
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_model_calls: default_max_model_calls(),
        }
    }
}

/// Circuit breaker thresholds for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED that open the breaker.
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN that close it.
    pub success_threshold: u32,
    /// Time spent OPEN before the next read moves it to HALF_OPEN.
    pub open_timeout_secs: u64,
    /// Calls admitted while HALF_OPEN.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_half_open_max_calls() -> u32 {
    3
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.open_timeout_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakersConfig {
    #[serde(default = "default_fast_breaker")]
    pub fast_model: BreakerConfig,
    #[serde(default = "default_slow_breaker")]
    pub slow_model: BreakerConfig,
    #[serde(default = "default_case_law_breaker")]
    pub case_law: BreakerConfig,
}

fn default_fast_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 5,
        success_threshold: 2,
        open_timeout_secs: 60,
        half_open_max_calls: 3,
    }
}

fn default_slow_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_timeout_secs: 120,
        half_open_max_calls: 2,
    }
}

fn default_case_law_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_timeout_secs: 60,
        half_open_max_calls: 3,
    }
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            fast_model: default_fast_breaker(),
            slow_model: default_slow_breaker(),
            case_law: default_case_law_breaker(),
        }
    }
}

impl BreakersConfig {
    pub fn for_dependency(&self, dependency: Dependency) -> BreakerConfig {
        match dependency {
            Dependency::FastModel => self.fast_model,
            Dependency::SlowModel => self.slow_model,
            Dependency::CaseLaw => self.case_law,
        }
    }
}

/// Token bucket parameters for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_tokens: u32,
    pub refill_interval_ms: u64,
    /// Longest a caller blocks waiting for a token.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_max_wait_ms() -> u64 {
    30_000
}

impl RateLimitConfig {
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_fast_rate")]
    pub fast_model: RateLimitConfig,
    #[serde(default = "default_slow_rate")]
    pub slow_model: RateLimitConfig,
    #[serde(default = "default_case_law_rate")]
    pub case_law: RateLimitConfig,
}

fn default_fast_rate() -> RateLimitConfig {
    RateLimitConfig {
        capacity: 60,
        refill_tokens: 60,
        refill_interval_ms: 60_000,
        max_wait_ms: default_max_wait_ms(),
    }
}

fn default_slow_rate() -> RateLimitConfig {
    RateLimitConfig {
        capacity: 20,
        refill_tokens: 20,
        refill_interval_ms: 60_000,
        max_wait_ms: default_max_wait_ms(),
    }
}

fn default_case_law_rate() -> RateLimitConfig {
    RateLimitConfig {
        capacity: 60,
        refill_tokens: 60,
        refill_interval_ms: 60_000,
        max_wait_ms: default_max_wait_ms(),
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            fast_model: default_fast_rate(),
            slow_model: default_slow_rate(),
            case_law: default_case_law_rate(),
        }
    }
}

impl RateLimitsConfig {
    pub fn for_dependency(&self, dependency: Dependency) -> RateLimitConfig {
        match dependency {
            Dependency::FastModel => self.fast_model,
            Dependency::SlowModel => self.slow_model,
            Dependency::CaseLaw => self.case_law,
        }
    }
}

/// Thresholds that vary by order tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Minimum judge-simulation grade on a 4.0 scale.
    pub quality_threshold: f64,
    /// AI spend at which the cost-cap exit fires.
    pub cost_cap_usd: f64,
    /// Existence/holding/quote failures that pause the pipeline.
    pub failure_ceiling: u32,
    /// Claims verified per batch.
    pub batch_size: usize,
    /// Minimum composite confidence for a claim to pass.
    pub min_composite: f64,
}

impl TierPolicy {
    pub fn cost_cap_nanos(&self) -> i64 {
        (self.cost_cap_usd * 1e9).round() as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiersConfig {
    #[serde(rename = "A", default = "default_tier_a")]
    pub a: TierPolicy,
    #[serde(rename = "B", default = "default_tier_b")]
    pub b: TierPolicy,
    #[serde(rename = "C", default = "default_tier_c")]
    pub c: TierPolicy,
    #[serde(rename = "D", default = "default_tier_d")]
    pub d: TierPolicy,
}

fn default_tier_a() -> TierPolicy {
    TierPolicy {
        quality_threshold: 3.0,
        cost_cap_usd: 15.0,
        failure_ceiling: 3,
        batch_size: 5,
        min_composite: 0.70,
    }
}

fn default_tier_b() -> TierPolicy {
    TierPolicy {
        quality_threshold: 3.3,
        cost_cap_usd: 35.0,
        failure_ceiling: 5,
        batch_size: 4,
        min_composite: 0.75,
    }
}

fn default_tier_c() -> TierPolicy {
    TierPolicy {
        quality_threshold: 3.3,
        cost_cap_usd: 75.0,
        failure_ceiling: 7,
        batch_size: 3,
        min_composite: 0.80,
    }
}

fn default_tier_d() -> TierPolicy {
    TierPolicy {
        quality_threshold: 3.7,
        cost_cap_usd: 150.0,
        failure_ceiling: 9,
        batch_size: 2,
        min_composite: 0.85,
    }
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            a: default_tier_a(),
            b: default_tier_b(),
            c: default_tier_c(),
            d: default_tier_d(),
        }
    }
}

impl TiersConfig {
    pub fn policy(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::A => &self.a,
            Tier::B => &self.b,
            Tier::C => &self.c,
            Tier::D => &self.d,
        }
    }
}

/// Override for one `"<tier>:<phase>"` routing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOverride {
    pub model: ModelTier,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Keyed by `"<tier>:<phase code>"`, e.g. `"C:VII"`.
    #[serde(default)]
    pub overrides: BTreeMap<String, RouteOverride>,
}

/// Elapsed-time thresholds of the checkpoint reminder ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldLadderConfig {
    #[serde(default = "default_reminder_hours")]
    pub reminder_hours: i64,
    #[serde(default = "default_escalation_hours")]
    pub escalation_hours: i64,
    #[serde(default = "default_final_notice_hours")]
    pub final_notice_hours: i64,
    #[serde(default = "default_hold_terminal_hours")]
    pub hold_terminal_hours: i64,
    #[serde(default = "default_cp3_terminal_hours")]
    pub cp3_terminal_hours: i64,
}

fn default_reminder_hours() -> i64 {
    24
}

fn default_escalation_hours() -> i64 {
    72
}

fn default_final_notice_hours() -> i64 {
    7 * 24
}

fn default_hold_terminal_hours() -> i64 {
    14 * 24
}

fn default_cp3_terminal_hours() -> i64 {
    21 * 24
}

impl Default for HoldLadderConfig {
    fn default() -> Self {
        Self {
            reminder_hours: default_reminder_hours(),
            escalation_hours: default_escalation_hours(),
            final_notice_hours: default_final_notice_hours(),
            hold_terminal_hours: default_hold_terminal_hours(),
            cp3_terminal_hours: default_cp3_terminal_hours(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

/// The complete docket.toml configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocketConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub case_law: CaseLawConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub breakers: BreakersConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub tiers: TiersConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub holds: HoldLadderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DocketConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse docket.toml")
    }

    /// Load `<state_dir>/docket.toml`, or defaults when it does not exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize docket.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("DOCKET_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("DOCKET_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DOCKET_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    pub fn tier_policy(&self, tier: Tier) -> &TierPolicy {
        self.tiers.policy(tier)
    }

    /// Startup validation. Fails on anything that would otherwise only
    /// surface as a silent default at call time.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        RoutingTable::from_config(&self.routing).context("Invalid routing table")?;

        for tier in Tier::ALL {
            let policy = self.tier_policy(tier);
            if !(0.0..=4.0).contains(&policy.quality_threshold) {
                bail!(
                    "tiers.{}.quality_threshold must be within 0.0-4.0, got {}",
                    tier,
                    policy.quality_threshold
                );
            }
            if policy.cost_cap_usd <= 0.0 {
                bail!("tiers.{}.cost_cap_usd must be positive", tier);
            }
            if policy.batch_size == 0 {
                bail!("tiers.{}.batch_size must be at least 1", tier);
            }
            if !(0.0..=1.0).contains(&policy.min_composite) {
                bail!("tiers.{}.min_composite must be within 0.0-1.0", tier);
            }
            if policy.failure_ceiling == 0 {
                bail!("tiers.{}.failure_ceiling must be at least 1", tier);
            }
        }

        for window in Tier::ALL.windows(2) {
            let lower = self.tier_policy(window[0]);
            let higher = self.tier_policy(window[1]);
            if higher.batch_size > lower.batch_size {
                warnings.push(format!(
                    "tier {} verifies larger batches ({}) than tier {} ({})",
                    window[1], higher.batch_size, window[0], lower.batch_size
                ));
            }
        }

        for dependency in Dependency::ALL {
            let breaker = self.breakers.for_dependency(dependency);
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                bail!("breakers.{} thresholds must be at least 1", dependency);
            }
            if breaker.half_open_max_calls < breaker.success_threshold {
                bail!(
                    "breakers.{}.half_open_max_calls ({}) must be at least success_threshold ({})",
                    dependency,
                    breaker.half_open_max_calls,
                    breaker.success_threshold
                );
            }
            let limit = self.rate_limits.for_dependency(dependency);
            if limit.capacity == 0 || limit.refill_tokens == 0 || limit.refill_interval_ms == 0 {
                bail!("rate_limits.{} values must be positive", dependency);
            }
        }

        let h = &self.holds;
        if !(h.reminder_hours < h.escalation_hours
            && h.escalation_hours < h.final_notice_hours
            && h.final_notice_hours < h.hold_terminal_hours
            && h.final_notice_hours < h.cp3_terminal_hours)
        {
            bail!("holds thresholds must be strictly increasing");
        }

        if self.concurrency.max_model_calls == 0 {
            bail!("concurrency.max_model_calls must be at least 1");
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_valid_defaults() {
        let config = DocketConfig::parse("").unwrap();
        assert!(config.validate().unwrap().is_empty());
        assert_eq!(config.tier_policy(Tier::C).failure_ceiling, 7);
        assert_eq!(config.tier_policy(Tier::D).batch_size, 2);
    }

    #[test]
    fn batch_size_shrinks_as_tier_rises() {
        let config = DocketConfig::default();
        let sizes: Vec<usize> = Tier::ALL
            .iter()
            .map(|t| config.tier_policy(*t).batch_size)
            .collect();
        assert_eq!(sizes, vec![5, 4, 3, 2]);
    }

    #[test]
    fn partial_tier_section_overrides_only_that_tier() {
        let config = DocketConfig::parse(
            r#"
            [tiers.B]
            quality_threshold = 3.0
            cost_cap_usd = 20.0
            failure_ceiling = 4
            batch_size = 4
            min_composite = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(config.tier_policy(Tier::B).cost_cap_usd, 20.0);
        assert_eq!(config.tier_policy(Tier::A).cost_cap_usd, 15.0);
    }

    #[test]
    fn unknown_routing_key_fails_validation() {
        let config = DocketConfig::parse(
            r#"
            [routing.overrides."Z:VII"]
            model = "slow"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_increasing_ladder_fails_validation() {
        let mut config = DocketConfig::default();
        config.holds.escalation_hours = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cost_cap_converts_to_nanodollars() {
        let config = DocketConfig::default();
        assert_eq!(config.tier_policy(Tier::A).cost_cap_nanos(), 15_000_000_000);
    }

    #[test]
    fn save_then_load_preserves_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = DocketConfig::default();
        config.concurrency.max_model_calls = 3;
        config.save(&path).unwrap();

        let loaded = DocketConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.concurrency.max_model_calls, 3);
    }

    #[test]
    fn breaker_lookup_is_per_dependency() {
        let config = DocketConfig::default();
        assert_eq!(config.breakers.for_dependency(Dependency::SlowModel).failure_threshold, 3);
        assert_eq!(config.breakers.for_dependency(Dependency::FastModel).failure_threshold, 5);
    }

    #[test]
    fn half_open_window_smaller_than_success_threshold_fails_validation() {
        let mut config = DocketConfig::default();
        config.breakers.case_law.success_threshold = 3;
        config.breakers.case_law.half_open_max_calls = 2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("half_open_max_calls"));

        config.breakers.case_law.half_open_max_calls = 3;
        assert!(config.validate().is_ok());
    }
}
