// ⚙️ Configuration - YAML file + environment overrides
//
// Every field has a default, so an absent file means "run with defaults".
// Lookup order: $ACCOUNT_REGISTER_CONFIG, then ./account-register.yaml.

use crate::error::{RegisterError, Result};
use crate::filing::BucketNames;
use crate::normalizer::DEFAULT_MIN_DIGIT_LEN;
use crate::pool::{PoolSizing, HARD_THREAD_CAP};
use crate::retry::RetryPolicy;
use crate::source::{DEFAULT_ACCOUNT_INFO_ALLOW, DEFAULT_ACCOUNT_INFO_DENY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_ENV: &str = "ACCOUNT_REGISTER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "account-register.yaml";

pub const ENV_MIN_DIGITS: &str = "ACCOUNT_REGISTER_MIN_DIGITS";
pub const ENV_MAX_WORKERS: &str = "ACCOUNT_REGISTER_MAX_WORKERS";
pub const ENV_DATABASE: &str = "ACCOUNT_REGISTER_DB";

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub registration: RegistrationConfig,
    pub export: ExportConfig,
    /// Messages from loading; logged once the subscriber is installed
    #[serde(skip)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub statistics_sheet: String,
    /// 1-based header row of the statistics ledger
    pub header_row: u32,
    pub ledger_file: String,
    pub report_file: String,
    pub log_file: String,
    pub buckets: BucketNames,
    pub min_digit_len: usize,
    pub fuzzy_digit_match: bool,
    pub balance_tolerance: f64,
    pub account_info_allow: String,
    pub account_info_deny: String,
    /// Fixed worker count; sized automatically when absent
    pub workers: Option<usize>,
    pub pool: PoolSizing,
    pub move_retry: RetryPolicy,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        RegistrationConfig {
            statistics_sheet: "统计表".to_string(),
            header_row: 5,
            ledger_file: "登记信息.xlsx".to_string(),
            report_file: "run_report.json".to_string(),
            log_file: crate::logging::DEFAULT_LOG_FILE.to_string(),
            buckets: BucketNames::default(),
            min_digit_len: DEFAULT_MIN_DIGIT_LEN,
            fuzzy_digit_match: true,
            balance_tolerance: 0.005,
            account_info_allow: DEFAULT_ACCOUNT_INFO_ALLOW.to_string(),
            account_info_deny: DEFAULT_ACCOUNT_INFO_DENY.to_string(),
            workers: None,
            pool: PoolSizing::registration(),
            move_retry: RetryPolicy::file_move(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub database: PathBuf,
    pub base_table: String,
    pub deposit_table: String,
    pub lease_table: String,
    pub transaction_table: String,
    pub transaction_name_fields: Vec<String>,
    pub workers: Option<usize>,
    pub transaction_workers: Option<usize>,
    pub pool: PoolSizing,
    pub print_every: usize,
    pub ensure_indexes: bool,
    pub transaction_index: bool,
    pub transaction_strip_null: bool,
    pub log_file: String,
    pub retry: RetryPolicy,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            database: PathBuf::from("investors.db"),
            base_table: "台账匹配流水结果".to_string(),
            deposit_table: "1代保管业务台账明细".to_string(),
            lease_table: "2租赁业务台账明细".to_string(),
            transaction_table: "永坤资金池账户交易明细_身份映射".to_string(),
            transaction_name_fields: [
                "对手户名",
                "对手户名_审计专用",
                "对手户名_审计专用_norm",
                "对手户名_审计专用_norm2",
                "映射_户名",
                "映射_户名_norm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            workers: None,
            transaction_workers: None,
            pool: PoolSizing::export(),
            print_every: 5,
            ensure_indexes: true,
            transaction_index: true,
            transaction_strip_null: false,
            log_file: "export_log.txt".to_string(),
            retry: RetryPolicy::export(),
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| RegisterError::Config(e.to_string()))
    }

    pub fn read_yaml(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Resolve, read, override from the environment and validate.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let path = explicit.or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        });
        let config = match path {
            Some(path) => {
                let mut config = Self::read_yaml(&path)?;
                config.notes.push(format!("读取配置文件 {}", path.display()));
                config
            }
            None => {
                let mut config = Config::default();
                config.notes.push("未找到配置文件，使用默认配置".to_string());
                config
            }
        };

        let config = config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, raw: String| -> Result<usize> {
            raw.trim()
                .parse::<usize>()
                .map_err(|_| RegisterError::Config(format!("{} must be a number, got '{}'", key, raw)))
        };

        if let Some(raw) = lookup(ENV_MIN_DIGITS) {
            self.registration.min_digit_len = parse(ENV_MIN_DIGITS, raw)?;
            self.notes.push(format!("环境变量覆盖最小数字长度: {}", self.registration.min_digit_len));
        }
        if let Some(raw) = lookup(ENV_MAX_WORKERS) {
            let max = parse(ENV_MAX_WORKERS, raw)?.clamp(1, HARD_THREAD_CAP);
            for pool in [&mut self.registration.pool, &mut self.export.pool] {
                pool.max_workers = max;
                pool.min_workers = pool.min_workers.min(max);
            }
            self.notes.push(format!("环境变量覆盖最大线程数: {}", max));
        }
        if let Some(raw) = lookup(ENV_DATABASE) {
            self.export.database = PathBuf::from(raw.trim());
            self.notes.push(format!("环境变量覆盖数据库路径: {}", self.export.database.display()));
        }
        Ok(self)
    }

    /// Emit the loading messages; call after `init_logging`.
    pub fn log_notes(&self) {
        for note in &self.notes {
            info!("{}", note);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(RegisterError::Config(msg));
        let reg = &self.registration;

        if reg.min_digit_len == 0 {
            return fail("registration.min_digit_len must be at least 1".into());
        }
        if reg.header_row == 0 {
            return fail("registration.header_row is 1-based".into());
        }
        if !(reg.balance_tolerance >= 0.0) {
            return fail("registration.balance_tolerance must be >= 0".into());
        }
        for (section, pool) in [("registration", &reg.pool), ("export", &self.export.pool)] {
            if pool.min_workers == 0 || pool.min_workers > pool.max_workers {
                return fail(format!("{}.pool needs 1 <= min_workers <= max_workers", section));
            }
            if pool.max_workers > HARD_THREAD_CAP {
                return fail(format!(
                    "{}.pool.max_workers exceeds the cap of {}",
                    section, HARD_THREAD_CAP
                ));
            }
        }
        for policy in [&reg.move_retry, &self.export.retry] {
            policy.validate().map_err(RegisterError::Config)?;
        }
        crate::source::SheetFilter::new(&reg.account_info_allow, &reg.account_info_deny)?;
        if self.export.print_every == 0 {
            return fail("export.print_every must be at least 1".into());
        }
        Ok(())
    }
}
