// 🧾 Registration Run - statistics ledger + statement folder → 登记信息.xlsx
//
// Per file:
//   PENDING → SKIPPED             (unreadable 提取 / no account holder / move failed)
//           → DUPLICATE_EXPORTED  (entity already carries a serial)
//           → REGISTERED_EXPORTED (fresh serial allocated)
//
// Only the registry assignment is serialized; reading, profiling and moving
// files run in parallel on the worker pool.

use crate::filing::{file_into, Bucket, Buckets};
use crate::ledger::{self, LedgerRow, RunCounts, RunReport, SerialCell};
use crate::normalizer::DigitMatcher;
use crate::pool::{available_parallelism, Progress, WorkerPool};
use crate::profile::AccountProfile;
use crate::reconciliation::BalanceCheckEngine;
use crate::registry::{MatchPolicy, SerialRegistry, SharedRegistry};
use crate::source::{display_name, is_spreadsheet, read_source_workbook, SheetFilter};
use crate::statistics::{read_statistics, StatisticsLayout};
use crate::config::RegistrationConfig;
use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const UNREADABLE_NOTE: &str = "无法读取提取表";
pub const NO_ACCOUNT_NAME: &str = "无账户名";
const MOVE_FAILED_NOTE: &str = "文件归档失败";

// ============================================================================
// RECORD STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Unreadable(String),
    NoAccountName,
    /// Serial assigned, but the file could not be moved
    MoveFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Pending,
    Skipped(SkipReason),
    DuplicateExported { serial: u32 },
    RegisteredExported { serial: u32 },
}

#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub source: PathBuf,
    pub final_path: Option<PathBuf>,
    pub state: RecordState,
    pub row: LedgerRow,
}

pub fn count_outcomes(outcomes: &[RecordOutcome]) -> RunCounts {
    let mut counts = RunCounts::default();
    for outcome in outcomes {
        match outcome.state {
            RecordState::RegisteredExported { .. } => counts.registered += 1,
            RecordState::DuplicateExported { .. } => counts.duplicate += 1,
            RecordState::Skipped(_) | RecordState::Pending => counts.skipped += 1,
        }
    }
    counts
}

// ============================================================================
// JOB
// ============================================================================

/// Operator input collected at the prompts
#[derive(Debug, Clone)]
pub struct RunInput {
    pub statistics_path: PathBuf,
    pub folder: PathBuf,
    pub acquire_time: String,
    pub reviewer: String,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub files: usize,
    pub workers: usize,
    pub counts: RunCounts,
    /// None when there was nothing to process
    pub ledger_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

pub struct RegistrationJob {
    input: RunInput,
    config: RegistrationConfig,
    registry: SharedRegistry,
    buckets: Buckets,
    filter: SheetFilter,
    matcher: DigitMatcher,
    balance: BalanceCheckEngine,
}

impl RegistrationJob {
    /// Load the statistics ledger, seed the registry and create the buckets.
    pub fn prepare(input: RunInput, config: RegistrationConfig) -> Result<Self> {
        let layout = StatisticsLayout {
            sheet: config.statistics_sheet.clone(),
            header_row: config.header_row,
        };
        let entries = read_statistics(&input.statistics_path, &layout).with_context(|| {
            format!("读取统计表失败: {}", input.statistics_path.display())
        })?;

        let matcher = DigitMatcher::new(config.min_digit_len);
        let policy = MatchPolicy {
            digits: matcher,
            fuzzy: config.fuzzy_digit_match,
        };
        let registry = SerialRegistry::from_entries(&entries, policy);
        info!(
            "统计表: 已用序号 {} 个 | 账号映射 {} | 卡号映射 {}",
            registry.used_count(),
            registry.account_count(),
            registry.card_count()
        );

        let buckets = Buckets::new(&input.folder, config.buckets.clone());
        buckets
            .ensure()
            .with_context(|| format!("无法创建输出目录: {}", input.folder.display()))?;

        let filter = SheetFilter::new(&config.account_info_allow, &config.account_info_deny)?;
        let balance = BalanceCheckEngine::with_tolerance(config.balance_tolerance);

        Ok(RegistrationJob {
            input,
            config,
            registry: SharedRegistry::new(registry),
            buckets,
            filter,
            matcher,
            balance,
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.input.folder.join(&self.config.ledger_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.input.folder.join(&self.config.report_file)
    }

    /// Spreadsheets directly inside the working folder, sorted by name.
    ///
    /// Skips lock files, the output ledger, the statistics ledger and any
    /// subdirectory (the buckets included).
    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let statistics = fs::canonicalize(&self.input.statistics_path).ok();
        let mut files = Vec::new();

        let entries = fs::read_dir(&self.input.folder)
            .with_context(|| format!("无法读取目录: {}", self.input.folder.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("~$")
                || name.starts_with(".ledger-")
                || name == self.config.ledger_file
                || !is_spreadsheet(&path)
            {
                continue;
            }
            if statistics.is_some() && fs::canonicalize(&path).ok() == statistics {
                continue;
            }
            files.push(path);
        }

        files.sort();
        Ok(files)
    }

    fn base_row(&self, file_name: &str, profile: &AccountProfile) -> LedgerRow {
        let acquire_time = &self.input.acquire_time;
        LedgerRow {
            file_name: file_name.to_string(),
            serial: SerialCell::Blank,
            organized: "是".to_string(),
            currency: profile.currency_display(),
            account_name: profile.name_display(),
            bank: profile.bank.bank.clone(),
            account: profile.account_display(),
            cards: profile.cards_display(),
            acquired: "是".to_string(),
            acquire_time: acquire_time.clone(),
            detail: profile.detail_note(acquire_time),
            needs_reacquire: "否".to_string(),
            reviewer: self.input.reviewer.clone(),
            trading_period: profile.period_display(),
        }
    }

    fn skip(&self, path: &Path, row: LedgerRow, reason: SkipReason) -> RecordOutcome {
        let final_path = match file_into(
            &self.buckets,
            path,
            Bucket::Skipped,
            None,
            &self.input.acquire_time,
            &self.config.move_retry,
        ) {
            Ok(target) => Some(target),
            Err(e) => {
                error!("移动到跳过目录失败：{} | {}", path.display(), e);
                None
            }
        };
        RecordOutcome {
            source: path.to_path_buf(),
            final_path,
            state: RecordState::Skipped(reason),
            row,
        }
    }

    /// Run one file through the state machine. Never fails: every problem
    /// ends in a terminal state with a ledger row.
    pub fn process_file(&self, path: &Path) -> RecordOutcome {
        let file_name = display_name(path);
        info!("开始处理：{}", file_name);

        let source = match read_source_workbook(path, &self.filter) {
            Ok(source) => source,
            Err(e) => {
                error!("读取【提取】失败：{} | {}", file_name, e);
                let row = LedgerRow {
                    detail: UNREADABLE_NOTE.to_string(),
                    ..LedgerRow::for_file(&file_name)
                };
                return self.skip(path, row, SkipReason::Unreadable(e.to_string()));
            }
        };

        let profile = match AccountProfile::build(&source, self.matcher, &self.balance) {
            Some(profile) => profile,
            None => {
                warn!("跳过（无账户名）：{}", file_name);
                let row = LedgerRow {
                    account_name: NO_ACCOUNT_NAME.to_string(),
                    ..LedgerRow::for_file(&file_name)
                };
                return self.skip(path, row, SkipReason::NoAccountName);
            }
        };

        let mut row = self.base_row(&file_name, &profile);
        let (account, cards) = profile.entity_keys();
        let assignment = self.registry.assign(account.as_ref(), &cards);

        let (bucket, state) = if assignment.is_duplicate() {
            row.serial = SerialCell::Existing(assignment.serial);
            (
                Bucket::Duplicate,
                RecordState::DuplicateExported {
                    serial: assignment.serial,
                },
            )
        } else {
            row.serial = SerialCell::Fresh(assignment.serial);
            (
                Bucket::Registered,
                RecordState::RegisteredExported {
                    serial: assignment.serial,
                },
            )
        };

        match file_into(
            &self.buckets,
            path,
            bucket,
            Some(assignment.serial),
            &self.input.acquire_time,
            &self.config.move_retry,
        ) {
            Ok(target) => {
                row.file_name = display_name(&target);
                info!(
                    "{} 完成：{} | 序号={} | 重复={}",
                    file_name,
                    row.file_name,
                    assignment.serial,
                    assignment.is_duplicate()
                );
                RecordOutcome {
                    source: path.to_path_buf(),
                    final_path: Some(target),
                    state,
                    row,
                }
            }
            Err(e) => {
                error!("{} 归档失败（序号={}）：{}", file_name, assignment.serial, e);
                row.detail = format!("{}；{}", row.detail, MOVE_FAILED_NOTE);
                RecordOutcome {
                    source: path.to_path_buf(),
                    final_path: None,
                    state: RecordState::Skipped(SkipReason::MoveFailed(e.to_string())),
                    row,
                }
            }
        }
    }

    /// Process the whole folder, then write the ledger and the run report.
    pub fn run(&self) -> Result<RunSummary> {
        let started_at = Local::now();
        let files = self.discover_files()?;
        if files.is_empty() {
            info!("没有找到可处理的 Excel 文件。");
            return Ok(RunSummary {
                files: 0,
                workers: 0,
                counts: RunCounts::default(),
                ledger_path: None,
                report_path: None,
            });
        }

        let workers =
            self.config
                .pool
                .resolve(self.config.workers, files.len(), available_parallelism());
        info!("文件数={} | 线程数={}", files.len(), workers);

        let pool = WorkerPool::new(workers, "register").context("无法创建线程池")?;
        let progress = Progress::new(files.len(), 1);
        let file_count = files.len();

        let outcomes = pool.map(files, |path| {
            let outcome = self.process_file(&path);
            progress.tick(&display_name(&path));
            outcome
        });

        let counts = count_outcomes(&outcomes);
        let mut rows: Vec<LedgerRow> = outcomes.into_iter().map(|o| o.row).collect();
        ledger::sort_rows(&mut rows);

        // Report first so filed serials survive an unsaved ledger
        let report_path = self.report_path();
        let report = RunReport {
            started_at,
            finished_at: Local::now(),
            statistics_path: self.input.statistics_path.display().to_string(),
            folder: self.input.folder.display().to_string(),
            workers,
            counts: counts.clone(),
            rows,
        };
        if let Err(e) = ledger::write_report(&report_path, &report) {
            warn!("运行报告写入失败：{} | {}", report_path.display(), e);
        }

        let ledger_path = self.ledger_path();
        if let Err(e) = ledger::write_ledger(&ledger_path, &report.rows) {
            error!(
                "登记信息保存失败：{} | {}（本次结果见 {}）",
                ledger_path.display(),
                e,
                report_path.display()
            );
            return Err(e.into());
        }

        info!(
            "统计：登记={} | 重复={} | 跳过={}",
            counts.registered, counts.duplicate, counts.skipped
        );

        Ok(RunSummary {
            files: file_count,
            workers,
            counts,
            ledger_path: Some(ledger_path),
            report_path: Some(report_path),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use calamine::{open_workbook_auto, Data, Reader};
    use rust_xlsxwriter::Workbook;

    const HEADER: [&str; 5] = ["本账号名称", "本账号", "本卡号", "日期", "公式校验"];

    /// Statement workbook with one 提取 row per (name, account)
    fn write_source(path: &Path, rows: &[(&str, &str)]) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("提取").unwrap();
        for (col, h) in HEADER.iter().enumerate() {
            sheet.write_string(0, col as u16, *h).unwrap();
        }
        for (i, (name, account)) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            if !name.is_empty() {
                sheet.write_string(r, 0, *name).unwrap();
            }
            sheet.write_string(r, 1, *account).unwrap();
            sheet.write_string(r, 3, "2023-01-15").unwrap();
            sheet.write_number(r, 4, 0.0).unwrap();
        }
        workbook.save(path).unwrap();
    }

    fn write_statistics(path: &Path, rows: &[(u32, &str)]) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("统计表").unwrap();
        for (col, h) in ["序号", "已取序号手动添加", "账号", "卡号"].iter().enumerate() {
            sheet.write_string(4, col as u16, *h).unwrap();
        }
        for (i, (serial, account)) in rows.iter().enumerate() {
            let r = i as u32 + 5;
            sheet.write_number(r, 0, (i + 1) as f64).unwrap();
            sheet.write_number(r, 1, *serial as f64).unwrap();
            sheet.write_string(r, 2, *account).unwrap();
        }
        workbook.save(path).unwrap();
    }

    fn job(folder: &Path, statistics: PathBuf) -> RegistrationJob {
        job_with(folder, statistics, RegistrationConfig::default())
    }

    fn job_with(folder: &Path, statistics: PathBuf, config: RegistrationConfig) -> RegistrationJob {
        let config = RegistrationConfig {
            workers: Some(4),
            move_retry: RetryPolicy::no_retry(),
            ..config
        };
        let input = RunInput {
            statistics_path: statistics,
            folder: folder.to_path_buf(),
            acquire_time: "2024.03.01".to_string(),
            reviewer: "王审".to_string(),
        };
        RegistrationJob::prepare(input, config).unwrap()
    }

    fn ledger_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = open_workbook_auto(path).unwrap();
        let range = reader.worksheet_range("Sheet").unwrap();
        range
            .rows()
            .skip(1)
            .map(|row| {
                row.iter()
                    .map(|c| match c {
                        Data::Float(f) => format!("{}", *f as i64),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_full_run_buckets_and_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        let statistics = folder.join("统计表.xlsx");
        write_statistics(&statistics, &[(7, "6222-0012-3456-7890")]);

        write_source(&folder.join("dup.xlsx"), &[("张三", "622200123456 7890")]);
        write_source(&folder.join("fresh.xlsx"), &[("李四", "6222998877665544")]);
        write_source(&folder.join("noname.xlsx"), &[("", "6222111100002222")]);
        fs::write(folder.join("broken.xlsx"), b"not a workbook").unwrap();
        fs::write(folder.join("~$dup.xlsx"), b"lock").unwrap();

        let job = job(folder, statistics.clone());
        let summary = job.run().unwrap();

        assert_eq!(summary.files, 4);
        assert_eq!(summary.counts.registered, 1);
        assert_eq!(summary.counts.duplicate, 1);
        assert_eq!(summary.counts.skipped, 2);

        // Statistics ledger and lock file stay where they were
        assert!(statistics.exists());
        assert!(folder.join("~$dup.xlsx").exists());

        assert!(folder.join("3重复账号").join("0007、dup(2024.03.01).xlsx").exists());
        assert!(folder.join("1已登记").join("0001、fresh(2024.03.01).xlsx").exists());
        assert!(folder.join("2被跳过").join("noname.xlsx").exists());
        assert!(folder.join("2被跳过").join("broken.xlsx").exists());

        let rows = ledger_rows(&folder.join("登记信息.xlsx"));
        assert_eq!(rows.len(), 4);
        // Sorted by serial, serial-less rows last
        assert_eq!(rows[0][0], "0001、fresh(2024.03.01).xlsx");
        assert_eq!(rows[0][1], "1");
        assert_eq!(rows[1][0], "0007、dup(2024.03.01).xlsx");
        assert_eq!(rows[1][1], "已取序号7");
        assert_eq!(rows[1][4], "张三");
        assert_eq!(rows[1][12], "王审");
        assert_eq!(rows[1][13], "2023.01.15-2023.01.15");

        let skipped: Vec<&Vec<String>> = rows[2..].iter().collect();
        assert!(skipped
            .iter()
            .any(|r| r[0] == "noname.xlsx" && r[4] == NO_ACCOUNT_NAME));
        assert!(skipped
            .iter()
            .any(|r| r[0] == "broken.xlsx" && r[10] == UNREADABLE_NOTE));

        let report = fs::read_to_string(folder.join("run_report.json")).unwrap();
        let report: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(report["counts"]["duplicate"], 1);
    }

    #[test]
    fn test_same_account_in_parallel_gets_one_serial() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        let statistics = dir.path().join("统计表.xlsx");
        write_statistics(&statistics, &[(1, "1111222233334444"), (2, "5555666677778888")]);

        for i in 0..6 {
            write_source(
                &folder.join(format!("part{}.xlsx", i)),
                &[("赵六", "6222-7777-8888-9999")],
            );
        }

        let summary = job(folder, statistics).run().unwrap();
        assert_eq!(summary.counts.registered, 1);
        assert_eq!(summary.counts.duplicate, 5);

        let registered: Vec<_> = fs::read_dir(folder.join("1已登记")).unwrap().collect();
        assert_eq!(registered.len(), 1);
        let duplicates: Vec<String> = fs::read_dir(folder.join("3重复账号"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(duplicates.len(), 5);
        assert!(duplicates.iter().all(|n| n.starts_with("0003、")));
    }

    #[test]
    fn test_illegal_characters_in_name_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        let statistics = dir.path().join("统计表.xlsx");
        write_statistics(&statistics, &[]);

        write_source(&folder.join("王五:公司?.xlsx"), &[("王五", "6222000011112222")]);

        let summary = job(folder, statistics).run().unwrap();
        assert_eq!(summary.counts.registered, 1);
        assert!(folder
            .join("1已登记")
            .join("0001、王五_公司_(2024.03.01).xlsx")
            .exists());
    }

    #[test]
    fn test_empty_folder_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let statistics = dir.path().join("统计表.xlsx");
        write_statistics(&statistics, &[(3, "1")]);

        let summary = job(dir.path(), statistics).run().unwrap();
        assert_eq!(summary.files, 0);
        assert!(summary.ledger_path.is_none());
        assert!(!dir.path().join("登记信息.xlsx").exists());
    }

    #[test]
    fn test_ambiguous_account_uses_cards_only() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        let statistics = dir.path().join("统计表.xlsx");
        write_statistics(&statistics, &[]);

        write_source(
            &folder.join("multi.xlsx"),
            &[("孙七", "1000200030004000"), ("孙七", "5000600070008000")],
        );

        let job = job(folder, statistics);
        let outcome = job.process_file(&folder.join("multi.xlsx"));
        assert_eq!(outcome.state, RecordState::RegisteredExported { serial: 1 });
        assert_eq!(outcome.row.account, crate::profile::AMBIGUOUS_ACCOUNT);
    }

    fn leftover_temp_files(folder: &Path) -> usize {
        fs::read_dir(folder)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".ledger-")
            })
            .count()
    }

    #[test]
    fn test_ledger_save_failure_keeps_filed_files() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        let statistics = folder.join("统计表.xlsx");
        write_statistics(&statistics, &[(7, "6222-0012-3456-7890")]);

        write_source(&folder.join("dup.xlsx"), &[("张三", "6222001234567890")]);
        write_source(&folder.join("fresh.xlsx"), &[("李四", "6222998877665544")]);

        // Ledger directory does not exist, so the save step fails
        let config = RegistrationConfig {
            ledger_file: "missing/登记信息.xlsx".to_string(),
            ..RegistrationConfig::default()
        };
        let result = job_with(folder, statistics, config).run();
        assert!(result.is_err());

        assert!(folder.join("1已登记").join("0001、fresh(2024.03.01).xlsx").exists());
        assert!(folder.join("3重复账号").join("0007、dup(2024.03.01).xlsx").exists());
        assert!(!folder.join("missing").exists());
        assert_eq!(leftover_temp_files(folder), 0);

        // Outcomes survive in the run report
        let report = fs::read_to_string(folder.join("run_report.json")).unwrap();
        let report: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(report["counts"]["registered"], 1);
        assert_eq!(report["counts"]["duplicate"], 1);
    }

    #[test]
    fn test_unreadable_ledger_target_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        let statistics = folder.join("统计表.xlsx");
        write_statistics(&statistics, &[]);

        write_source(&folder.join("fresh.xlsx"), &[("李四", "6222998877665544")]);
        // A directory squatting on the ledger name
        fs::create_dir(folder.join("登记信息.xlsx")).unwrap();

        let result = job(folder, statistics).run();
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<crate::error::RegisterError>().is_some());

        assert!(folder.join("1已登记").join("0001、fresh(2024.03.01).xlsx").exists());
        assert!(folder.join("登记信息.xlsx").is_dir());
        assert_eq!(leftover_temp_files(folder), 0);
    }
}
