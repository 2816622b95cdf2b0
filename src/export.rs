// 📦 Investor Export - one workbook per investor from the relational store
//
// Sheets per workbook:
//   汇总表             base rows for (pk, imk); always present, header-only if empty
//   代保管业务明细     deposit-ledger rows with the same normalized IMK (lazy)
//   租赁业务明细       lease-ledger rows with the same normalized IMK (lazy)
//   银行流水_extract   bank transactions naming the investor (lazy, rate-limited)
//
// Normalization runs inside SQLite through deterministic scalar functions,
// so the same functions can back expression indexes.

use crate::cell::Cell;
use crate::config::ExportConfig;
use crate::error::{RegisterError, Result};
use crate::normalizer::{normalize_key, NormalizeOptions};
use crate::pool::{
    available_parallelism, transaction_slots, Limiter, Progress, WorkerPool, HARD_THREAD_CAP,
};
use crate::retry::retry;
use crate::workbook::{reserve_stems, LazySheet};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags};
use rust_xlsxwriter::Workbook;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const PK_COLUMN: &str = "序号_Primary_Key";
pub const IMK_COLUMN: &str = "Identity_Matching_Key";
pub const INVESTOR_NAME_COLUMN: &str = "投资人姓名";

pub const SUMMARY_SHEET: &str = "汇总表";
pub const DEPOSIT_SHEET: &str = "代保管业务明细";
pub const LEASE_SHEET: &str = "租赁业务明细";
pub const TRANSACTION_SHEET: &str = "银行流水_extract";

/// Expression indexes need SQLite 3.9.0
pub const MIN_SQLITE_VERSION: i32 = 3_009_000;

const FN_NORM: &str = "norm_key";
const FN_NORM_NONULL: &str = "norm_key_nonull";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// CONNECTION SETUP
// ============================================================================

pub fn value_to_cell(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Empty,
        ValueRef::Integer(i) => Cell::Int(i),
        ValueRef::Real(f) => Cell::Float(f),
        ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Cell::Text(format!("<{} bytes>", bytes.len())),
    }
}

/// Install `norm_key(x)` and `norm_key_nonull(x)` on a connection.
pub fn register_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8
        | FunctionFlags::SQLITE_DETERMINISTIC
        | FunctionFlags::SQLITE_INNOCUOUS;

    for (name, options) in [
        (FN_NORM, NormalizeOptions::default()),
        (FN_NORM_NONULL, NormalizeOptions::identity()),
    ] {
        conn.create_scalar_function(name, 1, flags, move |ctx| {
            let text = value_to_cell(ctx.get_raw(0)).to_normalized_string();
            Ok(normalize_key(Some(&text), options))
        })?;
    }
    Ok(())
}

pub fn check_engine() -> Result<()> {
    let version = rusqlite::version_number();
    if version < MIN_SQLITE_VERSION {
        return Err(RegisterError::Config(format!(
            "SQLite >= 3.9.0 required, found {}",
            rusqlite::version()
        )));
    }
    info!("SQLite {}", rusqlite::version());
    Ok(())
}

pub fn open_connection(path: &Path, read_only: bool) -> Result<Connection> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    register_functions(&conn)?;
    Ok(conn)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

// ============================================================================
// INDEX BOOTSTRAP
// ============================================================================

fn name_function(strip_null: bool) -> &'static str {
    if strip_null {
        FN_NORM_NONULL
    } else {
        FN_NORM
    }
}

/// Create the expression indexes the per-investor queries rely on.
pub fn ensure_indexes(conn: &Connection, config: &ExportConfig, tx_fields: &[String]) -> Result<()> {
    let create = |index: &str, table: &str, function: &str, column: &str| -> Result<()> {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}({}({}))",
            quote_ident(index),
            quote_ident(table),
            function,
            quote_ident(column)
        );
        let started = Instant::now();
        conn.execute(&sql, [])?;
        info!("索引就绪 {} ({:.2}s)", index, started.elapsed().as_secs_f64());
        Ok(())
    };

    for (table, index) in [
        (&config.deposit_table, "idx_dep_imk_norm"),
        (&config.lease_table, "idx_lease_imk_norm"),
        (&config.base_table, "idx_base_imk_norm"),
    ] {
        create(index, table, FN_NORM_NONULL, IMK_COLUMN)?;
    }

    if config.transaction_index {
        let function = name_function(config.transaction_strip_null);
        let tag = if config.transaction_strip_null { "nmx" } else { "nm" };
        for (i, field) in tx_fields.iter().enumerate() {
            let index = format!("idx_tx_{}_{:02}", tag, i + 1);
            create(&index, &config.transaction_table, function, field)?;
        }
    }
    Ok(())
}

// ============================================================================
// INVESTORS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Investor {
    /// Primary key exactly as stored, rebound verbatim in the summary query
    pub pk: Value,
    pub imk: String,
    pub name: String,
    /// "{pk}、{imk}"
    pub workbook_id: String,
    /// Output file stem, unique within one load
    pub file_stem: String,
}

/// Distinct investors with a non-blank IMK and name, first-seen order.
///
/// File stems are reserved here, before any worker starts, so two ids that
/// sanitize alike never share an output path.
pub fn load_investors(conn: &Connection, base_table: &str) -> Result<Vec<Investor>> {
    let sql = format!(
        "SELECT {pk}, {imk}, {name} FROM {table} \
         WHERE COALESCE(TRIM({imk}), '') <> '' AND COALESCE(TRIM({name}), '') <> ''",
        pk = quote_ident(PK_COLUMN),
        imk = quote_ident(IMK_COLUMN),
        name = quote_ident(INVESTOR_NAME_COLUMN),
        table = quote_ident(base_table),
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut seen = HashSet::new();
    let mut investors = Vec::new();
    while let Some(row) = rows.next()? {
        let pk_ref = row.get_ref(0)?;
        let pk_text = value_to_cell(pk_ref).to_normalized_string();
        let imk = value_to_cell(row.get_ref(1)?).to_normalized_string();
        let name = value_to_cell(row.get_ref(2)?).to_normalized_string();
        let workbook_id = format!("{}、{}", pk_text, imk);

        if seen.insert((workbook_id.clone(), name.clone())) {
            investors.push(Investor {
                pk: Value::from(pk_ref),
                imk,
                name,
                workbook_id,
                file_stem: String::new(),
            });
        }
    }

    let stems = reserve_stems(investors.iter().map(|i| i.workbook_id.as_str()));
    for (investor, stem) in investors.iter_mut().zip(stems) {
        investor.file_stem = stem;
    }
    Ok(investors)
}

// ============================================================================
// QUERY PLAN
// ============================================================================

/// SQL and column lists shared by every worker
#[derive(Debug, Clone)]
pub struct QueryPlan {
    summary_sql: String,
    deposit_sql: String,
    lease_sql: String,
    /// None when no configured name field exists in the transaction table
    transaction_sql: Option<String>,
    name_strip_null: bool,
    base_columns: Vec<String>,
    deposit_columns: Vec<String>,
    lease_columns: Vec<String>,
    transaction_columns: Vec<String>,
}

impl QueryPlan {
    pub fn build(conn: &Connection, config: &ExportConfig, tx_fields: &[String]) -> Result<Self> {
        let base_columns = table_columns(conn, &config.base_table)?;
        let deposit_columns = table_columns(conn, &config.deposit_table)?;
        let lease_columns = table_columns(conn, &config.lease_table)?;
        let transaction_columns = table_columns(conn, &config.transaction_table)?;

        let imk = quote_ident(IMK_COLUMN);
        let by_imk = |table: &str| {
            format!(
                "SELECT * FROM {} WHERE {}({}) = ?1",
                quote_ident(table),
                FN_NORM_NONULL,
                imk
            )
        };

        let function = name_function(config.transaction_strip_null);
        let conditions: Vec<String> = tx_fields
            .iter()
            .filter(|f| transaction_columns.contains(f))
            .map(|f| format!("{}({}) = ?1", function, quote_ident(f)))
            .collect();
        let transaction_sql = if conditions.is_empty() {
            None
        } else {
            Some(format!(
                "SELECT DISTINCT * FROM {} WHERE {}",
                quote_ident(&config.transaction_table),
                conditions.join(" OR ")
            ))
        };

        Ok(QueryPlan {
            summary_sql: format!(
                "SELECT * FROM {} WHERE {} = ?1 AND {}({}) = {}(?2)",
                quote_ident(&config.base_table),
                quote_ident(PK_COLUMN),
                FN_NORM_NONULL,
                imk,
                FN_NORM_NONULL
            ),
            deposit_sql: by_imk(&config.deposit_table),
            lease_sql: by_imk(&config.lease_table),
            transaction_sql,
            name_strip_null: config.transaction_strip_null,
            base_columns,
            deposit_columns,
            lease_columns,
            transaction_columns,
        })
    }
}

/// Stream query rows into a lazy sheet.
fn fill_sheet(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    sheet: &mut LazySheet,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(sql)?;
    let width = stmt.column_count();
    let mut rows = stmt.query(params)?;
    let mut cells = Vec::with_capacity(width);
    while let Some(row) = rows.next()? {
        cells.clear();
        for i in 0..width {
            cells.push(value_to_cell(row.get_ref(i)?));
        }
        sheet.push_row(&cells)?;
    }
    Ok(())
}

// ============================================================================
// EXPORT JOB
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExportedWorkbook {
    pub path: PathBuf,
    pub sheets: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
    pub workers: usize,
    pub elapsed: Duration,
}

pub struct InvestorExport {
    config: ExportConfig,
    out_dir: PathBuf,
}

impl InvestorExport {
    pub fn new(config: ExportConfig, out_dir: impl Into<PathBuf>) -> Self {
        InvestorExport {
            config,
            out_dir: out_dir.into(),
        }
    }

    /// Configured name fields, deduplicated, order kept
    pub fn transaction_fields(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.config
            .transaction_name_fields
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty() && seen.insert(f.clone()))
            .collect()
    }

    pub fn workbook_path(&self, investor: &Investor) -> PathBuf {
        self.out_dir.join(format!("{}.xlsx", investor.file_stem))
    }

    /// Write one investor's workbook on a fresh connection.
    pub fn export_one(
        &self,
        investor: &Investor,
        plan: &QueryPlan,
        limiter: &Limiter,
    ) -> Result<ExportedWorkbook> {
        let started = Instant::now();
        let conn = open_connection(&self.config.database, true)?;
        let mut workbook = Workbook::new();
        let mut sheets = vec![SUMMARY_SHEET.to_string()];

        let mut summary = LazySheet::new(SUMMARY_SHEET, plan.base_columns.clone());
        fill_sheet(
            &conn,
            &plan.summary_sql,
            &[&investor.pk, &investor.imk],
            &mut summary,
        )?;
        summary.finish_always(&mut workbook)?;

        let imk_key = normalize_key(Some(&investor.imk), NormalizeOptions::identity());
        let mut deposit = LazySheet::new(DEPOSIT_SHEET, plan.deposit_columns.clone());
        let mut lease = LazySheet::new(LEASE_SHEET, plan.lease_columns.clone());
        if !imk_key.is_empty() {
            fill_sheet(&conn, &plan.deposit_sql, &[&imk_key], &mut deposit)?;
            fill_sheet(&conn, &plan.lease_sql, &[&imk_key], &mut lease)?;
        }
        for sheet in [deposit, lease] {
            let name = sheet.name().to_string();
            if sheet.finish(&mut workbook) {
                sheets.push(name);
            }
        }

        let name_options = NormalizeOptions {
            strip_null: plan.name_strip_null,
        };
        let name_key = normalize_key(Some(&investor.name), name_options);
        if let (Some(sql), false) = (&plan.transaction_sql, name_key.is_empty()) {
            let mut transactions =
                LazySheet::new(TRANSACTION_SHEET, plan.transaction_columns.clone());
            {
                let _permit = limiter.acquire();
                fill_sheet(&conn, sql, &[&name_key], &mut transactions)?;
            }
            if transactions.finish(&mut workbook) {
                sheets.push(TRANSACTION_SHEET.to_string());
            }
        }

        let path = self.workbook_path(investor);
        workbook.save(&path)?;

        Ok(ExportedWorkbook {
            path,
            sheets,
            elapsed: started.elapsed(),
        })
    }

    /// Validate the store and prepare indexes, investors and the query plan.
    pub fn prepare(&self) -> Result<(Vec<Investor>, QueryPlan)> {
        check_engine()?;
        let conn = open_connection(&self.config.database, !self.config.ensure_indexes)?;

        for table in [
            &self.config.base_table,
            &self.config.deposit_table,
            &self.config.lease_table,
            &self.config.transaction_table,
        ] {
            if !table_exists(&conn, table)? {
                return Err(RegisterError::Config(format!("表不存在: {}", table)));
            }
        }

        let fields = self.transaction_fields();
        let plan = QueryPlan::build(&conn, &self.config, &fields)?;
        let present: Vec<String> = fields
            .iter()
            .filter(|f| plan.transaction_columns.contains(f))
            .cloned()
            .collect();
        for missing in fields.iter().filter(|f| !present.contains(f)) {
            warn!("流水表缺少姓名列，已忽略: {}", missing);
        }
        info!("银行流水匹配列：{}", present.join(", "));

        if self.config.ensure_indexes {
            info!("索引自检…");
            ensure_indexes(&conn, &self.config, &present)?;
            info!("索引检查完成。");
        }

        let investors = load_investors(&conn, &self.config.base_table)?;
        Ok((investors, plan))
    }

    pub fn run(&self) -> anyhow::Result<ExportSummary> {
        use anyhow::Context;

        let started = Instant::now();
        let (investors, plan) = self.prepare().context("数据库检查失败")?;
        if investors.is_empty() {
            warn!("基础表无有效键，退出。");
            return Ok(ExportSummary::default());
        }

        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("无法创建导出目录: {}", self.out_dir.display()))?;

        let total = investors.len();
        let workers = self
            .config
            .pool
            .resolve(self.config.workers, total, available_parallelism());
        let slots =
            transaction_slots(workers, self.config.transaction_workers).min(HARD_THREAD_CAP);
        info!(
            "需要生成工作簿数量：{} | 并发：{} | 流水限流：{}",
            total, workers, slots
        );

        let pool = WorkerPool::new(workers, "export").context("无法创建线程池")?;
        let limiter = Limiter::new(slots);
        let progress = Progress::new(total, usize::MAX);
        let succeeded = AtomicUsize::new(0);
        let print_every = self.config.print_every.max(1);

        let results = pool.map(investors, |investor| {
            let path = self.workbook_path(&investor);
            let outcome = retry(&self.config.retry, &investor.workbook_id, |_| {
                self.export_one(&investor, &plan, &limiter)
            });
            progress.tick(&investor.workbook_id);

            match outcome {
                Ok(done) => {
                    let ok = succeeded.fetch_add(1, Ordering::SeqCst) + 1;
                    if ok % print_every == 0 || ok == total {
                        info!(
                            "[OK] {}/{} → {} (ok in {:.2}s)",
                            ok,
                            total,
                            done.path.display(),
                            done.elapsed.as_secs_f64()
                        );
                    }
                    None
                }
                Err(e) => {
                    error!("[ERR] {} → {} ({})", investor.workbook_id, path.display(), e);
                    Some((investor.workbook_id.clone(), e.to_string()))
                }
            }
        });

        let failed: Vec<(String, String)> = results.into_iter().flatten().collect();
        Ok(ExportSummary {
            total,
            succeeded: succeeded.load(Ordering::SeqCst),
            failed,
            workers,
            elapsed: started.elapsed(),
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
    use calamine::{open_workbook_auto, Reader};

    fn seed_database(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE "台账匹配流水结果" ("序号_Primary_Key" INTEGER, "Identity_Matching_Key" TEXT, "投资人姓名" TEXT, "金额" REAL);
            CREATE TABLE "1代保管业务台账明细" ("Identity_Matching_Key" TEXT, "克重" REAL);
            CREATE TABLE "2租赁业务台账明细" ("Identity_Matching_Key" TEXT, "租金" REAL);
            CREATE TABLE "永坤资金池账户交易明细_身份映射" ("对手户名" TEXT, "映射_户名" TEXT, "交易金额" REAL);

            INSERT INTO "台账匹配流水结果" VALUES (1, 'ID-001', '张三', 100.0);
            INSERT INTO "台账匹配流水结果" VALUES (1, 'ID-001', '张三', 100.0);
            INSERT INTO "台账匹配流水结果" VALUES (2, 'ID-002', '李 四', 50.5);
            INSERT INTO "台账匹配流水结果" VALUES (3, '  ', '无键', 1.0);
            INSERT INTO "台账匹配流水结果" VALUES (4, 'ID-004', NULL, 1.0);

            INSERT INTO "1代保管业务台账明细" VALUES ('id001', 10.0);
            INSERT INTO "1代保管业务台账明细" VALUES ('NULLID-001', 20.0);
            INSERT INTO "1代保管业务台账明细" VALUES ('ID-009', 99.0);

            INSERT INTO "永坤资金池账户交易明细_身份映射" VALUES ('李四', NULL, 8.0);
            INSERT INTO "永坤资金池账户交易明细_身份映射" VALUES ('李四', '李四', 9.0);
            INSERT INTO "永坤资金池账户交易明细_身份映射" VALUES ('王五', '（李四）', 7.0);
            "#,
        )
        .unwrap();
    }

    fn config(db: &Path) -> ExportConfig {
        ExportConfig {
            database: db.to_path_buf(),
            workers: Some(2),
            retry: RetryPolicy::no_retry(),
            ..ExportConfig::default()
        }
    }

    #[test]
    fn test_sql_functions_match_normalizer() {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn).unwrap();

        let key: String = conn
            .query_row("SELECT norm_key(' 李（四）-1 ')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(key, "李四1");

        let key: String = conn
            .query_row("SELECT norm_key_nonull('abNULL 1')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(key, "AB1");

        let key: String = conn.query_row("SELECT norm_key(NULL)", [], |r| r.get(0)).unwrap();
        assert_eq!(key, "");

        let key: String = conn.query_row("SELECT norm_key(12.0)", [], |r| r.get(0)).unwrap();
        assert_eq!(key, "12");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("表"), "\"表\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_load_investors_filters_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("yk.db");
        seed_database(&db);

        let conn = open_connection(&db, true).unwrap();
        let investors = load_investors(&conn, "台账匹配流水结果").unwrap();
        let ids: Vec<&str> = investors.iter().map(|i| i.workbook_id.as_str()).collect();
        assert_eq!(ids, vec!["1、ID-001", "2、ID-002"]);
        assert_eq!(investors[0].pk, Value::Integer(1));
    }

    #[test]
    fn test_export_creates_only_populated_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("yk.db");
        seed_database(&db);
        let out = dir.path().join("out");

        let export = InvestorExport::new(config(&db), &out);
        let summary = export.run().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 2);
        assert!(summary.failed.is_empty());

        // 张三: two deposit rows via normalized IMK, no lease rows, no transactions
        let mut first = open_workbook_auto(out.join("1、ID-001.xlsx")).unwrap();
        assert_eq!(first.sheet_names(), vec![SUMMARY_SHEET, DEPOSIT_SHEET]);
        let summary_sheet = first.worksheet_range(SUMMARY_SHEET).unwrap();
        assert_eq!(summary_sheet.height(), 3);
        let deposits = first.worksheet_range(DEPOSIT_SHEET).unwrap();
        assert_eq!(deposits.height(), 3);

        // 李四: transactions matched through either name column, one row each
        let mut second = open_workbook_auto(out.join("2、ID-002.xlsx")).unwrap();
        assert_eq!(second.sheet_names(), vec![SUMMARY_SHEET, TRANSACTION_SHEET]);
        let transactions = second.worksheet_range(TRANSACTION_SHEET).unwrap();
        assert_eq!(transactions.height(), 4);
    }

    #[test]
    fn test_colliding_ids_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("collide.db");
        Connection::open(&db)
            .unwrap()
            .execute_batch(
                r#"
                CREATE TABLE "台账匹配流水结果" ("序号_Primary_Key" INTEGER, "Identity_Matching_Key" TEXT, "投资人姓名" TEXT);
                CREATE TABLE "1代保管业务台账明细" ("Identity_Matching_Key" TEXT);
                CREATE TABLE "2租赁业务台账明细" ("Identity_Matching_Key" TEXT);
                CREATE TABLE "永坤资金池账户交易明细_身份映射" ("对手户名" TEXT);

                INSERT INTO "台账匹配流水结果" VALUES (1, 'A:B', '张三');
                INSERT INTO "台账匹配流水结果" VALUES (1, 'A?B', '李四');
                INSERT INTO "台账匹配流水结果" VALUES (1, 'A:B', '王五');
                "#,
            )
            .unwrap();
        let out = dir.path().join("out");

        let summary = InvestorExport::new(config(&db), &out).run().unwrap();
        assert_eq!(summary.succeeded, 3);

        let mut files: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["1、A_B.xlsx", "1、A_B_2.xlsx", "1、A_B_3.xlsx"]);
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("empty.db");
        Connection::open(&db)
            .unwrap()
            .execute_batch(r#"CREATE TABLE "台账匹配流水结果" (x TEXT);"#)
            .unwrap();

        let export = InvestorExport::new(config(&db), dir.path().join("out"));
        assert!(matches!(export.prepare(), Err(RegisterError::Config(_))));
    }

    #[test]
    fn test_indexes_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("yk.db");
        seed_database(&db);

        let export = InvestorExport::new(config(&db), dir.path().join("out"));
        export.prepare().unwrap();

        let conn = open_connection(&db, true).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        // three IMK indexes + two present transaction name columns
        assert_eq!(count, 5);
    }

    #[test]
    fn test_transaction_fields_dedup() {
        let mut cfg = ExportConfig::default();
        cfg.transaction_name_fields = vec!["a".into(), " a ".into(), "".into(), "b".into()];
        let export = InvestorExport::new(cfg, ".");
        assert_eq!(export.transaction_fields(), vec!["a", "b"]);
    }
}
