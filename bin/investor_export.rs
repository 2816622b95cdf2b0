// Investor Export - one workbook per investor
// Reads the matched base table and its detail tables from SQLite

use anyhow::{bail, Context, Result};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use account_register::logging::init_logging;
use account_register::{clean_input_path, Config, ExportConfig, InvestorExport, VERSION};

/// Command-line overrides on top of the loaded config
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    database: Option<PathBuf>,
    workers: Option<usize>,
    transaction_workers: Option<usize>,
    extra_fields: Vec<String>,
    print_every: Option<usize>,
    skip_index_check: bool,
    no_transaction_index: bool,
    strip_null: bool,
}

fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| -> Result<String> {
            args.next()
                .with_context(|| format!("{} 需要一个参数", name))
        };
        let number = |name: &str, raw: String| -> Result<usize> {
            raw.trim()
                .parse::<usize>()
                .with_context(|| format!("{} 需要整数，得到 '{}'", name, raw))
        };

        match arg.as_str() {
            "--db" => parsed.database = Some(PathBuf::from(value("--db")?)),
            "--workers" => parsed.workers = Some(number("--workers", value("--workers")?)?),
            "--tx-workers" => {
                parsed.transaction_workers = Some(number("--tx-workers", value("--tx-workers")?)?)
            }
            "--tx-extra-fields" => {
                parsed.extra_fields = value("--tx-extra-fields")?
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            }
            "--print-every" => {
                parsed.print_every = Some(number("--print-every", value("--print-every")?)?)
            }
            "--skip-index-check" => parsed.skip_index_check = true,
            "--no-tx-index" => parsed.no_transaction_index = true,
            "--tx-remove-null" => parsed.strip_null = true,
            other => bail!("未知参数: {}", other),
        }
    }

    Ok(parsed)
}

impl CliArgs {
    fn apply(self, config: &mut ExportConfig) {
        if let Some(db) = self.database {
            config.database = db;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        if self.transaction_workers.is_some() {
            config.transaction_workers = self.transaction_workers;
        }
        config.transaction_name_fields.extend(self.extra_fields);
        if let Some(every) = self.print_every {
            config.print_every = every.max(1);
        }
        if self.skip_index_check {
            config.ensure_indexes = false;
        }
        if self.no_transaction_index {
            config.transaction_index = false;
        }
        if self.strip_null {
            config.transaction_strip_null = true;
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("❌ 导出失败：{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = parse_args(env::args().skip(1))?;

    println!("📦 Investor Export v{} - 线下投资人一人一档", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    print!("请输入导出文件夹路径: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let out_dir = clean_input_path(&line);
    if out_dir.is_empty() {
        eprintln!("❌ 路径不能为空。");
        std::process::exit(1);
    }
    let out_dir = PathBuf::from(out_dir);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("无法创建导出目录: {}", out_dir.display()))?;

    let loaded = Config::load().context("配置加载失败")?;
    let mut config = loaded.export.clone();
    cli.apply(&mut config);
    let _guard = init_logging(&out_dir, &config.log_file)?;
    loaded.log_notes();
    tracing::info!("数据库: {}", config.database.display());

    let summary = InvestorExport::new(config, &out_dir).run()?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "[DONE] 成功 {}，失败 {}，总耗时 {:.1}s。输出：{}",
        summary.succeeded,
        summary.failed.len(),
        summary.elapsed.as_secs_f64(),
        out_dir.display()
    );
    for (id, reason) in summary.failed.iter().take(20) {
        println!("   ❌ {}: {}", id, reason);
    }

    Ok(())
}
