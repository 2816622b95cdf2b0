use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use account_register::logging::init_logging;
use account_register::{
    clean_input_path, Config, RegisterError, RegistrationJob, RunInput, LOCKED_LEDGER_MESSAGE,
    VERSION,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("❌ {}", failure_message(&e));
        std::process::exit(1);
    }
}

/// Operator-facing text; a locked ledger gets the fixed instruction.
fn failure_message(e: &anyhow::Error) -> String {
    match e.downcast_ref::<RegisterError>() {
        Some(RegisterError::LedgerLocked(path)) => {
            format!("{}\n   {}", LOCKED_LEDGER_MESSAGE, path.display())
        }
        _ => format!("运行失败：{:#}", e),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn run() -> Result<()> {
    println!("🧾 Account Register v{} - 统计表登记信息生成", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let statistics_path = PathBuf::from(clean_input_path(&prompt("请输入统计表路径: ")?));
    let folder = PathBuf::from(clean_input_path(&prompt("请输入拆分后流水的存放路径: ")?));
    let acquire_time = prompt("请输入取得时间: ")?;
    let reviewer = prompt("请输入编制人: ")?;

    let folder = folder
        .canonicalize()
        .with_context(|| format!("目录不存在: {}", folder.display()))?;
    let statistics_path = statistics_path
        .canonicalize()
        .with_context(|| format!("统计表不存在: {}", statistics_path.display()))?;

    // Config first: the log file name is configurable
    let config = Config::load().context("配置加载失败")?;
    let _guard = init_logging(&folder, &config.registration.log_file)?;
    tracing::info!("=== 任务开始 ===");
    config.log_notes();

    let input = RunInput {
        statistics_path,
        folder,
        acquire_time,
        reviewer,
    };

    println!("\n📂 读取统计表...");
    let job = RegistrationJob::prepare(input, config.registration)?;

    println!("\n⚙️  处理流水文件...");
    let summary = job.run()?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match &summary.ledger_path {
        None => println!("没有找到可处理的 Excel 文件。"),
        Some(path) => {
            println!("✅ 登记信息已生成: {}", path.display());
            println!(
                "统计：登记={} | 重复={} | 跳过={}",
                summary.counts.registered, summary.counts.duplicate, summary.counts.skipped
            );
            if let Some(report) = &summary.report_path {
                println!("📄 运行报告: {}", report.display());
            }
        }
    }
    tracing::info!("=== 任务结束 ===");

    Ok(())
}
