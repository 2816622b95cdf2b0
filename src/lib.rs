// Account Register - Core Library
// Shared by the registration run (account-register) and the investor export

pub mod cell;           // Loosely typed spreadsheet / database values
pub mod error;          // RegisterError + Result
pub mod normalizer;     // Comparison keys, digit match, file-name cleanup
pub mod table;          // Header + rows view over a sheet
pub mod statistics;     // Statistics ledger reader (pre-existing serials)
pub mod registry;       // At-most-once serial assignment
pub mod source;         // Split statement workbooks
pub mod reconciliation; // Per-row balance verification
pub mod profile;        // Ledger fields derived from one statement
pub mod retry;          // Bounded jittered retry
pub mod pool;           // Pool sizing, limiter, progress
pub mod filing;         // Outcome folders and renaming
pub mod workbook;       // xlsx output with lazy sheets
pub mod ledger;         // 登记信息.xlsx + run report
pub mod config;         // YAML config + env overrides
pub mod logging;        // Console + file tracing subscriber
pub mod register;       // Registration run orchestration

#[cfg(feature = "sqlite")]
pub mod export;         // Per-investor workbooks from SQLite

// Re-export commonly used types
pub use cell::Cell;
pub use config::{Config, ExportConfig, RegistrationConfig};
pub use error::{RegisterError, Result};
pub use filing::{Bucket, BucketNames, Buckets};
pub use ledger::{LedgerRow, RunCounts, SerialCell, LOCKED_LEDGER_MESSAGE};
pub use normalizer::{
    clean_input_path, digit_match, normalize_key, normalize_number, sanitize_filename,
    DigitMatcher, NormalizeOptions,
};
pub use pool::{Limiter, PoolSizing, WorkerPool};
pub use profile::{AccountProfile, BankInfo};
pub use reconciliation::{BalanceCheckEngine, BalanceDiscrepancy};
pub use register::{RecordState, RegistrationJob, RunInput, RunSummary, SkipReason};
pub use registry::{Assignment, AssignmentOutcome, EntityKey, MatchPolicy, SerialRegistry, SharedRegistry};
pub use retry::{retry, RetryError, RetryPolicy};
pub use source::{SheetFilter, SourceWorkbook};
pub use statistics::{StatisticsEntry, StatisticsLayout};
pub use table::Table;
pub use workbook::LazySheet;

#[cfg(feature = "sqlite")]
pub use export::{ExportSummary, Investor, InvestorExport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
