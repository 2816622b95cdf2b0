// ⚠️ Error types shared by the registration run and the investor export
//
// Library code returns RegisterError; the binaries wrap it in anyhow with context.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot read workbook {path}: {message}")]
    WorkbookRead { path: PathBuf, message: String },

    #[error("cannot write workbook: {0}")]
    WorkbookWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("sheet '{sheet}' not found in {path}")]
    MissingSheet { path: PathBuf, sheet: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Target ledger is held open by another process (typically Excel)
    #[error("ledger {0} is locked by another process; close it and retry")]
    LedgerLocked(PathBuf),
}

impl RegisterError {
    pub fn workbook_read(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        RegisterError::WorkbookRead {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegisterError>;
