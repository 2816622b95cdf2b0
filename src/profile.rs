// 🪪 Account Profile - everything the ledger needs to know about one file
//
// Derived purely from the source workbook; no registry access here, so a
// profile can be built outside the registration lock.

use crate::cell::format_dotted;
use crate::normalizer::{normalize_number, DigitMatcher};
use crate::reconciliation::{BalanceCheckEngine, BalanceDiscrepancy, DATE_COLUMN};
use crate::registry::EntityKey;
use crate::source::SourceWorkbook;
use crate::table::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const NAME_COLUMN: &str = "本账号名称";
pub const ACCOUNT_COLUMN: &str = "本账号";
pub const CARD_COLUMN: &str = "本卡号";
pub const CURRENCY_COLUMN: &str = "交易币种";

pub const INFO_ACCOUNT_COLUMN: &str = "交易账号";
pub const INFO_CARD_COLUMN: &str = "交易卡号";
pub const INFO_BANK_COLUMN: &str = "账号开户银行";
pub const INFO_BRANCH_COLUMN: &str = "开户网点";
pub const INFO_OPENED_COLUMN: &str = "账号开户时间";
pub const INFO_CLOSED_COLUMN: &str = "销户日期";

pub const AMBIGUOUS_ACCOUNT: &str = "非唯一账号 请检查";
pub const BANK_UNMATCHED: &str = "未匹配成功";
pub const BANK_NO_DATA: &str = "无数据";

// ============================================================================
// BANK LOOKUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankInfo {
    /// Bank + branch, "无数据" when matched rows carry neither,
    /// "未匹配成功" when nothing matched
    pub bank: String,
    pub opened: Option<NaiveDate>,
    pub closed: Option<NaiveDate>,
}

impl BankInfo {
    fn unmatched() -> Self {
        BankInfo {
            bank: BANK_UNMATCHED.to_string(),
            opened: None,
            closed: None,
        }
    }
}

/// Find the account-info rows describing `account`.
///
/// Exact comparison against the account and card columns first; only when
/// nothing matches exactly is the digit matcher tried.
pub fn lookup_bank(account: &str, info: &Table, matcher: DigitMatcher) -> BankInfo {
    if info.is_empty() {
        return BankInfo::unmatched();
    }

    let acc = info.column_index(INFO_ACCOUNT_COLUMN);
    let card = info.column_index(INFO_CARD_COLUMN);
    let value = |row: usize, col: Option<usize>| -> Option<String> {
        col.and_then(|c| normalize_number(info.cell(row, c)))
    };

    let exact: Vec<usize> = (0..info.len())
        .filter(|&r| {
            value(r, acc).as_deref() == Some(account) || value(r, card).as_deref() == Some(account)
        })
        .collect();

    let matched = if exact.is_empty() {
        (0..info.len())
            .filter(|&r| {
                let hit = |col| value(r, col).map(|v| matcher.matches(account, &v)).unwrap_or(false);
                hit(acc) || hit(card)
            })
            .collect()
    } else {
        exact
    };

    if matched.is_empty() {
        return BankInfo::unmatched();
    }

    let first_text = |column: &str| -> Option<String> {
        let col = info.column_index(column)?;
        matched.iter().find_map(|&r| match info.cell(r, col) {
            crate::cell::Cell::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
    };
    let bank = first_text(INFO_BANK_COLUMN);
    let branch = first_text(INFO_BRANCH_COLUMN);

    let bank = if bank.is_none() && branch.is_none() {
        BANK_NO_DATA.to_string()
    } else {
        format!("{}{}", bank.unwrap_or_default(), branch.unwrap_or_default())
    };

    let dates = |column: &str| -> Vec<NaiveDate> {
        match info.column_index(column) {
            Some(col) => matched
                .iter()
                .filter_map(|&r| info.cell(r, col).to_date_or_none())
                .collect(),
            None => Vec::new(),
        }
    };

    BankInfo {
        bank,
        opened: dates(INFO_OPENED_COLUMN).into_iter().min(),
        closed: dates(INFO_CLOSED_COLUMN).into_iter().max(),
    }
}

// ============================================================================
// ACCOUNT PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub names: Vec<String>,
    /// Set only when the statement carries exactly one account number
    pub account: Option<String>,
    pub cards: Vec<String>,
    pub currencies: Vec<String>,
    pub bank: BankInfo,
    pub discrepancy: Option<BalanceDiscrepancy>,
    pub period: Option<(NaiveDate, NaiveDate)>,
}

impl AccountProfile {
    /// Build the profile; `None` when the statement names no account holder.
    pub fn build(
        source: &SourceWorkbook,
        matcher: DigitMatcher,
        balance: &BalanceCheckEngine,
    ) -> Option<Self> {
        let extraction = &source.extraction;

        let names = extraction.unique_values(NAME_COLUMN);
        if names.is_empty() {
            return None;
        }

        let accounts = extraction.unique_values(ACCOUNT_COLUMN);
        let account = match accounts.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };

        let bank = match &account {
            Some(acc) => lookup_bank(acc, &source.account_info, matcher),
            None => BankInfo::unmatched(),
        };

        let dates: Vec<NaiveDate> = extraction
            .column(DATE_COLUMN)
            .filter_map(|c| c.to_date_or_none())
            .collect();
        let period = dates.iter().min().copied().zip(dates.iter().max().copied());

        Some(AccountProfile {
            names,
            account,
            cards: extraction.unique_values(CARD_COLUMN),
            currencies: source.organize.unique_values(CURRENCY_COLUMN),
            bank,
            discrepancy: balance.check(extraction),
            period,
        })
    }

    pub fn name_display(&self) -> String {
        self.names.join(";")
    }

    pub fn account_display(&self) -> String {
        self.account
            .clone()
            .unwrap_or_else(|| AMBIGUOUS_ACCOUNT.to_string())
    }

    pub fn cards_display(&self) -> String {
        self.cards.join("、")
    }

    pub fn currency_display(&self) -> String {
        self.currencies.join(";")
    }

    /// "2023.01.01-2023.12.31", or "" without parseable dates
    pub fn period_display(&self) -> String {
        self.period
            .map(|(start, end)| format!("{}-{}", format_dotted(start), format_dotted(end)))
            .unwrap_or_default()
    }

    /// Registry keys: the unique account (if any) plus every card
    pub fn entity_keys(&self) -> (Option<EntityKey>, Vec<EntityKey>) {
        let account = self.account.as_deref().and_then(EntityKey::new);
        let cards = self.cards.iter().filter_map(|c| EntityKey::new(c)).collect();
        (account, cards)
    }

    /// "{acquire_time}取得：开户时间…；销户时间…；…存在余额差异…"
    pub fn detail_note(&self, acquire_time: &str) -> String {
        let mut parts = Vec::new();
        match self.bank.opened {
            Some(d) => parts.push(format!("开户时间{}", format_dotted(d))),
            None => parts.push("开户时间匹配失败".to_string()),
        }
        if let Some(d) = self.bank.closed {
            parts.push(format!("销户时间{}", format_dotted(d)));
        }
        if let Some(discrepancy) = &self.discrepancy {
            parts.push(discrepancy.describe());
        }
        format!("{}取得：{}", acquire_time, parts.join("；"))
    }
}
