// 📊 Read queries over the persisted schema
// Parameterized filters + summaries. Read-only: nothing here writes.

use crate::db::{map_transaction, SELECT_COLUMNS};
use crate::model::PersistedTransaction;
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_LIMIT: u32 = 50;

// ============================================================================
// TRANSACTION FILTER
// ============================================================================

/// Optional filters; unset fields don't constrain the query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
    pub currency: Option<String>,
    /// Result cap (default 50)
    pub limit: Option<u32>,
}

impl TransactionFilter {
    /// WHERE clause + bound values
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut parts = Vec::new();
        let mut values = Vec::new();

        if let Some(id) = self.id {
            parts.push("id = ?");
            values.push(Value::Integer(id));
        }
        if let Some(from) = self.date_from {
            parts.push("transaction_date >= ?");
            values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.date_to {
            parts.push("transaction_date <= ?");
            values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
        }

        let text_filters = [
            ("type = ?", &self.tx_type),
            ("source = ?", &self.source),
            ("category = ?", &self.category),
            ("currency = ?", &self.currency),
        ];
        for (clause, value) in text_filters {
            if let Some(v) = value {
                parts.push(clause);
                values.push(Value::Text(v.clone()));
            }
        }

        if parts.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", parts.join(" AND ")), values)
        }
    }
}

pub fn query_transactions(
    conn: &Connection,
    filter: &TransactionFilter,
) -> Result<Vec<PersistedTransaction>> {
    let (where_sql, mut values) = filter.where_clause();
    values.push(Value::Integer(filter.limit.unwrap_or(DEFAULT_LIMIT) as i64));

    let sql = format!(
        "SELECT {} FROM transactions{} ORDER BY transaction_date DESC, id DESC LIMIT ?",
        SELECT_COLUMNS, where_sql
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), map_transaction)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Newest rows; `currency` of None or "ALL" means every currency
pub fn latest_transactions(
    conn: &Connection,
    currency: Option<&str>,
    limit: u32,
) -> Result<Vec<PersistedTransaction>> {
    let filter = TransactionFilter {
        currency: currency
            .filter(|c| !c.eq_ignore_ascii_case("ALL"))
            .map(str::to_string),
        limit: Some(limit),
        ..Default::default()
    };
    query_transactions(conn, &filter)
}

// ============================================================================
// SUMMARIES
// ============================================================================

/// Income / expense / net for one currency and calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub currency: String,
    /// YYYY-MM
    pub month: String,
    pub income: Decimal,
    /// Absolute value of negative amounts
    pub expense: Decimal,
    pub net_flow: Decimal,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthTotals {
    pub currency: String,
    pub month: String,
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub net_cash_flow: Decimal,
    /// Balance reported on the newest transaction in this currency
    pub current_balance: Option<Decimal>,
}

/// Expenses of one month grouped by transaction type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeBreakdown {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub total_amount: Decimal,
    pub transaction_count: i64,
}

// SUMs come back as REAL; printf keeps them at the storage scale
const INCOME_SQL: &str = "printf('%.6f', COALESCE(SUM(CASE WHEN amount > 0 THEN amount ELSE 0 END), 0))";
const EXPENSE_SQL: &str = "printf('%.6f', COALESCE(SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END), 0))";
const NET_SQL: &str = "printf('%.6f', COALESCE(SUM(amount), 0))";

fn decimal_text(text: String, idx: usize) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Totals grouped by currency and calendar month, oldest first
pub fn monthly_summary(conn: &Connection, currency: Option<&str>) -> Result<Vec<MonthlySummary>> {
    let sql = format!(
        "SELECT currency, strftime('%Y-%m', transaction_date) AS month,
                {INCOME_SQL}, {EXPENSE_SQL}, {NET_SQL}, COUNT(*)
         FROM transactions
         WHERE (?1 IS NULL OR currency = ?1)
         GROUP BY currency, month
         ORDER BY month, currency"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([currency], |row| {
            Ok(MonthlySummary {
                currency: row.get(0)?,
                month: row.get(1)?,
                income: decimal_text(row.get(2)?, 2)?,
                expense: decimal_text(row.get(3)?, 3)?,
                net_flow: decimal_text(row.get(4)?, 4)?,
                transaction_count: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Totals for one currency in one month (`YYYY-MM`)
pub fn month_totals(conn: &Connection, currency: &str, month: &str) -> Result<MonthTotals> {
    let sql = format!(
        "SELECT {INCOME_SQL}, {EXPENSE_SQL}, {NET_SQL}
         FROM transactions
         WHERE currency = ?1 AND strftime('%Y-%m', transaction_date) = ?2"
    );

    let (total_income, total_expense, net_cash_flow) =
        conn.query_row(&sql, [currency, month], |row| {
            Ok((
                decimal_text(row.get(0)?, 0)?,
                decimal_text(row.get(1)?, 1)?,
                decimal_text(row.get(2)?, 2)?,
            ))
        })?;

    let latest = latest_transactions(conn, Some(currency), 1)?;

    Ok(MonthTotals {
        currency: currency.to_string(),
        month: month.to_string(),
        total_income,
        total_expense,
        net_cash_flow,
        current_balance: latest.first().map(|t| t.balance),
    })
}

pub fn type_breakdown(conn: &Connection, currency: &str, month: &str) -> Result<Vec<TypeBreakdown>> {
    let mut stmt = conn.prepare(
        "SELECT type, printf('%.6f', COALESCE(SUM(-amount), 0)) AS total, COUNT(*)
         FROM transactions
         WHERE amount < 0
           AND currency = ?1
           AND strftime('%Y-%m', transaction_date) = ?2
         GROUP BY type
         ORDER BY SUM(-amount) DESC",
    )?;

    let rows = stmt
        .query_map([currency, month], |row| {
            Ok(TypeBreakdown {
                tx_type: row.get(0)?,
                total_amount: decimal_text(row.get(1)?, 1)?,
                transaction_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================
