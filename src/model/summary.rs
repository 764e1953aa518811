//! Aggregates derived from the transaction list for the dashboard charts.
//!
//! The charting layer only renders these numbers; all arithmetic happens here.

use crate::model::{Transaction, TransactionType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Income and expense totals for one calendar month.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MonthSummary {
    /// The month as `YYYY-MM`.
    pub month: String,
    pub income: Decimal,
    pub expense: Decimal,
}

/// Totals over a list of transactions plus a per-month breakdown in ascending month order.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub income: Decimal,
    pub expense: Decimal,
    pub balance: Decimal,
    pub months: Vec<MonthSummary>,
}

impl Summary {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let mut income = Decimal::ZERO;
        let mut expense = Decimal::ZERO;
        let mut months: BTreeMap<String, MonthSummary> = BTreeMap::new();

        for t in transactions {
            let month = t.date().format("%Y-%m").to_string();
            let bucket = months.entry(month.clone()).or_insert_with(|| MonthSummary {
                month,
                ..MonthSummary::default()
            });
            let value = t.amount().value();
            match t.transaction_type() {
                TransactionType::Income => {
                    income += value;
                    bucket.income += value;
                }
                TransactionType::Expense => {
                    expense += value;
                    bucket.expense += value;
                }
            }
        }

        Self {
            income,
            expense,
            balance: income - expense,
            months: months.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, TransactionInput};
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn txn(id: &str, t: TransactionType, amount: &str, y: i32, m: u32, d: u32) -> Transaction {
        let date = Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
        let input =
            TransactionInput::new_at(t, Amount::from_str(amount).unwrap(), id, date, date).unwrap();
        Transaction::new(id, input)
    }

    #[test]
    fn test_empty() {
        let summary = Summary::from_transactions(&[]);
        assert_eq!(summary, Summary::default());
    }

    #[test]
    fn test_totals_and_months() {
        let list = vec![
            txn("a", TransactionType::Income, "100", 2024, 2, 5),
            txn("b", TransactionType::Expense, "40.50", 2024, 1, 20),
            txn("c", TransactionType::Income, "25", 2024, 1, 3),
            txn("d", TransactionType::Expense, "10", 2024, 2, 1),
        ];
        let summary = Summary::from_transactions(&list);
        assert_eq!(summary.income, Decimal::from(125));
        assert_eq!(summary.expense, Decimal::from_str("50.50").unwrap());
        assert_eq!(summary.balance, Decimal::from_str("74.50").unwrap());

        let months: Vec<&str> = summary.months.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02"]);
        assert_eq!(summary.months[0].income, Decimal::from(25));
        assert_eq!(summary.months[0].expense, Decimal::from_str("40.50").unwrap());
        assert_eq!(summary.months[1].income, Decimal::from(100));
        assert_eq!(summary.months[1].expense, Decimal::from(10));
    }
}
