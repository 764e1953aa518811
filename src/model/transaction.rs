use crate::model::{Amount, Timestamp};
use crate::Result;
use anyhow::{bail, ensure};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Whether money came in or went out.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Expense,
}

serde_plain::derive_display_from_serialize!(TransactionType);
serde_plain::derive_fromstr_from_deserialize!(TransactionType);

/// The user-editable fields of a transaction, i.e. everything but the id. This is what the
/// transaction form produces and what gets sent on create and update.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    #[serde(rename = "type")]
    transaction_type: TransactionType,
    amount: Amount,
    description: String,
    date: DateTime<Utc>,
}

impl TransactionInput {
    /// Creates a validated `TransactionInput`. The date may not be in the future or before
    /// 1900-01-01 and the description may not be blank.
    pub fn new(
        transaction_type: TransactionType,
        amount: Amount,
        description: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Result<Self> {
        Self::new_at(transaction_type, amount, description, date, Utc::now())
    }

    /// Same as `new` but validates the date against `now` instead of the system clock.
    pub fn new_at(
        transaction_type: TransactionType,
        amount: Amount,
        description: impl Into<String>,
        date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let description = description.into().trim().to_string();
        ensure!(!description.is_empty(), "The description is required");
        ensure!(
            date <= now,
            "The date {} is in the future",
            date.format("%Y-%m-%d")
        );
        if date < earliest_date() {
            bail!("The date {} is before 1900-01-01", date.format("%Y-%m-%d"));
        }
        Ok(Self {
            transaction_type,
            amount,
            description,
            date,
        })
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// Encodes the calendar date into its persisted form.
    pub fn to_document(&self) -> TransactionDocument {
        TransactionDocument {
            transaction_type: self.transaction_type,
            amount: self.amount,
            description: self.description.clone(),
            date: Timestamp::from(self.date),
        }
    }
}

/// A financial record owned by a user. The `id` is assigned by the document collection when the
/// record is first written, so a `Transaction` only ever comes out of a snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    #[serde(flatten)]
    input: TransactionInput,
}

impl Transaction {
    pub fn new(id: impl Into<String>, input: TransactionInput) -> Self {
        Self {
            id: id.into(),
            input,
        }
    }

    /// Decodes a stored document, converting its persisted timestamp into a calendar timestamp.
    /// A blank description is rejected. The date is not checked against the clock.
    pub fn from_document(id: impl Into<String>, document: TransactionDocument) -> Result<Self> {
        let id = id.into();
        let description = document.description.trim().to_string();
        ensure!(!description.is_empty(), "Transaction {id} has no description");
        let date = document.date.to_date_time()?;
        Ok(Self {
            id,
            input: TransactionInput {
                transaction_type: document.transaction_type,
                amount: document.amount,
                description,
                date,
            },
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.input.transaction_type
    }

    pub fn amount(&self) -> Amount {
        self.input.amount
    }

    pub fn description(&self) -> &str {
        &self.input.description
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.input.date
    }

    /// The editable fields without the id.
    pub fn input(&self) -> &TransactionInput {
        &self.input
    }

    /// Replaces the editable fields, keeping the id.
    pub fn with_input(self, input: TransactionInput) -> Self {
        Self { id: self.id, input }
    }

    /// The update payload for this transaction: every field except the id.
    pub fn to_document(&self) -> TransactionDocument {
        self.input.to_document()
    }
}

/// Sorts transactions by date, newest first. The sort is stable so equal dates keep the order in
/// which they arrived.
pub fn sort_newest_first(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| b.date().cmp(&a.date()));
}

/// The persisted shape of a transaction document: `type`, `amount`, `description` and `date` as a
/// serialized timestamp. The id is the document's key and is not stored in the body.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionDocument {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Amount,
    pub description: String,
    pub date: Timestamp,
}

impl TransactionDocument {
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

fn earliest_date() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
