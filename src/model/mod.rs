//! Types that represent the core data model, such as `Transaction` and `User`.
mod amount;
mod article;
mod message;
mod summary;
mod timestamp;
mod transaction;
mod user;

pub use amount::{Amount, AmountError};
pub use article::{articles, Article};
pub use message::{Message, Role};
pub use summary::{MonthSummary, Summary};
pub use timestamp::Timestamp;
pub use transaction::{
    sort_newest_first, Transaction, TransactionDocument, TransactionInput, TransactionType,
};
pub use user::User;
