//! Store rows and the SQL processors that read and write them.
//!
//! Every query is a plain struct with a `Processor` impl on
//! [`DatabaseProcessor`](crate::framework::DatabaseProcessor).

pub mod address;
pub mod balance;
pub mod block;
pub mod coin;
pub mod reward;
pub mod validator;

pub use balance::Balance;
pub use block::BlockInsert;
pub use coin::{Coin, CoinInsert, CoinUpdate};
pub use reward::{AggregateInterval, RewardInsert, SlashInsert};
