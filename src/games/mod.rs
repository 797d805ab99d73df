//! Wager games layered on the ledger.

pub mod coinflip;

pub use coinflip::{CoinflipTable, GameError, Opponent, Outcome, Side};
