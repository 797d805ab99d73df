//! Human-in-the-loop withdrawal approval.

pub mod flow;
pub mod state;

pub use flow::{ApprovalFlow, WithdrawError, WithdrawalRequest};
pub use state::Stage;
