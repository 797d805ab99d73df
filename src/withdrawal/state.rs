//! Withdrawal approval stages.
//!
//! Terminal stages: SETTLED, USER_DENIED, OPERATOR_DENIED. Funds are
//! debited at request time, so only USER_DENIED refunds.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Pre-debited, waiting on the requester's confirm/deny.
    Requested,
    /// Requester confirmed, waiting on an operator.
    UserConfirmed,
    /// Terminal: transfer submitted and recorded.
    Settled,
    /// Terminal: requester backed out, pre-debit refunded.
    UserDenied,
    /// Terminal: operator rejected; the pre-debit is NOT refunded.
    OperatorDenied,
}

impl Stage {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Settled | Stage::UserDenied | Stage::OperatorDenied
        )
    }

    /// True while the pre-debited funds have left the ledger but the
    /// transfer has not settled.
    #[inline]
    pub fn holds_funds(&self) -> bool {
        matches!(self, Stage::Requested | Stage::UserConfirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Requested => "REQUESTED",
            Stage::UserConfirmed => "USER_CONFIRMED",
            Stage::Settled => "SETTLED",
            Stage::UserDenied => "USER_DENIED",
            Stage::OperatorDenied => "OPERATOR_DENIED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
