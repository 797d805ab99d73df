//! Coinflip wagers.
//!
//! Stakes are escrowed into the game at entry (both players debited up
//! front); the winner is credited double the stake at resolution. Playing
//! against the house escrows only the player's stake, and a house win
//! credits nobody.
//!
//! The outcome policy is configuration: `Fair` is a clean 50/50;
//! `HouseEdge` reproduces the legacy behavior where the initiator's win
//! probability decays after every win and a stake above a fixed share of
//! their balance always loses.

use crate::config::OddsPolicy;
use crate::store::{CounterStore, LedgerStore, StoreError};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("unknown game")]
    UnknownGame,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("you can't join your own game")]
    SelfJoin,
    #[error("someone has already joined this game")]
    AlreadyJoined,
    #[error("only the game initiator may do that")]
    NotInitiator,
    #[error("the game has no opponent yet")]
    NoOpponent,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for GameError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds => GameError::InsufficientFunds,
            other => GameError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Heads,
    Tails,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Heads => Side::Tails,
            Side::Tails => Side::Heads,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Heads => write!(f, "Heads"),
            Side::Tails => write!(f, "Tails"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opponent {
    Player(String),
    House,
}

#[derive(Debug, Clone)]
pub struct CoinflipGame {
    pub number: u64,
    pub initiator: String,
    pub stake: Decimal,
    pub chosen: Side,
    pub opponent: Option<Opponent>,
    pub started_at: i64,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub number: u64,
    pub landed: Side,
    /// `None` when the house won.
    pub winner: Option<String>,
    pub payout: Decimal,
}

pub struct CoinflipTable {
    ledger: Arc<LedgerStore>,
    counters: Arc<CounterStore>,
    policy: OddsPolicy,
    games: DashMap<u64, CoinflipGame>,
    /// Per-initiator decayed win probability under `HouseEdge`.
    win_probability: DashMap<String, f64>,
}

impl CoinflipTable {
    pub fn new(ledger: Arc<LedgerStore>, counters: Arc<CounterStore>, policy: OddsPolicy) -> Self {
        Self {
            ledger,
            counters,
            policy,
            games: DashMap::new(),
            win_probability: DashMap::new(),
        }
    }

    /// Open a game: escrow the initiator's stake and assign a game number.
    pub async fn open(
        &self,
        initiator: &str,
        stake: Decimal,
        chosen: Side,
    ) -> Result<u64, GameError> {
        self.ledger.debit(initiator, stake).await?;
        let number = self.counters.next("coinflip").await?;
        self.games.insert(
            number,
            CoinflipGame {
                number,
                initiator: initiator.to_string(),
                stake,
                chosen,
                opponent: None,
                started_at: Utc::now().timestamp(),
            },
        );
        info!(number, initiator, %stake, side = %chosen, "coinflip opened");
        Ok(number)
    }

    /// Join as the opponent, escrowing the same stake.
    pub async fn join(&self, number: u64, player: &str) -> Result<(), GameError> {
        {
            let game = self.games.get(&number).ok_or(GameError::UnknownGame)?;
            if game.initiator == player {
                return Err(GameError::SelfJoin);
            }
            if game.opponent.is_some() {
                return Err(GameError::AlreadyJoined);
            }
        }
        // Claim the open seat before debiting so a concurrent join can't
        // escrow twice.
        let Some((_, mut game)) = self.games.remove_if(&number, |_, g| g.opponent.is_none())
        else {
            return Err(GameError::AlreadyJoined);
        };

        match self.ledger.debit(player, game.stake).await {
            Ok(_) => {
                game.opponent = Some(Opponent::Player(player.to_string()));
                self.games.insert(number, game);
                Ok(())
            }
            Err(e) => {
                self.games.insert(number, game);
                Err(e.into())
            }
        }
    }

    /// Initiator pits the game against the house; no extra escrow.
    pub async fn call_house(&self, number: u64, caller: &str) -> Result<(), GameError> {
        {
            let game = self.games.get(&number).ok_or(GameError::UnknownGame)?;
            if game.initiator != caller {
                return Err(GameError::NotInitiator);
            }
        }
        let Some((_, mut game)) = self.games.remove_if(&number, |_, g| g.opponent.is_none())
        else {
            return Err(GameError::AlreadyJoined);
        };
        game.opponent = Some(Opponent::House);
        self.games.insert(number, game);
        Ok(())
    }

    /// Cancel an unjoined game and refund the escrowed stake.
    pub async fn cancel(&self, number: u64, caller: &str) -> Result<(), GameError> {
        {
            let game = self.games.get(&number).ok_or(GameError::UnknownGame)?;
            if game.initiator != caller {
                return Err(GameError::NotInitiator);
            }
        }
        let Some((_, game)) = self.games.remove_if(&number, |_, g| g.opponent.is_none()) else {
            return Err(GameError::AlreadyJoined);
        };

        self.ledger.credit(&game.initiator, game.stake).await?;
        info!(number, initiator = %game.initiator, "coinflip canceled, stake refunded");
        Ok(())
    }

    /// Flip the coin, pay the winner, and retire the game.
    pub async fn resolve(&self, number: u64) -> Result<Outcome, GameError> {
        {
            let game = self.games.get(&number).ok_or(GameError::UnknownGame)?;
            if game.opponent.is_none() {
                return Err(GameError::NoOpponent);
            }
        }
        let Some((_, game)) = self.games.remove_if(&number, |_, g| g.opponent.is_some()) else {
            return Err(GameError::NoOpponent);
        };

        let balance = self.ledger.balance(&game.initiator).await?;
        let win_probability = self.current_win_probability(&game.initiator);
        let landed = decide(
            &self.policy,
            game.chosen,
            game.stake,
            balance,
            win_probability,
            rand::random::<f64>(),
        );

        let initiator_won = landed == game.chosen;
        if initiator_won {
            self.decay_win_probability(&game.initiator);
        }

        let opponent = game.opponent.clone().unwrap_or(Opponent::House);
        let winner = if initiator_won {
            Some(game.initiator.clone())
        } else {
            match &opponent {
                Opponent::Player(p) => Some(p.clone()),
                Opponent::House => None,
            }
        };

        let payout = game.stake * Decimal::from(2);
        if let Some(winner) = &winner {
            self.ledger.credit(winner, payout).await?;
        }
        info!(
            number,
            landed = %landed,
            winner = winner.as_deref().unwrap_or("house"),
            %payout,
            "coinflip resolved"
        );

        Ok(Outcome {
            number,
            landed,
            winner,
            payout,
        })
    }

    fn current_win_probability(&self, initiator: &str) -> f64 {
        self.win_probability
            .get(initiator)
            .map(|p| *p)
            .unwrap_or(0.5)
    }

    fn decay_win_probability(&self, initiator: &str) {
        if let OddsPolicy::HouseEdge {
            win_decay,
            min_win_probability,
            ..
        } = self.policy
        {
            let mut entry = self.win_probability.entry(initiator.to_string()).or_insert(0.5);
            *entry = (*entry - win_decay).max(min_win_probability);
        }
    }
}

/// Pure outcome rule; `roll` is a uniform sample in [0, 1).
fn decide(
    policy: &OddsPolicy,
    chosen: Side,
    stake: Decimal,
    balance: Decimal,
    win_probability: f64,
    roll: f64,
) -> Side {
    match policy {
        OddsPolicy::Fair => {
            if roll < 0.5 {
                chosen
            } else {
                chosen.opposite()
            }
        }
        OddsPolicy::HouseEdge {
            forced_loss_ratio, ..
        } => {
            let ratio = Decimal::try_from(*forced_loss_ratio).unwrap_or(Decimal::ONE);
            let threshold = (ratio * balance).to_f64().unwrap_or(f64::MAX);
            if stake.to_f64().unwrap_or(0.0) > threshold {
                return chosen.opposite();
            }
            if roll < win_probability {
                chosen
            } else {
                chosen.opposite()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_data_dir;

    fn house_edge() -> OddsPolicy {
        OddsPolicy::HouseEdge {
            win_decay: 0.1,
            min_win_probability: 0.1,
            forced_loss_ratio: 0.8,
        }
    }

    fn table(policy: OddsPolicy) -> CoinflipTable {
        let dir = temp_data_dir();
        CoinflipTable::new(
            Arc::new(LedgerStore::open(&dir)),
            Arc::new(CounterStore::open(&dir)),
            policy,
        )
    }

    #[test]
    fn test_fair_decide_follows_the_roll() {
        let policy = OddsPolicy::Fair;
        let stake = Decimal::from(10);
        let balance = Decimal::from(10);
        assert_eq!(
            decide(&policy, Side::Heads, stake, balance, 0.5, 0.2),
            Side::Heads
        );
        assert_eq!(
            decide(&policy, Side::Heads, stake, balance, 0.5, 0.9),
            Side::Tails
        );
    }

    #[test]
    fn test_house_edge_forces_loss_on_oversized_stake() {
        // Stake above 80% of balance loses regardless of the roll.
        let landed = decide(
            &house_edge(),
            Side::Heads,
            Decimal::from(90),
            Decimal::from(100),
            0.5,
            0.0,
        );
        assert_eq!(landed, Side::Tails);
    }

    #[test]
    fn test_house_edge_respects_decayed_probability() {
        let stake = Decimal::from(10);
        let balance = Decimal::from(100);
        // Decayed to 0.2: a 0.3 roll now loses where it used to win.
        assert_eq!(
            decide(&house_edge(), Side::Tails, stake, balance, 0.2, 0.3),
            Side::Heads
        );
        assert_eq!(
            decide(&house_edge(), Side::Tails, stake, balance, 0.5, 0.3),
            Side::Tails
        );
    }

    #[tokio::test]
    async fn test_open_escrows_stake_and_numbers_games() {
        let table = table(OddsPolicy::Fair);
        table.ledger.credit("a", Decimal::from(100)).await.unwrap();

        let first = table.open("a", Decimal::from(10), Side::Heads).await.unwrap();
        let second = table.open("a", Decimal::from(10), Side::Tails).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(table.ledger.balance("a").await.unwrap(), Decimal::from(80));
    }

    #[tokio::test]
    async fn test_open_requires_balance() {
        let table = table(OddsPolicy::Fair);
        assert!(matches!(
            table.open("broke", Decimal::from(5), Side::Heads).await,
            Err(GameError::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn test_join_rules() {
        let table = table(OddsPolicy::Fair);
        table.ledger.credit("a", Decimal::from(50)).await.unwrap();
        table.ledger.credit("b", Decimal::from(50)).await.unwrap();
        let number = table.open("a", Decimal::from(20), Side::Heads).await.unwrap();

        assert!(matches!(
            table.join(number, "a").await,
            Err(GameError::SelfJoin)
        ));
        table.join(number, "b").await.unwrap();
        assert_eq!(table.ledger.balance("b").await.unwrap(), Decimal::from(30));
        assert!(matches!(
            table.join(number, "c").await,
            Err(GameError::AlreadyJoined)
        ));
    }

    #[tokio::test]
    async fn test_cancel_refunds_only_unjoined_games() {
        let table = table(OddsPolicy::Fair);
        table.ledger.credit("a", Decimal::from(50)).await.unwrap();
        table.ledger.credit("b", Decimal::from(50)).await.unwrap();

        let number = table.open("a", Decimal::from(20), Side::Heads).await.unwrap();
        assert!(matches!(
            table.cancel(number, "b").await,
            Err(GameError::NotInitiator)
        ));
        table.cancel(number, "a").await.unwrap();
        assert_eq!(table.ledger.balance("a").await.unwrap(), Decimal::from(50));

        let number = table.open("a", Decimal::from(20), Side::Heads).await.unwrap();
        table.join(number, "b").await.unwrap();
        assert!(matches!(
            table.cancel(number, "a").await,
            Err(GameError::AlreadyJoined)
        ));
    }

    #[tokio::test]
    async fn test_resolve_pays_winner_double_stake() {
        let table = table(OddsPolicy::Fair);
        table.ledger.credit("a", Decimal::from(50)).await.unwrap();
        table.ledger.credit("b", Decimal::from(50)).await.unwrap();
        let number = table.open("a", Decimal::from(20), Side::Heads).await.unwrap();
        table.join(number, "b").await.unwrap();

        let outcome = table.resolve(number).await.unwrap();
        assert_eq!(outcome.payout, Decimal::from(40));
        let winner = outcome.winner.expect("pvp game always has a winner");

        let a = table.ledger.balance("a").await.unwrap();
        let b = table.ledger.balance("b").await.unwrap();
        // Escrow left both at 30; the winner got 40 back.
        if winner == "a" {
            assert_eq!((a, b), (Decimal::from(70), Decimal::from(30)));
        } else {
            assert_eq!((a, b), (Decimal::from(30), Decimal::from(70)));
        }
        assert!(matches!(
            table.resolve(number).await,
            Err(GameError::UnknownGame)
        ));
    }

    #[tokio::test]
    async fn test_house_win_credits_nobody() {
        // Oversized stake against the house under HouseEdge: forced loss.
        let table = table(house_edge());
        table.ledger.credit("a", Decimal::from(100)).await.unwrap();
        let number = table.open("a", Decimal::from(90), Side::Heads).await.unwrap();
        table.call_house(number, "a").await.unwrap();

        let outcome = table.resolve(number).await.unwrap();
        assert_eq!(outcome.landed, Side::Tails);
        assert!(outcome.winner.is_none());
        assert_eq!(table.ledger.balance("a").await.unwrap(), Decimal::from(10));
    }

    #[tokio::test]
    async fn test_resolve_requires_opponent() {
        let table = table(OddsPolicy::Fair);
        table.ledger.credit("a", Decimal::from(50)).await.unwrap();
        let number = table.open("a", Decimal::from(10), Side::Heads).await.unwrap();
        assert!(matches!(
            table.resolve(number).await,
            Err(GameError::NoOpponent)
        ));
    }
}
