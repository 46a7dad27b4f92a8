//! Synthetic order flow.
//!
//! Deterministic, seeded stream of limit-order requests across a set of
//! traders and symbols. Used by the benchmark, the randomized invariant
//! tests, and the CLI's `simulate` command. Same config + seed produces
//! the same stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::engine::{Engine, OrderReceipt};
use crate::error::EngineError;
use crate::types::Side;

/// Configuration for the synthetic order flow. All ranges are inclusive.
#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// RNG seed. Same seed produces the same request stream.
    pub seed: u64,
    /// Symbols to trade (listed by [`seed_accounts`]).
    pub symbols: Vec<String>,
    /// Number of trader accounts (`trader1..traderN`).
    pub num_traders: usize,
    /// Cash each trader starts with.
    pub initial_cash: Decimal,
    /// Shares of every symbol each trader starts with.
    pub initial_shares: u32,
    /// Number of order requests to generate.
    pub num_orders: usize,
    /// Probability of a buy (sell otherwise).
    pub buy_ratio: f64,
    /// Whole-dollar price range; cents are drawn uniformly.
    pub price_min: i64,
    pub price_max: i64,
    pub quantity_min: u32,
    pub quantity_max: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            symbols: vec!["AAPL".to_string(), "GOOG".to_string()],
            num_traders: 5,
            initial_cash: Decimal::from(100_000),
            initial_shares: 500,
            num_orders: 1000,
            buy_ratio: 0.5,
            price_min: 95,
            price_max: 105,
            quantity_min: 1,
            quantity_max: 50,
        }
    }
}

/// One limit-order request from the generated stream.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: u32,
}

/// Deterministic request stream. Create with [`Flow::new`]; pull requests
/// with [`Flow::next_request`] or collect them all with [`Flow::requests`].
pub struct Flow {
    rng: StdRng,
    config: FlowConfig,
}

impl Flow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    pub fn next_request(&mut self) -> OrderRequest {
        let trader = self.rng.gen_range(1..=self.config.num_traders.max(1));
        let symbol = self.config.symbols[self.rng.gen_range(0..self.config.symbols.len())].clone();
        let side = if self.rng.gen::<f64>() < self.config.buy_ratio {
            Side::Buy
        } else {
            Side::Sell
        };
        let dollars = self
            .rng
            .gen_range(self.config.price_min..=self.config.price_max);
        let cents = self.rng.gen_range(0..100i64);
        let price = Decimal::new(dollars * 100 + cents, 2);
        let quantity = self
            .rng
            .gen_range(self.config.quantity_min..=self.config.quantity_max);
        OrderRequest {
            user_id: format!("trader{trader}"),
            symbol,
            side,
            price,
            quantity,
        }
    }

    /// The full stream of `num_orders` requests.
    pub fn requests(&mut self) -> Vec<OrderRequest> {
        (0..self.config.num_orders)
            .map(|_| self.next_request())
            .collect()
    }
}

/// Outcome of replaying a request stream into an engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub accepted: usize,
    /// Requests refused for insufficient cash/shares or full user records.
    pub rejected: usize,
    pub trades: usize,
}

/// List the flow's symbols and create its funded trader accounts.
/// Idempotent: users and symbols already present are left alone.
pub fn seed_accounts(engine: &Engine, config: &FlowConfig) -> Result<(), EngineError> {
    let admin = engine.config().admin_id.clone();
    for symbol in &config.symbols {
        match engine.add_symbol(symbol, &admin) {
            Ok(()) | Err(EngineError::DuplicateSymbol(_)) => {}
            Err(err) => return Err(err),
        }
    }
    for trader in 1..=config.num_traders {
        let user_id = format!("trader{trader}");
        match engine.create_user(&user_id, config.initial_cash) {
            Ok(()) => {
                for symbol in &config.symbols {
                    if config.initial_shares > 0 {
                        engine.grant_shares(&user_id, symbol, config.initial_shares)?;
                    }
                }
            }
            Err(EngineError::DuplicateUser(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Submit each request, tolerating resource rejections, and return the
/// receipts of the accepted orders plus summary counts.
pub fn replay(
    engine: &Engine,
    requests: &[OrderRequest],
) -> Result<(ReplayStats, Vec<OrderReceipt>), EngineError> {
    let mut stats = ReplayStats::default();
    let mut receipts = Vec::new();
    for request in requests {
        match engine.place_order(
            &request.user_id,
            &request.symbol,
            request.side,
            request.price,
            request.quantity,
        ) {
            Ok(receipt) => {
                stats.accepted += 1;
                stats.trades += receipt.trades.len();
                receipts.push(receipt);
            }
            Err(
                EngineError::InsufficientFunds { .. }
                | EngineError::InsufficientShares { .. }
                | EngineError::CapacityExceeded { .. },
            ) => {
                stats.rejected += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok((stats, receipts))
}
