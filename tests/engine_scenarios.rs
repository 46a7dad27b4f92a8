//! End-to-end venue scenarios: crossing, price-time priority, self-match
//! prevention, resource checks, partial sweeps, and concurrent submitters.

use std::sync::Arc;

use rust_decimal_macros::dec;

use bourse::{Engine, EngineConfig, EngineError, Side};

fn engine_in(dir: &tempfile::TempDir) -> Engine {
    Engine::open(EngineConfig {
        data_dir: dir.path().join("data"),
        ..EngineConfig::default()
    })
    .expect("open engine")
}

/// Seed the §8 cast: alice and bob with $10,000, bob holding 100 AAPL.
fn seed_aapl_market(engine: &Engine) {
    engine.add_symbol("AAPL", "admin123").expect("list");
    engine.create_user("alice", dec!(10000.00)).expect("alice");
    engine.create_user("bob", dec!(10000.00)).expect("bob");
    engine.grant_shares("bob", "AAPL", 100).expect("grant");
}

#[test]
fn scenario_a_simple_cross_then_cancel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_in(&dir);
    seed_aapl_market(&engine);

    // 1. bob's sell rests; his shares are reserved.
    let sell = engine
        .place_order("bob", "AAPL", Side::Sell, dec!(150.00), 50)
        .expect("sell");
    assert!(sell.trades.is_empty());
    let bob = engine.get_user("bob").expect("get").expect("bob");
    assert_eq!(bob.shares_of("AAPL"), 50);

    // 2. alice crosses for 30.
    let buy = engine
        .place_order("alice", "AAPL", Side::Buy, dec!(150.00), 30)
        .expect("buy");
    assert_eq!(buy.trades.len(), 1);
    assert_eq!(buy.trades[0].quantity, 30);
    assert_eq!(buy.trades[0].price, dec!(150.00));

    let alice = engine.get_user("alice").expect("get").expect("alice");
    assert_eq!(alice.cash(), dec!(5500.00));
    assert_eq!(alice.shares_of("AAPL"), 30);
    let bob = engine.get_user("bob").expect("get").expect("bob");
    assert_eq!(bob.cash(), dec!(14500.00));
    assert_eq!(bob.shares_of("AAPL"), 50);

    // 3. bob cancels the 20-share remainder.
    let cancel = engine.cancel_order(sell.order.id, "bob").expect("cancel");
    assert_eq!(cancel.refunded_qty, 20);
    let bob = engine.get_user("bob").expect("get").expect("bob");
    assert_eq!(bob.shares_of("AAPL"), 70);
    assert_eq!(bob.cash(), dec!(14500.00));

    let depth = engine.get_order_book("AAPL").expect("depth");
    assert!(depth.bids.is_empty());
    assert!(depth.asks.is_empty());
}

#[test]
fn scenario_b_price_time_priority() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_in(&dir);
    seed_aapl_market(&engine);

    for price in [dec!(155.00), dec!(152.00), dec!(153.00)] {
        engine
            .place_order("bob", "AAPL", Side::Sell, price, 20)
            .expect("sell");
    }

    let buy = engine
        .place_order("alice", "AAPL", Side::Buy, dec!(160.00), 50)
        .expect("buy");
    let prices: Vec<_> = buy.trades.iter().map(|t| t.price).collect();
    assert_eq!(
        prices,
        vec![dec!(152.00), dec!(153.00), dec!(155.00)],
        "best price first, regardless of arrival order"
    );
    assert_eq!(
        buy.trades.iter().map(|t| t.quantity).collect::<Vec<_>>(),
        vec![20, 20, 10]
    );

    // 155 keeps a 10-share remainder.
    let depth = engine.get_order_book("AAPL").expect("depth");
    assert_eq!(depth.asks.len(), 1);
    assert_eq!(depth.asks[0].price, dec!(155.00));
    assert_eq!(depth.asks[0].total_quantity, 10);
}

#[test]
fn scenario_c_self_match_prevention() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_in(&dir);
    engine.add_symbol("MSFT", "admin123").expect("list");
    engine.create_user("alice", dec!(50000.00)).expect("alice");
    engine.grant_shares("alice", "MSFT", 300).expect("grant");

    let sell = engine
        .place_order("alice", "MSFT", Side::Sell, dec!(100.00), 300)
        .expect("sell");
    let buy = engine
        .place_order("alice", "MSFT", Side::Buy, dec!(100.00), 300)
        .expect("buy");
    assert!(sell.trades.is_empty());
    assert!(buy.trades.is_empty(), "a user never trades with themselves");

    // Both orders rest on their own sides.
    let depth = engine.get_order_book("MSFT").expect("depth");
    assert_eq!(depth.asks.len(), 1);
    assert_eq!(depth.asks[0].total_quantity, 300);
    assert_eq!(depth.bids.len(), 1);
    assert_eq!(depth.bids[0].total_quantity, 300);
    assert!(engine.get_all_trades().expect("trades").is_empty());
}

#[test]
fn scenario_d_insufficient_funds_leaves_no_trace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_in(&dir);
    engine.add_symbol("GOOG", "admin123").expect("list");
    engine.create_user("charlie", dec!(50000.00)).expect("charlie");

    let err = engine
        .place_order("charlie", "GOOG", Side::Buy, dec!(1000.00), 1000)
        .expect_err("a million-dollar order on fifty thousand");
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));

    let charlie = engine.get_user("charlie").expect("get").expect("charlie");
    assert_eq!(charlie.cash(), dec!(50000.00));
    assert!(charlie.active_order_ids().is_empty());
    assert!(engine.get_order_book("GOOG").expect("depth").bids.is_empty());
}

#[test]
fn scenario_e_restart_reconstructs_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sell_id;
    {
        let engine = engine_in(&dir);
        seed_aapl_market(&engine);
        sell_id = engine
            .place_order("bob", "AAPL", Side::Sell, dec!(150.00), 50)
            .expect("sell")
            .order
            .id;
        engine
            .place_order("alice", "AAPL", Side::Buy, dec!(150.00), 30)
            .expect("buy");
        engine.shutdown().expect("shutdown");
    }

    let engine = engine_in(&dir);
    let alice = engine.get_user("alice").expect("get").expect("alice");
    assert_eq!(alice.cash(), dec!(5500.00));
    assert_eq!(alice.shares_of("AAPL"), 30);
    let bob = engine.get_user("bob").expect("get").expect("bob");
    assert_eq!(bob.cash(), dec!(14500.00));
    assert_eq!(bob.shares_of("AAPL"), 50);
    assert_eq!(
        bob.active_order_ids().iter().copied().collect::<Vec<_>>(),
        vec![sell_id]
    );

    let depth = engine.get_order_book("AAPL").expect("depth");
    assert_eq!(depth.asks.len(), 1);
    assert_eq!(depth.asks[0].price, dec!(150.00));
    assert_eq!(depth.asks[0].total_quantity, 20);
    assert_eq!(depth.asks[0].orders[0].order_id, sell_id);

    // The restored book still matches.
    let buy = engine
        .place_order("alice", "AAPL", Side::Buy, dec!(150.00), 20)
        .expect("buy");
    assert_eq!(buy.trades.len(), 1);
    assert_eq!(buy.trades[0].quantity, 20);
}

#[test]
fn scenario_f_partial_sweep_across_two_sellers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_in(&dir);
    engine.add_symbol("AAPL", "admin123").expect("list");
    engine.create_user("alice", dec!(10000.00)).expect("alice");
    engine.create_user("bob", dec!(10000.00)).expect("bob");
    engine.create_user("carol", dec!(10000.00)).expect("carol");
    engine.grant_shares("bob", "AAPL", 40).expect("grant");
    engine.grant_shares("carol", "AAPL", 60).expect("grant");

    engine
        .place_order("bob", "AAPL", Side::Sell, dec!(100.00), 40)
        .expect("sell");
    engine
        .place_order("carol", "AAPL", Side::Sell, dec!(100.00), 60)
        .expect("sell");
    let buy = engine
        .place_order("alice", "AAPL", Side::Buy, dec!(100.00), 70)
        .expect("buy");

    assert_eq!(
        buy.trades.iter().map(|t| t.quantity).collect::<Vec<_>>(),
        vec![40, 30]
    );
    assert_eq!(buy.trades[0].sell_user_id, "bob");
    assert_eq!(buy.trades[1].sell_user_id, "carol");

    let depth = engine.get_order_book("AAPL").expect("depth");
    assert_eq!(depth.asks.len(), 1);
    assert_eq!(depth.asks[0].total_quantity, 30);
    assert_eq!(depth.asks[0].orders[0].user_id, "carol");
    let alice = engine.get_user("alice").expect("get").expect("alice");
    assert_eq!(alice.shares_of("AAPL"), 70);
}

#[test]
fn exact_funds_boundary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_in(&dir);
    engine.add_symbol("AAPL", "admin123").expect("list");
    engine.create_user("dave", dec!(1500.00)).expect("dave");

    // One cent short fails without side effects.
    let err = engine
        .place_order("dave", "AAPL", Side::Buy, dec!(150.01), 10)
        .expect_err("1500.10 > 1500.00");
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    assert_eq!(
        engine.get_user("dave").expect("get").expect("dave").cash(),
        dec!(1500.00)
    );

    // Exactly sufficient succeeds and zeroes the balance.
    engine
        .place_order("dave", "AAPL", Side::Buy, dec!(150.00), 10)
        .expect("cash == price x qty must succeed");
    assert_eq!(
        engine.get_user("dave").expect("get").expect("dave").cash(),
        dec!(0.00)
    );
}

#[test]
fn concurrent_submitters_conserve_shares_and_cash() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Arc::new(engine_in(&dir));
    engine.add_symbol("AAPL", "admin123").expect("list");

    const TRADERS: usize = 4;
    const ORDERS_EACH: usize = 25;
    let initial_cash = dec!(100000.00);
    for t in 0..TRADERS {
        let id = format!("trader{t}");
        engine.create_user(&id, initial_cash).expect("create");
        engine.grant_shares(&id, "AAPL", 1000).expect("grant");
    }

    let mut handles = Vec::new();
    for t in 0..TRADERS {
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            let id = format!("trader{t}");
            for i in 0..ORDERS_EACH {
                let side = if (t + i) % 2 == 0 { Side::Buy } else { Side::Sell };
                let price = rust_decimal::Decimal::from(100 + ((t * 7 + i) % 5) as i64);
                let qty = 1 + (i % 10) as u32;
                // Resource rejections are fine under contention; anything
                // else is a real failure.
                match engine.place_order(&id, "AAPL", side, price, qty) {
                    Ok(_)
                    | Err(EngineError::InsufficientFunds { .. })
                    | Err(EngineError::InsufficientShares { .. }) => {}
                    Err(err) => panic!("unexpected failure: {err}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("join");
    }

    // Shares: holdings plus open sell reservations must sum to the grant.
    let mut held: u64 = 0;
    for t in 0..TRADERS {
        let user = engine
            .get_user(&format!("trader{t}"))
            .expect("get")
            .expect("present");
        held += u64::from(user.shares_of("AAPL"));
        assert!(user.cash() >= rust_decimal::Decimal::ZERO);
    }
    let depth = engine.get_order_book("AAPL").expect("depth");
    let resting_sells: u64 = depth.asks.iter().map(|l| l.total_quantity).sum();
    assert_eq!(
        held + resting_sells,
        (TRADERS as u64) * 1000,
        "every share is either held or reserved by an open sell"
    );

    // Every trade respected self-match prevention.
    for trade in engine.get_all_trades().expect("trades") {
        assert_ne!(trade.buy_user_id, trade.sell_user_id);
        assert!(trade.quantity > 0);
    }
}
