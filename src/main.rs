//! Terminal driver for the matching engine.
//!
//! A small REPL over [`bourse::Engine`]: account and symbol management,
//! order entry, book/portfolio inspection, and a seeded simulation mode.
//! Configuration comes from the environment (`DATA_DIR`, `ADMIN_ID`,
//! `METADATA_SAVE_INTERVAL`, plus `RUST_LOG` for logging).

use std::io::{BufRead, Write};

use rust_decimal::Decimal;

use bourse::{
    replay, seed_accounts, Engine, EngineConfig, EngineError, Flow, FlowConfig, Side,
    StdoutAuditSink,
};

fn main() {
    env_logger::init();
    let config = EngineConfig::from_env();
    let engine = match Engine::open(config) {
        Ok(engine) => engine.with_audit(Box::new(StdoutAuditSink)),
        Err(err) => {
            eprintln!("failed to open engine: {err}");
            std::process::exit(1);
        }
    };

    println!("bourse matching engine - type 'help' for commands");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(err) => {
                eprintln!("read error: {err}");
                break;
            }
        }
        let args: Vec<&str> = line.split_whitespace().collect();
        if args.is_empty() {
            continue;
        }
        if matches!(args[0], "quit" | "exit") {
            break;
        }
        if let Err(err) = dispatch(&engine, &args) {
            println!("error: {err}");
        }
    }

    if let Err(err) = engine.shutdown() {
        eprintln!("shutdown failed: {err}");
    }
}

fn dispatch(engine: &Engine, args: &[&str]) -> Result<(), EngineError> {
    match args[0] {
        "help" => {
            print_help();
            Ok(())
        }
        "user" => {
            let (id, cash) = (need(args, 1)?, parse_decimal(need(args, 2)?)?);
            engine.create_user(id, cash)?;
            println!("created user {id}");
            Ok(())
        }
        "list" => {
            let (symbol, requester) = (need(args, 1)?, need(args, 2)?);
            engine.add_symbol(symbol, requester)?;
            println!("listed {symbol}");
            Ok(())
        }
        "grant" => {
            let (id, symbol, qty) = (need(args, 1)?, need(args, 2)?, parse_qty(need(args, 3)?)?);
            engine.grant_shares(id, symbol, qty)?;
            println!("granted {qty} {symbol} to {id}");
            Ok(())
        }
        "buy" | "sell" => {
            let side = if args[0] == "buy" { Side::Buy } else { Side::Sell };
            let (id, symbol) = (need(args, 1)?, need(args, 2)?);
            let price = parse_decimal(need(args, 3)?)?;
            let qty = parse_qty(need(args, 4)?)?;
            let receipt = engine.place_order(id, symbol, side, price, qty)?;
            println!("placed {}", receipt.order);
            for trade in &receipt.trades {
                println!("  {trade}");
            }
            Ok(())
        }
        "cancel" => {
            let id = need(args, 1)?;
            let order_id = bourse::OrderId(parse_u64(need(args, 2)?)?);
            let receipt = engine.cancel_order(order_id, id)?;
            println!(
                "cancelled order {} ({} {} refunded)",
                receipt.order_id, receipt.refunded_qty, receipt.symbol
            );
            Ok(())
        }
        "book" => {
            let depth = engine.get_order_book(need(args, 1)?)?;
            print!("{depth}");
            Ok(())
        }
        "portfolio" => {
            let id = need(args, 1)?;
            match engine.get_user(id)? {
                Some(user) => {
                    println!("=== Portfolio: {id} ===");
                    println!("Cash: ${}", user.cash());
                    println!("Holdings:");
                    for (symbol, qty) in user.holdings() {
                        if *qty > 0 {
                            println!("  {symbol}: {qty} shares");
                        }
                    }
                }
                None => println!("user {id} not found"),
            }
            Ok(())
        }
        "orders" => {
            for order in engine.get_user_active_orders(need(args, 1)?)? {
                println!("{order}");
            }
            Ok(())
        }
        "history" => {
            for order in engine.get_user_orders(need(args, 1)?)? {
                println!("{order}");
            }
            Ok(())
        }
        "trades" => {
            let trades = match args.get(1) {
                Some(user) => engine.get_user_trades(user)?,
                None => engine.get_all_trades()?,
            };
            for trade in trades {
                println!("{trade}");
            }
            Ok(())
        }
        "symbols" => {
            for symbol in engine.symbols()? {
                println!("{symbol}");
            }
            Ok(())
        }
        "simulate" => {
            let num_orders = parse_u64(need(args, 1)?)? as usize;
            let seed = match args.get(2) {
                Some(raw) => parse_u64(raw)?,
                None => 0,
            };
            let config = FlowConfig {
                seed,
                num_orders,
                ..FlowConfig::default()
            };
            seed_accounts(engine, &config)?;
            let requests = Flow::new(config).requests();
            let (stats, _) = replay(engine, &requests)?;
            println!(
                "simulated {num_orders} orders: {} accepted, {} rejected, {} trades",
                stats.accepted, stats.rejected, stats.trades
            );
            Ok(())
        }
        other => {
            println!("unknown command '{other}' - type 'help'");
            Ok(())
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  user <id> <cash>                create an account");
    println!("  list <symbol> <requester>       list a symbol (admin only)");
    println!("  grant <id> <symbol> <qty>       credit shares to an account");
    println!("  buy  <id> <symbol> <price> <qty>   place a limit buy");
    println!("  sell <id> <symbol> <price> <qty>   place a limit sell");
    println!("  cancel <id> <order_id>          cancel a resting order");
    println!("  book <symbol>                   show the order book");
    println!("  portfolio <id>                  show cash and holdings");
    println!("  orders <id>                     show open orders");
    println!("  history <id>                    show all orders ever placed");
    println!("  trades [id]                     show trades (optionally per user)");
    println!("  symbols                         show listed symbols");
    println!("  simulate <n> [seed]             run seeded random order flow");
    println!("  quit                            save and exit");
}

fn need<'a>(args: &[&'a str], index: usize) -> Result<&'a str, EngineError> {
    args.get(index)
        .copied()
        .ok_or(EngineError::InvalidIdentifier {
            value: String::new(),
            reason: "missing argument (see 'help')",
        })
}

fn parse_decimal(raw: &str) -> Result<Decimal, EngineError> {
    raw.parse::<Decimal>()
        .map_err(|_| EngineError::InvalidPrice)
}

fn parse_qty(raw: &str) -> Result<u32, EngineError> {
    raw.parse::<u32>().map_err(|_| EngineError::InvalidQuantity)
}

fn parse_u64(raw: &str) -> Result<u64, EngineError> {
    raw.parse::<u64>().map_err(|_| EngineError::InvalidQuantity)
}
