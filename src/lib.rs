//! # In-process market-data bus over a lock-free SPMC broadcast ring
//!
//! A lightweight **single-producer / multi-consumer** fan-out layer for
//! real-time market data. One producer injects [`MarketData`] messages;
//! any number of subscribers each observe the stream at their own pace,
//! with no coordination between them and **no back-pressure on the
//! producer**. A subscriber that falls behind by more than the ring
//! capacity skips the overwritten messages: delivery completeness is
//! traded for bounded latency and zero producer stalls.
//!
//! # Features
//!
//! * **Lock-free** broadcast ring with per-slot sequence numbers
//! * **Overwrite detection**: payload copies are re-validated against the
//!   slot sequence, so a lapped reader drops rather than delivers torn data
//! * **Typed fan-out**: subscribers filter on [`DataKind`] and get a
//!   callback per matching message, each on its own worker thread
//! * **Cache-friendly** layout (64-byte slots, padded write counter)
//! * Single publish handle per hub: ownership proves the single-writer
//!   invariant instead of documentation
//! * Zero allocations on the data path after setup
//!
//! # Backoff behavior
//!
//! Subscriber workers sleep for one microsecond when the ring has nothing
//! new, rather than spinning or parking on a condition variable. That
//! bounds wake latency at roughly one tick while leaving idle cores idle;
//! unsubscription latency is bounded by the same tick plus whatever
//! callback is in flight.
//!
//! # Quick example
//!
//! ```no_run
//! use mdbus::{DataKind, Hub, MarketData, Symbol, Trade};
//!
//! let hub = Hub::new();
//! let producer = hub.producer().unwrap();
//!
//! hub.subscribe(DataKind::Trade, |data| {
//!     if let MarketData::Trade(trade) = data {
//!         println!("{} {} @ {}", trade.symbol, trade.quantity, trade.price);
//!     }
//! });
//!
//! producer.add_trade(Trade {
//!     price: 50_000.0,
//!     quantity: 1.0,
//!     symbol: Symbol::new("BTCUSDT"),
//!     ..Trade::default()
//! });
//! ```
//!
//! # Delivery guarantees
//!
//! * Messages are totally ordered by publication; each subscriber observes
//!   a strictly increasing subsequence (skips possible, reorders and
//!   duplicates not)
//! * A subscription sees future messages only; history is never replayed
//! * A panicking callback is caught and logged; its subscription survives
//!
//! There are no acks, no replay, and no exactly-once semantics: this is a
//! best-effort broadcast for data that goes stale faster than it could be
//! retransmitted.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

pub mod feed;
pub mod hub;
pub mod market;
pub mod producer;
pub mod spmc;
mod utils;

pub use feed::MockFeed;
pub use hub::{Callback, Hub, HubError, RING_DEPTH, SubscriberId};
pub use market::{BookL1, DataKind, Kline, MarketData, SYMBOL_LEN, Symbol, Trade};
pub use producer::Producer;
pub use utils::mono_time_ns;
