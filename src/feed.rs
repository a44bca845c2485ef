//! Synthetic feed: a background generator that drives a [`Producer`]
//! without any external data source, for tests and load experiments.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use tracing::debug;

use crate::market::{BookL1, DataKind, Kline, MarketData, Symbol, Trade};
use crate::producer::Producer;
use crate::utils::mono_time_ns;

/// Background generator publishing synthetic messages of one kind as fast
/// as the ring accepts them.
///
/// The generated values follow a fixed shape (symbol `BTCUSDT`, price
/// `50000 + i % 100`, monotonic-clock timestamps) so consumers can
/// reconcile produced-versus-delivered counts and spot-check the last
/// observed value.
pub struct MockFeed {
    running: Arc<AtomicBool>,
    produced: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl MockFeed {
    /// Spawns the generator thread. The `producer` handle moves into the
    /// thread and is dropped when generation finishes or [`MockFeed::stop`]
    /// is called.
    pub fn start(producer: Producer, kind: DataKind, count: u64) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let produced = Arc::new(AtomicU64::new(0));
        let (flag, counter) = (Arc::clone(&running), Arc::clone(&produced));
        let worker = std::thread::spawn(move || {
            debug!(kind = kind.name(), count, "feed started");
            for i in 0..count {
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                producer.add(synthesize(kind, i));
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });
        Self {
            running,
            produced,
            worker: Some(worker),
        }
    }

    /// Asks the generator to stop after the message currently in flight.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wait();
    }

    /// Blocks until the generator thread has finished.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.join().expect("feed worker panicked");
        }
    }

    /// Messages published so far.
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn synthesize(kind: DataKind, i: u64) -> MarketData {
    let symbol = Symbol::new("BTCUSDT");
    let timestamp = mono_time_ns();
    let price = 50_000.0 + (i % 100) as f64;
    match kind {
        DataKind::Trade => MarketData::Trade(Trade {
            timestamp,
            price,
            quantity: 1.0,
            symbol,
            is_buyer_maker: i % 2 == 0,
        }),
        DataKind::Kline => MarketData::Kline(Kline {
            timestamp,
            open: 50_000.0,
            high: 50_100.0,
            low: 49_900.0,
            close: price,
            volume: 100.0,
            symbol,
        }),
        DataKind::BookL1 => MarketData::BookL1(BookL1 {
            timestamp,
            bid_price: price,
            bid_quantity: 10.0,
            ask_price: price + 1.0,
            ask_quantity: 10.0,
            symbol,
        }),
    }
}
