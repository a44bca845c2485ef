//! Fan-out measurement harness for the market-data bus.
//!
//! Three modes: `throughput` reconciles produced-versus-delivered counts
//! under full-speed load, `latency` measures publish-to-callback time at a
//! throttled rate, and `mixed` round-robins all three message kinds with
//! one subscriber each.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use mdbus::{BookL1, DataKind, Hub, Kline, MarketData, MockFeed, Symbol, Trade, mono_time_ns};

#[derive(Parser, Debug)]
#[command(version, about = "Benchmarks for the SPMC market-data hub", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Full-speed fan-out: reconcile produced vs delivered per subscriber.
    Throughput {
        /// Number of messages to publish.
        #[arg(short = 'n', long = "messages", default_value_t = 1_000_000)]
        messages: u64,

        /// Number of concurrent subscribers.
        #[arg(short = 's', long = "subscribers", default_value_t = 4)]
        subscribers: usize,
    },

    /// Publish-to-callback latency percentiles at a throttled rate.
    Latency {
        /// Number of messages to publish.
        #[arg(short = 'n', long = "messages", default_value_t = 100_000)]
        messages: u64,

        /// Minimum period between messages in nanoseconds; 0 disables throttling.
        #[arg(short = 'p', long = "period", default_value_t = 1_000)]
        period: u64,

        /// Pin the producing thread to a CPU core.
        #[arg(long = "pin")]
        pin: bool,
    },

    /// Round-robin all three kinds with one subscriber per kind.
    Mixed {
        /// Number of rounds (each round publishes one message per kind).
        #[arg(short = 'r', long = "rounds", default_value_t = 100_000)]
        rounds: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Args::parse().command {
        Commands::Throughput {
            messages,
            subscribers,
        } => throughput(messages, subscribers),
        Commands::Latency {
            messages,
            period,
            pin,
        } => latency(messages, period, pin),
        Commands::Mixed { rounds } => mixed(rounds),
    }
}

fn throughput(messages: u64, subscribers: usize) {
    let hub = Hub::new();
    let producer = hub.producer().unwrap();

    let delivered: Vec<Arc<AtomicU64>> = (0..subscribers)
        .map(|_| Arc::new(AtomicU64::new(0)))
        .collect();
    for counter in &delivered {
        let counter = Arc::clone(counter);
        hub.subscribe(DataKind::Trade, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }

    let started = Instant::now();
    let mut feed = MockFeed::start(producer, DataKind::Trade, messages);
    feed.wait();
    let produce_elapsed = started.elapsed();

    // Give laggards a moment to drain the tail of the ring.
    std::thread::sleep(Duration::from_millis(50));
    hub.stop_all();

    let rate = messages as f64 / produce_elapsed.as_secs_f64();
    println!(
        "produced {} in {:?} ({:.0} msg/s), {} subscribers",
        feed.produced(),
        produce_elapsed,
        rate,
        subscribers
    );
    for (i, counter) in delivered.iter().enumerate() {
        let n = counter.load(Ordering::Relaxed);
        println!(
            "subscriber {}: delivered {}, dropped {}",
            i,
            n,
            messages - n
        );
    }
}

fn latency(messages: u64, period: u64, pin: bool) {
    if pin {
        let cores = core_affinity::get_core_ids().unwrap_or_default();
        match cores.last() {
            Some(core) => {
                core_affinity::set_for_current(*core);
            }
            None => eprintln!("no pinnable cores found, continuing unpinned"),
        }
    }

    let hub = Hub::new();
    let producer = hub.producer().unwrap();

    let trials = Arc::new(Mutex::new(Trials::with_capacity(messages as usize)));
    let sink = Arc::clone(&trials);
    hub.subscribe(DataKind::Trade, move |data| {
        sink.lock().push(mono_time_ns() - data.timestamp());
    });

    for i in 0..messages {
        let ts0 = mono_time_ns();
        producer.add_trade(Trade {
            timestamp: ts0,
            price: 50_000.0 + (i % 100) as f64,
            quantity: 1.0,
            symbol: Symbol::new("BTCUSDT"),
            is_buyer_maker: i % 2 == 0,
        });
        delay(ts0 + period);
    }

    std::thread::sleep(Duration::from_millis(50));
    hub.stop_all();

    let mut trials = trials.lock();
    println!(
        "published {}, delivered {} (dropped {})",
        messages,
        trials.len(),
        messages - trials.len() as u64
    );
    trials.sort();
    trials.print_csv("publish-to-callback-ns");
}

fn mixed(rounds: u64) {
    let hub = Hub::new();
    let producer = hub.producer().unwrap();

    let kinds = [DataKind::Kline, DataKind::Trade, DataKind::BookL1];
    let delivered: Vec<Arc<AtomicU64>> = kinds.iter().map(|_| Arc::new(AtomicU64::new(0))).collect();
    for (kind, counter) in kinds.into_iter().zip(&delivered) {
        let counter = Arc::clone(counter);
        hub.subscribe(kind, move |data| {
            assert_eq!(data.kind(), kind);
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }

    let symbol = Symbol::new("BTCUSDT");
    let started = Instant::now();
    for i in 0..rounds {
        producer.add(MarketData::Kline(Kline {
            timestamp: mono_time_ns(),
            close: 50_000.0 + (i % 100) as f64,
            symbol,
            ..Kline::default()
        }));
        producer.add(MarketData::Trade(Trade {
            timestamp: mono_time_ns(),
            price: 50_000.0 + (i % 100) as f64,
            quantity: 1.0,
            symbol,
            is_buyer_maker: i % 2 == 0,
        }));
        producer.add(MarketData::BookL1(BookL1 {
            timestamp: mono_time_ns(),
            bid_price: 50_000.0,
            bid_quantity: 10.0,
            ask_price: 50_001.0,
            ask_quantity: 10.0,
            symbol,
        }));
    }
    let produce_elapsed = started.elapsed();

    std::thread::sleep(Duration::from_millis(50));
    hub.stop_all();

    println!(
        "published {} rounds x 3 kinds in {:?}",
        rounds, produce_elapsed
    );
    for (kind, counter) in kinds.into_iter().zip(&delivered) {
        let n = counter.load(Ordering::Relaxed);
        println!(
            "{}: delivered {}, dropped {}",
            kind.name(),
            n,
            rounds - n
        );
    }
}

/// Busy-waits until the monotonic clock reaches `deadline_ns`.
#[inline(always)]
fn delay(deadline_ns: u64) -> u64 {
    loop {
        let ts = mono_time_ns();
        if ts >= deadline_ns {
            break ts;
        }
    }
}

/// Latency sample accumulator with percentile CSV output.
struct Trials {
    samples: Vec<u64>,
}

impl Trials {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, value: u64) {
        self.samples.push(value);
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn sort(&mut self) {
        self.samples.sort_unstable();
    }

    /// Requires a prior `sort`.
    fn quantile(&self, p: f64) -> u64 {
        let n = self.samples.len();
        assert!(n > 0);
        assert!((0.0..=1.0).contains(&p));
        let idx = ((n - 1) as f64 * p).round() as usize;
        self.samples[idx]
    }

    fn print_csv(&self, title: &str) {
        println!("name,n,min,max,0.5,0.9,0.99,0.999,0.9999");
        println!(
            "{},{},{},{},{},{},{},{},{}",
            title,
            self.len(),
            self.quantile(0.0),
            self.quantile(1.0),
            self.quantile(0.5),
            self.quantile(0.9),
            self.quantile(0.99),
            self.quantile(0.999),
            self.quantile(0.9999),
        );
    }
}
