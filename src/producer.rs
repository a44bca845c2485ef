//! Publish-side façade over the hub's ring.

use crate::hub::RING_DEPTH;
use crate::market::{BookL1, Kline, MarketData, Trade};
use crate::spmc::Writer;

/// The hub's single injection point.
///
/// Obtained once from [`Hub::producer`](crate::Hub::producer); neither
/// `Clone` nor `Sync`, so holding one is proof that exactly one thread at
/// a time publishes. Injectors with several source threads must funnel
/// through whatever owns this handle.
pub struct Producer {
    writer: Writer<MarketData, RING_DEPTH>,
}

impl Producer {
    pub(crate) fn new(writer: Writer<MarketData, RING_DEPTH>) -> Self {
        Self { writer }
    }

    /// Publishes one message of any kind and returns its sequence number.
    /// Never blocks and never fails; a lagging subscriber loses whatever
    /// gets overwritten.
    #[inline]
    pub fn add(&self, data: MarketData) -> u32 {
        self.writer.write(data)
    }

    #[inline]
    pub fn add_kline(&self, kline: Kline) -> u32 {
        self.add(MarketData::Kline(kline))
    }

    #[inline]
    pub fn add_trade(&self, trade: Trade) -> u32 {
        self.add(MarketData::Trade(trade))
    }

    #[inline]
    pub fn add_book_l1(&self, book: BookL1) -> u32 {
        self.add(MarketData::BookL1(book))
    }

    /// Publishes a batch in iteration order and returns how many messages
    /// were written.
    ///
    /// Semantically identical to calling [`Producer::add`] per element;
    /// the batch entry point exists so binding layers can amortize their
    /// per-call overhead (acquire-and-release a runtime lock once for the
    /// whole batch instead of per message).
    pub fn add_batch<I>(&self, batch: I) -> u64
    where
        I: IntoIterator<Item = MarketData>,
    {
        let mut written = 0;
        for data in batch {
            self.writer.write(data);
            written += 1;
        }
        written
    }
}
