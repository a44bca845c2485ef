//! Market-data message model: three plain-copy record kinds behind one
//! discriminated [`MarketData`] value that fits a ring slot.

use std::fmt;

/// Width of the fixed symbol buffer, terminator included.
pub const SYMBOL_LEN: usize = 32;

/// Fixed-width, zero-terminated instrument name.
///
/// Stored inline so the containing record stays trivially copyable. Names
/// longer than 31 bytes are truncated on construction so the terminator
/// always fits.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Symbol([u8; SYMBOL_LEN]);

impl Symbol {
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; SYMBOL_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(SYMBOL_LEN - 1);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self(buf)
    }

    /// Decodes up to the first zero byte. A name left with invalid UTF-8
    /// (e.g. truncated mid-character) decodes as empty.
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(SYMBOL_LEN);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }

    pub fn as_bytes(&self) -> &[u8; SYMBOL_LEN] {
        &self.0
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Self([0u8; SYMBOL_LEN])
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

/// One aggregated candle.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Kline {
    /// Event time in nanoseconds.
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: Symbol,
}

/// A single execution.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Trade {
    /// Event time in nanoseconds.
    pub timestamp: u64,
    pub price: f64,
    pub quantity: f64,
    pub symbol: Symbol,
    /// Whether the resting side of the execution was the buyer.
    pub is_buyer_maker: bool,
}

/// Best bid/ask snapshot.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BookL1 {
    /// Event time in nanoseconds.
    pub timestamp: u64,
    pub bid_price: f64,
    pub bid_quantity: f64,
    pub ask_price: f64,
    pub ask_quantity: f64,
    pub symbol: Symbol,
}

/// Stable numeric tag for each message kind.
///
/// Subscriptions filter on this value and binding layers ship it across
/// the boundary, so the numbering is part of the public contract:
/// appending a kind is fine, renumbering an existing one is a breaking
/// change.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    Kline = 0,
    Trade = 1,
    BookL1 = 2,
}

impl DataKind {
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Kline),
            1 => Some(Self::Trade),
            2 => Some(Self::BookL1),
            _ => None,
        }
    }

    /// Lower-case name handed to callbacks by binding layers.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Kline => "kline",
            Self::Trade => "trade",
            Self::BookL1 => "book_l1",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The message broadcast through the hub's ring.
///
/// Value-copied into a slot on publish and value-copied out again before
/// dispatch; `size_of::<MarketData>()` is the largest record plus the
/// discriminant.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MarketData {
    Kline(Kline),
    Trade(Trade),
    BookL1(BookL1),
}

impl MarketData {
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::Kline(_) => DataKind::Kline,
            Self::Trade(_) => DataKind::Trade,
            Self::BookL1(_) => DataKind::BookL1,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Kline(k) => k.timestamp,
            Self::Trade(t) => t.timestamp,
            Self::BookL1(b) => b.timestamp,
        }
    }

    pub fn symbol(&self) -> Symbol {
        match self {
            Self::Kline(k) => k.symbol,
            Self::Trade(t) => t.symbol,
            Self::BookL1(b) => b.symbol,
        }
    }
}

impl Default for MarketData {
    fn default() -> Self {
        Self::Kline(Kline::default())
    }
}

impl From<Kline> for MarketData {
    fn from(k: Kline) -> Self {
        Self::Kline(k)
    }
}

impl From<Trade> for MarketData {
    fn from(t: Trade) -> Self {
        Self::Trade(t)
    }
}

impl From<BookL1> for MarketData {
    fn from(b: BookL1) -> Self {
        Self::BookL1(b)
    }
}
