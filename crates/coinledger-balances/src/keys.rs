//! Sortable balance keys.
//!
//! Balance history must answer "all entries for subject X, newest first, with
//! unconfirmed entries before everything" as a plain ascending lexicographic
//! scan. Heights are zero-padded and digit-wise complemented so numerically
//! larger heights sort earlier, and unconfirmed entries borrow a reserved
//! near-maximal height sentinel that lands before every real height after the
//! same encoding.

use bitcoin::hashes::{sha256, siphash24, Hash};
use bitcoin::{BlockHash, Script, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use coinledger_core::RowRange;

// ─── Height encoding ──────────────────────────────────────────────────────────

/// Reserved sentinel for unconfirmed entries; sorts before every real height
/// once complemented.
pub const UNCONFIRMED_HEIGHT: u32 = u32::MAX - 1;

const HEIGHT_WIDTH: usize = 10;
const HEIGHT_COMPLEMENT: u64 = 9_999_999_999;

/// Fixed-width descending encoding: `encode(h1) > encode(h2)` (byte-wise)
/// exactly when `h1 < h2`.
pub fn encode_height(height: u32) -> String {
    format!("{:0width$}", HEIGHT_COMPLEMENT - height as u64, width = HEIGHT_WIDTH)
}

pub fn decode_height(s: &str) -> Option<u32> {
    if s.len() != HEIGHT_WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let complemented: u64 = s.parse().ok()?;
    u32::try_from(HEIGHT_COMPLEMENT.checked_sub(complemented)?).ok()
}

// ─── BalanceId ────────────────────────────────────────────────────────────────

/// Scripts longer than this are keyed by their hash so row keys stay bounded.
const MAX_SCRIPT_BYTES: usize = 512;

/// Identifies the subject of a balance record: a wallet or a script.
///
/// Encodes to a bounded-length printable token: `w<id>` for wallets,
/// `a<hex>` for scripts, `h<sha256>` for oversized scripts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceId {
    token: String,
}

impl BalanceId {
    pub fn wallet(id: &str) -> Self {
        Self {
            token: format!("w{id}"),
        }
    }

    pub fn script(script: &Script) -> Self {
        let token = if script.len() > MAX_SCRIPT_BYTES {
            format!("h{}", sha256::Hash::hash(script.as_bytes()))
        } else {
            format!("a{}", hex::encode(script.as_bytes()))
        };
        Self { token }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_wallet(&self) -> bool {
        self.token.starts_with('w')
    }

    /// The subject script, recoverable unless hash-addressed.
    pub fn to_script(&self) -> Option<ScriptBuf> {
        let hex = self.token.strip_prefix('a')?;
        hex::decode(hex).ok().map(ScriptBuf::from_bytes)
    }

    /// 256-way shard id: keeps one subject's history co-located while
    /// spreading load across partitions.
    pub fn partition_key(&self) -> String {
        let digest = siphash24::Hash::hash_with_keys(
            0x636f_696e_6c65_6467,
            0x6572_2d62_616c_616e,
            self.token.as_bytes(),
        );
        let shard = u64::from_le_bytes(digest.to_byte_array()) % 256;
        format!("{shard:02x}")
    }
}

impl std::fmt::Display for BalanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.token)
    }
}

// ─── BalanceLocator ───────────────────────────────────────────────────────────

/// Orders a balance record within a subject's history.
///
/// Trailing fields may be absent; `floor`/`ceil` substitute minimum/maximum
/// sentinels so a partial locator still defines a valid range boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceLocator {
    Confirmed {
        height: u32,
        block_hash: Option<BlockHash>,
        txid: Option<Txid>,
    },
    Unconfirmed {
        /// Unix time the transaction was first seen.
        seen: i64,
        txid: Option<Txid>,
    },
}

const HASH_FLOOR: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const HASH_CEIL: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
const SEEN_WIDTH: usize = 20;

impl BalanceLocator {
    pub fn confirmed(height: u32, block_hash: BlockHash, txid: Txid) -> Self {
        Self::Confirmed {
            height,
            block_hash: Some(block_hash),
            txid: Some(txid),
        }
    }

    pub fn unconfirmed(seen: i64, txid: Txid) -> Self {
        Self::Unconfirmed {
            seen,
            txid: Some(txid),
        }
    }

    /// A partial locator selecting an entire height.
    pub fn at_height(height: u32) -> Self {
        Self::Confirmed {
            height,
            block_hash: None,
            txid: None,
        }
    }

    fn render(&self, absent_hash: &str, absent_txid: &str) -> String {
        match self {
            Self::Confirmed {
                height,
                block_hash,
                txid,
            } => {
                let middle = block_hash
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| absent_hash.to_string());
                let last = txid
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| absent_txid.to_string());
                format!("{}-{}-{}", encode_height(*height), middle, last)
            }
            Self::Unconfirmed { seen, txid } => {
                let last = txid
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| absent_txid.to_string());
                format!(
                    "{}-{:0width$}-{}",
                    encode_height(UNCONFIRMED_HEIGHT),
                    *seen,
                    last,
                    width = SEEN_WIDTH
                )
            }
        }
    }

    /// Complete absent fields with minimum sentinels.
    pub fn floor(&self) -> String {
        self.render(HASH_FLOOR, HASH_FLOOR)
    }

    /// Complete absent fields with maximum sentinels.
    pub fn ceil(&self) -> String {
        self.render(HASH_CEIL, HASH_CEIL)
    }

    /// Canonical query form of a fully specified locator.
    pub fn query_form(&self) -> String {
        self.floor()
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '-');
        let height = decode_height(parts.next()?)?;
        let middle = parts.next()?;
        let last = parts.next()?;
        let txid = last.parse::<Txid>().ok();
        if height == UNCONFIRMED_HEIGHT {
            Some(Self::Unconfirmed {
                seen: middle.parse().ok()?,
                txid,
            })
        } else {
            Some(Self::Confirmed {
                height,
                block_hash: middle.parse().ok(),
                txid,
            })
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

// ─── BalanceQuery ─────────────────────────────────────────────────────────────

/// Builds a partition-equality + row-range predicate pair over a subject's
/// history from an optional pair of locator bounds.
///
/// Bounds given in the wrong order are auto-corrected; each bound is
/// completed via floor/ceil according to its inclusivity.
#[derive(Debug, Clone, Default)]
pub struct BalanceQuery {
    pub from: Option<BalanceLocator>,
    pub to: Option<BalanceLocator>,
    pub from_inclusive: bool,
    pub to_inclusive: bool,
}

impl BalanceQuery {
    /// The whole history of a subject.
    pub fn all() -> Self {
        Self {
            from: None,
            to: None,
            from_inclusive: true,
            to_inclusive: true,
        }
    }

    pub fn between(from: BalanceLocator, to: BalanceLocator) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            from_inclusive: true,
            to_inclusive: true,
        }
    }

    /// Row-key prefix shared by every entry of `id`.
    pub fn row_prefix(id: &BalanceId) -> String {
        format!("{}:", id.token())
    }

    /// The (partition, row range) pair for the backing store.
    pub fn range(&self, id: &BalanceId) -> (String, RowRange) {
        let prefix = Self::row_prefix(id);

        let (mut from, mut to) = (self.from.clone(), self.to.clone());
        let (mut from_inclusive, mut to_inclusive) = (self.from_inclusive, self.to_inclusive);
        if let (Some(a), Some(b)) = (&from, &to) {
            // Auto-correct reversed bounds, keeping each bound's inclusivity
            // attached to its locator.
            if a.floor() > b.floor() {
                std::mem::swap(&mut from, &mut to);
                std::mem::swap(&mut from_inclusive, &mut to_inclusive);
            }
        }

        let (start, start_inclusive) = match &from {
            Some(locator) if from_inclusive => (format!("{prefix}{}", locator.floor()), true),
            Some(locator) => (format!("{prefix}{}", locator.ceil()), false),
            // All rows of the subject: the prefix itself is the lowest key.
            None => (prefix.clone(), true),
        };
        let (end, end_inclusive) = match &to {
            Some(locator) if to_inclusive => (format!("{prefix}{}", locator.ceil()), true),
            Some(locator) => (format!("{prefix}{}", locator.floor()), false),
            // '~' sorts after every character a locator can contain.
            None => (format!("{prefix}~"), false),
        };

        (
            id.partition_key(),
            RowRange {
                start,
                end,
                start_inclusive,
                end_inclusive,
            },
        )
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
