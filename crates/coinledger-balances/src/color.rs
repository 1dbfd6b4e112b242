//! Colored assets layered on top of plain coins.
//!
//! Color assignments live outside the engine; an async lookup maps outpoints
//! to asset quantities per read. Coloring and uncoloring are symmetric
//! transforms over coin lists, so callers can flip between the plain and
//! colored views of the same balance change at will.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bitcoin::{OutPoint, SignedAmount};
use serde::{Deserialize, Serialize};

use coinledger_core::IndexerError;

use crate::extract::{Coin, OrderedBalanceChange};

// ─── AssetId ──────────────────────────────────────────────────────────────────

/// Opaque identifier of a colored asset, as issued by the color protocol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A quantity of one asset carried by a coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetQuantity {
    pub asset: AssetId,
    pub quantity: u64,
}

// ─── ColoredCoin ──────────────────────────────────────────────────────────────

/// A coin together with its color assignment, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColoredCoin {
    pub coin: Coin,
    pub asset: Option<AssetQuantity>,
}

impl ColoredCoin {
    pub fn plain(coin: Coin) -> Self {
        Self { coin, asset: None }
    }

    pub fn is_colored(&self) -> bool {
        self.asset.is_some()
    }
}

// ─── ColorLookup ──────────────────────────────────────────────────────────────

/// Resolves the color assignment of an outpoint. `None` means plain coin.
#[async_trait]
pub trait ColorLookup: Send + Sync {
    async fn color_of(&self, outpoint: &OutPoint) -> Result<Option<AssetQuantity>, IndexerError>;
}

/// Attach color assignments to a list of plain coins.
pub async fn color_coins(
    coins: &[Coin],
    lookup: &dyn ColorLookup,
) -> Result<Vec<ColoredCoin>, IndexerError> {
    let mut colored = Vec::with_capacity(coins.len());
    for coin in coins {
        let asset = lookup.color_of(&coin.outpoint).await?;
        colored.push(ColoredCoin {
            coin: coin.clone(),
            asset,
        });
    }
    Ok(colored)
}

/// Strip color assignments, recovering the plain coin list.
pub fn uncolor(coins: &[ColoredCoin]) -> Vec<Coin> {
    coins.iter().map(|c| c.coin.clone()).collect()
}

// ─── ColoredBalanceView ───────────────────────────────────────────────────────

/// A balance change's coin lists with color assignments attached.
#[derive(Debug, Clone)]
pub struct ColoredBalanceView {
    pub spent: Vec<ColoredCoin>,
    pub received: Vec<ColoredCoin>,
}

impl ColoredBalanceView {
    /// Build the colored view of a change. Spent coins must already be
    /// resolved, otherwise the spent side of the view would be incomplete.
    pub async fn of(
        change: &OrderedBalanceChange,
        lookup: &dyn ColorLookup,
    ) -> Result<Self, IndexerError> {
        let spent_coins = change.spent_coins.as_ref().ok_or_else(|| {
            IndexerError::Other("colored view requires resolved spent coins".into())
        })?;
        Ok(Self {
            spent: color_coins(spent_coins, lookup).await?,
            received: color_coins(&change.received_coins, lookup).await?,
        })
    }

    /// Net quantity moved per asset: received minus spent.
    pub fn net_asset_quantities(&self) -> BTreeMap<AssetId, i128> {
        let mut net: BTreeMap<AssetId, i128> = BTreeMap::new();
        for coin in &self.received {
            if let Some(aq) = &coin.asset {
                *net.entry(aq.asset.clone()).or_default() += aq.quantity as i128;
            }
        }
        for coin in &self.spent {
            if let Some(aq) = &coin.asset {
                *net.entry(aq.asset.clone()).or_default() -= aq.quantity as i128;
            }
        }
        net
    }

    /// Net settled amount over the uncolored coins only, in satoshis.
    pub fn net_plain_amount(&self) -> SignedAmount {
        let received: i64 = self
            .received
            .iter()
            .filter(|c| !c.is_colored())
            .map(|c| c.coin.value().to_sat() as i64)
            .sum();
        let spent: i64 = self
            .spent
            .iter()
            .filter(|c| !c.is_colored())
            .map(|c| c.coin.value().to_sat() as i64)
            .sum();
        SignedAmount::from_sat(received - spent)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
