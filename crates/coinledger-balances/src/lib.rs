//! coinledger-balances — balance accounting over indexed transactions.
//!
//! # Architecture
//!
//! ```text
//! extract  (per-tx OrderedBalanceChange, script- and wallet-level)
//!    ├── rules   (WalletRuleSet: destination script → wallet fan-in)
//!    ├── keys    (BalanceId, BalanceLocator, BalanceQuery key scheme)
//!    └── color   (colored-asset view over resolved coin lists)
//! ```

pub mod color;
pub mod extract;
pub mod keys;
pub mod rules;

pub use color::{AssetId, AssetQuantity, ColorLookup, ColoredBalanceView, ColoredCoin};
pub use extract::{
    extract_script_changes, extract_wallet_changes, spender_script, Coin, OrderedBalanceChange,
    TransactionLookup,
};
pub use keys::{BalanceId, BalanceLocator, BalanceQuery, UNCONFIRMED_HEIGHT};
pub use rules::{MatchLocation, MatchedRule, ScriptRule, WalletRule, WalletRuleSet};
