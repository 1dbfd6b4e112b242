//! Wallet rules — fan transaction-level script changes into wallet-level
//! aggregates.
//!
//! Rules are supplied externally and treated as read-only; the engine only
//! matches destination scripts against them. The rule space is a closed sum
//! type: new rule kinds are added here, not through open inheritance.

use bitcoin::hashes::{hash160, Hash};
use bitcoin::{Script, ScriptBuf, ScriptHash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── WalletRule ───────────────────────────────────────────────────────────────

/// Watches a script for a wallet, optionally carrying the redeem script so
/// p2sh spends can be attributed too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRule {
    pub script_pubkey: ScriptBuf,
    pub redeem_script: Option<ScriptBuf>,
}

/// A rule attached to a wallet. Closed set; every variant has an explicit id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalletRule {
    Script(ScriptRule),
}

impl WalletRule {
    /// Stable identifier for deduplication and back-references.
    pub fn id(&self) -> String {
        match self {
            Self::Script(rule) => format!("s:{}", hex::encode(rule.script_pubkey.as_bytes())),
        }
    }

    /// Every destination script this rule claims.
    ///
    /// A redeem script also matches through its p2sh form, so a spend revealed
    /// by the redeem script still folds into the wallet.
    pub fn watched_scripts(&self) -> Vec<ScriptBuf> {
        match self {
            Self::Script(rule) => {
                let mut scripts = vec![rule.script_pubkey.clone()];
                if let Some(redeem) = &rule.redeem_script {
                    let hash = ScriptHash::from_raw_hash(hash160::Hash::hash(redeem.as_bytes()));
                    scripts.push(ScriptBuf::new_p2sh(&hash));
                }
                scripts
            }
        }
    }
}

// ─── MatchedRule ──────────────────────────────────────────────────────────────

/// Where in a transaction a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLocation {
    Input,
    Output,
}

/// Links a coin position back to the rule that folded it into a wallet-level
/// record, so script-coin redemptions can be re-materialized later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    /// Input or output index within the transaction.
    pub index: u32,
    pub location: MatchLocation,
    pub rule: WalletRule,
}

// ─── WalletRuleSet ────────────────────────────────────────────────────────────

/// Wallet rules indexed by destination script.
#[derive(Debug, Clone, Default)]
pub struct WalletRuleSet {
    by_script: HashMap<ScriptBuf, Vec<(String, WalletRule)>>,
    rule_count: usize,
}

impl WalletRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, wallet_id: impl Into<String>, rule: WalletRule) {
        let wallet_id = wallet_id.into();
        for script in rule.watched_scripts() {
            let entries = self.by_script.entry(script).or_default();
            if !entries
                .iter()
                .any(|(w, r)| *w == wallet_id && r.id() == rule.id())
            {
                entries.push((wallet_id.clone(), rule.clone()));
            }
        }
        self.rule_count += 1;
    }

    /// Wallets whose rules claim `script`.
    pub fn matches(&self, script: &Script) -> &[(String, WalletRule)] {
        self.by_script
            .get(script)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_script.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rule_count
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
