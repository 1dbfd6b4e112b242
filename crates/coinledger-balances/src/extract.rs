//! Per-transaction balance-change extraction.
//!
//! One `OrderedBalanceChange` per distinct subject (script or wallet) per
//! transaction: spends attributed through the spending input's inferred
//! destination, receives through output scripts, OP_RETURN outputs excluded
//! from balances but flagged. Wallet-level records are folded from the
//! script-level ones through the rule set, remembering which rule claimed
//! each coin.

use async_trait::async_trait;
use bitcoin::hashes::{hash160, sha256, Hash};
use bitcoin::script::Instruction;
use bitcoin::{
    Amount, BlockHash, OutPoint, PubkeyHash, Script, ScriptBuf, ScriptHash, SignedAmount,
    Transaction, TxIn, TxOut, Txid, WPubkeyHash, WScriptHash,
};
use serde::{Deserialize, Serialize};

use coinledger_core::IndexerError;

use crate::keys::{BalanceId, BalanceLocator, UNCONFIRMED_HEIGHT};
use crate::rules::{MatchLocation, MatchedRule, WalletRuleSet};

// ─── Coin ─────────────────────────────────────────────────────────────────────

/// A transaction output together with the outpoint that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

impl Coin {
    pub fn value(&self) -> Amount {
        self.txout.value
    }
}

// ─── OrderedBalanceChange ─────────────────────────────────────────────────────

/// Everything one transaction did to one subject's balance.
///
/// `spent_coins` stays `None` until resolved against parent transactions;
/// `height` holds the unconfirmed sentinel for mempool entries. Records are
/// never mutated after a successful write except by explicit re-derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedBalanceChange {
    pub balance_id: BalanceId,
    pub txid: Txid,
    pub block_hash: Option<BlockHash>,
    pub height: u32,
    /// Unix time the transaction was first seen.
    pub seen: i64,
    /// Outpoints this transaction spent on behalf of the subject.
    pub spent_outpoints: Vec<OutPoint>,
    /// Input index of each spent outpoint, parallel to `spent_outpoints`.
    pub spent_indices: Vec<u32>,
    /// Resolved parent coins; `None` until `resolve_spent_coins` runs.
    pub spent_coins: Option<Vec<Coin>>,
    pub received_coins: Vec<Coin>,
    /// Rules that folded coins into this (wallet-level) record.
    pub matched_rules: Vec<MatchedRule>,
    pub has_op_return: bool,
    pub is_coinbase: bool,
    pub custom_data: Option<serde_json::Value>,
}

impl OrderedBalanceChange {
    fn new(balance_id: BalanceId, txid: Txid, block: Option<(u32, BlockHash)>, seen: i64) -> Self {
        let (height, block_hash) = match block {
            Some((height, hash)) => (height, Some(hash)),
            None => (UNCONFIRMED_HEIGHT, None),
        };
        Self {
            balance_id,
            txid,
            block_hash,
            height,
            seen,
            spent_outpoints: Vec::new(),
            spent_indices: Vec::new(),
            spent_coins: None,
            received_coins: Vec::new(),
            matched_rules: Vec::new(),
            has_op_return: false,
            is_coinbase: false,
            custom_data: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.height != UNCONFIRMED_HEIGHT
    }

    /// Position of this record within the subject's history.
    pub fn locator(&self) -> BalanceLocator {
        match self.block_hash {
            Some(hash) => BalanceLocator::confirmed(self.height, hash, self.txid),
            None => BalanceLocator::unconfirmed(self.seen, self.txid),
        }
    }

    /// Fold `other` into this record, deduplicating outpoints, coins and
    /// matched rules by identity. Duplicate delivery is therefore harmless.
    pub fn merge(&mut self, other: &OrderedBalanceChange) {
        for (pos, outpoint) in other.spent_outpoints.iter().enumerate() {
            if !self.spent_outpoints.contains(outpoint) {
                self.spent_outpoints.push(*outpoint);
                self.spent_indices.push(other.spent_indices[pos]);
            }
        }
        for coin in &other.received_coins {
            if !self
                .received_coins
                .iter()
                .any(|c| c.outpoint == coin.outpoint)
            {
                self.received_coins.push(coin.clone());
            }
        }
        for matched in &other.matched_rules {
            if !self.matched_rules.contains(matched) {
                self.matched_rules.push(matched.clone());
            }
        }
        self.has_op_return |= other.has_op_return;
        self.is_coinbase |= other.is_coinbase;
        // A merged record needs re-resolution against the union of spends.
        self.spent_coins = None;
    }

    /// Net settled amount in satoshis; absent until spends are resolved.
    pub fn settled_amount(&self) -> Option<SignedAmount> {
        let spent: u64 = self
            .spent_coins
            .as_ref()?
            .iter()
            .map(|c| c.value().to_sat())
            .sum();
        let received: u64 = self.received_coins.iter().map(|c| c.value().to_sat()).sum();
        Some(SignedAmount::from_sat(received as i64 - spent as i64))
    }

    /// Scripts a resolved parent output is allowed to carry. `None` means
    /// the subject cannot be verified (hash-addressed oversized script).
    fn expected_spend_scripts(&self) -> Option<Vec<ScriptBuf>> {
        if self.balance_id.is_wallet() {
            let scripts: Vec<_> = self
                .matched_rules
                .iter()
                .filter(|m| m.location == MatchLocation::Input)
                .flat_map(|m| m.rule.watched_scripts())
                .collect();
            Some(scripts)
        } else {
            self.balance_id.to_script().map(|s| vec![s])
        }
    }

    /// Resolve `spent_outpoints` into full coins through `lookup`.
    ///
    /// A parent output whose script no longer matches the subject (the rule
    /// changed since first index) is pruned from the record instead of being
    /// attributed incorrectly. Idempotent once resolved.
    pub async fn resolve_spent_coins(
        &mut self,
        lookup: &dyn TransactionLookup,
    ) -> Result<(), IndexerError> {
        if self.spent_coins.is_some() {
            return Ok(());
        }
        let expected = self.expected_spend_scripts();
        let mut coins = Vec::new();
        let mut kept_outpoints = Vec::new();
        let mut kept_indices = Vec::new();

        for (pos, outpoint) in self.spent_outpoints.iter().enumerate() {
            let parent = lookup.get(&outpoint.txid).await?.ok_or_else(|| {
                IndexerError::Other(format!("parent transaction {} not indexed", outpoint.txid))
            })?;
            let txout = parent
                .output
                .get(outpoint.vout as usize)
                .ok_or_else(|| {
                    IndexerError::Other(format!("outpoint {outpoint} beyond parent outputs"))
                })?
                .clone();

            let matches = match &expected {
                Some(scripts) => scripts.iter().any(|s| *s == txout.script_pubkey),
                None => true,
            };
            if matches {
                coins.push(Coin {
                    outpoint: *outpoint,
                    txout,
                });
                kept_outpoints.push(*outpoint);
                kept_indices.push(self.spent_indices[pos]);
            } else {
                tracing::debug!(
                    subject = %self.balance_id,
                    %outpoint,
                    "Pruning stale spend, parent script no longer matches"
                );
            }
        }

        self.spent_outpoints = kept_outpoints;
        self.spent_indices = kept_indices;
        self.spent_coins = Some(coins);
        Ok(())
    }
}

// ─── TransactionLookup ────────────────────────────────────────────────────────

/// Resolves parent transactions for deferred spend resolution.
#[async_trait]
pub trait TransactionLookup: Send + Sync {
    async fn get(&self, txid: &Txid) -> Result<Option<Transaction>, IndexerError>;
}

// ─── Spender script inference ─────────────────────────────────────────────────

fn looks_like_pubkey(bytes: &[u8]) -> bool {
    // Shape check only; the curve point is not validated here.
    match bytes.len() {
        33 => bytes[0] == 0x02 || bytes[0] == 0x03,
        65 => bytes[0] == 0x04,
        _ => false,
    }
}

fn looks_like_signature(bytes: &[u8]) -> bool {
    bytes.first() == Some(&0x30) && (60..=73).contains(&bytes.len())
}

/// Infer the destination script an input is spending from: from the
/// signature script, or, if empty, from the witness.
///
/// Template inference is best-effort; unrecognized shapes stay unattributed.
pub fn spender_script(input: &TxIn) -> Option<ScriptBuf> {
    if !input.script_sig.is_empty() {
        let pushes: Vec<&[u8]> = input
            .script_sig
            .instructions()
            .filter_map(|ins| match ins {
                Ok(Instruction::PushBytes(push)) => Some(push.as_bytes()),
                _ => None,
            })
            .collect();
        let last = pushes.last()?;
        if looks_like_pubkey(last) {
            let hash = PubkeyHash::from_raw_hash(hash160::Hash::hash(last));
            return Some(ScriptBuf::new_p2pkh(&hash));
        }
        // Bare p2pk spends carry only a signature; nothing to attribute.
        if pushes.len() == 1 && looks_like_signature(last) {
            return None;
        }
        let hash = ScriptHash::from_raw_hash(hash160::Hash::hash(last));
        return Some(ScriptBuf::new_p2sh(&hash));
    }
    if !input.witness.is_empty() {
        if input.witness.len() == 2 {
            if let Some(push) = input.witness.nth(1) {
                if looks_like_pubkey(push) {
                    let hash = WPubkeyHash::from_raw_hash(hash160::Hash::hash(push));
                    return Some(ScriptBuf::new_p2wpkh(&hash));
                }
            }
        }
        let witness_script = input.witness.last()?;
        let hash = WScriptHash::from_raw_hash(sha256::Hash::hash(witness_script));
        return Some(ScriptBuf::new_p2wsh(&hash));
    }
    None
}

// ─── Extraction ───────────────────────────────────────────────────────────────

struct ScriptChange {
    script: ScriptBuf,
    change: OrderedBalanceChange,
}

fn collect_script_changes(
    txid: Txid,
    tx: &Transaction,
    block: Option<(u32, BlockHash)>,
    seen: i64,
) -> Vec<ScriptChange> {
    let mut changes: Vec<ScriptChange> = Vec::new();
    let entry = |changes: &mut Vec<ScriptChange>, script: &Script| -> usize {
        if let Some(pos) = changes.iter().position(|c| c.script.as_script() == script) {
            pos
        } else {
            changes.push(ScriptChange {
                script: script.to_owned(),
                change: OrderedBalanceChange::new(BalanceId::script(script), txid, block, seen),
            });
            changes.len() - 1
        }
    };

    let is_coinbase = tx.is_coinbase();
    if !is_coinbase {
        for (index, input) in tx.input.iter().enumerate() {
            let Some(destination) = spender_script(input) else {
                continue;
            };
            let pos = entry(&mut changes, &destination);
            changes[pos].change.spent_outpoints.push(input.previous_output);
            changes[pos].change.spent_indices.push(index as u32);
        }
    }

    let mut has_op_return = false;
    for (vout, output) in tx.output.iter().enumerate() {
        if output.script_pubkey.is_op_return() {
            // Excluded from balances, but every change derived from this
            // transaction carries the flag.
            has_op_return = true;
            continue;
        }
        let pos = entry(&mut changes, &output.script_pubkey);
        changes[pos].change.received_coins.push(Coin {
            outpoint: OutPoint::new(txid, vout as u32),
            txout: output.clone(),
        });
    }

    for change in &mut changes {
        change.change.has_op_return = has_op_return;
        change.change.is_coinbase = is_coinbase;
    }
    changes
}

/// Script-level extraction: one change per distinct subject script touched by
/// the transaction.
pub fn extract_script_changes(
    txid: Txid,
    tx: &Transaction,
    block: Option<(u32, BlockHash)>,
    seen: i64,
) -> Vec<OrderedBalanceChange> {
    collect_script_changes(txid, tx, block, seen)
        .into_iter()
        .map(|c| c.change)
        .collect()
}

/// Wallet-level extraction: script-level changes folded into per-wallet
/// accumulators through the rule set, recording a `MatchedRule` per folded
/// coin or spend.
pub fn extract_wallet_changes(
    txid: Txid,
    tx: &Transaction,
    block: Option<(u32, BlockHash)>,
    seen: i64,
    rules: &WalletRuleSet,
) -> Vec<OrderedBalanceChange> {
    let script_changes = collect_script_changes(txid, tx, block, seen);
    let mut wallet_changes: Vec<OrderedBalanceChange> = Vec::new();

    for script_change in &script_changes {
        for (wallet_id, rule) in rules.matches(&script_change.script) {
            let balance_id = BalanceId::wallet(wallet_id);
            let pos = match wallet_changes
                .iter()
                .position(|c| c.balance_id == balance_id)
            {
                Some(pos) => pos,
                None => {
                    wallet_changes.push(OrderedBalanceChange::new(
                        balance_id.clone(),
                        txid,
                        block,
                        seen,
                    ));
                    wallet_changes.len() - 1
                }
            };

            let mut folded = script_change.change.clone();
            folded.matched_rules = script_change
                .change
                .spent_indices
                .iter()
                .map(|index| MatchedRule {
                    index: *index,
                    location: MatchLocation::Input,
                    rule: rule.clone(),
                })
                .chain(script_change.change.received_coins.iter().map(|coin| {
                    MatchedRule {
                        index: coin.outpoint.vout,
                        location: MatchLocation::Output,
                        rule: rule.clone(),
                    }
                }))
                .collect();
            wallet_changes[pos].merge(&folded);
        }
    }
    wallet_changes
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ScriptRule, WalletRule};
    use bitcoin::absolute::LockTime;
    use bitcoin::script::Builder;
    use bitcoin::transaction::Version;
    use bitcoin::{Sequence, Witness};

    fn txid(n: u8) -> Txid {
        Txid::from_byte_array([n; 32])
    }

    fn block_hash(n: u8) -> BlockHash {
        BlockHash::from_byte_array([n; 32])
    }

    fn p2pkh(n: u8) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([n; 20]))
    }

    fn output(value: u64, script: ScriptBuf) -> TxOut {
        TxOut {
            value: Amount::from_sat(value),
            script_pubkey: script,
        }
    }

    fn tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        }
    }

    const PUBKEY: [u8; 33] = [0x02; 33];
    const SIG: [u8; 71] = [0x30; 71];

    /// The destination the test pubkey spends from.
    fn pubkey_p2pkh() -> ScriptBuf {
        ScriptBuf::new_p2pkh(&PubkeyHash::from_raw_hash(hash160::Hash::hash(&PUBKEY)))
    }

    fn p2pkh_input(prev: OutPoint) -> TxIn {
        TxIn {
            previous_output: prev,
            script_sig: Builder::new().push_slice(SIG).push_slice(PUBKEY).into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }
    }

    fn coinbase(outputs: Vec<TxOut>) -> Transaction {
        tx(
            vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Builder::new().push_int(0).into_script(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            outputs,
        )
    }

    #[test]
    fn coinbase_yields_no_spends() {
        let cb = coinbase(vec![output(50, p2pkh(1))]);
        let changes = extract_script_changes(txid(1), &cb, Some((1, block_hash(1))), 0);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_coinbase);
        assert!(changes[0].spent_outpoints.is_empty());
        assert_eq!(changes[0].received_coins.len(), 1);
        assert_eq!(changes[0].balance_id, BalanceId::script(&p2pkh(1)));
    }

    #[test]
    fn distinct_scripts_get_distinct_changes() {
        let spend = tx(
            vec![p2pkh_input(OutPoint::new(txid(9), 0))],
            vec![
                output(30, p2pkh(1)),
                output(20, p2pkh(2)),
                output(5, p2pkh(1)), // same script as output 0
            ],
        );
        let changes = extract_script_changes(txid(2), &spend, Some((2, block_hash(2))), 0);
        // Subjects: spender destination + two distinct output scripts.
        assert_eq!(changes.len(), 3);

        let spender = changes
            .iter()
            .find(|c| c.balance_id == BalanceId::script(&pubkey_p2pkh()))
            .unwrap();
        assert_eq!(spender.spent_outpoints, vec![OutPoint::new(txid(9), 0)]);
        assert_eq!(spender.spent_indices, vec![0]);

        let first = changes
            .iter()
            .find(|c| c.balance_id == BalanceId::script(&p2pkh(1)))
            .unwrap();
        assert_eq!(first.received_coins.len(), 2);
        assert_eq!(first.received_coins[0].outpoint.vout, 0);
        assert_eq!(first.received_coins[1].outpoint.vout, 2);
    }

    #[test]
    fn op_return_excluded_but_flagged() {
        let with_data = coinbase(vec![
            output(50, p2pkh(1)),
            output(
                0,
                Builder::new()
                    .push_opcode(bitcoin::opcodes::all::OP_RETURN)
                    .push_slice(*b"meta")
                    .into_script(),
            ),
        ]);
        let changes = extract_script_changes(txid(3), &with_data, Some((3, block_hash(3))), 0);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].has_op_return);
        for change in &changes {
            for coin in &change.received_coins {
                assert!(!coin.txout.script_pubkey.is_op_return());
            }
        }
    }

    #[test]
    fn unconfirmed_changes_use_sentinel_height() {
        let cb = coinbase(vec![output(50, p2pkh(1))]);
        let changes = extract_script_changes(txid(4), &cb, None, 1_700_000_000);
        assert!(!changes[0].is_confirmed());
        assert_eq!(changes[0].height, UNCONFIRMED_HEIGHT);
        assert!(matches!(
            changes[0].locator(),
            BalanceLocator::Unconfirmed { seen: 1_700_000_000, .. }
        ));
    }

    #[test]
    fn spender_script_templates() {
        // p2pkh: <sig> <pubkey>
        let input = p2pkh_input(OutPoint::new(txid(9), 0));
        assert_eq!(spender_script(&input), Some(pubkey_p2pkh()));

        // p2sh: trailing push is the redeem script
        let redeem: [u8; 3] = [0x52, 0x52, 0x93];
        let p2sh_input = TxIn {
            previous_output: OutPoint::new(txid(9), 1),
            script_sig: Builder::new().push_slice(SIG).push_slice(redeem).into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };
        let expected = ScriptBuf::new_p2sh(&ScriptHash::from_raw_hash(hash160::Hash::hash(&redeem)));
        assert_eq!(spender_script(&p2sh_input), Some(expected));

        // bare p2pk: signature only, unattributable
        let p2pk_input = TxIn {
            previous_output: OutPoint::new(txid(9), 2),
            script_sig: Builder::new().push_slice(SIG).into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };
        assert_eq!(spender_script(&p2pk_input), None);

        // p2wpkh: witness [sig, pubkey]
        let p2wpkh_input = TxIn {
            previous_output: OutPoint::new(txid(9), 3),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::from_slice(&[SIG.as_slice(), PUBKEY.as_slice()]),
        };
        let expected = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_raw_hash(hash160::Hash::hash(
            &PUBKEY,
        )));
        assert_eq!(spender_script(&p2wpkh_input), Some(expected));

        // p2wsh: last witness element is the witness script
        let wscript: [u8; 4] = [0x51, 0x52, 0x53, 0x93];
        let p2wsh_input = TxIn {
            previous_output: OutPoint::new(txid(9), 4),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::from_slice(&[SIG.as_slice(), &[0x01], wscript.as_slice()]),
        };
        let expected = ScriptBuf::new_p2wsh(&WScriptHash::from_raw_hash(sha256::Hash::hash(
            &wscript,
        )));
        assert_eq!(spender_script(&p2wsh_input), Some(expected));
    }

    fn watched_rule(script: ScriptBuf) -> WalletRule {
        WalletRule::Script(ScriptRule {
            script_pubkey: script,
            redeem_script: None,
        })
    }

    #[test]
    fn wallet_fold_records_matched_rules() {
        let mut rules = WalletRuleSet::new();
        rules.add("alice", watched_rule(p2pkh(1)));
        rules.add("alice", watched_rule(pubkey_p2pkh()));
        rules.add("bob", watched_rule(p2pkh(2)));

        let spend = tx(
            vec![p2pkh_input(OutPoint::new(txid(9), 0))],
            vec![output(30, p2pkh(1)), output(20, p2pkh(2))],
        );
        let changes =
            extract_wallet_changes(txid(5), &spend, Some((5, block_hash(5))), 0, &rules);
        assert_eq!(changes.len(), 2);

        let alice = changes
            .iter()
            .find(|c| c.balance_id == BalanceId::wallet("alice"))
            .unwrap();
        assert_eq!(alice.spent_outpoints, vec![OutPoint::new(txid(9), 0)]);
        assert_eq!(alice.received_coins.len(), 1);
        assert!(alice
            .matched_rules
            .iter()
            .any(|m| m.location == MatchLocation::Input && m.index == 0));
        assert!(alice
            .matched_rules
            .iter()
            .any(|m| m.location == MatchLocation::Output && m.index == 0));

        let bob = changes
            .iter()
            .find(|c| c.balance_id == BalanceId::wallet("bob"))
            .unwrap();
        assert!(bob.spent_outpoints.is_empty());
        assert_eq!(bob.received_coins[0].outpoint.vout, 1);
    }

    #[test]
    fn merge_is_idempotent_under_duplicate_delivery() {
        let mut rules = WalletRuleSet::new();
        rules.add("alice", watched_rule(p2pkh(1)));
        rules.add("alice", watched_rule(pubkey_p2pkh()));

        let spend = tx(
            vec![p2pkh_input(OutPoint::new(txid(9), 0))],
            vec![output(30, p2pkh(1))],
        );
        let changes =
            extract_wallet_changes(txid(6), &spend, Some((6, block_hash(6))), 0, &rules);
        let mut once = changes[0].clone();
        let twice = changes[0].clone();
        once.merge(&twice);
        assert_eq!(once.spent_outpoints, twice.spent_outpoints);
        assert_eq!(once.received_coins, twice.received_coins);
        assert_eq!(once.matched_rules, twice.matched_rules);
    }

    struct MapLookup(std::collections::HashMap<Txid, Transaction>);

    #[async_trait]
    impl TransactionLookup for MapLookup {
        async fn get(&self, txid: &Txid) -> Result<Option<Transaction>, IndexerError> {
            Ok(self.0.get(txid).cloned())
        }
    }

    #[tokio::test]
    async fn spend_resolution_populates_coins_and_net_amount() {
        // Parent pays 50 to the destination our test pubkey spends from.
        let parent = coinbase(vec![output(50, pubkey_p2pkh())]);
        let parent_txid = parent.compute_txid();

        let spend = tx(
            vec![p2pkh_input(OutPoint::new(parent_txid, 0))],
            vec![output(49, p2pkh(2))],
        );
        let changes = extract_script_changes(txid(7), &spend, Some((7, block_hash(7))), 0);
        let mut change = changes
            .iter()
            .find(|c| c.balance_id == BalanceId::script(&pubkey_p2pkh()))
            .unwrap()
            .clone();
        assert_eq!(change.settled_amount(), None);

        let lookup = MapLookup([(parent_txid, parent)].into_iter().collect());
        change.resolve_spent_coins(&lookup).await.unwrap();
        let coins = change.spent_coins.as_ref().unwrap();
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].value(), Amount::from_sat(50));
        assert_eq!(change.settled_amount(), Some(SignedAmount::from_sat(-50)));

        // Idempotent: resolving again changes nothing.
        change.resolve_spent_coins(&lookup).await.unwrap();
        assert_eq!(change.spent_coins.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_spend_is_pruned_not_misattributed() {
        // Parent actually paid a different script than the inferred subject.
        let parent = coinbase(vec![output(50, p2pkh(3))]);
        let parent_txid = parent.compute_txid();

        let spend = tx(
            vec![p2pkh_input(OutPoint::new(parent_txid, 0))],
            vec![output(49, p2pkh(2))],
        );
        let changes = extract_script_changes(txid(8), &spend, Some((8, block_hash(8))), 0);
        let mut change = changes
            .iter()
            .find(|c| c.balance_id == BalanceId::script(&pubkey_p2pkh()))
            .unwrap()
            .clone();

        let lookup = MapLookup([(parent_txid, parent)].into_iter().collect());
        change.resolve_spent_coins(&lookup).await.unwrap();
        assert!(change.spent_coins.as_ref().unwrap().is_empty());
        assert!(change.spent_outpoints.is_empty());
        assert_eq!(change.settled_amount(), Some(SignedAmount::from_sat(0)));
    }

    #[tokio::test]
    async fn missing_parent_is_an_error() {
        let spend = tx(
            vec![p2pkh_input(OutPoint::new(txid(42), 0))],
            vec![output(1, p2pkh(2))],
        );
        let changes = extract_script_changes(txid(8), &spend, None, 0);
        let mut change = changes
            .iter()
            .find(|c| c.balance_id == BalanceId::script(&pubkey_p2pkh()))
            .unwrap()
            .clone();
        let lookup = MapLookup(Default::default());
        assert!(change.resolve_spent_coins(&lookup).await.is_err());
    }
}
