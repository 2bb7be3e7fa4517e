//! Transaction filtering contract: selects the transactions inside a
//! `MainBlockDelta` relevant to this para's `title`, unwrapping grouped
//! multi-executor transactions as needed. Supplied externally per the
//! system overview (this crate only consumes `ParaTxFilter`), but a
//! reasonable default is provided so the crate runs standalone.

use crate::types::{MainBlockDelta, Tx};

pub trait ParaTxFilter: Send + Sync {
    /// `FilterTxsForParaPlus(title, delta)`: returns only transactions
    /// belonging to `title`, retaining both add- and del-actions.
    fn filter_txs_for_para(&self, title: &str, delta: &MainBlockDelta) -> Vec<Tx>;
}

/// Matches any transaction whose executor name is prefixed by the para's
/// title (chain33's `ParaX` convention: `"user.p.<title>."`-prefixed
/// executor names belong to that para).
pub struct PrefixExecNameFilter;

impl ParaTxFilter for PrefixExecNameFilter {
    fn filter_txs_for_para(&self, title: &str, delta: &MainBlockDelta) -> Vec<Tx> {
        delta
            .tx_details
            .iter()
            .filter(|detail| detail.tx.execer.starts_with(title))
            .map(|detail| detail.tx.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeltaType, MainBlockHeader, Receipt, ExecReceiptTy, TxDetail};

    fn delta_with_execers(execers: &[&str]) -> MainBlockDelta {
        MainBlockDelta {
            ty: DeltaType::Add,
            header: MainBlockHeader { height: 1, hash: vec![1], parent_hash: vec![0], block_time: 0 },
            tx_details: execers
                .iter()
                .map(|execer| TxDetail {
                    tx: Tx { hash: vec![0], execer: execer.to_string(), payload: vec![] },
                    receipt: Receipt { tx_hash: vec![0], ty: ExecReceiptTy::ExecOk },
                })
                .collect(),
        }
    }

    #[test]
    fn keeps_only_matching_prefix() {
        let delta = delta_with_execers(&["user.p.myTitle.coins", "user.p.other.coins", "coins"]);
        let filter = PrefixExecNameFilter;
        let kept = filter.filter_txs_for_para("user.p.myTitle.", &delta);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].execer, "user.p.myTitle.coins");
    }

    #[test]
    fn empty_delta_yields_empty_filter_result() {
        let delta = delta_with_execers(&[]);
        let filter = PrefixExecNameFilter;
        assert!(filter.filter_txs_for_para("user.p.myTitle.", &delta).is_empty());
    }
}
