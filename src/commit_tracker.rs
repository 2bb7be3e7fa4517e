//! CommitTracker: watches para-block inclusion to mark in-flight
//! cross-chain commit transactions as done. Never mutates follower state;
//! it is a best-effort side channel, invoked after every successful
//! append (`paracreate.go::checkCommitTxSuccess`).

use async_trait::async_trait;
use std::sync::Arc;

use crate::adapter::MainChainClient;
use crate::caught_up::CaughtUpFlag;
use crate::types::{ExecReceiptTy, TxDetail};

/// The commit-message submitter, an out-of-scope peer component. The core
/// only reads its in-flight transaction and reports which hashes are done.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait CommitMsgSubmitter: Send + Sync {
    /// `None` if there is no outstanding commit transaction.
    async fn in_flight_tx(&self) -> Option<InFlightTx>;
    async fn check_sending_tx_done(&self, done_hashes: Vec<Vec<u8>>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightTx {
    pub hash: Vec<u8>,
    pub execer: String,
}

/// Default submitter for running the follower standalone, with no real
/// commit-message peer wired in: always reports no outstanding
/// transaction, so `CommitTracker` is a no-op.
pub struct NoopCommitMsgSubmitter;

#[async_trait]
impl CommitMsgSubmitter for NoopCommitMsgSubmitter {
    async fn in_flight_tx(&self) -> Option<InFlightTx> {
        None
    }

    async fn check_sending_tx_done(&self, _done_hashes: Vec<Vec<u8>>) {}
}

fn is_para_exec_name(execer: &str, title: &str) -> bool {
    execer.starts_with(title)
}

pub struct CommitTracker {
    submitter: Arc<dyn CommitMsgSubmitter>,
    adapter: Arc<dyn MainChainClient>,
    caught_up: Arc<CaughtUpFlag>,
    title: String,
}

impl CommitTracker {
    pub fn new(
        submitter: Arc<dyn CommitMsgSubmitter>,
        adapter: Arc<dyn MainChainClient>,
        caught_up: Arc<CaughtUpFlag>,
        title: impl Into<String>,
    ) -> Self {
        CommitTracker {
            submitter,
            adapter,
            caught_up,
            title: title.into(),
        }
    }

    /// `checkCommitTxSuccess`: no-op unless caught up and the submitter
    /// reports an outstanding transaction.
    pub async fn check_commit_tx_success(&self, tx_details: &[TxDetail]) {
        if !self.caught_up.get() {
            return;
        }
        let Some(cur_tx) = self.submitter.in_flight_tx().await else {
            return;
        };

        let done = if is_para_exec_name(&cur_tx.execer, &self.title) {
            tx_details
                .iter()
                .filter(|detail| {
                    detail.tx.execer.starts_with(&self.title)
                        && matches!(detail.receipt.ty, ExecReceiptTy::ExecOk)
                })
                .map(|detail| detail.tx.hash.clone())
                .collect::<Vec<_>>()
        } else {
            match self.adapter.query_tx_on_main_by_hash(&cur_tx.hash).await {
                Ok(Some(receipt)) if matches!(receipt.ty, ExecReceiptTy::ExecOk) => vec![cur_tx.hash.clone()],
                _ => Vec::new(),
            }
        };

        if !done.is_empty() {
            crate::metrics::increment_commit_txs_confirmed();
            self.submitter.check_sending_tx_done(done).await;
        }
    }
}
