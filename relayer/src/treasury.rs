//! Wraps the on-chain fee pool. `ensure_minimums` tops up below-threshold
//! balances; `with_fee_coins` is the scoped withdraw→use→return wrapper
//! every MPC coordinator call that spends fees must go through — per the
//! design notes, fee coins are never split per-session in memory, and the
//! unused remainder is guaranteed to be returned on every exit path,
//! including when the body returns an error.

use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::RelayerError;
use crate::external::{CoordinationCall, CoordinationChain};
use crate::sequencer::TxSequencer;

pub struct Treasury {
    chain: Arc<dyn CoordinationChain>,
    sequencer: TxSequencer,
    min_fee_balance: u64,
    min_gas_balance: u64,
}

/// A scoped handle to withdrawn fee/gas coins. Whatever remains in `fee` and
/// `gas` when the scope that created it ends is returned to the pool — the
/// body of [`Treasury::with_fee_coins`] is expected to decrement these
/// fields by however much it actually spends.
pub struct FeeHandle {
    pub fee: u64,
    pub gas: u64,
}

impl Treasury {
    pub fn new(
        chain: Arc<dyn CoordinationChain>,
        sequencer: TxSequencer,
        min_fee_balance: u64,
        min_gas_balance: u64,
    ) -> Self {
        Self { chain, sequencer, min_fee_balance, min_gas_balance }
    }

    pub async fn balances(&self) -> Result<(u64, u64), RelayerError> {
        self.chain.read_treasury_balances().await
    }

    pub async fn top_up_fee_token(&self, amount: u64) -> Result<(), RelayerError> {
        self.sequencer
            .enqueue(CoordinationCall {
                label: "treasury.top_up_fee".into(),
                function: "top_up_fee".into(),
                arguments: vec![serde_json::json!(amount)],
            })
            .await?;
        Ok(())
    }

    pub async fn top_up_gas_token(&self, amount: u64) -> Result<(), RelayerError> {
        self.sequencer
            .enqueue(CoordinationCall {
                label: "treasury.top_up_gas".into(),
                function: "top_up_gas".into(),
                arguments: vec![serde_json::json!(amount)],
            })
            .await?;
        Ok(())
    }

    /// Reads balances and, if below the configured thresholds, submits
    /// top-ups sized to `2 * threshold`.
    pub async fn ensure_minimums(&self) -> Result<(), RelayerError> {
        let (fee, gas) = self.balances().await?;

        if fee < self.min_fee_balance {
            warn!(fee, min = self.min_fee_balance, "fee balance below minimum, topping up");
            self.top_up_fee_token(self.min_fee_balance * 2).await?;
        }
        if gas < self.min_gas_balance {
            warn!(gas, min = self.min_gas_balance, "gas balance below minimum, topping up");
            self.top_up_gas_token(self.min_gas_balance * 2).await?;
        }
        Ok(())
    }

    /// Withdraws `fee_amount`/`gas_amount`, runs `body` with a handle to the
    /// withdrawn coins, then returns whatever the handle says is left —
    /// whether `body` succeeded, failed, or the withdrawal amount wasn't
    /// fully consumed.
    pub async fn with_fee_coins<F, Fut, T>(
        &self,
        fee_amount: u64,
        gas_amount: u64,
        body: F,
    ) -> Result<T, RelayerError>
    where
        F: FnOnce(&mut FeeHandle) -> Fut,
        Fut: std::future::Future<Output = Result<T, RelayerError>>,
    {
        self.sequencer
            .enqueue(CoordinationCall {
                label: "treasury.withdraw".into(),
                function: "withdraw_fee_coins".into(),
                arguments: vec![serde_json::json!(fee_amount), serde_json::json!(gas_amount)],
            })
            .await?;

        let mut handle = FeeHandle { fee: fee_amount, gas: gas_amount };
        let result = body(&mut handle).await;

        if handle.fee > 0 || handle.gas > 0 {
            let returned = self
                .sequencer
                .enqueue(CoordinationCall {
                    label: "treasury.return".into(),
                    function: "return_fee_coins".into(),
                    arguments: vec![serde_json::json!(handle.fee), serde_json::json!(handle.gas)],
                })
                .await;
            if let Err(error) = returned {
                warn!(%error, "failed to return unused fee coins to treasury");
            }
        } else {
            info!("fee coins fully consumed, nothing to return");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fakes::FakeCoordinationChain;

    fn treasury(chain: Arc<FakeCoordinationChain>) -> Treasury {
        let shutdown = tokio_util::sync::CancellationToken::new();
        let sequencer = TxSequencer::spawn(chain.clone(), shutdown);
        Treasury::new(chain, sequencer, 100, 100)
    }

    #[tokio::test]
    async fn ensure_minimums_tops_up_when_below_threshold() {
        let chain = Arc::new(FakeCoordinationChain::default());
        let treasury = treasury(chain.clone());

        treasury.ensure_minimums().await.unwrap();
        let (fee, gas) = treasury.balances().await.unwrap();
        assert_eq!(fee, 200);
        assert_eq!(gas, 200);
    }

    #[tokio::test]
    async fn with_fee_coins_returns_remainder_on_success() {
        let chain = Arc::new(FakeCoordinationChain::default());
        let treasury = treasury(chain.clone());

        let result = treasury
            .with_fee_coins(100, 50, |handle| {
                handle.fee -= 40;
                handle.gas -= 50;
                async { Ok::<_, RelayerError>(()) }
            })
            .await;
        assert!(result.is_ok());

        let submissions = chain.submissions.lock().unwrap();
        let return_call = submissions.iter().find(|c| c.function == "return_fee_coins").unwrap();
        assert_eq!(return_call.arguments[0], serde_json::json!(60));
        assert_eq!(return_call.arguments[1], serde_json::json!(0));
    }

    #[tokio::test]
    async fn with_fee_coins_returns_remainder_even_on_failure() {
        let chain = Arc::new(FakeCoordinationChain::default());
        let treasury = treasury(chain.clone());

        let result: Result<(), RelayerError> = treasury
            .with_fee_coins(100, 50, |handle| {
                handle.fee -= 10;
                async { Err(RelayerError::TransientNetwork("boom".into())) }
            })
            .await;
        assert!(result.is_err());

        let submissions = chain.submissions.lock().unwrap();
        let return_call = submissions.iter().find(|c| c.function == "return_fee_coins").unwrap();
        assert_eq!(return_call.arguments[0], serde_json::json!(90));
        assert_eq!(return_call.arguments[1], serde_json::json!(50));
    }
}
