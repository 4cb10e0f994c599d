//! Economic model: block subsidy and checked currency arithmetic

use crate::config::ConsensusParams;
use crate::error::{ConsensusError, Result};
use crate::types::*;

/// GetBlockSubsidy: ℕ → ℤ
///
/// The subsidy starts at `initial_coinbase` coins, falls by one coin per
/// block, and never drops below `minimum_coinbase`.
///
/// Formula: subsidy = max(initial - h, minimum) × precision
pub fn block_subsidy(height: BlockHeight, params: &ConsensusParams) -> Currency {
    let coins = params
        .initial_coinbase
        .saturating_sub(height as u128)
        .max(params.minimum_coinbase);
    coins.saturating_mul(params.coin_precision)
}

/// Sum currency amounts, failing on overflow
pub fn checked_sum<I>(values: I) -> Result<Currency>
where
    I: IntoIterator<Item = Currency>,
{
    values
        .into_iter()
        .try_fold(0u128, |acc, v| acc.checked_add(v))
        .ok_or(ConsensusError::Overflow)
}

/// Total value of a list of outputs
pub fn output_total(outputs: &[Output]) -> Result<Currency> {
    checked_sum(outputs.iter().map(|o| o.value))
}

/// Value a transaction moves out of its inputs: outputs, escrow and fee
pub fn transaction_spend_total(tx: &Transaction) -> Result<Currency> {
    let outputs = output_total(&tx.outputs)?;
    let escrow = checked_sum(tx.file_contracts.iter().map(|c| c.escrowed_funds))?;
    checked_sum([outputs, escrow, tx.miner_fee])
}

/// Sum of miner fees of a set of transactions
pub fn total_fees(transactions: &[Transaction]) -> Result<Currency> {
    checked_sum(transactions.iter().map(|t| t.miner_fee))
}
