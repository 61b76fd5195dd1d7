//! Liquidation price calculation over a tiered margin table.
//!
//! Long:  `entry × (1 − 1/L + effective_rate/L)`
//! Short: `entry × (1 + 1/L − effective_rate/L)`
//!
//! where `effective_rate = (notional × margin_rate − maintenance_amount) / notional` for the
//! tier covering `notional`. Because adjacent tiers agree on margin at their shared boundary,
//! `effective_rate` (and therefore the liquidation price) is continuous in `notional`.

use crate::{error::MarginError, market::Side, tier::MarginTierTable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Liquidation price of a position opened at `entry_price` with the given notional and leverage.
pub fn liquidation_price(
    entry_price: Decimal,
    notional: Decimal,
    leverage: u32,
    side: Side,
    table: &MarginTierTable,
) -> Result<Decimal, MarginError> {
    if notional <= Decimal::ZERO {
        return Err(MarginError::InvalidNotional(notional));
    }
    if leverage < 1 {
        return Err(MarginError::InvalidLeverage(leverage));
    }

    let rate = effective_rate(notional, table)?;
    let leverage = Decimal::from(leverage);

    // (L − 1 + r) / L rather than 1 − 1/L + r/L keeps results exact for common leverages
    let multiplier = match side {
        Side::Long => (leverage - Decimal::ONE + rate) / leverage,
        Side::Short => (leverage + Decimal::ONE - rate) / leverage,
    };

    Ok(entry_price * multiplier)
}

/// Maintenance margin as a fraction of `notional` under the covering tier.
pub fn effective_rate(notional: Decimal, table: &MarginTierTable) -> Result<Decimal, MarginError> {
    if notional <= Decimal::ZERO {
        return Err(MarginError::InvalidNotional(notional));
    }

    let tier = table
        .tier_for(notional)
        .ok_or(MarginError::InvalidNotional(notional))?;

    Ok(tier.margin(notional) / notional)
}

/// Strategy used to turn a synthetic position into a liquidation price.
///
/// Every variant is a pure function of its inputs and the immutable tier table.
#[derive(Clone, PartialEq, Eq, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LiquidationModel {
    /// Exchange-style tiered maintenance margin, see [`liquidation_price`].
    #[default]
    Standard,

    /// Standard price shifted by funding accrued over `periods` funding intervals.
    ///
    /// Positive funding drains long margin and tops up short margin, so both sides'
    /// liquidation prices move up by `entry × funding_rate × periods`.
    FundingAdjusted { funding_rate: Decimal, periods: u32 },

    /// Weighted average of member models. Construct with [`LiquidationModel::ensemble`].
    Ensemble { members: Vec<WeightedModel> },
}

/// Member of an [`LiquidationModel::Ensemble`].
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct WeightedModel {
    pub model: LiquidationModel,
    pub weight: Decimal,
}

impl LiquidationModel {
    /// Build an ensemble, validating that member weights lie in `[0, 1]` and sum to one.
    pub fn ensemble(members: Vec<WeightedModel>) -> Result<Self, MarginError> {
        let model = Self::Ensemble { members };
        model.validate()?;
        Ok(model)
    }

    /// Check ensemble weights recursively. Standard and funding variants are always valid.
    pub fn validate(&self) -> Result<(), MarginError> {
        let Self::Ensemble { members } = self else {
            return Ok(());
        };

        if members.is_empty() {
            return Err(MarginError::EmptyEnsemble);
        }

        let mut sum = Decimal::ZERO;
        for member in members {
            if member.weight < Decimal::ZERO || member.weight > Decimal::ONE {
                return Err(MarginError::InvalidEnsembleWeight(member.weight));
            }
            member.model.validate()?;
            sum += member.weight;
        }

        if (sum - Decimal::ONE).abs() > crate::config::WEIGHT_SUM_TOLERANCE {
            return Err(MarginError::EnsembleWeightSum(sum));
        }

        Ok(())
    }

    pub fn liquidation_price(
        &self,
        entry_price: Decimal,
        notional: Decimal,
        leverage: u32,
        side: Side,
        table: &MarginTierTable,
    ) -> Result<Decimal, MarginError> {
        match self {
            Self::Standard => liquidation_price(entry_price, notional, leverage, side, table),
            Self::FundingAdjusted {
                funding_rate,
                periods,
            } => {
                let standard = liquidation_price(entry_price, notional, leverage, side, table)?;
                let funding = entry_price * *funding_rate * Decimal::from(*periods);
                Ok(standard + funding)
            }
            Self::Ensemble { members } => {
                if members.is_empty() {
                    return Err(MarginError::EmptyEnsemble);
                }
                members.iter().try_fold(Decimal::ZERO, |acc, member| {
                    let price = member
                        .model
                        .liquidation_price(entry_price, notional, leverage, side, table)?;
                    Ok(acc + price * member.weight)
                })
            }
        }
    }
}
