use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schemas::{Currency, MAX_EXPONENT};
use crate::split::{SplitCalculator, DEFAULT_PERCENTAGE_TOLERANCE};

/// Tunables for the split calculator and settlement planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Currency given to groups created without one.
    #[serde(default)]
    pub currency: Currency,
    /// Allowed distance of a percentage split's total from 100.
    #[serde(default = "EngineConfig::default_percentage_tolerance")]
    pub percentage_tolerance: Decimal,
    /// Absolute balance treated as settled. Defaults to one minor unit of the
    /// group's currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_tolerance: Option<Decimal>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: Currency::default(),
            percentage_tolerance: Self::default_percentage_tolerance(),
            settlement_tolerance: None,
        }
    }
}

impl EngineConfig {
    pub fn default_percentage_tolerance() -> Decimal {
        DEFAULT_PERCENTAGE_TOLERANCE
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_currency(&self.currency)?;
        if self.percentage_tolerance < Decimal::ZERO {
            return Err(ConfigError::NegativeTolerance {
                name: "percentage",
                value: self.percentage_tolerance,
            });
        }
        if let Some(value) = self.settlement_tolerance {
            if value < Decimal::ZERO {
                return Err(ConfigError::NegativeTolerance {
                    name: "settlement",
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn calculator_for(&self, currency: &Currency) -> SplitCalculator {
        SplitCalculator::new(currency).with_percentage_tolerance(self.percentage_tolerance)
    }

    pub fn settlement_epsilon(&self, currency: &Currency) -> Decimal {
        self.settlement_tolerance
            .unwrap_or_else(|| currency.minor_unit())
    }
}

pub fn validate_currency(currency: &Currency) -> Result<(), ConfigError> {
    if currency.exponent > MAX_EXPONENT {
        return Err(ConfigError::UnsupportedExponent(currency.exponent));
    }
    Ok(())
}
