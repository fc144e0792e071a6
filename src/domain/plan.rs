use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A subscription plan: what it costs and how many words it grants.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Plan {
    pub code: String,
    pub price_minor_units: u64,
    pub word_limit: u64,
}

impl Plan {
    pub fn new(code: &str, price_minor_units: u64, word_limit: u64) -> Self {
        Self {
            code: code.to_string(),
            price_minor_units,
            word_limit,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price_minor_units == 0
    }

    /// Price in whole currency units, as the gateway expects it.
    pub fn gateway_amount(&self) -> String {
        major_units(self.price_minor_units)
    }
}

/// Renders minor units as a decimal amount: `50000` -> `"500"`, `1050` -> `"10.50"`.
pub fn major_units(minor_units: u64) -> String {
    let (major, minor) = (minor_units / 100, minor_units % 100);
    if minor == 0 {
        major.to_string()
    } else {
        format!("{}.{:02}", major, minor)
    }
}

/// Plans keyed case-insensitively by code.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: BTreeMap<String, Plan>,
}

impl PlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: plans
                .into_iter()
                .map(|plan| (plan.code.to_lowercase(), plan))
                .collect(),
        }
    }

    pub fn resolve(&self, code: &str) -> Result<&Plan> {
        self.plans
            .get(&code.trim().to_lowercase())
            .ok_or_else(|| PaymentError::ValidationError(format!("Unknown plan: {}", code)))
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new([
            Plan::new("Free", 0, 500),
            Plan::new("Basic", 50_000, 1_500),
            Plan::new("Premium", 200_000, 8_000),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_case_insensitive() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.resolve("basic").unwrap().word_limit, 1_500);
        assert_eq!(catalog.resolve(" PREMIUM ").unwrap().word_limit, 8_000);
        assert!(catalog.resolve("Free").unwrap().is_free());
    }

    #[test]
    fn test_unknown_plan() {
        let catalog = PlanCatalog::default();
        assert!(matches!(
            catalog.resolve("Gold"),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_gateway_amount() {
        assert_eq!(Plan::new("Basic", 50_000, 1).gateway_amount(), "500");
        assert_eq!(Plan::new("Odd", 1_050, 1).gateway_amount(), "10.50");
    }
}
