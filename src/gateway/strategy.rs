//! Provider strategy assignment
//!
//! Three preference orders: e-wallet destinations (account number equals the
//! reserved sentinel), banks with a direct API integration, everything else.
//! Every provider in an order is assumed able to attempt the transfer.

use serde::{Deserialize, Serialize};

use crate::core_types::ProviderCode;
use crate::error::LedgerError;
use crate::transaction::{BankDestination, GatewayStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub ewallet_sentinel_account: String,
    pub direct_bank_codes: Vec<String>,
    pub ewallet_order: Vec<ProviderCode>,
    pub direct_bank_order: Vec<ProviderCode>,
    pub default_order: Vec<ProviderCode>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let order = |codes: [&str; 3]| -> Vec<ProviderCode> {
            codes.iter().map(|c| ProviderCode::new(*c)).collect()
        };
        Self {
            ewallet_sentinel_account: "8888888888".to_string(),
            direct_bank_codes: vec!["002".into(), "008".into(), "009".into(), "014".into()],
            ewallet_order: order(["flip", "xendit", "oy"]),
            direct_bank_order: order(["oy", "xendit", "flip"]),
            default_order: order(["xendit", "flip", "oy"]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyPlanner {
    config: RoutingConfig,
}

impl StrategyPlanner {
    pub fn new(config: RoutingConfig) -> Result<Self, LedgerError> {
        for (name, order) in [
            ("ewallet_order", &config.ewallet_order),
            ("direct_bank_order", &config.direct_bank_order),
            ("default_order", &config.default_order),
        ] {
            if order.is_empty() {
                return Err(LedgerError::InvalidRequest(format!(
                    "routing {} has no providers",
                    name
                )));
            }
        }
        Ok(Self { config })
    }

    /// Preference order for a destination
    pub fn order_for(&self, bank_code: &str, account_number: &str) -> &[ProviderCode] {
        if account_number == self.config.ewallet_sentinel_account {
            &self.config.ewallet_order
        } else if self
            .config
            .direct_bank_codes
            .iter()
            .any(|c| c == bank_code)
        {
            &self.config.direct_bank_order
        } else {
            &self.config.default_order
        }
    }

    /// Fresh strategy queue, nothing executed
    pub fn plan(&self, destination: &BankDestination) -> Vec<GatewayStrategy> {
        self.order_for(&destination.bank_code, &destination.account_number)
            .iter()
            .cloned()
            .map(GatewayStrategy::new)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination(bank_code: &str, account_number: &str) -> BankDestination {
        BankDestination {
            bank_code: bank_code.into(),
            account_number: account_number.into(),
            account_name: "Budi".into(),
        }
    }

    fn providers(strategies: &[GatewayStrategy]) -> Vec<&str> {
        strategies.iter().map(|s| s.provider.as_str()).collect()
    }

    #[test]
    fn test_three_orderings() {
        let planner = StrategyPlanner::new(RoutingConfig::default()).unwrap();
        assert_eq!(
            providers(&planner.plan(&destination("014", "123"))),
            vec!["oy", "xendit", "flip"]
        );
        assert_eq!(
            providers(&planner.plan(&destination("451", "8888888888"))),
            vec!["flip", "xendit", "oy"]
        );
        assert_eq!(
            providers(&planner.plan(&destination("451", "123"))),
            vec!["xendit", "flip", "oy"]
        );
    }

    #[test]
    fn test_sentinel_wins_over_direct_bank() {
        let planner = StrategyPlanner::new(RoutingConfig::default()).unwrap();
        let plan = planner.plan(&destination("014", "8888888888"));
        assert_eq!(providers(&plan), vec!["flip", "xendit", "oy"]);
        assert!(plan.iter().all(|s| !s.is_executed));
    }

    #[test]
    fn test_empty_order_rejected() {
        let config = RoutingConfig {
            default_order: vec![],
            ..RoutingConfig::default()
        };
        assert!(StrategyPlanner::new(config).is_err());
    }
}
