use serde::{Deserialize, Serialize};

use plend_types::Address;

/// Who may call `trigger_default` once a deadline has passed.
///
/// Deployments disagree on whether defaulting is a public keeper action or
/// a lender privilege, so the ledger takes it as configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DefaultTriggerPolicy {
    /// Anyone may trigger an overdue default.
    #[default]
    AnyCaller,
    /// Only the offer's lender may trigger.
    LenderOnly,
    /// The lender or one of the listed keeper addresses may trigger.
    LenderOrKeepers { keepers: Vec<Address> },
}

impl DefaultTriggerPolicy {
    pub fn permits(&self, caller: &Address, lender: &Address) -> bool {
        match self {
            Self::AnyCaller => true,
            Self::LenderOnly => caller == lender,
            Self::LenderOrKeepers { keepers } => caller == lender || keepers.contains(caller),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_gate_callers() {
        let lender = Address::derive("lender");
        let keeper = Address::derive("keeper");
        let other = Address::derive("other");

        assert!(DefaultTriggerPolicy::AnyCaller.permits(&other, &lender));

        assert!(DefaultTriggerPolicy::LenderOnly.permits(&lender, &lender));
        assert!(!DefaultTriggerPolicy::LenderOnly.permits(&keeper, &lender));

        let keepers = DefaultTriggerPolicy::LenderOrKeepers {
            keepers: vec![keeper],
        };
        assert!(keepers.permits(&lender, &lender));
        assert!(keepers.permits(&keeper, &lender));
        assert!(!keepers.permits(&other, &lender));
    }

    #[test]
    fn policy_serializes_with_mode_tag() {
        let json = serde_json::to_string(&DefaultTriggerPolicy::LenderOnly).unwrap();
        assert_eq!(json, r#"{"mode":"lender_only"}"#);
        let parsed: DefaultTriggerPolicy = serde_json::from_str(r#"{"mode":"any_caller"}"#).unwrap();
        assert_eq!(parsed, DefaultTriggerPolicy::AnyCaller);
    }
}
