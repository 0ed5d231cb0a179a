//! Principal threaded through every mutating call.
//!
//! The ledger never looks up an ambient session; whoever calls it says who
//! they are, and that identity ends up on the records it writes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::account::AccountId;
use crate::error::{LedgerError, LedgerResult};

/// Authenticated identity of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Actor {
    /// Back-office operator
    Admin(i64),
    /// End user acting on their own account
    User(i64),
    /// Scheduled jobs and other unattended callers
    System,
}

impl Actor {
    #[inline]
    pub fn admin_id(&self) -> Option<i64> {
        match self {
            Actor::Admin(id) => Some(*id),
            _ => None,
        }
    }

    /// Operators and unattended jobs may drive back-office flows
    #[inline]
    pub fn is_operator(&self) -> bool {
        matches!(self, Actor::Admin(_) | Actor::System)
    }

    /// Users act only on their own account (one account per user id)
    pub fn may_act_for(&self, account_id: AccountId) -> bool {
        match self {
            Actor::User(id) => *id == account_id,
            _ => true,
        }
    }

    pub fn ensure_operator(&self) -> LedgerResult<()> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(LedgerError::Validation(format!(
                "{} may not perform back-office operations",
                self
            )))
        }
    }

    pub fn ensure_owner(&self, account_id: AccountId) -> LedgerResult<()> {
        if self.may_act_for(account_id) {
            Ok(())
        } else {
            Err(LedgerError::Validation(format!(
                "{} may not act on account {}",
                self, account_id
            )))
        }
    }

    /// JSON attribution stored in `Transaction::metadata`
    pub fn attribution(&self) -> serde_json::Value {
        match self {
            Actor::Admin(id) => serde_json::json!({ "actor": self.to_string(), "admin_id": id }),
            _ => serde_json::json!({ "actor": self.to_string() }),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Admin(id) => write!(f, "admin:{}", id),
            Actor::User(id) => write!(f, "user:{}", id),
            Actor::System => write!(f, "system"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_attribution() {
        let actor = Actor::Admin(7);
        assert_eq!(actor.admin_id(), Some(7));
        assert_eq!(actor.attribution()["admin_id"], 7);
        assert_eq!(actor.attribution()["actor"], "admin:7");
    }

    #[test]
    fn test_user_is_not_operator() {
        assert!(!Actor::User(1).is_operator());
        assert!(Actor::System.is_operator());
        assert_eq!(Actor::User(1).admin_id(), None);
        assert!(Actor::User(1).attribution().get("admin_id").is_none());
        assert!(Actor::User(1).ensure_operator().is_err());
    }

    #[test]
    fn test_users_act_only_on_own_account() {
        assert!(Actor::User(4).ensure_owner(4).is_ok());
        assert_eq!(Actor::User(4).ensure_owner(5).unwrap_err().code(), "VALIDATION_ERROR");
        assert!(Actor::Admin(1).may_act_for(5));
    }
}
