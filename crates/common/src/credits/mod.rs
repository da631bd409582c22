//! Cost / credit service hook
//!
//! The discovery core never owns a billing ledger; it only asks an external
//! collaborator whether an operation may start and reports consumed units
//! when it finishes.

use crate::errors::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Outcome of a charge attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    Ok,
    Insufficient,
}

/// External cost/credit collaborator
#[async_trait]
pub trait CreditService: Send + Sync {
    /// Reserve credit for one operation before any work starts
    async fn charge(&self, operation: &str, user_id: Uuid) -> Result<ChargeOutcome>;

    /// Close the loop after terminal success
    async fn record(
        &self,
        operation: &str,
        user_id: Uuid,
        cost_units: u32,
        task_id: Uuid,
    ) -> Result<()>;
}

/// Credit service that always approves. Default for deployments without
/// billing and for tests that are not about cost handling.
#[derive(Debug, Default)]
pub struct FreeCredits;

#[async_trait]
impl CreditService for FreeCredits {
    async fn charge(&self, _operation: &str, _user_id: Uuid) -> Result<ChargeOutcome> {
        Ok(ChargeOutcome::Ok)
    }

    async fn record(
        &self,
        _operation: &str,
        _user_id: Uuid,
        _cost_units: u32,
        _task_id: Uuid,
    ) -> Result<()> {
        Ok(())
    }
}
