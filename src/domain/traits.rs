//! Domain traits defining contracts for external systems.

use async_trait::async_trait;

use super::error::BrokerError;
use super::types::{AuthAttempt, AuthGrant};

/// Read-only blockchain registry seam. One contract method is consumed; the
/// ABI plumbing lives behind this trait so tests can script record values.
#[async_trait]
pub trait RecordRegistry: Send + Sync {
    /// Check registry RPC connectivity
    async fn health_check(&self) -> Result<(), BrokerError>;

    /// Resolve hashed record names for a hashed alias.
    ///
    /// Returns the packed "mixed" record value as a `0x`-prefixed hex blob,
    /// or the bare `"0x"` marker when the alias is unknown on chain.
    async fn get_record_hashed(
        &self,
        alias_hash: &str,
        names: &[String],
    ) -> Result<String, BrokerError>;
}

/// Application callbacks supplied by the relying party.
#[async_trait]
pub trait AuthHooks: Send + Sync {
    /// Validate user data before the session is linked to the user. The
    /// returned value (if any) becomes the session's `user_id`.
    async fn on_user_validate(
        &self,
        user_data: &serde_json::Value,
    ) -> Result<Option<String>, BrokerError> {
        let _ = user_data;
        Ok(None)
    }

    /// Reserved activation hook; accepted in construction but not invoked by
    /// the pairing flow.
    async fn on_activate(&self, alias: &str) -> Result<(), BrokerError> {
        let _ = alias;
        Ok(())
    }

    /// Authorize the authenticated user and mint the widget's final token.
    async fn on_success(&self, attempt: AuthAttempt) -> Result<AuthGrant, BrokerError>;
}
