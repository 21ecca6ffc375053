use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dotenvy::dotenv;
use uuid::Uuid;

use pairgate::api;
use pairgate::app::{spawn_sweeper, AppState, SweeperConfig};
use pairgate::domain::{AuthAttempt, AuthGrant, AuthHooks, BrokerConfig, BrokerError};
use pairgate::infra::observability::init_tracing;
use pairgate::infra::RpcRecordRegistry;

/// Development hooks: every verified pairing is granted a throwaway token.
/// Real deployments embed the library and supply their own [`AuthHooks`]
/// that mint a project token and link the user.
struct DevHooks;

#[async_trait]
impl AuthHooks for DevHooks {
    async fn on_success(&self, attempt: AuthAttempt) -> Result<AuthGrant, BrokerError> {
        tracing::info!(alias = %attempt.alias, "Minting development token");
        Ok(AuthGrant::granted(Uuid::new_v4().to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = BrokerConfig::from_env()?;
    init_tracing(config.debug);

    let registry = Arc::new(RpcRecordRegistry::new(config.registry.clone())?);
    let state = Arc::new(AppState::new(config, registry, Arc::new(DevHooks))?);

    let sweeper_config = SweeperConfig {
        interval: state.config.ping_interval,
        enabled: true,
    };
    let (_sweeper, shutdown_tx) = spawn_sweeper(Arc::clone(&state.service), sweeper_config);

    api::serve(Arc::clone(&state)).await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}
