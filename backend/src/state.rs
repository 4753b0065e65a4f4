use std::sync::Arc;

use crate::{
    config::Config,
    repositories::{PgSessionDirectory, SessionDirectory},
    utils::jwt::ChannelTokenSigner,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub directory: Arc<dyn SessionDirectory>,
    pub signer: ChannelTokenSigner,
}

impl AppState {
    pub fn new(config: Config, directory: Arc<dyn SessionDirectory>) -> Self {
        let signer = ChannelTokenSigner::new(
            config.media_app_id.clone(),
            config.media_app_certificate.clone(),
            config.media_token_ttl_seconds,
        );
        Self {
            config,
            directory,
            signer,
        }
    }

    /// State backed by the Postgres session directory.
    pub fn with_pool(config: Config, pool: sqlx::PgPool) -> Self {
        Self::new(config, Arc::new(PgSessionDirectory::new(pool)))
    }
}
