use std::sync::Arc;

use mongodb::Database;

use crate::{auth::JwtKeys, config::AppConfig, images::ImageStore};

/// Shared, read-only state handed to every handler. The driver keeps its own
/// connection pool behind `database`.
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub images: ImageStore,
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    pub fn new(database: Database, config: &AppConfig) -> Self {
        AppState {
            database,
            images: ImageStore::new(config.public_dir.clone()),
            jwt: Arc::new(JwtKeys::new(&config.jwt_secret, &config.jwt_refresh_secret)),
        }
    }
}
