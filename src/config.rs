use std::{env, path::PathBuf, time::Duration};

use dotenv::dotenv;
use mongodb::{Client, Database};
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mongo_uri: String,
    pub database_name: String,
    pub server_host: String,
    pub server_port: u16,
    pub public_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub cors_allowed_origin: Option<String>,
    pub reconcile_interval: Option<Duration>,
    pub admin: Option<AdminSeed>,
}

/// Credentials for the user created at startup when none exists yet.
#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub name: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mongo_uri = var("MONGODB_URI").unwrap_or_else(|| "mongodb://localhost:27017".to_string());
        let database_name = var("DATABASE_NAME").unwrap_or_else(|| "backoffice".to_string());
        let server_host = var("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let server_port = match var("SERVER_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| AppError::Config(format!("Invalid SERVER_PORT '{}': {}", raw, e)))?,
            None => 8080,
        };
        let public_dir = PathBuf::from(var("PUBLIC_DIR").unwrap_or_else(|| "public".to_string()));

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; generating a per-process secret, sessions will not survive a restart");
            random_secret()
        });
        let jwt_refresh_secret = var("JWT_REFRESH_SECRET").unwrap_or_else(random_secret);

        let reconcile_secs = match var("RECONCILE_INTERVAL_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                AppError::Config(format!("Invalid RECONCILE_INTERVAL_SECS '{}': {}", raw, e))
            })?,
            None => 300,
        };
        let reconcile_interval = (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs));

        let admin = match (var("ADMIN_EMAIL"), var("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                email,
                password,
                name: var("ADMIN_NAME").unwrap_or_else(|| "Administrator".to_string()),
            }),
            (Some(_), None) | (None, Some(_)) => {
                return Err(AppError::Config(
                    "ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string(),
                ))
            }
            (None, None) => None,
        };

        Ok(AppConfig {
            mongo_uri,
            database_name,
            server_host,
            server_port,
            public_dir,
            jwt_secret,
            jwt_refresh_secret,
            cors_allowed_origin: var("CORS_ALLOWED_ORIGIN"),
            reconcile_interval,
            admin,
        })
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server_host.clone(), self.server_port)
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

pub struct MongoConfig {
    pub database: Database,
}

impl MongoConfig {
    pub async fn init(config: &AppConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.mongo_uri).await?;
        let database = client.database(&config.database_name);
        info!(database = %config.database_name, "MongoDB client initialised");

        Ok(MongoConfig { database })
    }
}
