mod auth;
mod config;
mod error;
mod handlers;
mod images;
#[cfg(test)]
mod live_tests;
mod models;
mod reconcile;
mod routes;
mod state;

use std::io;

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use config::{AppConfig, MongoConfig};
use state::AppState;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

fn cors(allowed_origin: Option<&str>) -> Cors {
    match allowed_origin {
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
            .max_age(3600),
        None => Cors::permissive(),
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,actix_web=info,backoffice_api=debug")),
        )
        .init();

    info!("Starting back-office API server");

    let config = AppConfig::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let mongo = MongoConfig::init(&config)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let state = AppState::new(mongo.database, &config);

    if let Some(admin) = &config.admin {
        if let Err(e) = auth::ensure_admin(&state, admin).await {
            error!("Failed to create admin user: {}", e);
        }
    }
    reconcile::spawn_reconciler(state.clone(), config.reconcile_interval);

    let bind_address = config.bind_address();
    info!("Listening on {}:{}", bind_address.0, bind_address.1);

    let allowed_origin = config.cors_allowed_origin.clone();
    let data = web::Data::new(state);
    HttpServer::new(move || {
        let keys = data.jwt.clone();
        App::new()
            .wrap(TracingLogger::default())
            .wrap(cors(allowed_origin.as_deref()))
            .app_data(data.clone())
            .configure(move |cfg| routes::configure_routes(cfg, keys))
    })
    .bind(bind_address)?
    .run()
    .await
}
