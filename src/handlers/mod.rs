pub mod categories;
pub mod dashboard;
pub mod products;
pub mod promotions;
pub mod upload;

use actix_web::HttpResponse;
use serde_json::json;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}
