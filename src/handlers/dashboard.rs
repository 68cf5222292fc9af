use actix_web::HttpResponse;
use tracing::debug;

use crate::models::sample;

pub async fn list_orders() -> HttpResponse {
    let orders = sample::orders();
    debug!("Serving {} sample orders", orders.len());
    HttpResponse::Ok().json(orders)
}

pub async fn list_customers() -> HttpResponse {
    let customers = sample::customers();
    debug!("Serving {} sample customers", customers.len());
    HttpResponse::Ok().json(customers)
}
