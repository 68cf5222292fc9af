use std::sync::Arc;

use actix_web::{error::JsonPayloadError, web, HttpRequest};

use crate::{
    auth::{self, AuthMiddleware, JwtKeys},
    error::AppError,
    handlers::{categories, dashboard, health, products, promotions, upload},
};

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::Validation(format!("Invalid request body: {}", err)).into()
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, keys: Arc<JwtKeys>) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/api/health", web::get().to(health))
        .service(
            web::scope("/api/auth")
                .route("/signin", web::post().to(auth::sign_in))
                .route("/refresh", web::post().to(auth::refresh_token)),
        )
        .service(
            web::scope("/api")
                .wrap(AuthMiddleware::new(keys))
                .route("/session", web::get().to(auth::current_session))
                .route("/upload", web::post().to(upload::upload_image))
                .route("/orders", web::get().to(dashboard::list_orders))
                .route("/customers", web::get().to(dashboard::list_customers))
                .service(
                    web::scope("/categories")
                        .route("", web::get().to(categories::list_categories))
                        .route("", web::post().to(categories::create_category))
                        .route("/{id}", web::get().to(categories::get_category))
                        .route("/{id}", web::put().to(categories::update_category))
                        .route("/{id}", web::delete().to(categories::delete_category)),
                )
                .service(
                    web::scope("/products")
                        .route("/bulk-delete", web::delete().to(products::bulk_delete_products))
                        .route("", web::get().to(products::list_products))
                        .route("", web::post().to(products::create_product))
                        .route("/{id}", web::get().to(products::get_product))
                        .route("/{id}", web::put().to(products::update_product))
                        .route("/{id}", web::delete().to(products::delete_product)),
                )
                .service(
                    web::scope("/promotions")
                        .route("/bulk-delete", web::delete().to(promotions::bulk_delete_promotions))
                        .route("", web::get().to(promotions::list_promotions))
                        .route("", web::post().to(promotions::create_promotion))
                        .route("/{id}", web::get().to(promotions::get_promotion))
                        .route("/{id}", web::put().to(promotions::update_promotion))
                        .route("/{id}", web::delete().to(promotions::delete_promotion)),
                ),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{images::ImageStore, state::AppState};
    use actix_web::{
        dev::{Service, ServiceResponse},
        http::{header, StatusCode},
        test, App, Error,
    };
    use mongodb::Client;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const BOUNDARY: &str = "----backoffice-test-boundary";

    // The driver connects lazily, so none of these tests needs a server as
    // long as the request is rejected before any collection is touched.
    async fn state(public_dir: &TempDir) -> AppState {
        let client = Client::with_uri_str("mongodb://127.0.0.1:27017").await.unwrap();
        AppState {
            database: client.database("backoffice_test"),
            images: ImageStore::new(public_dir.path()),
            jwt: Arc::new(JwtKeys::new("test-access", "test-refresh")),
        }
    }

    fn bearer(state: &AppState) -> (header::HeaderName, String) {
        let pair = state.jwt.issue("65a0c0ffee0000000000beef", "ops@example.com").unwrap();
        (header::AUTHORIZATION, format!("Bearer {}", pair.token))
    }

    fn status_of(result: Result<ServiceResponse, Error>) -> StatusCode {
        match result {
            Ok(res) => res.status(),
            Err(err) => err.as_response_error().status_code(),
        }
    }

    fn multipart_body(product_id: Option<&str>, file: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(id) = product_id {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"productId\"\r\n\r\n{id}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(state: &AppState, body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/upload")
            .insert_header(bearer(state))
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(body)
    }

    macro_rules! app {
        ($state:expr) => {{
            let state = $state.clone();
            let keys = state.jwt.clone();
            test::init_service(
                App::new()
                    .app_data(web::Data::new(state))
                    .configure(move |cfg| configure_routes(cfg, keys.clone())),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn health_needs_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[actix_web::test]
    async fn entity_routes_require_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        for uri in ["/api/categories", "/api/products", "/api/promotions", "/api/orders"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            assert_eq!(status_of(app.call(req).await), StatusCode::UNAUTHORIZED, "{uri}");
        }

        let req = test::TestRequest::get()
            .uri("/api/orders")
            .insert_header((header::AUTHORIZATION, "Bearer forged.token.value"))
            .to_request();
        assert_eq!(status_of(app.call(req).await), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn rejected_tokens_get_a_json_message() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/products").to_request();
        let err = match app.call(req).await {
            Ok(res) => panic!("expected a rejection, got {}", res.status()),
            Err(err) => err,
        };
        let res = err.error_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let bytes = actix_web::body::to_bytes(res.into_body()).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Missing or malformed bearer token");
    }

    #[actix_web::test]
    async fn session_echoes_token_claims() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/session")
            .insert_header(bearer(&state))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["email"], "ops@example.com");
        assert_eq!(body["id"], "65a0c0ffee0000000000beef");
    }

    #[actix_web::test]
    async fn orders_and_customers_are_served() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/orders")
            .insert_header(bearer(&state))
            .to_request();
        let orders: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(orders.as_array().unwrap().len(), 8);
        assert!(orders[0]["customer"]["email"].is_string());

        let req = test::TestRequest::get()
            .uri("/api/customers")
            .insert_header(bearer(&state))
            .to_request();
        let customers: Value = test::call_and_read_body_json(&app, req).await;
        assert!(customers[0].get("totalSpent").is_some());
    }

    #[actix_web::test]
    async fn invalid_bodies_and_ids_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let cases = vec![
            test::TestRequest::post()
                .uri("/api/products")
                .set_json(json!({ "name": "Turmeric", "price": 9.99, "stock": -1 })),
            test::TestRequest::post()
                .uri("/api/categories")
                .set_json(json!({ "name": "   " })),
            test::TestRequest::post()
                .uri("/api/promotions")
                .set_json(json!({ "code": "X", "type": "Buy One Get One" })),
            test::TestRequest::get().uri("/api/products?categoryId=spices"),
            test::TestRequest::get().uri("/api/categories/not-an-id"),
            test::TestRequest::delete().uri("/api/categories/,,"),
            test::TestRequest::delete()
                .uri("/api/products/bulk-delete")
                .set_json(json!({ "ids": [] })),
            test::TestRequest::delete()
                .uri("/api/promotions/bulk-delete")
                .set_json(json!({ "ids": ["nope"] })),
            test::TestRequest::put()
                .uri("/api/products/123")
                .set_json(json!({ "name": "Turmeric", "price": 1.0, "stock": 1 })),
        ];

        for case in cases {
            let req = case.insert_header(bearer(&state)).to_request();
            let uri = req.uri().to_string();
            assert_eq!(status_of(app.call(req).await), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[actix_web::test]
    async fn upload_stores_file_under_a_staging_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let body = multipart_body(Some("1718000000000"), Some(("leaf.png", b"\x89PNG")));
        let req = upload_request(&state, body).to_request();
        let res: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(res["success"], true);
        let url = res["imageUrl"].as_str().unwrap();
        assert!(url.starts_with("/uploads/products/temp-1718000000000/"));
        assert!(url.ends_with("_leaf.png"));

        let file_name = url.rsplit('/').next().unwrap();
        let stored = state.images.owner_dir("temp-1718000000000").join(file_name);
        assert_eq!(std::fs::read(stored).unwrap(), b"\x89PNG");
    }

    #[actix_web::test]
    async fn upload_rejects_a_seventh_image() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let owner_dir = state.images.owner_dir("temp-99");
        std::fs::create_dir_all(&owner_dir).unwrap();
        for i in 0..6 {
            std::fs::write(owner_dir.join(format!("{i}.jpg")), b"x").unwrap();
        }

        let body = multipart_body(Some("temp-99"), Some(("seven.jpg", b"x")));
        let res = test::call_service(&app, upload_request(&state, body).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let json: Value = test::read_body_json(res).await;
        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().unwrap().contains("at most 6"));
        assert_eq!(std::fs::read_dir(&owner_dir).unwrap().count(), 6);
    }

    #[actix_web::test]
    async fn upload_requires_file_and_product_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = app!(state);

        let missing_file = multipart_body(Some("temp-1"), None);
        let res = test::call_service(&app, upload_request(&state, missing_file).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let missing_id = multipart_body(None, Some(("a.png", b"x")));
        let res = test::call_service(&app, upload_request(&state, missing_id).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let traversal = multipart_body(Some("../escape"), Some(("a.png", b"x")));
        let res = test::call_service(&app, upload_request(&state, traversal).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
