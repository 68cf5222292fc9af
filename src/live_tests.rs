//! End-to-end checks against a real MongoDB server.
//!
//! Ignored by default. Run with `cargo test -- --ignored` and `MONGODB_URI`
//! pointing at a disposable server; each test creates and drops its own
//! database.

use std::sync::Arc;

use actix_web::{
    http::{header, StatusCode},
    test, web, App,
};
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::CreateCollectionOptions,
    Client,
};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::{
    auth::JwtKeys,
    images::{image_url, ImageStore},
    models::{product, promotion},
    reconcile::reconcile_staged_images,
    routes::configure_routes,
    state::AppState,
};

const BOUNDARY: &str = "----backoffice-live-boundary";

struct LiveDb {
    state: AppState,
    _public_dir: TempDir,
}

impl LiveDb {
    async fn new() -> Self {
        let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://127.0.0.1:27017".to_string());
        let client = Client::with_uri_str(&uri).await.expect("mongodb client");
        let public_dir = tempfile::tempdir().expect("temp dir");
        let state = AppState {
            database: client.database(&format!("backoffice_live_{}", ObjectId::new().to_hex())),
            images: ImageStore::new(public_dir.path()),
            jwt: Arc::new(JwtKeys::new("live-access", "live-refresh")),
        };
        LiveDb {
            state,
            _public_dir: public_dir,
        }
    }

    fn bearer(&self) -> (header::HeaderName, String) {
        let pair = self.state.jwt.issue("65a0c0ffee0000000000beef", "ops@example.com").unwrap();
        (header::AUTHORIZATION, format!("Bearer {}", pair.token))
    }

    fn products(&self) -> mongodb::Collection<Document> {
        self.state.database.collection(product::COLLECTION)
    }

    async fn cleanup(self) {
        self.state.database.drop(None).await.expect("drop test database");
    }
}

macro_rules! live_app {
    ($db:expr) => {{
        let state = $db.state.clone();
        let keys = state.jwt.clone();
        test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(move |cfg| configure_routes(cfg, keys.clone())),
        )
        .await
    }};
}

/// Calls the app with the test bearer token and returns the status and the
/// JSON body (`null` when empty).
macro_rules! send {
    ($app:expr, $db:expr, $req:expr $(,)?) => {{
        let res = test::call_service($app, $req.insert_header($db.bearer()).to_request()).await;
        let status = res.status();
        let bytes = test::read_body(res).await;
        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }};
}

fn product_body(name: &str, stock: i64, category_id: Option<&str>, images: &[&str]) -> Value {
    json!({
        "name": name,
        "price": 9.99,
        "stock": stock,
        "description": "",
        "categoryId": category_id,
        "images": images,
    })
}

fn upload_body(product_id: &str, file_name: &str) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"productId\"\r\n\r\n{product_id}\r\n\
         --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: image/png\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(b"\x89PNG");
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(product_id: &str, file_name: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/upload")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(upload_body(product_id, file_name))
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn stock_zero_is_stored_out_of_stock_and_recomputed_on_update() {
    let db = LiveDb::new().await;
    let app = live_app!(db);

    let (status, created) = send!(
        &app,
        &db,
        test::TestRequest::post()
            .uri("/api/products")
            .set_json(product_body("Turmeric", 0, None, &[])),
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "out of stock");
    assert_eq!(created["categoryId"], Value::Null);

    let id = ObjectId::parse_str(created["id"].as_str().unwrap()).unwrap();
    let stored = db.products().find_one(doc! { "_id": id }, None).await.unwrap().unwrap();
    assert_eq!(stored.get_str("status").unwrap(), "out of stock");

    let (status, updated) = send!(
        &app,
        &db,
        test::TestRequest::put()
            .uri(&format!("/api/products/{}", id.to_hex()))
            .set_json(product_body("Turmeric", 60, None, &[])),
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "in stock");
    assert_eq!(updated["createdAt"], created["createdAt"]);

    db.cleanup().await;
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn bulk_delete_counts_only_existing_products() {
    let db = LiveDb::new().await;
    let app = live_app!(db);

    let mut ids = Vec::new();
    for name in ["Cumin", "Saffron"] {
        let (_, created) = send!(
            &app,
            &db,
            test::TestRequest::post()
                .uri("/api/products")
                .set_json(product_body(name, 10, None, &[])),
        );
        ids.push(created["id"].as_str().unwrap().to_string());
    }
    ids.push(ObjectId::new().to_hex());

    let (status, summary) = send!(
        &app,
        &db,
        test::TestRequest::delete()
            .uri("/api/products/bulk-delete")
            .set_json(json!({ "ids": ids })),
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["deletedCount"], 2);
    assert_eq!(db.products().count_documents(None, None).await.unwrap(), 0);

    db.cleanup().await;
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn deleting_missing_documents_is_not_found_and_changes_nothing() {
    let db = LiveDb::new().await;
    let app = live_app!(db);

    let (_, category) = send!(
        &app,
        &db,
        test::TestRequest::post()
            .uri("/api/categories")
            .set_json(json!({ "name": "Spices" })),
    );
    send!(
        &app,
        &db,
        test::TestRequest::post()
            .uri("/api/products")
            .set_json(product_body("Cumin", 5, None, &[])),
    );

    let missing = ObjectId::new().to_hex();
    let batch = format!("{},{}", ObjectId::new().to_hex(), ObjectId::new().to_hex());
    for uri in [
        format!("/api/categories/{missing}"),
        format!("/api/categories/{batch}"),
        format!("/api/products/{missing}"),
        format!("/api/promotions/{missing}"),
    ] {
        let (status, body) = send!(&app, &db, test::TestRequest::delete().uri(&uri));
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(body["message"].is_string(), "{uri}");
    }

    let (_, categories) = send!(&app, &db, test::TestRequest::get().uri("/api/categories"));
    assert_eq!(categories.as_array().unwrap().len(), 1);
    assert_eq!(categories[0]["id"], category["id"]);
    assert_eq!(db.products().count_documents(None, None).await.unwrap(), 1);

    db.cleanup().await;
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn category_filter_returns_only_matching_products() {
    let db = LiveDb::new().await;
    let app = live_app!(db);

    let mut category_ids = Vec::new();
    for name in ["Spices", "Teas"] {
        let (_, category) = send!(
            &app,
            &db,
            test::TestRequest::post()
                .uri("/api/categories")
                .set_json(json!({ "name": name })),
        );
        category_ids.push(category["id"].as_str().unwrap().to_string());
    }
    for (name, category_id) in [("Cumin", &category_ids[0]), ("Sencha", &category_ids[1])] {
        send!(
            &app,
            &db,
            test::TestRequest::post()
                .uri("/api/products")
                .set_json(product_body(name, 80, Some(category_id.as_str()), &[])),
        );
    }

    let (_, spices) = send!(
        &app,
        &db,
        test::TestRequest::get().uri(&format!("/api/products?categoryId={}", category_ids[0])),
    );
    let spices = spices.as_array().unwrap();
    assert_eq!(spices.len(), 1);
    assert_eq!(spices[0]["name"], "Cumin");
    assert_eq!(spices[0]["category"], json!({ "id": category_ids[0], "name": "Spices" }));

    for uri in ["/api/products?categoryId=all", "/api/products"] {
        let (_, all) = send!(&app, &db, test::TestRequest::get().uri(uri));
        assert_eq!(all.as_array().unwrap().len(), 2, "{uri}");
    }

    db.cleanup().await;
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn created_product_owns_its_uploaded_images() {
    let db = LiveDb::new().await;
    let app = live_app!(db);

    let (status, upload) = send!(&app, &db, upload_request("1718000000000", "leaf.png"));
    assert_eq!(status, StatusCode::OK);
    let staged_url = upload["imageUrl"].as_str().unwrap().to_string();
    assert!(staged_url.starts_with("/uploads/products/temp-1718000000000/"));

    let (status, created) = send!(
        &app,
        &db,
        test::TestRequest::post()
            .uri("/api/products")
            .set_json(product_body("Basil", 12, None, &[staged_url.as_str()])),
    );
    assert_eq!(status, StatusCode::CREATED);

    let id = created["id"].as_str().unwrap().to_string();
    let file_name = staged_url.rsplit('/').next().unwrap();
    let expected = image_url(&id, file_name);
    assert_eq!(created["images"], json!([expected]));

    let oid = ObjectId::parse_str(&id).unwrap();
    let stored = db.products().find_one(doc! { "_id": oid }, None).await.unwrap().unwrap();
    let stored_images = stored.get_array("images").unwrap();
    assert_eq!(stored_images.len(), 1);
    assert_eq!(stored_images[0].as_str(), Some(expected.as_str()));

    assert!(db.state.images.owner_dir(&id).join(file_name).exists());
    assert!(!db.state.images.owner_dir("temp-1718000000000").exists());

    db.cleanup().await;
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn deleting_a_product_keeps_images_it_borrowed() {
    let db = LiveDb::new().await;
    let app = live_app!(db);

    let (_, owner) = send!(
        &app,
        &db,
        test::TestRequest::post()
            .uri("/api/products")
            .set_json(product_body("Owner", 3, None, &[])),
    );
    let owner_id = owner["id"].as_str().unwrap().to_string();
    let (_, upload) = send!(&app, &db, upload_request(&owner_id, "mine.png"));
    let owned_url = upload["imageUrl"].as_str().unwrap().to_string();

    let (_, borrower) = send!(
        &app,
        &db,
        test::TestRequest::post()
            .uri("/api/products")
            .set_json(product_body("Borrower", 3, None, &[owned_url.as_str()])),
    );
    let borrower_id = borrower["id"].as_str().unwrap();

    let (status, _) = send!(
        &app,
        &db,
        test::TestRequest::delete().uri(&format!("/api/products/{borrower_id}")),
    );
    assert_eq!(status, StatusCode::NO_CONTENT);

    let file_name = owned_url.rsplit('/').next().unwrap();
    assert!(db.state.images.owner_dir(&owner_id).join(file_name).exists());

    db.cleanup().await;
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn starter_promotions_are_seeded_once() {
    let db = LiveDb::new().await;
    let app = live_app!(db);

    let (_, first) = send!(&app, &db, test::TestRequest::get().uri("/api/promotions"));
    let (_, second) = send!(&app, &db, test::TestRequest::get().uri("/api/promotions"));
    let codes = |rows: &Value| {
        let mut codes: Vec<String> = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["code"].as_str().unwrap().to_string())
            .collect();
        codes.sort();
        codes
    };
    assert_eq!(codes(&first), vec!["FALL20", "FREESHIP", "SUMMER10"]);
    assert_eq!(codes(&second), codes(&first));

    let promotions = db.state.database.collection::<Document>(promotion::COLLECTION);
    assert_eq!(promotions.count_documents(None, None).await.unwrap(), 3);

    let id = first[0]["id"].as_str().unwrap();
    let (status, _) = send!(
        &app,
        &db,
        test::TestRequest::delete().uri(&format!("/api/promotions/{id}")),
    );
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, after) = send!(&app, &db, test::TestRequest::get().uri("/api/promotions"));
    assert_eq!(after.as_array().unwrap().len(), 2);

    db.cleanup().await;
}

#[actix_web::test]
#[ignore = "needs a MongoDB server at MONGODB_URI"]
async fn reconciliation_continues_past_a_failed_write() {
    let db = LiveDb::new().await;

    // Rejects any write that leaves "Locked" without a staged image.
    let options = CreateCollectionOptions::builder()
        .validator(doc! {
            "$or": [
                { "name": { "$ne": "Locked" } },
                { "images": { "$regex": "^/uploads/products/temp-" } },
            ]
        })
        .build();
    db.state
        .database
        .create_collection(product::COLLECTION, options)
        .await
        .unwrap();

    let mut staged = Vec::new();
    for (owner, name) in [("temp-1", "Locked"), ("temp-2", "Free")] {
        let dir = db.state.images.owner_dir(owner);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("1_a.png"), b"img").unwrap();
        let url = image_url(owner, "1_a.png");
        let result = db
            .products()
            .insert_one(
                doc! {
                    "name": name,
                    "price": 1.0,
                    "stock": 5_i64,
                    "status": "low stock",
                    "description": "",
                    "images": [url.as_str()],
                    "categoryId": null,
                },
                None,
            )
            .await
            .unwrap();
        staged.push((name, result.inserted_id.as_object_id().unwrap()));
    }

    let settled = reconcile_staged_images(&db.state).await.unwrap();
    assert_eq!(settled, 1);

    let (_, free_id) = staged[1];
    let free = db.products().find_one(doc! { "_id": free_id }, None).await.unwrap().unwrap();
    let images = free.get_array("images").unwrap();
    assert_eq!(images[0].as_str(), Some(image_url(&free_id.to_hex(), "1_a.png").as_str()));

    db.cleanup().await;
}
