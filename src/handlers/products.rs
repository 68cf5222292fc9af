use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, DateTime, Document},
    Collection,
};
use std::collections::HashSet;
use serde::Deserialize;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    error::{AppError, Result},
    images::is_staged_url,
    models::{
        category,
        parse_object_id, parse_object_ids,
        product::{self, Product, ProductRequest, ProductResponse},
        BulkDeleteRequest, DeleteSummary,
    },
    state::AppState,
};

fn collection(state: &AppState) -> Collection<Product> {
    state.database.collection(product::COLLECTION)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListQuery {
    pub category_id: Option<String>,
}

/// `None` (no filter) for a missing, empty or `all` category.
pub fn category_filter(raw: Option<&str>) -> Result<Option<ObjectId>> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(id) => parse_object_id(id).map(Some),
    }
}

/// Aggregation that embeds each product's category next to it.
pub fn joined_pipeline(filter: Document) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! {
            "$lookup": {
                "from": category::COLLECTION,
                "localField": "categoryId",
                "foreignField": "_id",
                "as": "category",
            }
        },
        doc! { "$unwind": { "path": "$category", "preserveNullAndEmptyArrays": true } },
        doc! { "$sort": { "createdAt": -1 } },
    ]
}

async fn fetch_joined(collection: &Collection<Product>, filter: Document) -> Result<Vec<ProductResponse>> {
    let documents: Vec<Document> = collection
        .aggregate(joined_pipeline(filter), None)
        .await?
        .try_collect()
        .await?;

    documents
        .into_iter()
        .map(|doc| -> Result<ProductResponse> {
            let (product, category) = Product::from_joined(doc)?;
            Ok(ProductResponse::with_category(product, category))
        })
        .collect()
}

/// Moves staged images of a stored product into its own directory and
/// writes the corrected list back. Returns the list now stored.
pub(crate) async fn settle_staged_images(
    state: &AppState,
    collection: &Collection<Product>,
    product_id: ObjectId,
    images: Vec<String>,
) -> Result<Vec<String>> {
    if !images.iter().any(|url| is_staged_url(url)) {
        return Ok(images);
    }

    let relocation = state.images.relocate(&product_id.to_hex(), &images).await;
    if relocation.pending > 0 {
        warn!(
            %product_id,
            pending = relocation.pending,
            "Some staged images could not be moved; reconciliation will retry"
        );
    }
    if relocation.images == images {
        return Ok(images);
    }

    collection
        .update_one(
            doc! { "_id": product_id },
            doc! { "$set": { "images": relocation.images.as_slice() } },
            None,
        )
        .await?;
    Ok(relocation.images)
}

/// Removes the image files of deleted products. Staged files that a
/// remaining product still lists are kept.
async fn remove_product_files(state: &AppState, collection: &Collection<Product>, products: &[Product]) {
    let staged: Vec<String> = products
        .iter()
        .flat_map(|product| product.images.iter())
        .filter(|url| is_staged_url(url))
        .cloned()
        .collect();
    let shared: HashSet<String> = if staged.is_empty() {
        HashSet::new()
    } else {
        match collection
            .distinct("images", doc! { "images": { "$in": staged.as_slice() } }, None)
            .await
        {
            Ok(urls) => urls
                .into_iter()
                .filter_map(|url| match url {
                    Bson::String(url) => Some(url),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                warn!("Could not check staged image references, keeping them: {}", e);
                staged.into_iter().collect()
            }
        }
    };

    for product in products {
        let Some(product_id) = product.id.map(|id| id.to_hex()) else {
            continue;
        };
        let images: Vec<String> = product
            .images
            .iter()
            .filter(|url| !shared.contains(url.as_str()))
            .cloned()
            .collect();
        state.images.remove_images(&product_id, &images).await;
        state.images.remove_owner_dir(&product_id).await;
    }
}

pub async fn list_products(
    state: web::Data<AppState>,
    query: web::Query<ProductListQuery>,
) -> Result<HttpResponse> {
    let filter = match category_filter(query.category_id.as_deref())? {
        Some(category_id) => doc! { "categoryId": category_id },
        None => doc! {},
    };
    debug!("Fetching products with filter {}", filter);

    let products = fetch_joined(&collection(&state), filter).await?;

    info!("Retrieved {} products", products.len());
    Ok(HttpResponse::Ok().json(products))
}

pub async fn get_product(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;
    debug!("Fetching product with ID: {}", id);

    let product = fetch_joined(&collection(&state), doc! { "_id": object_id })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    Ok(HttpResponse::Ok().json(product))
}

pub async fn create_product(
    state: web::Data<AppState>,
    body: web::Json<ProductRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    request.validate()?;
    debug!("Creating new product: {:?}", request);

    let collection = collection(&state);
    let mut product = request.into_product(DateTime::now())?;
    let result = collection.insert_one(&product, None).await?;
    let product_id = result
        .inserted_id
        .as_object_id()
        .ok_or_else(|| AppError::Internal(format!("Unexpected inserted id: {}", result.inserted_id)))?;
    product.id = Some(product_id);

    let images = std::mem::take(&mut product.images);
    product.images = settle_staged_images(&state, &collection, product_id, images).await?;

    info!(status = product.status.as_str(), "Product created successfully with ID: {}", product_id);
    Ok(HttpResponse::Created().json(ProductResponse::from(product)))
}

pub async fn update_product(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<ProductRequest>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;
    let request = body.into_inner();
    request.validate()?;
    debug!("Updating product {}: {:?}", id, request);

    let collection = collection(&state);
    let images = request.images();
    let update = request.update_document(&images, DateTime::now())?;
    let result = collection
        .update_one(doc! { "_id": object_id }, doc! { "$set": update }, None)
        .await?;

    if result.matched_count == 0 {
        debug!("Product not found for update: {}", id);
        return Err(AppError::NotFound("Product not found".to_string()));
    }
    settle_staged_images(&state, &collection, object_id, images).await?;

    let product = fetch_joined(&collection, doc! { "_id": object_id })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    info!("Product updated successfully: {}", id);
    Ok(HttpResponse::Ok().json(product))
}

pub async fn delete_product(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;
    debug!("Deleting product: {}", id);

    let collection = collection(&state);
    let product = collection
        .find_one(doc! { "_id": object_id }, None)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    let result = collection.delete_one(doc! { "_id": object_id }, None).await?;
    if result.deleted_count == 0 {
        debug!("Product vanished before deletion: {}", id);
        return Err(AppError::NotFound("Product not found".to_string()));
    }

    remove_product_files(&state, &collection, std::slice::from_ref(&product)).await;

    info!("Product deleted successfully: {}", id);
    Ok(HttpResponse::NoContent().finish())
}

pub async fn bulk_delete_products(
    state: web::Data<AppState>,
    body: web::Json<BulkDeleteRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    request.validate()?;
    let ids = parse_object_ids(&request.ids)?;
    debug!("Bulk deleting {} products", ids.len());

    let collection = collection(&state);
    let filter = doc! { "_id": { "$in": ids.as_slice() } };
    let doomed: Vec<Product> = collection.find(filter.clone(), None).await?.try_collect().await?;
    let result = collection.delete_many(filter, None).await?;

    remove_product_files(&state, &collection, &doomed).await;

    info!(requested = ids.len(), "Deleted {} products", result.deleted_count);
    Ok(HttpResponse::Ok().json(DeleteSummary::new("products", result.deleted_count)))
}
