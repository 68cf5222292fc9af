use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection,
};
use tracing::{debug, info};
use validator::Validate;

use crate::{
    error::{AppError, Result},
    models::{
        category::{self, Category, CategoryRequest, CategoryResponse},
        parse_object_id, parse_object_ids, DeleteSummary,
    },
    state::AppState,
};

fn collection(state: &AppState) -> Collection<Category> {
    state.database.collection(category::COLLECTION)
}

/// Splits a `DELETE /categories/{id}` path segment, which may carry a
/// comma-joined batch of ids.
pub fn split_id_list(raw: &str) -> Result<Vec<ObjectId>> {
    let ids: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(AppError::Validation("At least one category ID is required".to_string()));
    }
    parse_object_ids(&ids)
}

fn update_document(request: &CategoryRequest, now: DateTime) -> Document {
    let mut update = doc! {
        "$set": {
            "name": request.name.trim(),
            "updatedAt": now,
        }
    };
    match request.description() {
        Some(description) => {
            if let Ok(set) = update.get_document_mut("$set") {
                set.insert("description", description);
            }
        }
        None => {
            update.insert("$unset", doc! { "description": "" });
        }
    }
    update
}

pub async fn list_categories(state: web::Data<AppState>) -> Result<HttpResponse> {
    debug!("Fetching categories");

    let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
    let categories: Vec<Category> = collection(&state)
        .find(None, options)
        .await?
        .try_collect()
        .await?;

    info!("Retrieved {} categories", categories.len());
    let body: Vec<CategoryResponse> = categories.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

pub async fn create_category(
    state: web::Data<AppState>,
    body: web::Json<CategoryRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    request.validate()?;
    debug!("Creating category: {:?}", request);

    let mut category = request.into_category(DateTime::now());
    let result = collection(&state).insert_one(&category, None).await?;
    category.id = result.inserted_id.as_object_id();

    info!("Category created with ID: {}", result.inserted_id);
    Ok(HttpResponse::Created().json(CategoryResponse::from(category)))
}

pub async fn get_category(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;
    debug!("Fetching category with ID: {}", id);

    let category = collection(&state)
        .find_one(doc! { "_id": object_id }, None)
        .await?
        .ok_or_else(|| AppError::NotFound("Category not found".to_string()))?;

    Ok(HttpResponse::Ok().json(CategoryResponse::from(category)))
}

pub async fn update_category(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<CategoryRequest>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;
    let request = body.into_inner();
    request.validate()?;
    debug!("Updating category {}: {:?}", id, request);

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let updated = collection(&state)
        .find_one_and_update(
            doc! { "_id": object_id },
            update_document(&request, DateTime::now()),
            options,
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Category not found".to_string()))?;

    info!("Category updated: {}", id);
    Ok(HttpResponse::Ok().json(CategoryResponse::from(updated)))
}

pub async fn delete_category(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let ids = split_id_list(&id)?;
    debug!("Deleting categories: {:?}", ids);

    let collection = collection(&state);
    let result = match ids.as_slice() {
        [single] => collection.delete_one(doc! { "_id": *single }, None).await?,
        batch => collection.delete_many(doc! { "_id": { "$in": batch } }, None).await?,
    };

    if result.deleted_count == 0 {
        debug!("No categories matched for deletion: {}", id);
        return Err(AppError::NotFound("Category not found".to_string()));
    }

    info!("Deleted {} categories", result.deleted_count);
    Ok(HttpResponse::Ok().json(DeleteSummary::new("categories", result.deleted_count)))
}
