use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, DateTime},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument, UpdateOptions},
    Collection,
};
use tracing::{debug, info};
use validator::Validate;

use crate::{
    error::{AppError, Result},
    models::{
        parse_object_id, parse_object_ids,
        promotion::{self, starter_promotions, Promotion, PromotionRequest, PromotionResponse},
        BulkDeleteRequest, DeleteSummary,
    },
    state::AppState,
};

fn collection(state: &AppState) -> Collection<Promotion> {
    state.database.collection(promotion::COLLECTION)
}

/// Fills an empty collection with the starter rows. Each row is upserted by
/// code, so two first reads racing each other still leave one copy.
async fn seed_promotions(collection: &Collection<Promotion>) -> Result<()> {
    if collection.count_documents(None, None).await? > 0 {
        return Ok(());
    }

    let upsert = UpdateOptions::builder().upsert(true).build();
    for row in starter_promotions(DateTime::now()) {
        let mut fields = bson::to_document(&row)?;
        fields.remove("code");
        collection
            .update_one(
                doc! { "code": &row.code },
                doc! { "$setOnInsert": fields },
                upsert.clone(),
            )
            .await?;
    }

    info!("Seeded starter promotions");
    Ok(())
}

pub async fn list_promotions(state: web::Data<AppState>) -> Result<HttpResponse> {
    let collection = collection(&state);
    seed_promotions(&collection).await?;
    debug!("Fetching promotions");

    let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
    let promotions: Vec<Promotion> = collection.find(None, options).await?.try_collect().await?;

    info!("Retrieved {} promotions", promotions.len());
    let body: Vec<PromotionResponse> = promotions.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

pub async fn create_promotion(
    state: web::Data<AppState>,
    body: web::Json<PromotionRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    request.validate()?;
    debug!("Creating promotion: {:?}", request);

    let mut promotion = request.into_promotion(DateTime::now());
    let result = collection(&state).insert_one(&promotion, None).await?;
    promotion.id = result.inserted_id.as_object_id();

    info!("Promotion created with ID: {}", result.inserted_id);
    Ok(HttpResponse::Created().json(PromotionResponse::from(promotion)))
}

pub async fn get_promotion(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;

    let promotion = collection(&state)
        .find_one(doc! { "_id": object_id }, None)
        .await?
        .ok_or_else(|| AppError::NotFound("Promotion not found".to_string()))?;

    Ok(HttpResponse::Ok().json(PromotionResponse::from(promotion)))
}

pub async fn update_promotion(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<PromotionRequest>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;
    let request = body.into_inner();
    request.validate()?;
    debug!("Updating promotion {}: {:?}", id, request);

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let updated = collection(&state)
        .find_one_and_update(
            doc! { "_id": object_id },
            doc! { "$set": request.update_document(DateTime::now())? },
            options,
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Promotion not found".to_string()))?;

    info!("Promotion updated: {}", id);
    Ok(HttpResponse::Ok().json(PromotionResponse::from(updated)))
}

pub async fn delete_promotion(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let object_id = parse_object_id(&id)?;

    let result = collection(&state)
        .delete_one(doc! { "_id": object_id }, None)
        .await?;
    if result.deleted_count == 0 {
        debug!("Promotion not found for deletion: {}", id);
        return Err(AppError::NotFound("Promotion not found".to_string()));
    }

    info!("Promotion deleted: {}", id);
    Ok(HttpResponse::NoContent().finish())
}

pub async fn bulk_delete_promotions(
    state: web::Data<AppState>,
    body: web::Json<BulkDeleteRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    request.validate()?;
    let ids = parse_object_ids(&request.ids)?;

    let result = collection(&state)
        .delete_many(doc! { "_id": { "$in": ids.as_slice() } }, None)
        .await?;

    info!(requested = ids.len(), "Deleted {} promotions", result.deleted_count);
    Ok(HttpResponse::Ok().json(DeleteSummary::new("promotions", result.deleted_count)))
}
