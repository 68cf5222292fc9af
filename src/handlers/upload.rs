use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, ResponseError};
use futures::TryStreamExt;
use serde_json::json;
use tracing::{debug, error, info};

use crate::{
    error::{AppError, Result},
    images::upload_owner,
    state::AppState,
};

struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    product_id: Option<String>,
}

async fn read_form(mut payload: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm {
        file: None,
        product_id: None,
    };

    while let Some(mut field) = payload.try_next().await? {
        let (name, file_name) = {
            let disposition = field.content_disposition();
            (
                disposition.get_name().unwrap_or_default().to_string(),
                disposition.get_filename().map(str::to_string),
            )
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            bytes.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "file" => form.file = Some((file_name.unwrap_or_default(), bytes)),
            "productId" => {
                let value = String::from_utf8(bytes)
                    .map_err(|_| AppError::Validation("Product ID must be text.".to_string()))?;
                form.product_id = Some(value);
            }
            other => debug!(field = other, "Ignoring multipart field"),
        }
    }

    Ok(form)
}

async fn store_upload(state: &AppState, payload: Multipart) -> Result<String> {
    let form = read_form(payload).await?;

    let (file_name, bytes) = form
        .file
        .ok_or_else(|| AppError::Validation("No file received.".to_string()))?;
    let product_id = form
        .product_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Product ID is required.".to_string()))?;

    let owner = upload_owner(&product_id)?;
    state.images.save_upload(&owner, &file_name, &bytes).await
}

/// `POST /api/upload`. Replies `{success, imageUrl, message}` on success and
/// `{success: false, message}` otherwise.
pub async fn upload_image(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    match store_upload(&state, payload).await {
        Ok(image_url) => {
            info!(url = %image_url, "File uploaded");
            HttpResponse::Ok().json(json!({
                "success": true,
                "imageUrl": image_url,
                "message": "File uploaded successfully.",
            }))
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                error!("Upload error: {}", e);
            } else {
                debug!("Upload rejected: {}", e);
            }
            HttpResponse::build(status).json(json!({
                "success": false,
                "message": e.public_message(),
            }))
        }
    }
}
