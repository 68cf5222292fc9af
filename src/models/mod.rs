pub mod category;
pub mod product;
pub mod promotion;
pub mod sample;
pub mod user;

use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{AppError, Result};

/// Body of the `bulk-delete` endpoints.
#[derive(Debug, Deserialize, Validate)]
pub struct BulkDeleteRequest {
    #[validate(length(min = 1, message = "ids must be a non-empty array"))]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub message: String,
    pub deleted_count: u64,
}

impl DeleteSummary {
    pub fn new(entity: &str, deleted_count: u64) -> Self {
        DeleteSummary {
            message: format!("Deleted {} {}", deleted_count, entity),
            deleted_count,
        }
    }
}

pub fn parse_object_id(raw: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("Invalid ID format: {}", raw)))
}

pub fn parse_object_ids<S: AsRef<str>>(raw: &[S]) -> Result<Vec<ObjectId>> {
    raw.iter().map(|id| parse_object_id(id.as_ref())).collect()
}

/// Empty or missing references are stored as null rather than rejected.
pub fn parse_optional_object_id(raw: Option<&str>) -> Result<Option<ObjectId>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(id) => parse_object_id(id).map(Some),
    }
}

pub fn format_timestamp(value: &DateTime) -> String {
    value
        .try_to_rfc3339_string()
        .unwrap_or_else(|_| value.timestamp_millis().to_string())
}

pub fn id_string(id: &Option<ObjectId>) -> String {
    id.map(|oid| oid.to_hex()).unwrap_or_default()
}

pub(crate) fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}
