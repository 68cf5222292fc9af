use mongodb::bson::{self, oid::ObjectId, DateTime, Document};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{format_timestamp, id_string, not_blank};
use crate::error::Result;

pub const COLLECTION: &str = "promotions";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PromotionType {
    Percentage,
    #[serde(rename = "Fixed Amount")]
    FixedAmount,
    #[serde(rename = "Free Shipping")]
    FreeShipping,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromotionStatus {
    #[default]
    Active,
    Expired,
    Scheduled,
}

/// Start and end dates are display strings; they are stored as given.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: PromotionType,
    pub value: String,
    #[serde(default)]
    pub status: PromotionStatus,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
    #[validate(length(min = 1, max = 64), custom = "not_blank")]
    pub code: String,
    #[serde(rename = "type")]
    pub kind: PromotionType,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub value: String,
    pub status: Option<PromotionStatus>,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub start_date: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub end_date: String,
}

impl PromotionRequest {
    pub fn into_promotion(self, now: DateTime) -> Promotion {
        Promotion {
            id: None,
            code: self.code.trim().to_string(),
            kind: self.kind,
            value: self.value,
            status: self.status.unwrap_or_default(),
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: Some(now),
            updated_at: None,
        }
    }

    /// `$set` body for an update. Status is only touched when supplied.
    pub fn update_document(&self, now: DateTime) -> Result<Document> {
        let mut update = bson::doc! {
            "code": self.code.trim(),
            "type": bson::to_bson(&self.kind)?,
            "value": &self.value,
            "startDate": &self.start_date,
            "endDate": &self.end_date,
            "updatedAt": now,
        };
        if let Some(status) = self.status {
            update.insert("status", bson::to_bson(&status)?);
        }
        Ok(update)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionResponse {
    pub id: String,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: PromotionType,
    pub value: String,
    pub status: PromotionStatus,
    pub start_date: String,
    pub end_date: String,
    pub created_at: Option<String>,
}

impl From<Promotion> for PromotionResponse {
    fn from(promotion: Promotion) -> Self {
        PromotionResponse {
            id: id_string(&promotion.id),
            code: promotion.code,
            kind: promotion.kind,
            value: promotion.value,
            status: promotion.status,
            start_date: promotion.start_date,
            end_date: promotion.end_date,
            created_at: promotion.created_at.as_ref().map(format_timestamp),
        }
    }
}

/// Rows inserted the first time the promotions list is read from an empty
/// collection.
pub fn starter_promotions(now: DateTime) -> Vec<Promotion> {
    let row = |code: &str,
               kind: PromotionType,
               value: &str,
               status: PromotionStatus,
               start: &str,
               end: &str| Promotion {
        id: None,
        code: code.to_string(),
        kind,
        value: value.to_string(),
        status,
        start_date: start.to_string(),
        end_date: end.to_string(),
        created_at: Some(now),
        updated_at: None,
    };

    vec![
        row(
            "FALL20",
            PromotionType::Percentage,
            "20%",
            PromotionStatus::Active,
            "2023-09-01",
            "2023-11-30",
        ),
        row(
            "FREESHIP",
            PromotionType::FreeShipping,
            "N/A",
            PromotionStatus::Active,
            "2023-01-01",
            "2023-12-31",
        ),
        row(
            "SUMMER10",
            PromotionType::FixedAmount,
            "$10",
            PromotionStatus::Expired,
            "2023-06-01",
            "2023-08-31",
        ),
    ]
}
