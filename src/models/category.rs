use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{format_timestamp, id_string, not_blank};

pub const COLLECTION: &str = "categories";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

/// Body of both create and update. There is deliberately no timestamp
/// field: `createdAt` is only ever set by the insert.
#[derive(Debug, Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 1, max = 120), custom = "not_blank")]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

impl CategoryRequest {
    pub fn description(&self) -> Option<String> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
    }

    pub fn into_category(self, now: DateTime) -> Category {
        Category {
            id: None,
            description: self.description(),
            name: self.name.trim().to_string(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl From<Category> for CategoryResponse {
    fn from(category: Category) -> Self {
        CategoryResponse {
            id: id_string(&category.id),
            name: category.name,
            description: category.description,
            created_at: category.created_at.as_ref().map(format_timestamp),
            updated_at: category.updated_at.as_ref().map(format_timestamp),
        }
    }
}

/// Reduced category embedded into product listings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CategorySummary {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
}
