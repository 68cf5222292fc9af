use mongodb::bson::{self, oid::ObjectId, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{category::CategorySummary, format_timestamp, id_string, not_blank, parse_optional_object_id};
use crate::error::Result;

pub const COLLECTION: &str = "products";

/// Stock-level label. Always derived from `stock`, never taken from a client.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ProductStatus {
    #[serde(rename = "in stock")]
    InStock,
    #[serde(rename = "low stock")]
    LowStock,
    #[serde(rename = "out of stock")]
    OutOfStock,
}

impl ProductStatus {
    /// Smallest stock level reported as `in stock`.
    pub const IN_STOCK_THRESHOLD: i64 = 50;

    pub fn from_stock(stock: i64) -> Self {
        if stock <= 0 {
            ProductStatus::OutOfStock
        } else if stock < Self::IN_STOCK_THRESHOLD {
            ProductStatus::LowStock
        } else {
            ProductStatus::InStock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::InStock => "in stock",
            ProductStatus::LowStock => "low stock",
            ProductStatus::OutOfStock => "out of stock",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub price: f64,
    pub stock: i64,
    pub status: ProductStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
    #[serde(default)]
    pub category_id: Option<ObjectId>,
}

impl Product {
    /// Splits a document produced by the category `$lookup` pipeline into the
    /// product and its resolved category, if any.
    pub fn from_joined(mut doc: Document) -> Result<(Product, Option<CategorySummary>)> {
        let category = match doc.remove("category") {
            Some(Bson::Document(category)) => Some(bson::from_document(category)?),
            _ => None,
        };
        let product = bson::from_document(doc)?;
        Ok((product, category))
    }
}

/// Body of both create and update.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    #[validate(length(min = 1, max = 200), custom = "not_blank")]
    pub name: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[validate(range(min = 0))]
    pub stock: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 6))]
    pub images: Vec<String>,
}

impl ProductRequest {
    pub fn category_id(&self) -> Result<Option<ObjectId>> {
        parse_optional_object_id(self.category_id.as_deref())
    }

    /// Image list with the empty slots a form leaves behind removed.
    pub fn images(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn status(&self) -> ProductStatus {
        ProductStatus::from_stock(self.stock)
    }

    pub fn into_product(self, now: DateTime) -> Result<Product> {
        let category_id = self.category_id()?;
        Ok(Product {
            id: None,
            status: self.status(),
            images: self.images(),
            name: self.name.trim().to_string(),
            price: self.price,
            stock: self.stock,
            description: self.description,
            created_at: Some(now),
            updated_at: Some(now),
            category_id,
        })
    }

    /// `$set` body for an update. `status` is recomputed here so no update
    /// path can leave it stale.
    pub fn update_document(&self, images: &[String], now: DateTime) -> Result<Document> {
        let category_id = match self.category_id()? {
            Some(oid) => Bson::ObjectId(oid),
            None => Bson::Null,
        };
        Ok(bson::doc! {
            "name": self.name.trim(),
            "description": &self.description,
            "price": self.price,
            "stock": self.stock,
            "status": self.status().as_str(),
            "images": images,
            "categoryId": category_id,
            "updatedAt": now,
        })
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub stock: i64,
    pub status: ProductStatus,
    pub description: String,
    pub images: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryRef>,
}

impl ProductResponse {
    pub fn with_category(product: Product, category: Option<CategorySummary>) -> Self {
        let mut response = ProductResponse::from(product);
        response.category = category.map(|c| CategoryRef {
            id: c.id.to_hex(),
            name: c.name,
        });
        response
    }
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        ProductResponse {
            id: id_string(&product.id),
            name: product.name,
            price: product.price,
            stock: product.stock,
            status: product.status,
            description: product.description,
            images: product.images,
            created_at: product.created_at.as_ref().map(format_timestamp),
            updated_at: product.updated_at.as_ref().map(format_timestamp),
            category_id: product.category_id.map(|oid| oid.to_hex()),
            category: None,
        }
    }
}
