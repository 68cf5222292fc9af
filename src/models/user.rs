use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::id_string;

pub const COLLECTION: &str = "users";

/// Stored user. `password` holds the bcrypt hash, never the plain text.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: id_string(&user.id),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}
