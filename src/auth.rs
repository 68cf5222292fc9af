use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderValue, AUTHORIZATION},
    web, Error, HttpMessage, HttpResponse,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ok, Ready as FutureReady};
use jsonwebtoken::{decode, encode, errors::Error as JwtError, DecodingKey, EncodingKey, Header, Validation};
use mongodb::{bson::doc, Collection};
use serde::{Deserialize, Serialize};
use std::{
    future::Future,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
};
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::{
    config::AdminSeed,
    error::{AppError, Result},
    models::user::{self, User, UserResponse},
    state::AppState,
};

const ACCESS_TOKEN_HOURS: i64 = 2;
const REFRESH_TOKEN_DAYS: i64 = 7;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// HMAC keys for session and refresh tokens.
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(access_secret: &str, refresh_secret: &str) -> Self {
        JwtKeys {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<TokenPair> {
        let now = Utc::now();

        let access_claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: (now + Duration::hours(ACCESS_TOKEN_HOURS)).timestamp(),
            iat: now.timestamp(),
        };
        let refresh_claims = Claims {
            exp: (now + Duration::days(REFRESH_TOKEN_DAYS)).timestamp(),
            ..access_claims.clone()
        };

        let token = encode(&Header::default(), &access_claims, &self.access_encoding)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;
        let refresh_token = encode(&Header::default(), &refresh_claims, &self.refresh_encoding)
            .map_err(|e| AppError::Internal(format!("Refresh token generation failed: {}", e)))?;

        Ok(TokenPair {
            token,
            refresh_token,
        })
    }

    pub fn verify_access(&self, token: &str) -> std::result::Result<Claims, JwtError> {
        Ok(decode::<Claims>(token, &self.access_decoding, &Validation::default())?.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> std::result::Result<Claims, JwtError> {
        Ok(decode::<Claims>(token, &self.refresh_decoding, &Validation::default())?.claims)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserResponse,
}

pub async fn sign_in(
    state: web::Data<AppState>,
    credentials: web::Json<SignInRequest>,
) -> Result<HttpResponse> {
    let credentials = credentials.into_inner();
    credentials
        .validate()
        .map_err(|_| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    let collection: Collection<User> = state.database.collection(user::COLLECTION);
    let user = collection
        .find_one(doc! { "email": &credentials.email }, None)
        .await?
        .ok_or_else(|| {
            debug!(email = %credentials.email, "Sign-in for unknown email");
            AppError::Unauthorized(INVALID_CREDENTIALS.to_string())
        })?;

    let password_hash = user.password.clone();
    let valid = web::block(move || verify(credentials.password, &password_hash))
        .await
        .map_err(|e| AppError::Internal(format!("Password verification was cancelled: {}", e)))?
        .map_err(|e| {
            error!("Password verification error: {}", e);
            AppError::Internal("Password verification failed".to_string())
        })?;
    if !valid {
        debug!(email = %user.email, "Sign-in with wrong password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    let response = UserResponse::from(&user);
    let tokens = state.jwt.issue(&response.id, &response.email)?;

    info!(user_id = %response.id, "User signed in");
    Ok(HttpResponse::Ok().json(SignInResponse {
        tokens,
        user: response,
    }))
}

pub async fn refresh_token(
    state: web::Data<AppState>,
    req: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse> {
    let claims = state.jwt.verify_refresh(&req.refresh_token).map_err(|e| {
        debug!("Refresh token rejected: {}", e);
        AppError::Unauthorized("Invalid refresh token".to_string())
    })?;

    let tokens = state.jwt.issue(&claims.sub, &claims.email)?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// Returns the claims of the bearer token the request was authorised with.
pub async fn current_session(claims: web::ReqData<Claims>) -> HttpResponse {
    let claims = claims.into_inner();
    HttpResponse::Ok().json(serde_json::json!({
        "id": claims.sub,
        "email": claims.email,
        "expiresAt": claims.exp,
    }))
}

/// Creates the configured admin account unless a user with that email exists.
pub async fn ensure_admin(state: &AppState, seed: &AdminSeed) -> Result<()> {
    let collection: Collection<User> = state.database.collection(user::COLLECTION);
    if collection
        .find_one(doc! { "email": &seed.email }, None)
        .await?
        .is_some()
    {
        debug!(email = %seed.email, "Admin user already present");
        return Ok(());
    }

    let password = seed.password.clone();
    let password_hash = web::block(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(format!("Password hashing was cancelled: {}", e)))?
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

    collection
        .insert_one(
            User {
                id: None,
                email: seed.email.clone(),
                name: seed.name.clone(),
                password: password_hash,
            },
            None,
        )
        .await?;

    info!(email = %seed.email, "Created admin user");
    Ok(())
}

pub fn extract_bearer_token(header: Option<&HeaderValue>) -> Option<&str> {
    header?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Rejects requests without a valid access token and stores the token's
/// [`Claims`] in the request extensions.
#[derive(Clone)]
pub struct AuthMiddleware {
    keys: Arc<JwtKeys>,
}

impl AuthMiddleware {
    pub fn new(keys: Arc<JwtKeys>) -> Self {
        AuthMiddleware { keys }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = FutureReady<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Rc::new(service),
            keys: self.keys.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    keys: Arc<JwtKeys>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(token) = extract_bearer_token(req.headers().get(AUTHORIZATION)) else {
            return Box::pin(async move {
                Err(AppError::Unauthorized("Missing or malformed bearer token".to_string()).into())
            });
        };

        match self.keys.verify_access(token) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
                let fut = self.service.call(req);
                Box::pin(fut)
            }
            Err(e) => {
                warn!(path = %req.path(), "Rejected token: {}", e);
                Box::pin(async move { Err(AppError::Unauthorized("Invalid token".to_string()).into()) })
            }
        }
    }
}
