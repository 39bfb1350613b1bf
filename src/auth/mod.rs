/*!
 * # Authentication and Authorization Module
 *
 * Bearer-token authentication for clinic staff. Tokens are HS256 JWTs issued
 * by the clinic identity service; each one names the clinic the caller acts
 * for and the staff roles they hold. Roles expand to `resource:action`
 * permissions through [`rbac`], and routes declare the permission they need
 * with [`AuthRouterExt::with_permission`].
 */

pub mod permissions;
pub mod rbac;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError};
use permissions::permission_matches;

/// JWT claims carried by clinic staff tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Staff member id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Explicit grants on top of what the roles carry
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Clinic the token acts for
    #[serde(default, alias = "tenant_id", skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<Uuid>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated caller, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    /// Effective permissions: explicit grants plus those of every role
    pub permissions: Vec<String>,
    pub clinic_id: Option<Uuid>,
    pub token_id: String,
}

impl AuthUser {
    fn from_claims(claims: Claims) -> Self {
        let mut effective: HashSet<String> = rbac::permissions_for_roles(&claims.roles);
        effective.extend(claims.permissions);
        let mut permissions: Vec<String> = effective.into_iter().collect();
        permissions.sort();

        Self {
            user_id: claims.sub,
            name: claims.name,
            roles: claims.roles,
            permissions,
            clinic_id: claims.clinic_id,
            token_id: claims.jti,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|granted| permission_matches(granted, permission))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }

    /// Clinic every pharmacy operation of this request is scoped to.
    pub fn clinic(&self) -> Result<Uuid, ServiceError> {
        self.clinic_id
            .ok_or_else(|| ServiceError::Forbidden("Token is not bound to a clinic".to_string()))
    }
}

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub token_ttl: Duration,
    /// Clock skew tolerated on `exp`/`nbf`, in seconds
    pub leeway: u64,
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            jwt_secret: cfg.jwt_secret.clone(),
            issuer: cfg.auth_issuer.clone(),
            audience: cfg.auth_audience.clone(),
            token_ttl: Duration::seconds(cfg.jwt_expiration as i64),
            leeway: 30,
        }
    }
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("Insufficient permissions: {0} required")]
    InsufficientPermissions(String),
    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientPermissions(_) => ServiceError::Forbidden(err.to_string()),
            AuthError::TokenCreation(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Issues and validates staff tokens.
#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("issuer", &self.config.issuer)
            .field("audience", &self.config.audience)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Builds claims for a staff member acting for `clinic_id`.
    pub fn claims_for(&self, user_id: &str, clinic_id: Option<Uuid>, roles: &[&str]) -> Claims {
        let now = Utc::now();
        Claims {
            sub: user_id.to_string(),
            name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: Vec::new(),
            clinic_id,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.config.token_ttl).timestamp(),
            nbf: now.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    pub fn issue_token(
        &self,
        user_id: &str,
        clinic_id: Option<Uuid>,
        roles: &[&str],
    ) -> Result<String, AuthError> {
        self.sign(&self.claims_for(user_id, clinic_id, roles))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = self.config.leeway;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidIssuer => AuthError::InvalidToken("wrong issuer".to_string()),
                ErrorKind::InvalidAudience => AuthError::InvalidToken("wrong audience".to_string()),
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        self.validate_token(token).map(AuthUser::from_claims)
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::InvalidToken("malformed Authorization header".to_string()))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::MissingCredentials),
    }
}

/// Authenticates the bearer token and stores the [`AuthUser`] in extensions.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            return ServiceError::InternalError("Authentication service not available".into())
                .into_response();
        }
    };

    let user = match bearer_token(request.headers()).and_then(|t| auth_service.authenticate(t)) {
        Ok(user) => user,
        Err(e) => {
            debug!(error = %e, "Rejected request credentials");
            return e.into_response();
        }
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Rejects callers lacking `permission`. Runs after [`auth_middleware`].
pub async fn permission_middleware(
    State(permission): State<String>,
    request: Request,
    next: Next,
) -> Response {
    let allowed = match request.extensions().get::<AuthUser>() {
        Some(user) => user.has_permission(&permission),
        None => return AuthError::MissingCredentials.into_response(),
    };

    if !allowed {
        if let Some(user) = request.extensions().get::<AuthUser>() {
            warn!(user_id = %user.user_id, %permission, "Permission denied");
        }
        return AuthError::InsufficientPermissions(permission).into_response();
    }

    next.run(request).await
}

/// Router helpers for protecting route groups.
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_permission(self, permission: &str) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_permission(self, permission: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission.to_string(),
            permission_middleware,
        ))
        .with_auth()
    }
}
