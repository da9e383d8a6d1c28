//! Identity extraction for connecting clients
//!
//! A connection is only accepted once an [`IdentityExtractor`] has produced a
//! [`UserIdentity`]. Strategies are tried in order through an
//! [`IdentityChain`]:
//!
//! - [`TrustedHeaderExtractor`]: a header set by an upstream gateway that has
//!   already authenticated the user. Left out when a JWT secret is configured,
//!   unless the header is explicitly trusted
//! - [`JwtExtractor`]: an HS256 token from `Authorization: Bearer` or the
//!   `token` query parameter, subject claim = user id
//! - [`DevQueryParamExtractor`]: the raw `userId` query parameter. Insecure,
//!   only installed when development mode is switched on
//!
//! An extractor returns `Ok(None)` when its input is absent so the next one
//! can try; it returns `Err` when input is present but unacceptable, which
//! stops the chain.

use crate::config::IdentityConfig;
use crate::core::error::{ConfigError, IdentityError};
use crate::core::identity::UserIdentity;
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, header::AUTHORIZATION};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an extractor may look at when a client connects
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
}

impl ConnectRequest {
    pub fn new(headers: HeaderMap, query: HashMap<String, String>) -> Self {
        Self { headers, query }
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Strategy for establishing who is connecting
#[async_trait]
pub trait IdentityExtractor: Send + Sync {
    /// `Ok(None)` when this strategy's input is absent
    async fn extract(&self, request: &ConnectRequest)
    -> Result<Option<UserIdentity>, IdentityError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Reads the identity from a header injected by a trusted upstream proxy
pub struct TrustedHeaderExtractor {
    header: HeaderName,
}

impl TrustedHeaderExtractor {
    pub fn new(header: &str) -> Result<Self, ConfigError> {
        let header =
            HeaderName::from_bytes(header.as_bytes()).map_err(|_| ConfigError::InvalidValue {
                key: "IDENTITY_HEADER",
                value: header.to_string(),
                expected: "a valid HTTP header name",
            })?;
        Ok(Self { header })
    }
}

#[async_trait]
impl IdentityExtractor for TrustedHeaderExtractor {
    async fn extract(
        &self,
        request: &ConnectRequest,
    ) -> Result<Option<UserIdentity>, IdentityError> {
        Ok(request.header_str(&self.header).and_then(UserIdentity::new))
    }

    fn name(&self) -> &'static str {
        "trusted-header"
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Verifies an HS256 token issued by the auth service
pub struct JwtExtractor {
    key: DecodingKey,
    validation: Validation,
}

impl JwtExtractor {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    fn token<'a>(request: &'a ConnectRequest) -> Option<&'a str> {
        request
            .header_str(&AUTHORIZATION)
            .and_then(|value| value.strip_prefix("Bearer "))
            .or_else(|| request.query.get("token").map(String::as_str))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[async_trait]
impl IdentityExtractor for JwtExtractor {
    async fn extract(
        &self,
        request: &ConnectRequest,
    ) -> Result<Option<UserIdentity>, IdentityError> {
        let Some(token) = Self::token(request) else {
            return Ok(None);
        };

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => IdentityError::ExpiredToken,
                kind => IdentityError::InvalidToken(format!("{:?}", kind)),
            }
        })?;

        UserIdentity::new(&data.claims.sub)
            .map(Some)
            .ok_or_else(|| IdentityError::InvalidToken("empty subject".to_string()))
    }

    fn name(&self) -> &'static str {
        "jwt"
    }
}

/// Trusts a client-supplied query parameter. Local development only.
pub struct DevQueryParamExtractor {
    param: String,
}

impl DevQueryParamExtractor {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

#[async_trait]
impl IdentityExtractor for DevQueryParamExtractor {
    async fn extract(
        &self,
        request: &ConnectRequest,
    ) -> Result<Option<UserIdentity>, IdentityError> {
        let identity = request.query.get(&self.param).and_then(UserIdentity::new);
        if let Some(user) = &identity {
            tracing::warn!(
                user_id = %user,
                param = %self.param,
                "Accepted unauthenticated identity from query parameter (development mode)"
            );
        }
        Ok(identity)
    }

    fn name(&self) -> &'static str {
        "dev-query-param"
    }
}

/// Ordered list of extractors; the first identity found wins
#[derive(Clone, Default)]
pub struct IdentityChain {
    extractors: Vec<Arc<dyn IdentityExtractor>>,
}

impl IdentityChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, extractor: impl IdentityExtractor + 'static) -> Self {
        self.extractors.push(Arc::new(extractor));
        self
    }

    /// Build the chain described by configuration
    ///
    /// Order: trusted header, JWT (when a secret is set), then the query
    /// parameter fallback when development mode is on. With a JWT secret the
    /// header is left out unless `trust_header` says otherwise.
    pub fn from_config(config: &IdentityConfig) -> Result<Self, ConfigError> {
        let mut chain = Self::new();

        if config.header_trusted() {
            chain = chain.with(TrustedHeaderExtractor::new(&config.header)?);
        }

        if let Some(secret) = &config.jwt_secret {
            chain = chain.with(JwtExtractor::new(secret.as_bytes()));
        }

        if config.dev_mode {
            tracing::warn!(
                param = %config.query_param,
                "Development mode: identity may be taken from an unauthenticated query parameter. \
                 Never enable this in production."
            );
            chain = chain.with(DevQueryParamExtractor::new(config.query_param.clone()));
        }

        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Resolve an identity or explain why none was accepted
    pub async fn resolve(&self, request: &ConnectRequest) -> Result<UserIdentity, IdentityError> {
        match self.extract(request).await? {
            Some(user) => Ok(user),
            None => Err(IdentityError::Missing),
        }
    }
}

#[async_trait]
impl IdentityExtractor for IdentityChain {
    async fn extract(
        &self,
        request: &ConnectRequest,
    ) -> Result<Option<UserIdentity>, IdentityError> {
        for extractor in &self.extractors {
            if let Some(user) = extractor.extract(request).await? {
                tracing::debug!(user_id = %user, extractor = extractor.name(), "Identity established");
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
