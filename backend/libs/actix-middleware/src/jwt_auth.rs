use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use crypto_core::jwt::JwtValidator;
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Authenticated caller, inserted into request extensions by [`JwtAuthMiddleware`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Resolves a bearer token into a user identity
pub trait IdentityProvider: Send + Sync {
    fn identify(&self, bearer_token: &str) -> Result<UserId, IdentityError>;
}

/// RS256 access-token identity provider backed by `crypto-core`
pub struct JwtIdentityProvider {
    validator: JwtValidator,
}

impl JwtIdentityProvider {
    pub fn new(validator: JwtValidator) -> Self {
        Self { validator }
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn identify(&self, bearer_token: &str) -> Result<UserId, IdentityError> {
        self.validator
            .user_id(bearer_token)
            .map(UserId)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))
    }
}

/// JWT Authentication Middleware
///
/// Resolves `Authorization: Bearer <token>` through the configured
/// [`IdentityProvider`] and stores the resulting [`UserId`] in request
/// extensions. Requests without a valid identity pass through untouched;
/// handlers that need a caller reject them through their extractor, which
/// keeps public routes and error rendering in the service.
#[derive(Clone)]
pub struct JwtAuthMiddleware {
    provider: Arc<dyn IdentityProvider>,
}

impl JwtAuthMiddleware {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
            provider: self.provider.clone(),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
    provider: Arc<dyn IdentityProvider>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        let token = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        if let Some(token) = token {
            match self.provider.identify(token) {
                Ok(user_id) => {
                    req.extensions_mut().insert(user_id);
                }
                Err(e) => {
                    tracing::warn!(path = %req.path(), "JWT validation failed: {}", e);
                }
            }
        }

        Box::pin(async move { service.call(req).await })
    }
}
