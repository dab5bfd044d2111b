use super::jwt::JwtService;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorUnauthorized,
    http::header::{HeaderMap, AUTHORIZATION},
    web, Error, HttpMessage, HttpResponse,
};
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ok, ready, Ready};
use shared::ErrorResponse;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// Rejects requests without a valid bearer token and stores the caller's
/// user id in the request extensions.
#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_service: Arc<JwtService>,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self {
            jwt_service: Arc::new(jwt_service),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Rc::new(service),
            jwt_service: self.jwt_service.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    jwt_service: Arc<JwtService>,
}

#[derive(Debug)]
enum AuthError {
    NoAuthHeader,
    InvalidHeaderFormat,
    NotBearerToken,
    VerificationFailed(String),
}

impl AuthError {
    fn log_message(&self, path: &str) -> String {
        match self {
            AuthError::NoAuthHeader => format!("No Authorization header found for path: {}", path),
            AuthError::InvalidHeaderFormat => {
                format!("Invalid Authorization header format (non-UTF-8) for path: {}", path)
            }
            AuthError::NotBearerToken => {
                format!("Authorization header for path {} doesn't start with 'Bearer '", path)
            }
            AuthError::VerificationFailed(e) => {
                format!("JWT token verification failed for path {}: {}", path, e)
            }
        }
    }

    fn client_error(&self) -> ErrorResponse {
        let error = match self {
            AuthError::VerificationFailed(_) => "Could not validate credentials",
            _ => "Not authenticated",
        };
        ErrorResponse {
            error: error.to_string(),
        }
    }
}

fn bearer_user(headers: &HeaderMap, jwt_service: &JwtService) -> Result<Uuid, AuthError> {
    let auth_header = headers.get(AUTHORIZATION).ok_or(AuthError::NoAuthHeader)?;
    let auth_str = auth_header.to_str().map_err(|_| AuthError::InvalidHeaderFormat)?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .or_else(|| auth_str.strip_prefix("bearer "))
        .ok_or(AuthError::NotBearerToken)?;

    jwt_service
        .user_id(token.trim())
        .map_err(|e| AuthError::VerificationFailed(e.to_string()))
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();

        Box::pin(async move {
            match bearer_user(req.headers(), &jwt_service) {
                Ok(user_id) => {
                    log::debug!("Authenticated user {} for {}", user_id, req.path());
                    req.extensions_mut().insert(user_id);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(auth_error) => {
                    log::warn!("{}", auth_error.log_message(req.path()));

                    let (http_req, _payload) = req.into_parts();
                    let response = HttpResponse::Unauthorized()
                        .insert_header(("WWW-Authenticate", "Bearer"))
                        .json(auth_error.client_error())
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}

/// Caller of a route wrapped in [`AuthMiddleware`].
pub struct AuthenticatedUser(pub Uuid);

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<Uuid>() {
            Some(user_id) => ok(AuthenticatedUser(*user_id)),
            None => {
                log::warn!("No authenticated user in request extensions for path: {}", req.path());
                ready(Err(ErrorUnauthorized("Not authenticated")))
            }
        }
    }
}

/// Caller of a public route that may carry a bearer token. A missing or
/// invalid token yields an anonymous caller.
pub struct OptionalUser(pub Option<Uuid>);

impl FromRequest for OptionalUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let Some(jwt_service) = req.app_data::<web::Data<JwtService>>() else {
            return ok(OptionalUser(None));
        };
        match bearer_user(req.headers(), jwt_service) {
            Ok(user_id) => ok(OptionalUser(Some(user_id))),
            Err(AuthError::NoAuthHeader) => ok(OptionalUser(None)),
            Err(e) => {
                log::debug!("{}; treating caller as anonymous", e.log_message(req.path()));
                ok(OptionalUser(None))
            }
        }
    }
}
