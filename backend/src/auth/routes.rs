use actix_web::{web, HttpResponse, Result};
use log::error;
use serde_json::json;
use shared::{LoginRequest, RegisterRequest, RegisterResponse, TokenResponse, UserRole};

use super::jwt::JwtService;
use super::middleware::{AuthMiddleware, AuthenticatedUser};
use super::password;
use crate::db::gateway::{PersistenceError, UserStore};
use crate::db::models::{NewUser, User};
use crate::routes::error_body;

pub fn configure<S: UserStore + 'static>(
    cfg: &mut web::ServiceConfig,
    auth_middleware: AuthMiddleware,
) {
    cfg.service(web::resource("/auth/register").route(web::post().to(register::<S>)))
        .service(web::resource("/auth/login").route(web::post().to(login::<S>)))
        .service(
            web::scope("/auth")
                .wrap(auth_middleware)
                .route("/refresh", web::post().to(refresh::<S>))
                .route("/me", web::get().to(me::<S>))
                .route("/logout", web::post().to(logout)),
        );
}

fn token_response(jwt_service: &JwtService, user: &User) -> HttpResponse {
    match jwt_service.generate_token(user.id) {
        Ok(access_token) => HttpResponse::Ok().json(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            user_id: user.id.to_string(),
            username: user.username.clone(),
        }),
        Err(e) => {
            error!("Failed to issue token for {}: {}", user.id, e);
            HttpResponse::InternalServerError().json(error_body("Could not issue token"))
        }
    }
}

fn unauthorized(message: &str) -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header(("WWW-Authenticate", "Bearer"))
        .json(error_body(message))
}

/// Loads the token's user, rejecting unknown or deactivated accounts.
async fn active_user<S: UserStore>(users: &S, user: &AuthenticatedUser) -> Result<User, HttpResponse> {
    match users.get_user_by_id(user.0).await {
        Ok(Some(found)) if found.is_active => Ok(found),
        Ok(Some(_)) => Err(unauthorized("Inactive user")),
        Ok(None) => {
            log::warn!("Token refers to unknown user {}", user.0);
            Err(unauthorized("Could not validate credentials"))
        }
        Err(e) => {
            error!("Failed to fetch user {}: {}", user.0, e);
            Err(HttpResponse::InternalServerError().json(error_body("Failed to load user")))
        }
    }
}

pub async fn register<S: UserStore + 'static>(
    body: web::Json<RegisterRequest>,
    users: web::Data<S>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    if let Err(e) = password::validate_registration(&request) {
        return Ok(HttpResponse::BadRequest().json(error_body(e.to_string())));
    }

    let taken = async {
        if users.username_exists(&request.username).await? {
            return Ok(Some("Username already registered"));
        }
        if users.email_exists(&request.email).await? {
            return Ok(Some("Email already registered"));
        }
        Ok::<_, PersistenceError>(None)
    };
    match taken.await {
        Ok(Some(reason)) => return Ok(HttpResponse::BadRequest().json(error_body(reason))),
        Ok(None) => {}
        Err(e) => {
            error!("Registration lookup failed: {}", e);
            return Ok(HttpResponse::InternalServerError().json(error_body("Registration failed")));
        }
    }

    let plain = request.password.clone();
    let password_hash = match web::block(move || password::hash_password(&plain)).await? {
        Ok(hash) => hash,
        Err(e) => {
            error!("Password hashing failed: {}", e);
            return Ok(HttpResponse::InternalServerError().json(error_body("Registration failed")));
        }
    };

    let new_user = NewUser {
        username: request.username,
        email: request.email,
        password_hash,
        full_name: request.full_name,
        role: UserRole::User,
    };
    match users.create_user(&new_user).await {
        Ok(user) => Ok(HttpResponse::Ok().json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user_id: user.id.to_string(),
        })),
        Err(e) => {
            error!("Failed to create user {}: {}", new_user.username, e);
            Ok(HttpResponse::InternalServerError().json(error_body("Registration failed")))
        }
    }
}

pub async fn login<S: UserStore + 'static>(
    body: web::Json<LoginRequest>,
    users: web::Data<S>,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    let user = match users.get_user_by_login(&request.username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            log::info!("Login attempt for unknown account {}", request.username);
            return Ok(unauthorized("Incorrect username or password"));
        }
        Err(e) => {
            error!("Login lookup failed: {}", e);
            return Ok(HttpResponse::InternalServerError().json(error_body("Login failed")));
        }
    };

    let hash = user.password_hash.clone();
    let matches = web::block(move || password::verify_password(&request.password, &hash)).await?;
    if !matches {
        log::info!("Wrong password for {}", user.username);
        return Ok(unauthorized("Incorrect username or password"));
    }
    if !user.is_active {
        return Ok(unauthorized("Inactive user"));
    }

    if let Err(e) = users.update_last_login(user.id).await {
        log::warn!("Failed to update last login for {}: {}", user.id, e);
    }
    log::info!("User {} logged in", user.username);
    Ok(token_response(&jwt_service, &user))
}

pub async fn refresh<S: UserStore + 'static>(
    user: AuthenticatedUser,
    users: web::Data<S>,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse> {
    match active_user(users.get_ref(), &user).await {
        Ok(found) => Ok(token_response(&jwt_service, &found)),
        Err(response) => Ok(response),
    }
}

pub async fn me<S: UserStore + 'static>(
    user: AuthenticatedUser,
    users: web::Data<S>,
) -> Result<HttpResponse> {
    log::debug!("/auth/me called for user ID: {}", user.0);
    match active_user(users.get_ref(), &user).await {
        Ok(found) => Ok(HttpResponse::Ok().json(found.to_profile())),
        Err(response) => Ok(response),
    }
}

/// Tokens are stateless; the client discards its copy.
pub async fn logout(user: AuthenticatedUser) -> Result<HttpResponse> {
    log::info!("User {} logged out", user.0);
    Ok(HttpResponse::Ok().json(json!({ "message": "Successfully logged out" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryGateway;
    use actix_web::{http::StatusCode, test, App};
    use chrono::Utc;
    use shared::{ErrorResponse, UserProfile};
    use uuid::Uuid;

    const SECRET: &str = "auth-route-secret";

    macro_rules! app {
        ($gateway:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($gateway))
                    .app_data(web::Data::new(JwtService::new(SECRET, 30)))
                    .configure(|cfg| {
                        configure::<MemoryGateway>(cfg, AuthMiddleware::new(JwtService::new(SECRET, 30)))
                    }),
            )
            .await
        };
    }

    /// Low bcrypt cost keeps the tests fast; `verify` reads the cost from the hash.
    fn account(username: &str, email: &str, password: &str, is_active: bool) -> User {
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: bcrypt::hash(password, 4).unwrap(),
            full_name: None,
            role: UserRole::Farmer,
            is_active,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    fn bearer(user_id: Uuid) -> (&'static str, String) {
        let token = JwtService::new(SECRET, 30).generate_token(user_id).unwrap();
        ("Authorization", format!("Bearer {token}"))
    }

    fn registration(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: "secret123".to_string(),
            full_name: Some("Kim Farmer".to_string()),
        }
    }

    fn credentials(login: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: login.to_string(),
            password: password.to_string(),
        }
    }

    #[actix_web::test]
    async fn duplicate_username_is_rejected() {
        let gateway = MemoryGateway::new();
        gateway.insert_user(account("farmer1", "one@farm.kr", "secret123", true));
        let app = app!(gateway.clone());

        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(registration("farmer1", "other@farm.kr"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Username already registered");
        assert_eq!(gateway.users().len(), 1);
    }

    #[actix_web::test]
    async fn duplicate_email_is_rejected() {
        let gateway = MemoryGateway::new();
        gateway.insert_user(account("farmer1", "one@farm.kr", "secret123", true));
        let app = app!(gateway.clone());

        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(registration("farmer2", "one@farm.kr"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Email already registered");
    }

    #[actix_web::test]
    async fn invalid_registration_fields_are_rejected() {
        let app = app!(MemoryGateway::new());
        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(registration("no spaces", "one@farm.kr"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn login_accepts_email_and_issues_a_usable_token() {
        let gateway = MemoryGateway::new();
        let user = account("farmer1", "one@farm.kr", "secret123", true);
        let user_id = user.id;
        gateway.insert_user(user);
        let app = app!(gateway.clone());

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(credentials("one@farm.kr", "secret123"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let token: TokenResponse = test::read_body_json(resp).await;
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.username, "farmer1");
        assert_eq!(
            JwtService::new(SECRET, 30).user_id(&token.access_token).unwrap(),
            user_id
        );
        assert!(gateway.users()[0].last_login.is_some());

        let req = test::TestRequest::get()
            .uri("/auth/me")
            .insert_header(("Authorization", format!("Bearer {}", token.access_token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let profile: UserProfile = test::read_body_json(resp).await;
        assert_eq!(profile.email, "one@farm.kr");
        assert_eq!(profile.role, UserRole::Farmer);
    }

    #[actix_web::test]
    async fn wrong_password_is_unauthorized() {
        let gateway = MemoryGateway::new();
        gateway.insert_user(account("farmer1", "one@farm.kr", "secret123", true));
        let app = app!(gateway.clone());

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(credentials("farmer1", "wrong-guess"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get("WWW-Authenticate").unwrap(), "Bearer");
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Incorrect username or password");
        assert!(gateway.users()[0].last_login.is_none());
    }

    #[actix_web::test]
    async fn unknown_account_gets_the_same_answer_as_a_wrong_password() {
        let app = app!(MemoryGateway::new());
        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(credentials("nobody", "secret123"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Incorrect username or password");
    }

    #[actix_web::test]
    async fn inactive_user_cannot_log_in() {
        let gateway = MemoryGateway::new();
        gateway.insert_user(account("farmer1", "one@farm.kr", "secret123", false));
        let app = app!(gateway);

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(credentials("farmer1", "secret123"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Inactive user");
    }

    #[actix_web::test]
    async fn token_for_unknown_user_is_rejected_by_me_and_refresh() {
        let app = app!(MemoryGateway::new());
        let ghost = Uuid::new_v4();

        let req = test::TestRequest::get()
            .uri("/auth/me")
            .insert_header(bearer(ghost))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/auth/refresh")
            .insert_header(bearer(ghost))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Could not validate credentials");
    }

    #[actix_web::test]
    async fn refresh_returns_a_new_token_for_an_active_user() {
        let gateway = MemoryGateway::new();
        let user = account("farmer1", "one@farm.kr", "secret123", true);
        let user_id = user.id;
        gateway.insert_user(user);
        let app = app!(gateway);

        let req = test::TestRequest::post()
            .uri("/auth/refresh")
            .insert_header(bearer(user_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let token: TokenResponse = test::read_body_json(resp).await;
        assert_eq!(token.user_id, user_id.to_string());
    }

    #[actix_web::test]
    async fn me_requires_a_token() {
        let app = app!(MemoryGateway::new());
        let req = test::TestRequest::get().uri("/auth/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Not authenticated");
    }
}
