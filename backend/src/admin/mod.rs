pub mod stats;

use actix_web::{web, HttpResponse, Result};
use chrono::Utc;
use serde_json::json;
use shared::UserRole;

use crate::auth::middleware::{AuthMiddleware, AuthenticatedUser};
use crate::db::gateway::{DashboardSource, UserStore};
use crate::routes::error_body;

pub fn configure<S>(cfg: &mut web::ServiceConfig, auth_middleware: AuthMiddleware)
where
    S: UserStore + DashboardSource + 'static,
{
    cfg.service(
        web::scope("/admin")
            .wrap(auth_middleware)
            .route("/dashboard/api", web::get().to(dashboard_api::<S>)),
    );
}

async fn dashboard_api<S>(user: AuthenticatedUser, db_repo: web::Data<S>) -> Result<HttpResponse>
where
    S: UserStore + DashboardSource + 'static,
{
    match db_repo.get_user_by_id(user.0).await {
        Ok(Some(admin)) if admin.is_active && admin.role == UserRole::Admin => {}
        Ok(_) => {
            log::warn!("User {} requested the admin dashboard without the ADMIN role", user.0);
            return Ok(HttpResponse::Forbidden().json(error_body("Admin privileges required")));
        }
        Err(e) => {
            log::error!("Failed to load user {}: {}", user.0, e);
            return Ok(HttpResponse::InternalServerError().json(error_body("Failed to load user")));
        }
    }

    let now = Utc::now();
    match db_repo.dashboard_counts(now).await {
        Ok(counts) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": stats::summarize(counts, now),
        }))),
        Err(e) => {
            log::error!("Failed to collect dashboard statistics: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "Failed to collect statistics",
            })))
        }
    }
}
