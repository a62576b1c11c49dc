use actix_web::{HttpRequest, HttpResponse, http::StatusCode, web};
use chrono::Utc;
use serde::Deserialize;

use keyward::protocol::{CheckInRequest, CheckInResponse, UnavailableResponse};

use crate::admin::{self, AdminToken, LicenseParams};
use crate::db::DbPool;
use crate::engine::{CheckIn, VerificationEngine};
use crate::error::StoreError;
use crate::identity;

pub type Engine = VerificationEngine<DbPool>;

pub async fn pong() -> HttpResponse {
    HttpResponse::Ok().body("pong")
}

/// Check-in: validate a license binding and report update availability.
///
/// A negative verdict is a normal 200 answer with `Lizenzstatus: false`; only a
/// store failure yields 503, which clients should retry.
pub async fn verify(
    engine: web::Data<Engine>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let payload: CheckInRequest = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Failed to parse check-in request: {}", e);
            return HttpResponse::BadRequest().body("Invalid request format");
        }
    };

    let check_in = CheckIn {
        client_id: payload.client_id().to_string(),
        license_key: payload.license_key().to_string(),
        client_version: payload.client_version().map(str::to_string),
        hardware_id: payload.hardware_id().map(str::to_string),
        client_ip: identity::client_ip(&req, payload.client_ip()),
    };

    let engine = engine.into_inner();
    match web::block(move || engine.check_in(&check_in)).await {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(CheckInResponse::from(&outcome)),
        Ok(Err(_)) => unavailable(),
        Err(e) => {
            tracing::error!("Check-in worker failed: {:?}", e);
            unavailable()
        }
    }
}

/// Client-facing download redirect; counts the download.
pub async fn download_update(db: web::Data<DbPool>, path: web::Path<i32>) -> HttpResponse {
    let update_id = path.into_inner();
    let db = db.into_inner();

    match web::block(move || admin::record_download(&*db, update_id, Utc::now())).await {
        Ok(Ok(Some(url))) => HttpResponse::Found()
            .insert_header(("Location", url))
            .finish(),
        Ok(Ok(None)) => HttpResponse::NotFound().body("Unknown update"),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            tracing::error!("Download worker failed: {:?}", e);
            unavailable()
        }
    }
}

// ==================== ADMIN ====================

#[derive(Debug, Deserialize)]
pub struct UpdateParams {
    pub tool: String,
    pub version: String,
    pub update_url: String,
}

pub async fn admin_create_license(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        tracing::warn!("Rejected admin_create_license: missing or wrong admin token");
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let params: LicenseParams = if body.is_empty() {
        LicenseParams::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!("Failed to parse admin_create_license request: {}", e);
                return HttpResponse::BadRequest().body("Invalid request format");
            }
        }
    };

    let db = db.into_inner();
    respond(web::block(move || admin::issue_license(&*db, &params, Utc::now())).await, StatusCode::CREATED)
}

pub async fn admin_generate_license(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        tracing::warn!("Rejected admin_generate_license: missing or wrong admin token");
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let db = db.into_inner();
    respond(web::block(move || admin::generate_license(&*db, Utc::now())).await, StatusCode::CREATED)
}

pub async fn admin_list_licenses(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let db = db.into_inner();
    respond(web::block(move || admin::list_licenses(&*db)).await, StatusCode::OK)
}

pub async fn admin_remove_license(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        tracing::warn!("Rejected admin_remove_license: missing or wrong admin token");
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let license_id = path.into_inner();
    let db = db.into_inner();
    match web::block(move || admin::remove_license(&*db, license_id)).await {
        Ok(Ok(true)) => HttpResponse::Ok().json(serde_json::json!({"status": "removed"})),
        Ok(Ok(false)) => HttpResponse::NotFound().body("Unknown license"),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            tracing::error!("admin_remove_license worker failed: {:?}", e);
            unavailable()
        }
    }
}

pub async fn admin_edit_license(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Bytes,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        tracing::warn!("Rejected admin_edit_license: missing or wrong admin token");
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let params: LicenseParams = match serde_json::from_slice(&body) {
        Ok(params) => params,
        Err(e) => {
            tracing::warn!("Failed to parse admin_edit_license request: {}", e);
            return HttpResponse::BadRequest().body("Invalid request format");
        }
    };

    let license_id = path.into_inner();
    let db = db.into_inner();
    match web::block(move || admin::edit_license(&*db, license_id, &params)).await {
        Ok(Ok(Some(license))) => HttpResponse::Ok().json(license),
        Ok(Ok(None)) => HttpResponse::NotFound().body("Unknown license"),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            tracing::error!("admin_edit_license worker failed: {:?}", e);
            unavailable()
        }
    }
}

pub async fn admin_anomaly_log(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let license_id = path.into_inner();
    let db = db.into_inner();
    match web::block(move || admin::anomaly_log(&*db, license_id)).await {
        Ok(Ok(Some(entries))) => HttpResponse::Ok().json(entries),
        Ok(Ok(None)) => HttpResponse::NotFound().body("Unknown license"),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            tracing::error!("admin_anomaly_log worker failed: {:?}", e);
            unavailable()
        }
    }
}

pub async fn admin_acknowledge(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        tracing::warn!("Rejected admin_acknowledge: missing or wrong admin token");
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let license_id = path.into_inner();
    let db = db.into_inner();
    match web::block(move || admin::acknowledge_anomalies(&*db, license_id)).await {
        Ok(Ok(Some(report))) => HttpResponse::Ok().json(report),
        Ok(Ok(None)) => HttpResponse::NotFound().body("Unknown license"),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            tracing::error!("admin_acknowledge worker failed: {:?}", e);
            unavailable()
        }
    }
}

pub async fn admin_publish_update(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        tracing::warn!("Rejected admin_publish_update: missing or wrong admin token");
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let params: UpdateParams = match serde_json::from_slice(&body) {
        Ok(params) => params,
        Err(e) => {
            tracing::warn!("Failed to parse admin_publish_update request: {}", e);
            return HttpResponse::BadRequest().body("Invalid request format");
        }
    };
    if params.tool.is_empty() || params.version.is_empty() || params.update_url.is_empty() {
        return HttpResponse::BadRequest().body("tool, version and update_url required");
    }

    let db = db.into_inner();
    respond(
        web::block(move || admin::publish_update(&*db, &params.tool, &params.version, &params.update_url)).await,
        StatusCode::CREATED,
    )
}

pub async fn admin_list_updates(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let db = db.into_inner();
    respond(web::block(move || admin::list_updates(&*db)).await, StatusCode::OK)
}

pub async fn admin_delete_update(
    db: web::Data<DbPool>,
    admin_token: web::Data<AdminToken>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> HttpResponse {
    if !admin_token.authorize(&req) {
        tracing::warn!("Rejected admin_delete_update: missing or wrong admin token");
        return HttpResponse::Unauthorized().body("Admin privileges required");
    }

    let update_id = path.into_inner();
    let db = db.into_inner();
    match web::block(move || admin::delete_update(&*db, update_id)).await {
        Ok(Ok(true)) => HttpResponse::Ok().json(serde_json::json!({"status": "removed"})),
        Ok(Ok(false)) => HttpResponse::NotFound().body("Unknown update"),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            tracing::error!("admin_delete_update worker failed: {:?}", e);
            unavailable()
        }
    }
}

// ==================== RESPONSES ====================

fn respond<T: serde::Serialize>(
    result: Result<Result<T, StoreError>, actix_web::error::BlockingError>,
    status: StatusCode,
) -> HttpResponse {
    match result {
        Ok(Ok(value)) => HttpResponse::build(status).json(value),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            tracing::error!("Store worker failed: {:?}", e);
            unavailable()
        }
    }
}

fn store_failure(e: &StoreError) -> HttpResponse {
    e.log_store_event();
    if e.status_code() == 503 {
        return unavailable();
    }
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).body(e.to_string())
}

fn unavailable() -> HttpResponse {
    HttpResponse::ServiceUnavailable()
        .insert_header(("Retry-After", "1"))
        .json(UnavailableResponse {
            error: "verification temporarily unavailable".into(),
            retry: true,
        })
}
