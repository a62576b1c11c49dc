pub mod admin;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod store;

use actix_web::web;

use crate::admin::AdminToken;
use crate::config::ServerConfig;
use crate::db::DbPool;
use crate::handlers::Engine;

/// Shared application data, cloned into every worker.
#[derive(Clone)]
pub struct AppState {
    pub engine: web::Data<Engine>,
    pub db: web::Data<DbPool>,
    pub admin_token: web::Data<AdminToken>,
}

impl AppState {
    pub fn new(pool: DbPool, config: &ServerConfig) -> Self {
        AppState {
            engine: web::Data::new(Engine::new(pool.clone(), config.engine)),
            db: web::Data::new(pool),
            admin_token: web::Data::new(AdminToken::new(config.admin_token.clone())),
        }
    }

    /// Register the state on an app or service config.
    pub fn register(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(self.engine.clone())
            .app_data(self.db.clone())
            .app_data(self.admin_token.clone());
    }
}

pub fn configure_routes() -> impl actix_web::dev::HttpServiceFactory {
    web::scope("/api")
        .route("/health", web::get().to(handlers::pong))
        .route("/verify", web::post().to(handlers::verify))
        .route("/updates/{id}/download", web::get().to(handlers::download_update))
        .service(
            web::scope("/admin")
                .route("/licenses", web::get().to(handlers::admin_list_licenses))
                .route("/licenses", web::post().to(handlers::admin_create_license))
                .route("/licenses/generate", web::post().to(handlers::admin_generate_license))
                .route("/licenses/{id}", web::put().to(handlers::admin_edit_license))
                .route("/licenses/{id}", web::delete().to(handlers::admin_remove_license))
                .route("/licenses/{id}/anomalies", web::get().to(handlers::admin_anomaly_log))
                .route("/licenses/{id}/ack", web::post().to(handlers::admin_acknowledge))
                .route("/updates", web::get().to(handlers::admin_list_updates))
                .route("/updates", web::post().to(handlers::admin_publish_update))
                .route("/updates/{id}", web::delete().to(handlers::admin_delete_update)),
        )
}
