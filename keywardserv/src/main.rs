use actix_web::{App, HttpServer, middleware::Logger};
use tracing::info;

use keyward::tls::load_rustls_config;
use keywardserv::config::ServerConfig;
use keywardserv::db;
use keywardserv::{AppState, configure_routes};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = ServerConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let _guard = keyward::logger::init_tracing(&config.log);

    let db_pool = db::init::init_db(&config).map_err(std::io::Error::other)?;
    db::init::run_migrations(&db_pool).map_err(std::io::Error::other)?;
    info!("✅ Database initialized at {}", config.database_url);

    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set, operator API is disabled");
    }

    let state = AppState::new(db_pool, &config);
    let addr = (config.bind_addr.clone(), config.port);

    let server = HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .configure(|cfg| state.register(cfg))
            .wrap(Logger::default())
            .service(configure_routes())
    });

    if config.use_tls {
        let tls = load_rustls_config(&config.tls_cert, &config.tls_key)
            .map_err(std::io::Error::other)?;
        info!("Server starting with TLS on https://{}:{}/", addr.0, addr.1);
        server.bind_rustls_0_23(addr, tls)?.run().await
    } else {
        info!("Server starting on http://{}:{}/", addr.0, addr.1);
        server.bind(addr)?.run().await
    }
}
