use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// Paths are unversioned because peers address each other with them directly.
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/block")
            .route(web::get().to(handlers::get_blocks))
            .route(web::post().to(handlers::add_block)),
    )
    .service(
        web::resource("/transaction")
            .route(web::get().to(handlers::get_transactions))
            .route(web::post().to(handlers::add_transaction)),
    )
    .service(
        web::resource("/node")
            .route(web::get().to(handlers::get_peers))
            .route(web::post().to(handlers::register_peer))
            .route(web::delete().to(handlers::unregister_peer)),
    )
    .route("/node/ip", web::get().to(handlers::get_caller_ip))
    .route("/balance/{address}", web::get().to(handlers::get_balance))
    .route("/balances", web::get().to(handlers::get_balances))
    .service(
        web::scope("/miner")
            .route("/start", web::post().to(handlers::start_miner))
            .route("/stop", web::post().to(handlers::stop_miner))
            .route("/restart", web::post().to(handlers::restart_miner)),
    );
}
