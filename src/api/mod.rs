// API module
//
// HTTP endpoints used by clients and by peer nodes

pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use routes::configure_routes;
