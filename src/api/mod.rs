pub mod attribution;
pub mod experiments;
pub mod handlers;
pub mod realtime;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_api_router;
