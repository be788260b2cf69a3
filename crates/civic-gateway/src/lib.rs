pub mod error;
pub mod handlers;
pub mod server;
pub mod users;

pub use error::ApiError;
pub use server::{build_router, open_store, start, GatewayState, ServerConfig, ServerHandle};
pub use users::UserRegistry;
