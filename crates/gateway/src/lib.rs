pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use server::{router, run_server};
pub use state::AppState;
