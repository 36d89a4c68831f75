//! HTTP front end for the flock timeline engine

pub mod api;
pub mod handlers;
pub mod server;
pub mod state;
pub mod types;

pub use api::build_router;
pub use server::{shutdown_signal, FlockServer};
pub use state::AppState;
