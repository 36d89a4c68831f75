//! flock: the timeline fan-out engine of a small social network
//!
//! Users follow each other and post short messages. Each post is pushed at
//! write time into the timeline index of its author and of every follower;
//! reading a timeline resolves one window of that index into posts.
//!
//! All state lives in a remote key-value store reached through [`store`].

pub mod clock;
pub mod config;
pub mod error;
pub mod fanout;
pub mod graph;
pub mod identity;
pub mod keys;
pub mod logging;
pub mod models;
pub mod posts;
pub mod reader;
pub mod service;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{Entity, TimelineError, TimelineResult};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use models::{Post, PostId, User, UserId};
pub use reader::TimelinePage;
pub use service::TimelineService;
