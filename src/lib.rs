pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod face;
pub mod fetch;
pub mod index;
pub mod ingest;
mod metrics;
pub mod search;
pub mod server;
pub mod service;
pub mod status;
pub mod updater;
pub mod utils;

pub use config::Opts;
pub use error::{FaceError, ItemError};
pub use service::FaceService;
