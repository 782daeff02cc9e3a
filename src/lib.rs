pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{local::LocalStorage, webdav::WebDavStorage};
pub use config::AppConfig;
pub use core::{etl::EtlEngine, pipeline::SyncPipeline, scheduler::Scheduler};
pub use utils::error::{EtlError, Result};
