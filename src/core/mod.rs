pub mod etl;
pub mod fetcher;
pub mod pipeline;
pub mod publisher;
pub mod scheduler;
pub mod spreadsheet;
pub mod transform;

pub use crate::domain::model::{Document, RegistrationSet, RunResult};
pub use crate::domain::ports::{Clock, Pipeline, Storage};
pub use crate::utils::error::Result;
