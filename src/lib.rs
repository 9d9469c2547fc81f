pub mod backup;
pub mod config;
pub mod error;
pub mod install;
pub mod merge;
pub mod service;
pub mod snippet;
pub mod validate;
pub mod workflow;

pub use error::{InputError, ServiceError, Stage, UpdateError, ValidationError};
pub use workflow::{UpdateReport, UpdateState, Updater};
