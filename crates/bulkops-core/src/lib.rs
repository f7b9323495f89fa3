pub mod action;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod io;
pub mod lock;
pub mod paths;
pub mod pool;
pub mod report;
pub mod request;
pub mod run;
pub mod session;
pub mod types;

pub use error::{BulkError, Result};
