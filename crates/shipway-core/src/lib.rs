pub mod backup;
pub mod config;
pub mod configure;
pub mod error;
pub mod health;
pub mod install;
pub mod io;
pub mod lock;
pub mod migrate;
pub mod paths;
pub mod pipeline;
pub mod retry;
pub mod rollback;
pub mod secrets;
pub mod service;
pub mod state;
pub mod validate;

pub use error::{Result, ShipwayError};
