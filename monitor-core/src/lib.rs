pub mod auth;
pub mod authz;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod permission;
pub mod repository;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
