#![forbid(unsafe_code)]

pub mod acp;
pub mod config;
pub mod controller;
pub mod errors;
pub mod models;
pub mod supervisor;
pub mod validator;
pub mod workspace;

pub use config::{AdapterConfig, HostEnv};
pub use errors::{AppError, Result};
