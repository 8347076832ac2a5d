// src/lib.rs

//! School announcement harvester library

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{AppError, Result};
pub use models::Config;
pub use pipeline::FetchOrchestrator;
