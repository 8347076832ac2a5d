// src/utils/mod.rs

//! Utility functions and helpers.

pub mod date;
pub mod http;
pub mod text;
pub mod url;
