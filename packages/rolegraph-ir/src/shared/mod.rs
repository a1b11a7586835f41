//! Shared models and utilities.

pub mod models;
