pub mod analytics;
pub mod app;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod marketplace;
pub mod storage;
pub mod tracking;
pub mod types;
