pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod intelligence;
pub mod metrics;
pub mod models;
pub mod services;
pub mod strategy;
