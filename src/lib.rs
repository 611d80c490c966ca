pub mod classifier;
pub mod config;
pub mod error;
pub mod handlers;
pub mod imaging;
pub mod models;
