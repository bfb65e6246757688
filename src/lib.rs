pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notifier;
pub mod services;
pub mod sorting;
pub mod state;
pub mod store;
