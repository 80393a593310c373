pub mod analytics;
pub mod api;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod covers;
pub mod error;
pub mod journal;
pub mod monitor;
pub mod paths;
pub mod schema;
pub mod service;
pub mod settings;
pub mod startup;
pub mod steam;
pub mod storage;
