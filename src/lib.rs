pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod messaging;
pub mod realtime;
pub mod security;
pub mod services;
pub mod video;

pub use error::Error;
