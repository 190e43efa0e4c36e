pub mod api;
pub mod config;
pub mod models;
pub mod realtime;
pub mod storage;
pub mod tracking;
