pub mod api;
pub mod app;
pub mod auth;
pub mod capture;
pub mod cli;
pub mod config;
pub mod exam;
pub mod global;
pub mod media;
