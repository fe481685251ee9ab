pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod git;
pub mod models;
pub mod paths;
pub mod repository;
pub mod services;
