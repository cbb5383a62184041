pub mod auth;
pub mod chat;
pub mod extract;
pub mod health;
pub mod memory;
pub mod models;
pub mod problem;
pub mod projects;
pub mod sessions;
