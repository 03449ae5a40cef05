pub mod balance;
pub mod handlers;
pub mod models;
pub mod repository;
