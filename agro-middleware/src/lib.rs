pub mod broker;
pub mod config;
pub mod contracts;
pub mod controller;
pub mod error;
pub mod field;
pub mod health;
pub mod http;
pub mod middleware;
pub mod models;
pub mod ports;
pub mod replicas;
pub mod subsystems;
