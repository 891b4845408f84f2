pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod pool;
pub mod proto;
pub mod proxy;
pub mod service;
pub mod session;
pub mod sql;
pub mod status;
