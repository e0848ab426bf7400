pub mod auth;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod rpc;
pub mod wal;
pub mod wire;
