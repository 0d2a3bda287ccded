pub mod actor;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod protocol;
pub mod session;
