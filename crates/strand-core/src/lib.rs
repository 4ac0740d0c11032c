pub mod calls;
pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod storage;
pub mod tools;
