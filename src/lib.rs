pub mod cancel;
pub mod chat;
pub mod config;
pub mod error;
pub mod job;
pub mod orchestrate;
pub mod provider;
pub mod storage;
