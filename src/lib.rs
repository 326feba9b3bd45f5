pub mod commands;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod keys;
pub mod parser;
pub mod pubsub;
pub mod redis_store;
pub mod report;
pub mod runner;
pub mod serializer;
pub mod service;
pub mod store;
