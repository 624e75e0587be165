pub mod abi;
pub mod config;
pub mod contract_resolver;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod event_decoder;
pub mod node;
pub mod reconnect;
pub mod repository;
pub mod sender;
pub mod service;
pub mod slack;
pub mod types;
pub mod validation;
pub mod web_api;
pub mod worker;
