pub mod account;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod marketplace;
pub mod notification;
pub mod order;
pub mod payment;
pub mod project;
pub mod review;
pub mod store;
pub mod types;
pub mod utils;
pub mod visibility;
