#[macro_use]
extern crate tracing;

pub mod articles;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod polls;
pub mod posts;
pub mod sse;
pub mod startup;
pub mod store;
pub mod views;
pub mod visitor;
