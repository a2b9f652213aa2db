pub mod agent;
pub mod chat;
pub mod cli;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod delegation;
pub mod error;
pub mod lifecycle;
pub mod markdown;
pub mod mcp;
pub mod model;
pub mod provider;
pub mod registry;
pub mod session;
pub mod specialist;
pub mod streaming;
pub mod theme;

#[cfg(test)]
mod tests;
