//! Crawlab MCP — OpenAPI operations exposed as LLM tools.
//!
//! Loads the Crawlab OpenAPI document, synthesizes one typed tool per
//! operation, and drives conversations against a pluggable LLM provider
//! that can call those tools.

pub mod agent;
pub mod config;
pub mod error;
pub mod openapi;
pub mod providers;
pub mod tools;
pub mod types;
