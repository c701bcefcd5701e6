pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod platform;
pub mod probe;
pub mod project;
pub mod runtime;
pub mod ui;
