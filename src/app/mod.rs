pub mod adb;
pub mod automator;
pub mod batch_file;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod models;
pub mod navigator;
pub mod profile;
pub mod publisher;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
