//! Library crate for hunt-coordinator, exposing modules for the binary and integration tests.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod relay;
pub mod routes;
pub mod services;
pub mod state;
