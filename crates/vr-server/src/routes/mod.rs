//! Route handlers for the HTTP API.

pub mod health;
pub mod management;
pub mod stream;
pub mod tasks;
pub mod tools;
