//! Typed per-record Lua transforms
//!
//! [`script`] holds the header parser, declaration resolver, environment
//! builder and record executor. [`config`] stores the user's script folders.

pub mod config;
pub mod script;
