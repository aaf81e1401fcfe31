//! Core types and trait definitions for Polichat.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the persona and debate domain, the text heuristics the debate view relies
//! on (bubbles, typing, tension, fact highlighting), and the
//! [`store::PolichatStore`] abstraction every backend implements.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod bubble;
pub mod debate;
pub mod error;
pub mod intimacy;
pub mod issue;
pub mod memory;
pub mod message;
pub mod persona;
pub mod queue;
pub mod store;
pub mod tension;
pub mod typing;

pub use error::{Error, Result};
