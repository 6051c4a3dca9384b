//! Per-packet decision engine for an Ethernet/IPv4/TCP load balancer.
//!
//! A frame from the client is hashed by its 4-tuple onto a backend slot and
//! rewritten towards that backend; any other TCP frame is rewritten back
//! towards the client. Everything else passes through untouched.

pub mod checksum;
pub mod directory;
mod engine;
mod error;
pub mod flow;
mod identity;
pub mod rewrite;
mod seqlock;
mod stats;
mod verdict;
pub mod wire;

pub use directory::{BackendDirectory, DEFAULT_CAPACITY};
pub use engine::{Engine, EngineConfig};
pub use error::CoreError;
pub use flow::{FourTuple, classify};
pub use identity::*;
pub use stats::{EngineStats, StatsSnapshot};
pub use verdict::{PassReason, Verdict};
pub use wire::TcpFrame;
