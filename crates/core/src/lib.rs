// crates/core/src/lib.rs
pub mod error;
pub mod paths;
pub mod registry;
pub mod rpc;
pub mod types;

pub use error::*;
pub use registry::Registry;
pub use rpc::{CallCodec, Reply, Request, Response, Service};
pub use types::*;
