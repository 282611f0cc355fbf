//! Common utilities

pub mod cancel;

pub use cancel::CancellationToken;
