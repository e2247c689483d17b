//! Modules shared between the `directory` and `node` binaries. Neither
//! library crate should depend on a signal handler — that belongs to the
//! process entrypoint, hence this thin third crate.

pub mod signals;
