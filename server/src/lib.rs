//! Library surface for the coordination server, split out so the binary
//! entrypoint and the integration test suite can both drive the same
//! session handlers and shared state.

pub mod acceptor;
pub mod config;
pub mod container;
pub mod dispatcher;
pub mod drone_session;
pub mod error;
pub mod generator;
pub mod logfile;
pub mod observer_session;
pub mod protocol;
pub mod world;
