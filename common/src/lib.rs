//! Common module for the project.
//! Contains the types shared by the server and its integration tests.

/// Represents a grid coordinate and Manhattan distance between coordinates.
pub mod coord;

/// Represents the state of a drone.
pub mod drone_state;

/// Represents the state of a survivor.
pub mod survivor_state;
