//! Domain library for the Fonds Prévention Argile service.
//!
//! The citizen journey (`parcours`), the AMO validation workflow and the
//! encrypted hand-off of simulator answers live under [`workflows`]; the
//! surrounding modules carry configuration, telemetry and access control.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
