//! # Communications interface crate.
//!
//! Provides the command link protocol shared by the sensor client and the motor controller.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command definitions, parsing and rendering
pub mod cmd;

/// Splitting of the byte stream into messages
pub mod framer;

/// Network module
pub mod net;
