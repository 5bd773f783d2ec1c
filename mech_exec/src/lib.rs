//! # Mechanisms library.
//!
//! The motor controller side of the command link. Commands arrive over a [`link_server`] session,
//! are applied by the [`dispatcher`] on the [`mech_ctrl`] thread, and the [`watchdog`] makes sure
//! the wheels stop once every timed drive command has elapsed.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Dispatcher - applies commands to the actuator
pub mod dispatcher;

/// Link server - accepts control links and runs sessions over them
pub mod link_server;

/// Mechanisms control - the thread which owns the dispatcher
pub mod mech_ctrl;

/// Motor state and the actuator interface
pub mod motor;

/// Parameters for the mechanisms executable
pub mod params;

/// Drive watchdog - tracks outstanding timed drive commands
pub mod watchdog;
