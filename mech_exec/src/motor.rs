//! # Motor Module
//!
//! Defines the demanded state of the robot's motors and the [`Actuator`] interface through which
//! the dispatcher moves the hardware.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Interface to the motor and servo driver.
///
/// Implementations must apply each demand immediately. Any demand the driver can't carry out is
/// reported as an [`ActuatorFault`].
pub trait Actuator: Send {
    /// Set the demand of a single drive wheel.
    fn set_wheel(&mut self, side: WheelSide, demand: WheelDemand) -> Result<(), ActuatorFault>;

    /// Stop both drive wheels.
    fn stop_wheels(&mut self) -> Result<(), ActuatorFault>;

    /// Move the lifter.
    fn set_lifter(&mut self, position: LifterPosition) -> Result<(), ActuatorFault>;

    /// Stop every motor on the robot.
    ///
    /// The default only stops the wheels, drivers with other motors should override this.
    fn stop_all(&mut self) -> Result<(), ActuatorFault> {
        self.stop_wheels()
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The demanded state of the motors.
///
/// Only the dispatcher mutates this, everything else reads a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorState {
    /// True while either wheel has a non-stop demand.
    pub wheels_engaged: bool,

    /// Current demand of the left wheel, `None` when stopped.
    pub left_wheel: Option<WheelDemand>,

    /// Current demand of the right wheel, `None` when stopped.
    pub right_wheel: Option<WheelDemand>,

    pub lifter: LifterPosition,
}

/// Travel limits of the lifter servo.
///
/// Units: degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifterLimits {
    pub min_deg: u32,
    pub max_deg: u32,
}

/// An actuator which logs its demands instead of driving hardware.
///
/// Used when running without the motor board attached.
#[derive(Debug)]
pub struct SimActuator {
    limits: LifterLimits,

    outputs: MotorState,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WheelSide {
    Left,
    Right,
}

/// Demand on a single continuous-rotation drive wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WheelDemand {
    /// Full speed forwards.
    Forward,

    /// Full speed backwards.
    Reverse,

    /// Raw servo command, 90 is neutral.
    Rate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifterPosition {
    /// No demand has been sent since startup.
    Unset,
    Min,
    Max,

    /// Explicit target in degrees.
    Target(u32),
}

/// Faults reported by the actuator driver.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuatorFault {
    #[error("Lifter target {target} deg is outside the travel limits ({min}..={max} deg)")]
    OutOfRange { target: u32, min: u32, max: u32 },

    #[error("The driver rejected the demand: {0}")]
    Rejected(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MotorState {
    fn default() -> Self {
        Self {
            wheels_engaged: false,
            left_wheel: None,
            right_wheel: None,
            lifter: LifterPosition::Unset,
        }
    }
}

impl MotorState {
    /// Record a wheel demand.
    pub(crate) fn set_wheel(&mut self, side: WheelSide, demand: WheelDemand) {
        match side {
            WheelSide::Left => self.left_wheel = Some(demand),
            WheelSide::Right => self.right_wheel = Some(demand),
        }
        self.wheels_engaged = true;
    }

    /// Record that the wheels have been commanded to stop.
    pub(crate) fn stop_wheels(&mut self) {
        self.left_wheel = None;
        self.right_wheel = None;
        self.wheels_engaged = false;
    }
}

impl Default for LifterLimits {
    fn default() -> Self {
        Self {
            min_deg: 70,
            max_deg: 180,
        }
    }
}

impl SimActuator {
    pub fn new(limits: LifterLimits) -> Self {
        Self {
            limits,
            outputs: MotorState::default(),
        }
    }

    /// The demands the simulated driver is currently applying.
    pub fn outputs(&self) -> &MotorState {
        &self.outputs
    }
}

impl Actuator for SimActuator {
    fn set_wheel(&mut self, side: WheelSide, demand: WheelDemand) -> Result<(), ActuatorFault> {
        info!("[sim] {:?} wheel -> {:?}", side, demand);
        self.outputs.set_wheel(side, demand);
        Ok(())
    }

    fn stop_wheels(&mut self) -> Result<(), ActuatorFault> {
        info!("[sim] wheels stopped");
        self.outputs.stop_wheels();
        Ok(())
    }

    fn set_lifter(&mut self, position: LifterPosition) -> Result<(), ActuatorFault> {
        let deg = match position {
            LifterPosition::Unset => return Ok(()),
            LifterPosition::Min => self.limits.min_deg,
            LifterPosition::Max => self.limits.max_deg,
            LifterPosition::Target(t) => t,
        };

        if deg < self.limits.min_deg || deg > self.limits.max_deg {
            return Err(ActuatorFault::OutOfRange {
                target: deg,
                min: self.limits.min_deg,
                max: self.limits.max_deg,
            });
        }

        info!("[sim] lifter -> {:?} ({} deg)", position, deg);
        self.outputs.lifter = position;
        Ok(())
    }

    fn stop_all(&mut self) -> Result<(), ActuatorFault> {
        // The lifter servo holds its position when it stops
        info!("[sim] all motors stopped");
        self.outputs.stop_wheels();
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
