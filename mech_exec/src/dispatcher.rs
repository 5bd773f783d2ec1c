//! # Dispatcher
//!
//! Turns parsed commands into actuator demands and keeps the drive watchdog in step with the
//! wheels. The dispatcher is the single owner of the actuator, the motor state and the ticket set,
//! so every mutation of them goes through `&mut self`.
//!
//! The invariant upheld between calls is that the ticket set is empty if and only if the wheels
//! have been commanded to stop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::cmd::{Action, Command};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

use crate::{
    motor::{Actuator, ActuatorFault, LifterPosition, MotorState, WheelDemand, WheelSide},
    watchdog::{DriveCommandTicket, DriveWatchdog, TicketId},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Applies commands to the actuator.
pub struct Dispatcher<A> {
    actuator: A,

    motors: MotorState,

    watchdog: DriveWatchdog,
}

/// What a single dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub action: Action,

    /// Ticket armed for a timed action.
    pub ticket: Option<TicketId>,

    /// Number of outstanding tickets cancelled by a stop.
    pub cancelled: usize,
}

/// What processing expiries did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub expired: usize,

    /// True if the last ticket expired and the wheels were stopped.
    pub stopped: bool,
}

/// Copy of the dispatcher's state for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorSnapshot {
    pub motors: MotorState,

    pub tickets: Vec<DriveCommandTicket>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Reasons for stopping the wheels other than a stop command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeStopCause {
    /// The control link was lost.
    LinkLost,

    /// The actuator rejected a demand.
    ActuatorFault,

    /// The executable is shutting down.
    Shutdown,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Actuator fault while executing {action}: {fault}")]
    Actuator { action: Action, fault: ActuatorFault },

    #[error("Actuator fault while stopping the wheels: {0}")]
    StopFailed(ActuatorFault),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<A> Dispatcher<A>
where
    A: Actuator,
{
    pub fn new(actuator: A) -> Self {
        Self {
            actuator,
            motors: MotorState::default(),
            watchdog: DriveWatchdog::new(),
        }
    }

    /// Apply a command, with `now` as the time it arrived.
    ///
    /// The latest command always wins. If the actuator rejects a demand the wheels are stopped and
    /// all tickets cancelled before the error is returned.
    pub fn dispatch(&mut self, cmd: &Command, now: Instant) -> Result<DispatchReport, DispatchError> {
        let action = cmd.action();
        let mut report = DispatchReport {
            action,
            ticket: None,
            cancelled: 0,
        };

        match action {
            Action::Emergency => {
                warn!("Emergency stop");
                report.cancelled = self.watchdog.cancel_all();
                self.motors.stop_wheels();
                if let Err(fault) = self.actuator.stop_all() {
                    self.fault_stop();
                    return Err(DispatchError::Actuator { action, fault });
                }
            }
            Action::Stop => {
                debug!("Stopping wheels");
                report.cancelled = self.watchdog.cancel_all();
                self.motors.stop_wheels();
                if let Err(fault) = self.actuator.stop_wheels() {
                    self.fault_stop();
                    return Err(DispatchError::Actuator { action, fault });
                }
            }
            Action::Forward
            | Action::Back
            | Action::Left
            | Action::Right
            | Action::DriveLeft
            | Action::DriveRight => {
                if let Some((demands, duration)) = drive_plan(cmd) {
                    report.ticket = Some(self.engage(action, &demands, duration, now)?);
                }
            }
            Action::Raise => self.move_lifter(action, LifterPosition::Max)?,
            Action::Lower => self.move_lifter(action, LifterPosition::Min)?,
            Action::Lift => {
                let position = match cmd.lift_target() {
                    Some(t) => LifterPosition::Target(t),
                    None => LifterPosition::Max,
                };
                self.move_lifter(action, position)?
            }
        }

        Ok(report)
    }

    /// Process any tickets which have expired by `now`, stopping the wheels if none remain.
    pub fn on_tick(&mut self, now: Instant) -> Result<TickReport, DispatchError> {
        let expiry = self.watchdog.expire(now);

        for t in &expiry.expired {
            debug!(
                "Ticket {} expired (issued at {}, {} ms)",
                t.id,
                t.issued_at.format("%H:%M:%S%.3f"),
                util::time::duration_to_millis(t.duration)
            );
        }

        let report = TickReport {
            expired: expiry.expired.len(),
            stopped: expiry.emptied,
        };

        if expiry.emptied {
            info!("All drive commands elapsed, stopping wheels");
            self.motors.stop_wheels();
            self.actuator
                .stop_wheels()
                .map_err(DispatchError::StopFailed)?;
        }

        Ok(report)
    }

    /// Stop the wheels and cancel every ticket, regardless of any command.
    pub fn safe_stop(&mut self, cause: SafeStopCause) -> Result<(), DispatchError> {
        let cancelled = self.watchdog.cancel_all();
        let was_engaged = self.motors.wheels_engaged;
        self.motors.stop_wheels();

        if was_engaged || cancelled > 0 {
            warn!(
                "Safety stop ({:?}), cancelled {} drive command(s)",
                cause, cancelled
            );
        }

        self.actuator.stop_wheels().map_err(DispatchError::StopFailed)
    }

    /// Earliest time at which [`Dispatcher::on_tick`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.watchdog.next_deadline()
    }

    pub fn motors(&self) -> &MotorState {
        &self.motors
    }

    pub fn num_tickets(&self) -> usize {
        self.watchdog.len()
    }

    pub fn snapshot(&self) -> MotorSnapshot {
        MotorSnapshot {
            motors: self.motors,
            tickets: self.watchdog.tickets().cloned().collect(),
        }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Consume the dispatcher, handing back the actuator.
    pub fn into_actuator(self) -> A {
        self.actuator
    }

    /// Engage the wheels with the given demands and arm a ticket for `duration`.
    fn engage(
        &mut self,
        action: Action,
        demands: &[(WheelSide, WheelDemand)],
        duration: Duration,
        now: Instant,
    ) -> Result<TicketId, DispatchError> {
        for (side, demand) in demands {
            if let Err(fault) = self.actuator.set_wheel(*side, *demand) {
                self.fault_stop();
                return Err(DispatchError::Actuator { action, fault });
            }
            self.motors.set_wheel(*side, *demand);
        }

        info!(
            "{} for {} ms",
            describe(action),
            util::time::duration_to_millis(duration)
        );

        Ok(self.watchdog.arm(duration, now))
    }

    fn move_lifter(&mut self, action: Action, position: LifterPosition) -> Result<(), DispatchError> {
        match self.actuator.set_lifter(position) {
            Ok(()) => {
                debug!("Lifter to {:?}", position);
                self.motors.lifter = position;
                Ok(())
            }
            Err(fault) => {
                self.fault_stop();
                Err(DispatchError::Actuator { action, fault })
            }
        }
    }

    /// Safety stop after the actuator rejected a demand. Errors from the stop itself are only
    /// logged, the original fault is what gets reported.
    fn fault_stop(&mut self) {
        if let Err(e) = self.safe_stop(SafeStopCause::ActuatorFault) {
            error!("{}", e);
        }
    }
}

/// Wheel demands of a timed command and how long to hold them, or `None` if the command doesn't
/// drive the wheels.
fn drive_plan(cmd: &Command) -> Option<(Vec<(WheelSide, WheelDemand)>, Duration)> {
    use crate::motor::{
        WheelDemand::{Forward, Rate, Reverse},
        WheelSide::{Left, Right},
    };

    let duration = cmd.duration()?;

    let demands = match cmd.action() {
        Action::Forward => vec![(Left, Forward), (Right, Forward)],
        Action::Back => vec![(Left, Reverse), (Right, Reverse)],
        Action::Left => vec![(Left, Forward), (Right, Reverse)],
        Action::Right => vec![(Left, Reverse), (Right, Forward)],
        Action::DriveLeft => vec![(Left, Rate(cmd.wheel_rate()?))],
        Action::DriveRight => vec![(Right, Rate(cmd.wheel_rate()?))],
        _ => return None,
    };

    Some((demands, duration))
}

/// Human readable description of a wheel action.
fn describe(action: Action) -> &'static str {
    match action {
        Action::Forward => "Moving forward",
        Action::Back => "Moving backward",
        Action::Left => "Turning left",
        Action::Right => "Turning right",
        Action::DriveLeft => "Driving left wheel",
        Action::DriveRight => "Driving right wheel",
        _ => "Driving",
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
