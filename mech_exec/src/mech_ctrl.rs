//! # Mechanisms Control
//!
//! Runs a [`Dispatcher`] on its own thread. Commands, safety stops and snapshot requests arrive
//! over a channel, and between requests the thread sleeps until the next watchdog deadline. Since
//! only this thread touches the dispatcher, command dispatch and ticket expiry can never
//! interleave.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::cmd::Command;
use log::{debug, error, warn};
use std::{
    sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::Instant,
};

use crate::{
    dispatcher::{DispatchError, DispatchReport, Dispatcher, MotorSnapshot, SafeStopCause},
    motor::Actuator,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Owner of the mechanisms control thread.
///
/// Dropping this stops the thread, leaving the wheels stopped.
pub struct MechCtrl<A> {
    handle: MechHandle,

    join_handle: Option<JoinHandle<Dispatcher<A>>>,
}

/// Cloneable handle used to send requests to the mechanisms control thread.
#[derive(Clone)]
pub struct MechHandle {
    sender: Sender<MechRequest>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum MechRequest {
    Dispatch(Command, Sender<Result<DispatchReport, DispatchError>>),
    SafeStop(SafeStopCause, Sender<Result<(), DispatchError>>),
    Snapshot(Sender<MotorSnapshot>),
    Shutdown,
}

#[derive(thiserror::Error, Debug)]
pub enum MechCtrlError {
    #[error("Could not spawn the mechanisms control thread: {0}")]
    SpawnError(std::io::Error),

    #[error("The mechanisms control thread is not running")]
    NotRunning,

    #[error("The mechanisms control thread panicked")]
    ThreadPanicked,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<A> MechCtrl<A>
where
    A: Actuator + 'static,
{
    /// Start the control thread, which takes ownership of the dispatcher.
    pub fn spawn(dispatcher: Dispatcher<A>) -> Result<Self, MechCtrlError> {
        let (sender, receiver) = channel();

        let join_handle = thread::Builder::new()
            .name(String::from("mech_ctrl"))
            .spawn(move || mech_ctrl_thread(dispatcher, receiver))
            .map_err(MechCtrlError::SpawnError)?;

        Ok(Self {
            handle: MechHandle { sender },
            join_handle: Some(join_handle),
        })
    }

    /// Get a handle for sending requests to the thread.
    pub fn handle(&self) -> MechHandle {
        self.handle.clone()
    }

    /// Stop the thread and hand back the actuator. The wheels are stopped first.
    pub fn shutdown(mut self) -> Result<A, MechCtrlError> {
        let dispatcher = self.stop_thread()?;
        Ok(dispatcher.into_actuator())
    }

    fn stop_thread(&mut self) -> Result<Dispatcher<A>, MechCtrlError> {
        let join_handle = self.join_handle.take().ok_or(MechCtrlError::NotRunning)?;

        // If the thread already exited the send fails, which is fine since join returns anyway
        self.handle.sender.send(MechRequest::Shutdown).ok();

        join_handle.join().map_err(|_| MechCtrlError::ThreadPanicked)
    }
}

impl<A> Drop for MechCtrl<A> {
    fn drop(&mut self) {
        if let Some(jh) = self.join_handle.take() {
            self.handle.sender.send(MechRequest::Shutdown).ok();
            if jh.join().is_err() {
                error!("Mechanisms control thread panicked");
            }
        }
    }
}

impl MechHandle {
    /// Dispatch a command, blocking until it has been applied.
    pub fn dispatch(&self, cmd: Command) -> Result<DispatchReport, MechCtrlError> {
        let (tx, rx) = channel();
        self.sender
            .send(MechRequest::Dispatch(cmd, tx))
            .map_err(|_| MechCtrlError::NotRunning)?;

        Ok(rx.recv().map_err(|_| MechCtrlError::NotRunning)??)
    }

    /// Stop the wheels and cancel all drive commands.
    pub fn safe_stop(&self, cause: SafeStopCause) -> Result<(), MechCtrlError> {
        let (tx, rx) = channel();
        self.sender
            .send(MechRequest::SafeStop(cause, tx))
            .map_err(|_| MechCtrlError::NotRunning)?;

        Ok(rx.recv().map_err(|_| MechCtrlError::NotRunning)??)
    }

    /// Get a copy of the current motor state and outstanding tickets.
    pub fn snapshot(&self) -> Result<MotorSnapshot, MechCtrlError> {
        let (tx, rx) = channel();
        self.sender
            .send(MechRequest::Snapshot(tx))
            .map_err(|_| MechCtrlError::NotRunning)?;

        rx.recv().map_err(|_| MechCtrlError::NotRunning)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn mech_ctrl_thread<A>(mut dispatcher: Dispatcher<A>, receiver: Receiver<MechRequest>) -> Dispatcher<A>
where
    A: Actuator,
{
    debug!("Mechanisms control thread started");

    loop {
        // Wait for a request, but no longer than the next deadline
        let request = match dispatcher.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(timeout) {
                    Ok(r) => Some(r),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(r) => Some(r),
                Err(_) => break,
            },
        };

        // Expiries due before the request arrived are handled first
        if let Err(e) = dispatcher.on_tick(Instant::now()) {
            error!("{}", e);
        }

        match request {
            Some(MechRequest::Dispatch(cmd, reply)) => {
                let result = dispatcher.dispatch(&cmd, Instant::now());
                if let Err(ref e) = result {
                    error!("{}", e);
                }
                reply.send(result).ok();
            }
            Some(MechRequest::SafeStop(cause, reply)) => {
                reply.send(dispatcher.safe_stop(cause)).ok();
            }
            Some(MechRequest::Snapshot(reply)) => {
                reply.send(dispatcher.snapshot()).ok();
            }
            Some(MechRequest::Shutdown) => break,
            None => (),
        }
    }

    // Never leave the wheels running once nobody can command them
    if let Err(e) = dispatcher.safe_stop(SafeStopCause::Shutdown) {
        warn!("Could not stop the wheels on shutdown: {}", e);
    }

    debug!("Mechanisms control thread stopped");

    dispatcher
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::motor::{LifterLimits, LifterPosition, SimActuator};
    use std::time::Duration;

    fn spawn() -> MechCtrl<SimActuator> {
        MechCtrl::spawn(Dispatcher::new(SimActuator::new(LifterLimits::default()))).unwrap()
    }

    #[test]
    fn test_expiry_without_stop() {
        let ctrl = spawn();
        let h = ctrl.handle();

        h.dispatch("forward-100".parse().unwrap()).unwrap();
        assert!(h.snapshot().unwrap().motors.wheels_engaged);

        thread::sleep(Duration::from_millis(300));

        let snap = h.snapshot().unwrap();
        assert!(!snap.motors.wheels_engaged);
        assert!(snap.tickets.is_empty());
    }

    #[test]
    fn test_fault_reported_to_caller() {
        let ctrl = spawn();
        let h = ctrl.handle();

        let res = h.dispatch("lift-500".parse().unwrap());
        assert!(matches!(res, Err(MechCtrlError::Dispatch(_))));

        // Thread keeps running after a fault
        h.dispatch("raise".parse().unwrap()).unwrap();
        assert_eq!(h.snapshot().unwrap().motors.lifter, LifterPosition::Max);
    }

    #[test]
    fn test_shutdown_returns_stopped_actuator() {
        let ctrl = spawn();
        let h = ctrl.handle();

        h.dispatch("forward-10000".parse().unwrap()).unwrap();
        let act = ctrl.shutdown().unwrap();
        assert!(!act.outputs().wheels_engaged);

        // Handles outliving the thread get an error rather than hanging
        assert!(matches!(h.snapshot(), Err(MechCtrlError::NotRunning)));
    }
}
