//! # Link Server Module
//!
//! This module abstracts over the networking side of the mechanisms executable. The server accepts
//! control link connections from the sensor client, reads and parses the commands sent over them,
//! and hands each one to the mechanisms control thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    cmd::Command,
    net::{ControlLink, LinkFault, NetParams},
};
use log::{debug, error, info, trace, warn};
use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
};

use crate::{
    dispatcher::SafeStopCause,
    mech_ctrl::{MechCtrlError, MechHandle},
    params::MechExecParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the mechanisms executable.
pub struct LinkServer {
    /// Listening socket accepting control links
    listener: TcpListener,

    net_params: NetParams,
}

/// Summary of a finished link session.
#[derive(Debug)]
pub struct SessionReport {
    /// Messages framed from the stream
    pub num_msgs: usize,

    /// Commands successfully applied
    pub num_dispatched: usize,

    /// Messages discarded by the framer or parser
    pub num_rejected: usize,

    /// Commands the actuator failed to apply
    pub num_faults: usize,

    /// Why the session ended
    pub end: LinkFault,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`LinkServer`]
#[derive(thiserror::Error, Debug)]
pub enum LinkServerError {
    #[error("Could not bind to {0}: {1}")]
    BindError(String, std::io::Error),

    #[error("Could not accept a connection: {0}")]
    AcceptError(std::io::Error),

    #[error("Link error: {0}")]
    LinkError(#[from] LinkFault),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LinkServer {
    /// Create a new instance of the link server, bound to the configured endpoint.
    ///
    /// This function will not wait for a connection from the client before returning.
    pub fn new(params: &MechExecParams) -> Result<Self, LinkServerError> {
        let listener = TcpListener::bind(&params.link.endpoint)
            .map_err(|e| LinkServerError::BindError(params.link.endpoint.clone(), e))?;

        Ok(Self {
            listener,
            net_params: params.link.clone(),
        })
    }

    /// Address the server is actually listening on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Block until a client connects, returning the link to it.
    pub fn accept(&self) -> Result<ControlLink<TcpStream>, LinkServerError> {
        let (stream, addr) = self
            .listener
            .accept()
            .map_err(LinkServerError::AcceptError)?;

        info!("{} - has connected", addr);

        Ok(ControlLink::from_tcp(stream, &self.net_params)?)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run one control link session until the link fails.
///
/// Bad messages are logged and skipped, the session only ends on a [`LinkFault`]. If
/// `stop_on_disconnect` is set the wheels are stopped immediately when it does.
///
/// An error is only returned if the mechanisms control thread has gone away.
pub fn run_session<S>(
    link: &mut ControlLink<S>,
    mech: &MechHandle,
    stop_on_disconnect: bool,
) -> Result<SessionReport, MechCtrlError>
where
    S: Read + Write,
{
    let peer = link.peer().to_string();

    let mut num_msgs = 0;
    let mut num_dispatched = 0;
    let mut num_rejected = 0;
    let mut num_faults = 0;

    let end = loop {
        let frames = match link.recv() {
            Ok(f) => f,
            Err(e) => break e,
        };

        for frame in frames {
            num_msgs += 1;

            let msg = match frame {
                Ok(m) => m,
                Err(e) => {
                    warn!("{}: {}", peer, e);
                    num_rejected += 1;
                    continue;
                }
            };

            trace!("Received: {}", msg);

            let cmd = match Command::parse(&msg) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Discarding \"{}\" from {}: {}", msg, peer, e);
                    num_rejected += 1;
                    continue;
                }
            };

            debug!("Command: {:?} {:?}", cmd.action(), cmd.params());

            match mech.dispatch(cmd) {
                Ok(_) => num_dispatched += 1,
                Err(MechCtrlError::Dispatch(e)) => {
                    // Already made safe by the dispatcher, carry on with the next command
                    error!("{}", e);
                    num_faults += 1;
                }
                Err(e) => return Err(e),
            }
        }
    };

    match &end {
        LinkFault::Closed => info!("{} - has disconnected", peer),
        e => warn!("{} - link lost: {}", peer, e),
    }

    if stop_on_disconnect {
        mech.safe_stop(SafeStopCause::LinkLost)?;
    }

    Ok(SessionReport {
        num_msgs,
        num_dispatched,
        num_rejected,
        num_faults,
        end,
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatcher::Dispatcher,
        mech_ctrl::MechCtrl,
        motor::{LifterLimits, LifterPosition, SimActuator},
    };
    use comms_if::framer::Framer;
    use std::io::{self, Cursor};

    /// In-memory stream which reads a script and discards writes.
    struct Script(Cursor<Vec<u8>>);

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn link(script: &[u8], framer: Framer) -> ControlLink<Script> {
        ControlLink::new(
            Script(Cursor::new(script.to_vec())),
            framer,
            String::from("script"),
        )
    }

    fn ctrl() -> MechCtrl<SimActuator> {
        MechCtrl::spawn(Dispatcher::new(SimActuator::new(LifterLimits::default()))).unwrap()
    }

    #[test]
    fn test_bad_messages_skipped() {
        let ctrl = ctrl();
        let mut link = link(
            b"raise#bogus#forward-abc#lift-500#forward-60000#",
            Framer::new(),
        );

        let report = run_session(&mut link, &ctrl.handle(), false).unwrap();

        assert_eq!(report.num_msgs, 5);
        assert_eq!(report.num_rejected, 2);
        assert_eq!(report.num_faults, 1);
        assert_eq!(report.num_dispatched, 2);
        assert!(matches!(report.end, LinkFault::Closed));

        // Not stopping on disconnect, so the last drive is still outstanding
        let snap = ctrl.handle().snapshot().unwrap();
        assert!(snap.motors.wheels_engaged);
        assert_eq!(snap.tickets.len(), 1);
        assert_eq!(snap.motors.lifter, LifterPosition::Max);
    }

    #[test]
    fn test_stop_on_disconnect() {
        let ctrl = ctrl();
        let mut link = link(b"forward-60000#", Framer::new());

        run_session(&mut link, &ctrl.handle(), true).unwrap();

        let snap = ctrl.handle().snapshot().unwrap();
        assert!(!snap.motors.wheels_engaged);
        assert!(snap.tickets.is_empty());
    }

    #[test]
    fn test_framing_defect_counted() {
        let ctrl = ctrl();
        let mut link = link(b"stop#0123456789abcdef#raise#", Framer::with_max_len(8));

        let report = run_session(&mut link, &ctrl.handle(), true).unwrap();

        assert_eq!(report.num_rejected, 1);
        assert_eq!(report.num_dispatched, 2);
    }
}
