//! # Mechanisms Control Executable
//!
//! This executable is the motor controller end of the command link:
//! - Accepts a control link from the sensor client
//! - Parses the commands sent over it and applies them to the wheels and lifter
//! - Stops the wheels once timed drive commands elapse, or the link is lost

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};

// Internal
use mech_lib::{
    dispatcher::Dispatcher,
    link_server::{self, LinkServer},
    mech_ctrl::MechCtrl,
    motor::SimActuator,
    params::MechExecParams,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mech_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mechanisms Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: MechExecParams =
        util::params::load("mech_exec.toml").wrap_err("Could not load mech_exec params")?;

    info!("Parameters loaded");

    // ---- SERVER INITIALISATION ----

    let server = LinkServer::new(&params).wrap_err("Failed to initialise server")?;

    info!(
        "Server listening on {}",
        server
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| params.link.endpoint.clone())
    );

    // TODO: Replace with the servo board driver once the board is wired in
    let mut actuator = SimActuator::new(params.lifter_limits());

    // ---- MAIN LOOP ----

    info!("Initialisation complete, waiting for the sensor client");

    loop {
        let mut link = match server.accept() {
            Ok(l) => l,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        // Fresh watchdog for every session
        let ctrl = MechCtrl::spawn(Dispatcher::new(actuator))
            .wrap_err("Failed to start mechanisms control")?;

        let report = link_server::run_session(&mut link, &ctrl.handle(), params.stop_on_disconnect)
            .wrap_err("Mechanisms control stopped unexpectedly")?;

        info!(
            "Session ended: {} messages, {} dispatched, {} rejected, {} faults",
            report.num_msgs, report.num_dispatched, report.num_rejected, report.num_faults
        );

        link.shutdown();

        actuator = ctrl
            .shutdown()
            .wrap_err("Failed to stop mechanisms control")?;
    }
}
