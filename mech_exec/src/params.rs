//! # Mechanisms Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::net::NetParams;
use serde::Deserialize;

use crate::motor::LifterLimits;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MechExecParams {

    /// Control link the server listens on
    #[serde(default)]
    pub link: NetParams,

    /// Stop the wheels as soon as the control link is lost, rather than waiting for the watchdog
    #[serde(default = "default_true")]
    pub stop_on_disconnect: bool,

    /// Lower travel limit of the lifter servo.
    ///
    /// Units: degrees
    pub lifter_min_deg: u32,

    /// Upper travel limit of the lifter servo.
    ///
    /// Units: degrees
    pub lifter_max_deg: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MechExecParams {
    pub fn lifter_limits(&self) -> LifterLimits {
        LifterLimits {
            min_deg: self.lifter_min_deg,
            max_deg: self.lifter_max_deg,
        }
    }
}

impl Default for MechExecParams {
    fn default() -> Self {
        let limits = LifterLimits::default();
        Self {
            link: NetParams::default(),
            stop_on_disconnect: true,
            lifter_min_deg: limits.min_deg,
            lifter_max_deg: limits.max_deg,
        }
    }
}

fn default_true() -> bool {
    true
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_load_params() {
        let p: MechExecParams = util::params::from_str(
            r#"
            lifter_min_deg = 70
            lifter_max_deg = 180

            [link]
            endpoint = "0.0.0.0:4000"
            max_message_len = 64
            "#,
        )
        .unwrap();

        assert_eq!(p.link.endpoint, "0.0.0.0:4000");
        assert_eq!(p.link.max_message_len, Some(64));
        assert!(p.stop_on_disconnect);
        assert_eq!(p.lifter_limits(), LifterLimits::default());
    }

    #[test]
    fn test_link_defaults() {
        let p: MechExecParams = util::params::from_str(
            "lifter_min_deg = 80\nlifter_max_deg = 90\nstop_on_disconnect = false",
        )
        .unwrap();

        assert_eq!(p.link.endpoint, comms_if::net::DEFAULT_ENDPOINT);
        assert!(!p.stop_on_disconnect);
        assert_eq!(p.lifter_limits().max_deg, 90);
    }
}
