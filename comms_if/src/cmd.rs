//! # Command module
//!
//! Commands are the unit of control sent from the sensor client to the motor controller. On the
//! wire a command is a short ASCII string of the form `action[-param1[-param2]]`, terminated by a
//! `#` (see [`crate::framer`]).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;

use crate::framer::{RawMessage, DELIMITER};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Separator between the action keyword and each parameter.
pub const FIELD_SEPARATOR: char = '-';

/// Duration of a drive or turn command which doesn't specify one.
///
/// Units: milliseconds
pub const DEFAULT_DRIVE_MS: u32 = 1000;

/// Wheel rate used by `driveleft`/`driveright` when no rate is given. For a continuous servo 90 is
/// the neutral (not turning) command.
pub const DEFAULT_WHEEL_RATE: u32 = 90;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A parsed command.
///
/// Only the parameters which were present on the wire are stored, so that rendering the command
/// gives back the canonical message. Use the accessors ([`Command::duration`],
/// [`Command::wheel_rate`], [`Command::lift_target`]) to get values with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    action: Action,
    params: Vec<u32>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// All actions understood by the motor controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Halt every motor and drop all pending drive commands.
    Emergency,

    /// Halt the wheel motors.
    Stop,

    /// Drive both wheels forwards. Param: duration in ms.
    Forward,

    /// Drive both wheels backwards. Param: duration in ms.
    Back,

    /// Turn on the spot to the left. Param: duration in ms.
    Left,

    /// Turn on the spot to the right. Param: duration in ms.
    Right,

    /// Raise the lifter to its maximum position.
    Raise,

    /// Lower the lifter to its minimum position.
    Lower,

    /// Set the left wheel rate directly. Params: rate, duration in ms.
    DriveLeft,

    /// Set the right wheel rate directly. Params: rate, duration in ms.
    DriveRight,

    /// Move the lifter to an explicit target. Param: target in degrees.
    Lift,
}

/// Errors which can occur while parsing a message into a [`Command`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown action \"{0}\"")]
    UnknownAction(String),

    #[error("Invalid parameter \"{token}\" at position {position} of a {action} command")]
    InvalidParameter {
        action: Action,
        position: usize,
        token: String,
    },

    #[error("Message is not valid UTF-8")]
    NotUtf8,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Action {
    /// Every action, in keyword table order.
    pub const ALL: [Action; 11] = [
        Action::Emergency,
        Action::Stop,
        Action::Forward,
        Action::Back,
        Action::Left,
        Action::Right,
        Action::Raise,
        Action::Lower,
        Action::DriveLeft,
        Action::DriveRight,
        Action::Lift,
    ];

    /// The wire keyword for this action.
    pub fn keyword(&self) -> &'static str {
        match self {
            Action::Emergency => "emergency",
            Action::Stop => "stop",
            Action::Forward => "forward",
            Action::Back => "back",
            Action::Left => "left",
            Action::Right => "right",
            Action::Raise => "raise",
            Action::Lower => "lower",
            Action::DriveLeft => "driveleft",
            Action::DriveRight => "driveright",
            Action::Lift => "lift",
        }
    }

    /// Match a wire keyword. Matching is case-sensitive.
    pub fn from_keyword(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.keyword() == s)
    }

    /// Number of parameters this action takes. Any more than this are ignored.
    pub fn num_params(&self) -> usize {
        match self {
            Action::Emergency | Action::Stop | Action::Raise | Action::Lower => 0,
            Action::Forward | Action::Back | Action::Left | Action::Right | Action::Lift => 1,
            Action::DriveLeft | Action::DriveRight => 2,
        }
    }

    /// Index of the duration parameter for timed actions.
    fn duration_index(&self) -> Option<usize> {
        match self {
            Action::Forward | Action::Back | Action::Left | Action::Right => Some(0),
            Action::DriveLeft | Action::DriveRight => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl Command {
    /// Build a command from an action and parameters.
    ///
    /// Parameters beyond the number the action takes are dropped.
    pub fn new(action: Action, mut params: Vec<u32>) -> Self {
        params.truncate(action.num_params());
        Self { action, params }
    }

    /// Shorthand for a command without any parameters.
    pub fn bare(action: Action) -> Self {
        Self::new(action, Vec::new())
    }

    /// Parse a command from a framed message.
    pub fn parse(msg: &RawMessage) -> Result<Self, ParseError> {
        let s = msg.as_str().ok_or(ParseError::NotUtf8)?;
        s.parse()
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// The parameters that were present on the wire.
    pub fn params(&self) -> &[u32] {
        &self.params
    }

    /// How long a timed action should drive for, or `None` for untimed actions.
    pub fn duration(&self) -> Option<Duration> {
        self.action.duration_index().map(|i| {
            Duration::from_millis(self.params.get(i).copied().unwrap_or(DEFAULT_DRIVE_MS) as u64)
        })
    }

    /// The wheel rate of a `driveleft`/`driveright` command.
    pub fn wheel_rate(&self) -> Option<u32> {
        match self.action {
            Action::DriveLeft | Action::DriveRight => {
                Some(self.params.first().copied().unwrap_or(DEFAULT_WHEEL_RATE))
            }
            _ => None,
        }
    }

    /// Explicit target of a `lift` command. `None` means the lifter's maximum position.
    pub fn lift_target(&self) -> Option<u32> {
        match self.action {
            Action::Lift => self.params.first().copied(),
            _ => None,
        }
    }

    /// Render the command into its terminated wire form.
    pub fn to_wire(&self) -> String {
        format!("{}{}", self, DELIMITER as char)
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split(FIELD_SEPARATOR);

        // `split` always yields at least one token
        let keyword = tokens.next().unwrap_or("");
        let action = Action::from_keyword(keyword)
            .ok_or_else(|| ParseError::UnknownAction(keyword.to_string()))?;

        // Parse only as many parameters as the action needs, the rest are ignored. A bad token
        // drops the whole command.
        let params = tokens
            .take(action.num_params())
            .enumerate()
            .map(|(i, t)| {
                let invalid = || ParseError::InvalidParameter {
                    action,
                    position: i + 1,
                    token: t.to_string(),
                };

                // Digits only, `u32::from_str` would also take a leading `+`
                if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                t.parse::<u32>().map_err(|_| invalid())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { action, params })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action.keyword())?;
        for p in &self.params {
            write!(f, "{}{}", FIELD_SEPARATOR, p)?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_examples() {
        assert_eq!(
            "forward-500".parse::<Command>(),
            Ok(Command::new(Action::Forward, vec![500]))
        );
        assert_eq!("stop".parse::<Command>(), Ok(Command::bare(Action::Stop)));
        assert_eq!(
            "lift-120".parse::<Command>(),
            Ok(Command::new(Action::Lift, vec![120]))
        );
        assert_eq!(
            "bogus".parse::<Command>(),
            Err(ParseError::UnknownAction("bogus".into()))
        );
    }

    #[test]
    fn test_keywords_case_sensitive() {
        assert!(matches!(
            "Forward".parse::<Command>(),
            Err(ParseError::UnknownAction(_))
        ));
        assert!(matches!(
            "STOP".parse::<Command>(),
            Err(ParseError::UnknownAction(_))
        ));

        for action in Action::ALL.iter() {
            assert_eq!(Action::from_keyword(action.keyword()), Some(*action));
        }
    }

    #[test]
    fn test_invalid_parameter_drops_command() {
        assert_eq!(
            "driveleft-120-abc".parse::<Command>(),
            Err(ParseError::InvalidParameter {
                action: Action::DriveLeft,
                position: 2,
                token: "abc".into()
            })
        );

        // Empty token, as happens when someone tries to send a negative number
        assert!(matches!(
            "forward--5".parse::<Command>(),
            Err(ParseError::InvalidParameter { position: 1, .. })
        ));

        // Too large for the parameter type
        assert!(matches!(
            "back-99999999999".parse::<Command>(),
            Err(ParseError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_params_digits_only() {
        assert_eq!(
            "forward-+500".parse::<Command>(),
            Err(ParseError::InvalidParameter {
                action: Action::Forward,
                position: 1,
                token: "+500".into()
            })
        );
        assert!(matches!(
            "lift- 120".parse::<Command>(),
            Err(ParseError::InvalidParameter { position: 1, .. })
        ));
        assert!(matches!(
            "driveright-90-1e3".parse::<Command>(),
            Err(ParseError::InvalidParameter { position: 2, .. })
        ));

        // Leading zeros are still digits
        assert_eq!(
            "forward-0500".parse::<Command>(),
            Ok(Command::new(Action::Forward, vec![500]))
        );
    }

    #[test]
    fn test_defaults() {
        let fwd: Command = "forward".parse().unwrap();
        assert_eq!(fwd.duration(), Some(Duration::from_millis(1000)));
        assert!(fwd.params().is_empty());

        let dl: Command = "driveleft".parse().unwrap();
        assert_eq!(dl.wheel_rate(), Some(DEFAULT_WHEEL_RATE));
        assert_eq!(dl.duration(), Some(Duration::from_millis(1000)));

        let dr: Command = "driveright-120".parse().unwrap();
        assert_eq!(dr.wheel_rate(), Some(120));
        assert_eq!(dr.duration(), Some(Duration::from_millis(1000)));

        let dr: Command = "driveright-45-250".parse().unwrap();
        assert_eq!(dr.wheel_rate(), Some(45));
        assert_eq!(dr.duration(), Some(Duration::from_millis(250)));

        let lift: Command = "lift".parse().unwrap();
        assert_eq!(lift.lift_target(), None);

        let raise: Command = "raise".parse().unwrap();
        assert_eq!(raise.duration(), None);
    }

    #[test]
    fn test_extra_params_ignored() {
        let stop: Command = "stop-12-13".parse().unwrap();
        assert_eq!(stop, Command::bare(Action::Stop));

        // Extra trailing garbage isn't even looked at
        let fwd: Command = "forward-200-notanumber".parse().unwrap();
        assert_eq!(fwd, Command::new(Action::Forward, vec![200]));

        assert_eq!(
            Command::new(Action::Lift, vec![100, 200, 300]).params(),
            &[100]
        );
    }

    #[test]
    fn test_render_canonical() {
        for raw in &[
            "emergency",
            "stop",
            "forward",
            "forward-500",
            "back-20",
            "left-1000",
            "right-1",
            "raise",
            "lower",
            "driveleft",
            "driveleft-120",
            "driveright-60-300",
            "lift",
            "lift-120",
        ] {
            let cmd: Command = raw.parse().unwrap();
            assert_eq!(&cmd.to_string(), raw);
        }

        assert_eq!(
            Command::new(Action::Forward, vec![2000]).to_wire(),
            "forward-2000#"
        );
    }

    #[test]
    fn test_parse_raw_message() {
        let msg = RawMessage::from(&b"left-300"[..]);
        assert_eq!(
            Command::parse(&msg),
            Ok(Command::new(Action::Left, vec![300]))
        );

        let msg = RawMessage::from(&[0xffu8, 0xfe][..]);
        assert_eq!(Command::parse(&msg), Err(ParseError::NotUtf8));
    }
}
