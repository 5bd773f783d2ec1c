//! # Drive Watchdog
//!
//! Tracks outstanding timed drive commands. A ticket is armed for every command which engages the
//! wheels for a limited time, and removed either when its own deadline passes or when a stop
//! cancels the whole set. When the set goes from non-empty to empty through expiry the caller must
//! stop the wheels, which guarantees the robot can't keep driving if a stop is lost on the wire.
//!
//! The watchdog holds no clock or thread of its own, the current time is always passed in by the
//! owner. This keeps it deterministic and lets the owner serialise expiry with command dispatch.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use log::trace;
use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Identifier of a ticket. Ids increase monotonically for the life of a watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketId(pub u64);

/// An outstanding timed drive command.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveCommandTicket {
    pub id: TicketId,

    /// Wall clock time the ticket was armed, for logs.
    pub issued_at: DateTime<Utc>,

    pub duration: Duration,

    /// Monotonic deadline after which the ticket expires.
    pub deadline: Instant,
}

/// Result of processing expiries.
#[derive(Debug, Default)]
pub struct Expiry {
    /// Tickets whose deadline passed, in id order.
    pub expired: Vec<DriveCommandTicket>,

    /// True if this expiry emptied the set, in which case the wheels must be stopped.
    pub emptied: bool,
}

/// The set of outstanding tickets.
#[derive(Debug, Default)]
pub struct DriveWatchdog {
    tickets: BTreeMap<TicketId, DriveCommandTicket>,

    next_id: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl DriveWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a new ticket which expires `duration` after `now`.
    pub fn arm(&mut self, duration: Duration, now: Instant) -> TicketId {
        let id = TicketId(self.next_id);
        self.next_id += 1;

        let ticket = DriveCommandTicket {
            id,
            issued_at: Utc::now(),
            duration,
            deadline: now + duration,
        };

        trace!("Armed ticket {} for {:?}", id, duration);

        self.tickets.insert(id, ticket);
        id
    }

    /// Cancel every outstanding ticket, returning how many there were.
    ///
    /// Cancelled tickets are gone from the set and so can never expire.
    pub fn cancel_all(&mut self) -> usize {
        let num = self.tickets.len();
        self.tickets.clear();

        if num > 0 {
            trace!("Cancelled {} ticket(s)", num);
        }

        num
    }

    /// Remove every ticket whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Expiry {
        if self.tickets.is_empty() {
            return Expiry::default();
        }

        let expired_ids: Vec<TicketId> = self
            .tickets
            .values()
            .filter(|t| t.deadline <= now)
            .map(|t| t.id)
            .collect();

        let expired: Vec<DriveCommandTicket> = expired_ids
            .iter()
            .filter_map(|id| self.tickets.remove(id))
            .collect();

        Expiry {
            emptied: !expired.is_empty() && self.tickets.is_empty(),
            expired,
        }
    }

    /// The earliest deadline among the outstanding tickets.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tickets.values().map(|t| t.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Outstanding tickets in id order.
    pub fn tickets(&self) -> impl Iterator<Item = &DriveCommandTicket> {
        self.tickets.values()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_expire_single() {
        let t0 = Instant::now();
        let mut wd = DriveWatchdog::new();

        let id = wd.arm(ms(500), t0);
        assert_eq!(wd.next_deadline(), Some(t0 + ms(500)));

        let e = wd.expire(t0 + ms(499));
        assert!(e.expired.is_empty());
        assert!(!e.emptied);

        let e = wd.expire(t0 + ms(500));
        assert_eq!(e.expired.len(), 1);
        assert_eq!(e.expired[0].id, id);
        assert!(e.emptied);
        assert!(wd.is_empty());
        assert_eq!(wd.next_deadline(), None);

        // Nothing left, so nothing can empty again
        let e = wd.expire(t0 + ms(10_000));
        assert!(!e.emptied);
    }

    #[test]
    fn test_only_last_expiry_empties() {
        let t0 = Instant::now();
        let mut wd = DriveWatchdog::new();

        wd.arm(ms(1000), t0);
        wd.arm(ms(200), t0 + ms(100));

        let e = wd.expire(t0 + ms(300));
        assert_eq!(e.expired.len(), 1);
        assert!(!e.emptied);
        assert_eq!(wd.len(), 1);

        let e = wd.expire(t0 + ms(1000));
        assert!(e.emptied);
    }

    #[test]
    fn test_several_expire_at_once() {
        let t0 = Instant::now();
        let mut wd = DriveWatchdog::new();

        wd.arm(ms(100), t0);
        wd.arm(ms(200), t0);
        wd.arm(ms(300), t0);

        let e = wd.expire(t0 + ms(1000));
        assert_eq!(e.expired.len(), 3);
        assert!(e.emptied);

        // Returned in id order
        let ids: Vec<u64> = e.expired.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_cancel_prevents_expiry() {
        let t0 = Instant::now();
        let mut wd = DriveWatchdog::new();

        wd.arm(ms(1000), t0);
        wd.arm(ms(1000), t0);
        assert_eq!(wd.cancel_all(), 2);
        assert_eq!(wd.cancel_all(), 0);

        let e = wd.expire(t0 + ms(2000));
        assert!(e.expired.is_empty());
        assert!(!e.emptied);
    }

    #[test]
    fn test_ids_monotonic() {
        let t0 = Instant::now();
        let mut wd = DriveWatchdog::new();

        let a = wd.arm(ms(10), t0);
        wd.cancel_all();
        let b = wd.arm(ms(10), t0);
        assert!(b > a);
    }
}
