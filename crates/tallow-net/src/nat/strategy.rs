//! Traversal strategy selection
//!
//! The strategy matrix maps the two peers' NAT classes onto a connection
//! plan: how long to try direct paths, how many parallel attempts to
//! race, and when to go straight to TURN/relay.

use crate::nat::classify::NatClass;
use std::time::Duration;

/// Connection strategy for a peer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Both sides are open or full-cone: direct connects fast
    DirectFast,
    /// A restricted side needs simultaneous opens; be patient
    DirectPatient,
    /// One symmetric side: brief direct race, then TURN
    TurnFallback,
    /// Both symmetric (or blocked): no direct path exists
    TurnOnly,
}

impl Strategy {
    /// Pick the strategy for a local/remote class pair
    pub fn select(local: NatClass, remote: NatClass) -> Self {
        use NatClass::*;

        let symmetric_ish =
            |class: NatClass| matches!(class, Symmetric | Blocked);

        match (symmetric_ish(local), symmetric_ish(remote)) {
            (true, true) => Strategy::TurnOnly,
            (true, false) | (false, true) => Strategy::TurnFallback,
            (false, false) => {
                let easy = |class: NatClass| matches!(class, Open | FullCone);
                if easy(local) && easy(remote) {
                    Strategy::DirectFast
                } else {
                    Strategy::DirectPatient
                }
            }
        }
    }

    /// Budget for direct-connection attempts
    pub fn direct_timeout(self) -> Duration {
        match self {
            Strategy::DirectFast => Duration::from_secs(5),
            Strategy::DirectPatient => Duration::from_secs(10),
            Strategy::TurnFallback => Duration::from_secs(3),
            Strategy::TurnOnly => Duration::ZERO,
        }
    }

    /// How many concurrent direct attempts to race
    pub fn parallel_attempts(self) -> usize {
        match self {
            Strategy::DirectFast => 1,
            Strategy::DirectPatient => 3,
            Strategy::TurnFallback => 2,
            Strategy::TurnOnly => 0,
        }
    }

    /// Whether any direct attempt should be made
    pub fn tries_direct(self) -> bool {
        self != Strategy::TurnOnly
    }
}
