//! Trip aggregate and its state machine.
//!
//! ```text
//! requested ──► assigned
//!     │  ▲          ▲
//!     │  └─ rematching ─► no_driver
//!     └──────────────────► no_driver
//! ```
//!
//! Re-applying a transition whose target is the current state is reported as
//! `AlreadyApplied` rather than an error, so redelivered decisions are safe.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Driver, RideFare, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Requested,
    /// A driver declined; the trip is back in matching.
    #[serde(alias = "declined")]
    Rematching,
    #[serde(alias = "accepted")]
    Assigned,
    NoDriver,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::Rematching => "rematching",
            TripStatus::Assigned => "assigned",
            TripStatus::NoDriver => "no_driver",
        }
    }

    pub fn can_transition_to(&self, target: TripStatus) -> bool {
        use TripStatus::*;
        matches!(
            (self, target),
            (Requested, Assigned)
                | (Requested, NoDriver)
                | (Requested, Rematching)
                | (Rematching, Assigned)
                | (Rematching, NoDriver)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Assigned | TripStatus::NoDriver)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trip status: {0}")]
pub struct UnknownTripStatus(pub String);

impl FromStr for TripStatus {
    type Err = UnknownTripStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(TripStatus::Requested),
            "rematching" | "declined" => Ok(TripStatus::Rematching),
            "assigned" | "accepted" => Ok(TripStatus::Assigned),
            "no_driver" => Ok(TripStatus::NoDriver),
            other => Err(UnknownTripStatus(other.to_string())),
        }
    }
}

/// A requested state change.
#[derive(Debug, Clone, PartialEq)]
pub enum TripTransition {
    Assign(Driver),
    Rematch,
    NoDriver,
}

impl TripTransition {
    pub fn target(&self) -> TripStatus {
        match self {
            TripTransition::Assign(_) => TripStatus::Assigned,
            TripTransition::Rematch => TripStatus::Rematching,
            TripTransition::NoDriver => TripStatus::NoDriver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The trip was already in the target state; nothing changed.
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("trip cannot move from {from} to {to}")]
    InvalidTransition { from: TripStatus, to: TripStatus },
    #[error("trip already assigned to driver {current}, not {requested}")]
    AssignedToOther { current: String, requested: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub status: TripStatus,
    #[serde(rename = "selectedFare")]
    pub selected_fare: RideFare,
    #[serde(default)]
    pub route: Route,
    #[serde(default)]
    pub driver: Option<Driver>,
}

impl Trip {
    /// New trip in `requested` for the fare's rider and route.
    pub fn from_fare(fare: RideFare) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: fare.user_id.clone(),
            status: TripStatus::Requested,
            route: fare.route.clone(),
            selected_fare: fare,
            driver: None,
        }
    }

    /// Tier a driver must serve to take this trip.
    pub fn tier(&self) -> &str {
        &self.selected_fare.package_slug
    }

    pub fn apply(&mut self, transition: TripTransition) -> Result<TransitionOutcome, TransitionError> {
        let target = transition.target();

        if self.status == target {
            return match (&transition, &self.driver) {
                (TripTransition::Assign(requested), Some(current)) if current.id != requested.id => {
                    Err(TransitionError::AssignedToOther {
                        current: current.id.clone(),
                        requested: requested.id.clone(),
                    })
                }
                _ => Ok(TransitionOutcome::AlreadyApplied),
            };
        }

        if !self.status.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        if let TripTransition::Assign(driver) = transition {
            self.driver = Some(driver);
        }
        self.status = target;
        Ok(TransitionOutcome::Applied)
    }
}

/// Payload of trip.event.created, trip.event.driver_not_interested,
/// trip.event.driver_assigned and driver.cmd.trip_request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEvent {
    pub trip: Trip,
}

/// Payload of driver.cmd.trip_accept and driver.cmd.trip_decline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverTripResponse {
    pub driver: Driver,
    #[serde(rename = "tripID")]
    pub trip_id: String,
    #[serde(rename = "riderID")]
    pub rider_id: String,
}
