//! Broker topology: one durable topic exchange and the fixed queue set.
//!
//! Routing keys double as application message types, so both are closed
//! enums. Adding a key means adding a variant and fixing every match.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name of the single topic exchange every message flows through.
pub const TRIP_EXCHANGE: &str = "trip";

/// Routing key / message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RoutingKey {
    TripCreated,
    DriverNotInterested,
    NoDriversFound,
    DriverAssigned,
    TripRequest,
    TripAccept,
    TripDecline,
    /// Inbound frame tag only; never published.
    DriverLocation,
    /// Session message tag only; never published.
    DriverRegister,
}

impl RoutingKey {
    pub const ALL: [RoutingKey; 9] = [
        RoutingKey::TripCreated,
        RoutingKey::DriverNotInterested,
        RoutingKey::NoDriversFound,
        RoutingKey::DriverAssigned,
        RoutingKey::TripRequest,
        RoutingKey::TripAccept,
        RoutingKey::TripDecline,
        RoutingKey::DriverLocation,
        RoutingKey::DriverRegister,
    ];

    /// Wire value used both as AMQP routing key and session message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::TripCreated => "trip.event.created",
            RoutingKey::DriverNotInterested => "trip.event.driver_not_interested",
            RoutingKey::NoDriversFound => "trip.event.no_drivers_found",
            RoutingKey::DriverAssigned => "trip.event.driver_assigned",
            RoutingKey::TripRequest => "driver.cmd.trip_request",
            RoutingKey::TripAccept => "driver.cmd.trip_accept",
            RoutingKey::TripDecline => "driver.cmd.trip_decline",
            RoutingKey::DriverLocation => "driver.cmd.location",
            RoutingKey::DriverRegister => "driver.cmd.register",
        }
    }

    /// Whether this key is ever routed through the exchange.
    pub fn is_routable(&self) -> bool {
        !matches!(
            self,
            RoutingKey::DriverLocation | RoutingKey::DriverRegister
        )
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown routing key: {0}")]
pub struct UnknownRoutingKey(pub String);

impl FromStr for RoutingKey {
    type Err = UnknownRoutingKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutingKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownRoutingKey(s.to_string()))
    }
}

impl From<RoutingKey> for String {
    fn from(key: RoutingKey) -> Self {
        key.as_str().to_string()
    }
}

impl TryFrom<String> for RoutingKey {
    type Error = UnknownRoutingKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Durable queues and the routing keys bound to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Matching consumer input.
    FindAvailableDrivers,
    /// Trip requests forwarded to driver sessions.
    DriverCmdTripRequest,
    /// Driver accept/decline decisions.
    DriverTripResponse,
    NotifyNoDriversFound,
    NotifyDriverAssigned,
}

impl Queue {
    pub const ALL: [Queue; 5] = [
        Queue::FindAvailableDrivers,
        Queue::DriverCmdTripRequest,
        Queue::DriverTripResponse,
        Queue::NotifyNoDriversFound,
        Queue::NotifyDriverAssigned,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Queue::FindAvailableDrivers => "find_available_drivers",
            Queue::DriverCmdTripRequest => "driver_cmd_trip_request",
            Queue::DriverTripResponse => "driver_trip_response",
            Queue::NotifyNoDriversFound => "notify_rider_no_drivers_found",
            Queue::NotifyDriverAssigned => "notify_rider_driver_assigned",
        }
    }

    pub fn bindings(&self) -> &'static [RoutingKey] {
        match self {
            Queue::FindAvailableDrivers => {
                &[RoutingKey::TripCreated, RoutingKey::DriverNotInterested]
            }
            Queue::DriverCmdTripRequest => &[RoutingKey::TripRequest],
            Queue::DriverTripResponse => &[RoutingKey::TripAccept, RoutingKey::TripDecline],
            Queue::NotifyNoDriversFound => &[RoutingKey::NoDriversFound],
            Queue::NotifyDriverAssigned => &[RoutingKey::DriverAssigned],
        }
    }

    pub fn is_bound_to(&self, key: RoutingKey) -> bool {
        self.bindings().contains(&key)
    }

    /// Queues that receive a message published with `key`.
    pub fn routed(key: RoutingKey) -> impl Iterator<Item = Queue> {
        Queue::ALL
            .into_iter()
            .filter(move |queue| queue.is_bound_to(key))
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
