//! Inbound driver frames.

use serde::Deserialize;

use crate::bus::RoutingKey;
use crate::domain::DriverTripResponse;

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A decoded frame from a driver connection.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverFrame {
    /// Position update. Accepted and discarded.
    Location,
    Accept(DriverTripResponse),
    Decline(DriverTripResponse),
    /// A tag drivers are not expected to send.
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),
    #[error("malformed {tag} payload: {source}")]
    Payload {
        tag: RoutingKey,
        source: serde_json::Error,
    },
}

pub fn parse_driver_frame(text: &str) -> Result<DriverFrame, FrameError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(FrameError::Malformed)?;

    let tag = match raw.frame_type.parse::<RoutingKey>() {
        Ok(tag) => tag,
        Err(_) => return Ok(DriverFrame::Unknown(raw.frame_type)),
    };

    let response = |tag: RoutingKey| {
        serde_json::from_value::<DriverTripResponse>(raw.data.clone())
            .map_err(|source| FrameError::Payload { tag, source })
    };

    match tag {
        RoutingKey::DriverLocation => Ok(DriverFrame::Location),
        RoutingKey::TripAccept => Ok(DriverFrame::Accept(response(tag)?)),
        RoutingKey::TripDecline => Ok(DriverFrame::Decline(response(tag)?)),
        RoutingKey::TripCreated
        | RoutingKey::DriverNotInterested
        | RoutingKey::NoDriversFound
        | RoutingKey::DriverAssigned
        | RoutingKey::TripRequest
        | RoutingKey::DriverRegister => Ok(DriverFrame::Unknown(raw.frame_type)),
    }
}
