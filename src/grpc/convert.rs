//! Domain ⇄ protobuf conversions.

use tonic::Status;

use crate::domain::{Coordinate, Driver, RideFare, Route, Trip, TripStatus, TripTransition};
use crate::proto;

impl From<Coordinate> for proto::Coordinate {
    fn from(c: Coordinate) -> Self {
        Self {
            latitude: c.latitude,
            longitude: c.longitude,
        }
    }
}

impl From<proto::Coordinate> for Coordinate {
    fn from(c: proto::Coordinate) -> Self {
        Coordinate::new(c.latitude, c.longitude)
    }
}

impl From<Route> for proto::Route {
    fn from(r: Route) -> Self {
        Self {
            geometry: r.geometry.into_iter().map(Into::into).collect(),
            distance_meters: r.distance,
            duration_seconds: r.duration,
        }
    }
}

impl From<proto::Route> for Route {
    fn from(r: proto::Route) -> Self {
        Route {
            geometry: r.geometry.into_iter().map(Into::into).collect(),
            distance: r.distance_meters,
            duration: r.duration_seconds,
        }
    }
}

impl From<RideFare> for proto::RideFare {
    fn from(f: RideFare) -> Self {
        Self {
            id: f.id,
            user_id: f.user_id,
            package_slug: f.package_slug,
            total_price_cents: f.total_price_cents,
        }
    }
}

/// The wire fare carries no route; the caller supplies it.
pub fn fare_from_proto(f: proto::RideFare, route: Route) -> RideFare {
    RideFare {
        id: f.id,
        user_id: f.user_id,
        package_slug: f.package_slug,
        total_price_cents: f.total_price_cents,
        route,
    }
}

impl From<Driver> for proto::Driver {
    fn from(d: Driver) -> Self {
        Self {
            id: d.id,
            name: d.name,
            package_slug: d.package_slug,
            location: Some(d.location.into()),
            car_plate: d.car_plate,
            profile_picture: d.profile_picture,
        }
    }
}

impl From<proto::Driver> for Driver {
    fn from(d: proto::Driver) -> Self {
        Driver {
            id: d.id,
            name: d.name,
            package_slug: d.package_slug,
            location: d.location.map(Into::into).unwrap_or_default(),
            car_plate: d.car_plate,
            profile_picture: d.profile_picture,
        }
    }
}

impl From<Trip> for proto::Trip {
    fn from(t: Trip) -> Self {
        Self {
            id: t.id,
            user_id: t.user_id,
            status: t.status.as_str().to_string(),
            selected_fare: Some(t.selected_fare.into()),
            route: Some(t.route.into()),
            driver: t.driver.map(Into::into),
        }
    }
}

impl TryFrom<proto::Trip> for Trip {
    type Error = Status;

    fn try_from(t: proto::Trip) -> Result<Self, Self::Error> {
        let status: TripStatus = t
            .status
            .parse()
            .map_err(|e| Status::invalid_argument(format!("{e}")))?;
        let route: Route = t.route.map(Into::into).unwrap_or_default();
        let fare = t
            .selected_fare
            .ok_or_else(|| Status::invalid_argument("trip must have a selected fare"))?;

        Ok(Trip {
            id: t.id,
            user_id: t.user_id,
            status,
            selected_fare: fare_from_proto(fare, route.clone()),
            route,
            driver: t.driver.map(Into::into),
        })
    }
}

/// Wire form of a transition: target status plus the driver for `assigned`.
pub fn transition_to_proto(
    trip_id: &str,
    transition: TripTransition,
) -> proto::UpdateTripRequest {
    let status = transition.target().as_str().to_string();
    let driver = match transition {
        TripTransition::Assign(driver) => Some(driver.into()),
        TripTransition::Rematch | TripTransition::NoDriver => None,
    };
    proto::UpdateTripRequest {
        trip_id: trip_id.to_string(),
        status,
        driver,
    }
}

pub fn transition_from_proto(
    status: &str,
    driver: Option<proto::Driver>,
) -> Result<TripTransition, Status> {
    let status: TripStatus = status
        .parse()
        .map_err(|e| Status::invalid_argument(format!("{e}")))?;
    match status {
        TripStatus::Assigned => driver
            .map(|d| TripTransition::Assign(d.into()))
            .ok_or_else(|| Status::invalid_argument("assigned requires a driver")),
        TripStatus::Rematching => Ok(TripTransition::Rematch),
        TripStatus::NoDriver => Ok(TripTransition::NoDriver),
        TripStatus::Requested => Err(Status::invalid_argument(
            "trips cannot be moved back to requested",
        )),
    }
}
