use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use engine::{Device, Handle, ObjectKind, Param, defer_release};
use foundation::ResourceScope;
use foundation::math::{Location, Vec3, position_from_location};

use crate::error::SceneError;
use crate::request::RequestError;

/// Height of the sun's position above the mean radius.
pub const SUN_ALTITUDE: f64 = 10_000.0;
pub const SUN_INTENSITY: f32 = 3.0;
pub const SKY_INTENSITY: f32 = 0.014;
pub const AMBIENT_INTENSITY: f32 = 0.15;
pub const HDRI_INTENSITY: f32 = 7.0;
pub const WARM_WHITE: [f32; 3] = [1.0, 0.8, 0.4];

/// Midnight UTC of the reference day that request hours count from.
pub fn reference_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// `reference_day() + hour`, with fractional hours kept to the millisecond.
/// `None` when the moment falls outside the calendar range.
pub fn moment_for_hour(hour: f64) -> Option<DateTime<Utc>> {
    if !hour.is_finite() {
        return None;
    }
    let millis = (hour * 3_600_000.0).round();
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let offset = Duration::try_milliseconds(millis as i64)?;
    reference_day().checked_add_signed(offset)
}

/// Geographic position of the sun at a moment.
pub trait Ephemeris: Send + Sync {
    /// The subsolar point; `alt` is left at zero for the caller to set.
    fn sun_position(&self, when: DateTime<Utc>) -> Location;
}

/// Low-precision solar position (about 0.01° over 1950-2050).
#[derive(Debug, Default, Copy, Clone)]
pub struct SolarEphemeris;

fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 180.0 { wrapped - 360.0 } else { wrapped }
}

impl Ephemeris for SolarEphemeris {
    fn sun_position(&self, when: DateTime<Utc>) -> Location {
        let unix_days = when.timestamp_millis() as f64 / 86_400_000.0;
        // Days since J2000.0.
        let n = unix_days + 2_440_587.5 - 2_451_545.0;

        let mean_longitude = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
        let mean_anomaly = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();
        let ecliptic_longitude = (mean_longitude
            + 1.915 * mean_anomaly.sin()
            + 0.020 * (2.0 * mean_anomaly).sin())
        .to_radians();
        let obliquity = (23.439 - 0.000_000_4 * n).to_radians();

        let right_ascension = (obliquity.cos() * ecliptic_longitude.sin())
            .atan2(ecliptic_longitude.cos())
            .to_degrees();
        let declination = (obliquity.sin() * ecliptic_longitude.sin())
            .asin()
            .to_degrees();
        let gmst_hours = (18.697_374_558 + 24.065_709_824_419_08 * n).rem_euclid(24.0);

        Location::new(
            declination,
            wrap_degrees(right_ascension - gmst_hours * 15.0),
            0.0,
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LightKind {
    #[default]
    Distant,
    SunSky,
}

impl LightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LightKind::Distant => "distant",
            LightKind::SunSky => "sunSky",
        }
    }
}

impl FromStr for LightKind {
    type Err = RequestError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "distant" => Ok(LightKind::Distant),
            "sunSky" => Ok(LightKind::SunSky),
            other => Err(RequestError::Light(other.to_string())),
        }
    }
}

impl fmt::Display for LightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renderer-space position of the sun at `hour`.
pub fn sun_vector(ephemeris: &dyn Ephemeris, hour: f64) -> Result<Vec3, RequestError> {
    let when = moment_for_hour(hour).ok_or_else(|| RequestError::Number {
        name: "hour",
        value: hour.to_string(),
    })?;
    let subsolar = ephemeris.sun_position(when);
    Ok(position_from_location(Location {
        alt: SUN_ALTITUDE,
        ..subsolar
    }))
}

/// Builds one committed sunlight pointing from `sun` towards the origin.
/// `sky_up` is used by `sunSky` lights only.
pub fn make_sunlight(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    kind: LightKind,
    sun: Vec3,
    intensity: f32,
    sky_up: Vec3,
) -> Result<Handle, SceneError> {
    let light = device.new_object(ObjectKind::Light, kind.as_str())?;
    defer_release(scope, device, light)?;
    device.set_param(light, "intensityQuantity", Param::Int(1))?;
    device.set_param(light, "color", Param::Vec3f(WARM_WHITE))?;
    if kind == LightKind::SunSky {
        device.set_param(light, "horizonExtension", Param::Float(0.2))?;
        device.set_param(light, "turbidity", Param::Float(8.0))?;
        device.set_param(light, "albedo", Param::Float(0.15))?;
        device.set_param(light, "up", Param::Vec3f(sky_up.to_f32()))?;
    }
    device.set_param(light, "position", Param::Vec3f(sun.to_f32()))?;
    device.set_param(light, "direction", Param::Vec3f((-sun).to_f32()))?;
    device.set_param(light, "intensity", Param::Float(intensity))?;
    device.commit(light)?;
    Ok(light)
}

pub fn make_ambient(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
) -> Result<Handle, SceneError> {
    let light = device.new_object(ObjectKind::Light, "ambient")?;
    defer_release(scope, device, light)?;
    device.set_param(light, "intensity", Param::Float(AMBIENT_INTENSITY))?;
    device.set_param(light, "intensityQuantity", Param::Int(1))?;
    device.set_param(light, "color", Param::Vec3f(WARM_WHITE))?;
    device.commit(light)?;
    Ok(light)
}

/// Environment light mapped with an RGB32F texture.
pub fn make_hdri(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    texture: Handle,
) -> Result<Handle, SceneError> {
    let light = device.new_object(ObjectKind::Light, "hdri")?;
    defer_release(scope, device, light)?;
    device.set_param(light, "intensity", Param::Float(HDRI_INTENSITY))?;
    device.set_param(light, "map", Param::Object(texture))?;
    device.commit(light)?;
    Ok(light)
}
