use super::Vec3;

/// Globally-averaged planetary radius, in the same units as `Location::alt`.
pub const MEAN_PLANET_RADIUS: f64 = 6_371.0;

/// Geographic location in degrees, altitude above the mean radius.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Location {
    pub lat_deg: f64,
    pub lng_deg: f64,
    pub alt: f64,
}

impl Location {
    pub fn new(lat_deg: f64, lng_deg: f64, alt: f64) -> Self {
        Self {
            lat_deg,
            lng_deg,
            alt,
        }
    }
}

/// Spherical-to-Cartesian conversion with the y and z axes swapped, so that
/// the polar axis maps to the renderer's `y` rather than `z` ("up").
pub fn position_from_location(loc: Location) -> Vec3 {
    let phi = loc.lat_deg.to_radians();
    let theta = loc.lng_deg.to_radians();
    let rho = MEAN_PLANET_RADIUS + loc.alt;

    let x = phi.cos() * theta.cos() * rho;
    let y = phi.cos() * theta.sin() * rho;
    let z = phi.sin() * rho;

    Vec3::new(x, z, y)
}
