use super::Vec3;

/// WGS84 semi-major axis (meters). Also the radius of the spherical web mercator.
pub const WGS84_A: f64 = 6_378_137.0;
/// Half the extent of the web mercator plane (meters).
pub const MERCATOR_HALF_EXTENT: f64 = std::f64::consts::PI * WGS84_A;
/// Latitude bound of the square web mercator plane (degrees).
pub const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Geographic lon/lat (degrees) to web mercator meters. Height passes through.
pub fn lonlat_to_mercator(lonlat: Vec3) -> Vec3 {
    let lat = lonlat.y.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let x = WGS84_A * lonlat.x.to_radians();
    let y = WGS84_A * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    Vec3::new(x, y, lonlat.z)
}

/// Web mercator meters to geographic lon/lat (degrees). Height passes through.
pub fn mercator_to_lonlat(mercator: Vec3) -> Vec3 {
    let lon = (mercator.x / WGS84_A).to_degrees();
    let lat = (2.0 * (mercator.y / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    Vec3::new(lon, lat, mercator.z)
}

/// A planar ground coordinate reference.
///
/// The engine keeps every shared ground coordinate in web mercator meters. A projection
/// converts between that frame and the frame a particular data source publishes its camera
/// poses in.
pub trait Projection: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn to_mercator(&self, coordinate: Vec3) -> Vec3;

    fn from_mercator(&self, coordinate: Vec3) -> Vec3;
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct WebMercator;

impl Projection for WebMercator {
    fn name(&self) -> &str {
        "EPSG:3857"
    }

    fn to_mercator(&self, coordinate: Vec3) -> Vec3 {
        coordinate
    }

    fn from_mercator(&self, coordinate: Vec3) -> Vec3 {
        coordinate
    }
}

/// Geographic lon/lat in degrees.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Wgs84;

impl Projection for Wgs84 {
    fn name(&self) -> &str {
        "EPSG:4326"
    }

    fn to_mercator(&self, coordinate: Vec3) -> Vec3 {
        lonlat_to_mercator(coordinate)
    }

    fn from_mercator(&self, coordinate: Vec3) -> Vec3 {
        mercator_to_lonlat(coordinate)
    }
}
