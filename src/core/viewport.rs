use crate::core::geo::{GeoCoord, ScreenPixel};
use crate::core::projection::{clamp_mercator_lat, gd, gd_inv, Projection};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// The view the map widget asks the engine to render: projection, center,
/// zoom (as the globe radius in pixels) and destination image size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub projection: Projection,
    /// Center of the view in radians
    pub center: GeoCoord,
    /// Radius of the globe in screen pixels
    pub radius: f64,
    pub width: u32,
    pub height: u32,
}

impl ViewportState {
    /// Creates a new viewport
    pub fn new(projection: Projection, center: GeoCoord, radius: f64, width: u32, height: u32) -> Self {
        Self {
            projection,
            center: center.wrapped(),
            radius: radius.max(1.0),
            width,
            height,
        }
    }

    /// Pixels per radian at the current zoom
    pub fn rad2pixel(&self) -> f64 {
        2.0 * self.radius / PI
    }

    /// Radians per pixel at the current zoom
    pub fn pixel2rad(&self) -> f64 {
        1.0 / self.rad2pixel()
    }

    /// Center of the destination image in screen space
    pub fn image_center(&self) -> ScreenPixel {
        ScreenPixel::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Sets the view center, wrapping longitude and clamping latitude
    pub fn set_center(&mut self, center: GeoCoord) {
        let lat = match self.projection {
            Projection::Mercator => clamp_mercator_lat(center.lat),
            _ => center.lat.clamp(-FRAC_PI_2, FRAC_PI_2),
        };
        self.center = GeoCoord::new(center.lon, lat).wrapped();
    }

    /// Sets the zoom proxy
    pub fn set_radius(&mut self, radius: f64) {
        self.radius = radius.max(1.0);
    }

    /// Sets the destination image size
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Projects a geographical coordinate to screen space.
    ///
    /// Returns `None` for points on the far side of the globe in the
    /// spherical projection.
    pub fn geo_to_screen(&self, coord: GeoCoord) -> Option<ScreenPixel> {
        let center = self.image_center();
        match self.projection {
            Projection::Equirectangular => {
                let dx = crate::core::geo::wrap_lon(coord.lon - self.center.lon);
                let dy = coord.lat - self.center.lat;
                Some(ScreenPixel::new(
                    center.x + dx * self.rad2pixel(),
                    center.y - dy * self.rad2pixel(),
                ))
            }
            Projection::Mercator => {
                let dx = crate::core::geo::wrap_lon(coord.lon - self.center.lon);
                let dy = gd_inv(coord.lat) - gd_inv(self.center.lat);
                Some(ScreenPixel::new(
                    center.x + dx * self.rad2pixel(),
                    center.y - dy * self.rad2pixel(),
                ))
            }
            Projection::Spherical => {
                let (x, y, z) = self.rotate_to_view(coord);
                if z < 0.0 {
                    return None;
                }
                Some(ScreenPixel::new(
                    center.x + x * self.radius,
                    center.y - y * self.radius,
                ))
            }
        }
    }

    /// Converts a screen position back to a geographical coordinate.
    ///
    /// Returns `None` outside the globe disc in the spherical projection
    /// and beyond the poles in the flat projections.
    pub fn screen_to_geo(&self, pixel: ScreenPixel) -> Option<GeoCoord> {
        let center = self.image_center();
        match self.projection {
            Projection::Equirectangular => {
                let lat = self.center.lat - (pixel.y - center.y) * self.pixel2rad();
                if lat.abs() > FRAC_PI_2 {
                    return None;
                }
                let lon = self.center.lon + (pixel.x - center.x) * self.pixel2rad();
                Some(GeoCoord::new(lon, lat).wrapped())
            }
            Projection::Mercator => {
                let y = gd_inv(self.center.lat) - (pixel.y - center.y) * self.pixel2rad();
                if y.abs() > crate::core::constants::MERCATOR_MAX_GD_INV {
                    return None;
                }
                let lon = self.center.lon + (pixel.x - center.x) * self.pixel2rad();
                Some(GeoCoord::new(lon, gd(y)).wrapped())
            }
            Projection::Spherical => {
                let qx = (pixel.x - center.x) / self.radius;
                let qy = (center.y - pixel.y) / self.radius;
                let r2 = qx * qx + qy * qy;
                if r2 > 1.0 {
                    return None;
                }
                Some(self.rotate_to_globe(qx, qy, (1.0 - r2).sqrt()))
            }
        }
    }

    /// Rotates a unit view vector (z towards the viewer) into globe
    /// coordinates and returns it as lon/lat.
    pub(crate) fn rotate_to_globe(&self, qx: f64, qy: f64, qz: f64) -> GeoCoord {
        let (sin_lat0, cos_lat0) = self.center.lat.sin_cos();
        let (sin_lon0, cos_lon0) = self.center.lon.sin_cos();

        let y = qy * cos_lat0 + qz * sin_lat0;
        let z1 = -qy * sin_lat0 + qz * cos_lat0;

        let x = qx * cos_lon0 + z1 * sin_lon0;
        let z = -qx * sin_lon0 + z1 * cos_lon0;

        GeoCoord::new(x.atan2(z), y.clamp(-1.0, 1.0).asin())
    }

    fn rotate_to_view(&self, coord: GeoCoord) -> (f64, f64, f64) {
        let (sin_lat, cos_lat) = coord.lat.sin_cos();
        let (sin_lon, cos_lon) = coord.lon.sin_cos();
        let (gx, gy, gz) = (cos_lat * sin_lon, sin_lat, cos_lat * cos_lon);

        let (sin_lon0, cos_lon0) = self.center.lon.sin_cos();
        let x = gx * cos_lon0 - gz * sin_lon0;
        let z1 = gx * sin_lon0 + gz * cos_lon0;

        let (sin_lat0, cos_lat0) = self.center.lat.sin_cos();
        let y = gy * cos_lat0 - z1 * sin_lat0;
        let z = gy * sin_lat0 + z1 * cos_lat0;
        (x, y, z)
    }
}

impl Default for ViewportState {
    fn default() -> Self {
        Self::new(Projection::default(), GeoCoord::default(), 256.0, 800, 600)
    }
}
