use foundation::math::Vec2;

/// Calibration of one physical camera, shared by every image it took.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    pub name: String,
    /// Full image size in pixels `[w, h]`.
    pub nominal_image_size: [f64; 2],
    /// Size of one image tile in pixels `[w, h]`.
    pub tile_size: [u32; 2],
    /// Pixels per tile unit for each zoom level of the image pyramid.
    pub tile_resolution_levels: Vec<f64>,
    pub principal_point: Vec2,
    /// Physical pixel pitch; distortion polynomials are fitted in this unit.
    pub pixel_size: Vec2,
    /// Observed → ideal pixel correction (`radial-distorsion-found-2-expected`).
    pub distortion_forward: Vec<f64>,
    /// Ideal → observed pixel correction (`radial-distorsion-expected-2-found`).
    pub distortion_inverse: Vec<f64>,
}

impl CameraModel {
    /// A distortion-free camera centred on the image.
    pub fn ideal(name: impl Into<String>, nominal_image_size: [f64; 2]) -> Self {
        Self {
            name: name.into(),
            nominal_image_size,
            tile_size: [512, 512],
            tile_resolution_levels: Vec::new(),
            principal_point: Vec2::new(nominal_image_size[0] / 2.0, nominal_image_size[1] / 2.0),
            pixel_size: Vec2::new(1.0, 1.0),
            distortion_forward: Vec::new(),
            distortion_inverse: Vec::new(),
        }
    }

    /// Removes lens distortion from an observed pixel.
    pub fn undistort(&self, pixel: Vec2) -> Vec2 {
        radial_distortion(
            &self.distortion_forward,
            pixel,
            self.principal_point,
            self.pixel_size,
        )
    }

    /// Applies lens distortion to an ideal pixel.
    pub fn distort(&self, pixel: Vec2) -> Vec2 {
        radial_distortion(
            &self.distortion_inverse,
            pixel,
            self.principal_point,
            self.pixel_size,
        )
    }

    pub fn width(&self) -> f64 {
        self.nominal_image_size[0]
    }

    pub fn height(&self) -> f64 {
        self.nominal_image_size[1]
    }
}

/// Radial polynomial correction of a pixel around the principal point.
///
/// The offset from `principal_point` is scaled by `pixel_size`, the polynomial
/// `f = c0 + c1·r² + c2·r⁴ + …` is evaluated at its squared length `r²`, and the offset is
/// stretched by `1 + f`. Empty coefficients (or a degenerate pixel size) leave the pixel as is.
pub fn radial_distortion(
    coeffs: &[f64],
    point: Vec2,
    principal_point: Vec2,
    pixel_size: Vec2,
) -> Vec2 {
    if coeffs.is_empty() || pixel_size.x == 0.0 || pixel_size.y == 0.0 {
        return point;
    }
    let d = Vec2::new(
        (point.x - principal_point.x) * pixel_size.x,
        (point.y - principal_point.y) * pixel_size.y,
    );
    let r2 = d.length_squared();
    let f = coeffs.iter().rev().fold(0.0, |acc, c| acc * r2 + c);
    let scale = 1.0 + f;
    Vec2::new(
        principal_point.x + d.x * scale / pixel_size.x,
        principal_point.y + d.y * scale / pixel_size.y,
    )
}
