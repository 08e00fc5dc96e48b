//! One oblique photograph and its pixel ↔ world transforms.
//!
//! Pixel `(0, 0)` corresponds to the first footprint corner; corners follow the image
//! corners `(0, 0), (w, 0), (w, h), (0, h)`. World coordinates are in the projection of the
//! data source the image came from. [`ObliqueImage::pixel_to_ground`] and
//! [`ObliqueImage::ground_to_pixel`] wrap the raw transforms for callers working in the shared
//! web mercator ground frame.

use std::sync::Arc;

use foundation::Extent;
use foundation::math::{Mat3, Mat4, Projection, Vec2, Vec3, ring_contains};

use crate::camera::CameraModel;
use crate::direction::ViewDirection;

#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// The viewing ray never reaches the requested height.
    RayParallelToGround,
    /// The world → pixel matrix could not be derived.
    SingularMatrix,
    /// The result contained NaN or infinities.
    NonFinite,
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::RayParallelToGround => {
                write!(f, "viewing ray is parallel to the ground plane")
            }
            TransformError::SingularMatrix => write!(f, "projection matrix is singular"),
            TransformError::NonFinite => write!(f, "transform produced a non-finite value"),
        }
    }
}

impl std::error::Error for TransformError {}

/// Constructor input for [`ObliqueImage`], as produced by metadata parsing.
#[derive(Debug, Clone)]
pub struct ImageParams {
    pub name: String,
    pub view_direction: ViewDirection,
    pub view_direction_angle: Option<f64>,
    pub camera: Arc<CameraModel>,
    pub ground_footprint: [Vec3; 4],
    pub ground_center: Option<Vec2>,
    pub projection_center: Option<Vec3>,
    pub pixel_to_world: Option<Mat3>,
    pub world_to_pixel: Option<Mat4>,
}

#[derive(Debug)]
pub struct ObliqueImage {
    name: String,
    view_direction: ViewDirection,
    view_direction_angle: Option<f64>,
    camera: Arc<CameraModel>,
    ground_footprint: [Vec3; 4],
    ground_center: Vec2,
    projection_center: Option<Vec3>,
    pixel_to_world: Option<Mat3>,
    world_to_pixel: Option<Mat4>,
    projection: Arc<dyn Projection>,
    footprint_mercator: [Vec2; 4],
    center_mercator: Vec2,
    extent_mercator: Extent,
}

impl ObliqueImage {
    pub fn new(params: ImageParams, projection: Arc<dyn Projection>) -> Self {
        let ground_center = params.ground_center.unwrap_or_else(|| {
            let sum = params
                .ground_footprint
                .iter()
                .fold(Vec2::default(), |acc, c| acc + c.xy());
            sum.scale(0.25)
        });
        let footprint_mercator = params
            .ground_footprint
            .map(|c| projection.to_mercator(c).xy());
        let center_mercator = projection
            .to_mercator(Vec3::new(ground_center.x, ground_center.y, 0.0))
            .xy();
        let mut extent_mercator = Extent::new(
            footprint_mercator[0].as_array(),
            footprint_mercator[0].as_array(),
        );
        for c in &footprint_mercator[1..] {
            extent_mercator.extend(*c);
        }

        Self {
            name: params.name,
            view_direction: params.view_direction,
            view_direction_angle: params.view_direction_angle,
            camera: params.camera,
            ground_footprint: params.ground_footprint,
            ground_center,
            projection_center: params.projection_center,
            pixel_to_world: params.pixel_to_world,
            world_to_pixel: params.world_to_pixel,
            projection,
            footprint_mercator,
            center_mercator,
            extent_mercator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view_direction(&self) -> ViewDirection {
        self.view_direction
    }

    pub fn view_direction_angle(&self) -> Option<f64> {
        self.view_direction_angle
    }

    pub fn camera(&self) -> &Arc<CameraModel> {
        &self.camera
    }

    pub fn ground_footprint(&self) -> &[Vec3; 4] {
        &self.ground_footprint
    }

    pub fn ground_center(&self) -> Vec2 {
        self.ground_center
    }

    pub fn projection_center(&self) -> Option<Vec3> {
        self.projection_center
    }

    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    /// Whether a full camera pose is available (as opposed to the footprint-only fallback).
    pub fn has_camera_pose(&self) -> bool {
        self.projection_center.is_some() && self.pixel_to_world.is_some()
    }

    pub fn footprint_mercator(&self) -> &[Vec2; 4] {
        &self.footprint_mercator
    }

    pub fn center_mercator(&self) -> Vec2 {
        self.center_mercator
    }

    pub fn extent_mercator(&self) -> Extent {
        self.extent_mercator
    }

    /// Whether a web mercator ground point lies inside the footprint.
    pub fn contains_ground(&self, point: Vec2) -> bool {
        self.extent_mercator.contains(point) && ring_contains(&self.footprint_mercator, point)
    }

    /// Mean height of the footprint corners.
    pub fn average_height(&self) -> f64 {
        self.ground_footprint.iter().map(|c| c.z).sum::<f64>() / 4.0
    }

    /// Observed pixel → world point on the horizontal plane at `height`.
    pub fn transform_pixel_to_world(
        &self,
        pixel: Vec2,
        height: f64,
    ) -> Result<Vec3, TransformError> {
        let ideal = self.camera.undistort(pixel);
        let world = match (self.pixel_to_world, self.projection_center) {
            (Some(m), Some(center)) => {
                let ray = m.mul_vec(Vec3::new(ideal.x, ideal.y, 1.0));
                if ray.z.abs() <= f64::EPSILON * ray.length().max(1.0) {
                    return Err(TransformError::RayParallelToGround);
                }
                let lambda = (height - center.z) / ray.z;
                center + ray.scale(lambda)
            }
            _ => {
                let uv = Vec2::new(ideal.x / self.camera.width(), ideal.y / self.camera.height());
                let p = bilinear(&self.footprint_xy(), uv);
                Vec3::new(p.x, p.y, height)
            }
        };
        if !world.is_finite() {
            return Err(TransformError::NonFinite);
        }
        Ok(world)
    }

    /// World point → observed pixel.
    ///
    /// The point's own `z` is projected; `height` stands in when `z` is not finite.
    pub fn transform_world_to_pixel(
        &self,
        world: Vec3,
        height: f64,
    ) -> Result<Vec2, TransformError> {
        let world = if world.z.is_finite() {
            world
        } else {
            Vec3::new(world.x, world.y, height)
        };

        let ideal = if let Some(m) = self.world_to_pixel {
            let h = m.mul_point(world);
            homogeneous_to_pixel(h[0], h[1], h[2])?
        } else if let (Some(m), Some(center)) = (self.pixel_to_world, self.projection_center) {
            let inv = m.inverse().ok_or(TransformError::SingularMatrix)?;
            let h = inv.mul_vec(world - center);
            homogeneous_to_pixel(h.x, h.y, h.z)?
        } else {
            let uv = inverse_bilinear(&self.footprint_xy(), world.xy())
                .ok_or(TransformError::SingularMatrix)?;
            Vec2::new(uv.x * self.camera.width(), uv.y * self.camera.height())
        };

        let pixel = self.camera.distort(ideal);
        if !pixel.is_finite() {
            return Err(TransformError::NonFinite);
        }
        Ok(pixel)
    }

    /// Observed pixel → web mercator ground point.
    pub fn pixel_to_ground(&self, pixel: Vec2, height: f64) -> Result<Vec3, TransformError> {
        let world = self.transform_pixel_to_world(pixel, height)?;
        Ok(self.projection.to_mercator(world))
    }

    /// Web mercator ground point → observed pixel.
    pub fn ground_to_pixel(&self, ground: Vec3) -> Result<Vec2, TransformError> {
        let height = if ground.z.is_finite() {
            ground.z
        } else {
            self.average_height()
        };
        let world = self
            .projection
            .from_mercator(Vec3::new(ground.x, ground.y, height));
        self.transform_world_to_pixel(world, height)
    }

    fn footprint_xy(&self) -> [Vec2; 4] {
        self.ground_footprint.map(|c| c.xy())
    }
}

fn homogeneous_to_pixel(x: f64, y: f64, w: f64) -> Result<Vec2, TransformError> {
    if w.abs() < f64::MIN_POSITIVE || !w.is_finite() {
        return Err(TransformError::NonFinite);
    }
    Ok(Vec2::new(x / w, y / w))
}

fn bilinear(c: &[Vec2; 4], uv: Vec2) -> Vec2 {
    let (u, v) = (uv.x, uv.y);
    c[0].scale((1.0 - u) * (1.0 - v)) + c[1].scale(u * (1.0 - v)) + c[2].scale(u * v)
        + c[3].scale((1.0 - u) * v)
}

/// Newton iteration for the `(u, v)` whose bilinear image is `p`.
fn inverse_bilinear(c: &[Vec2; 4], p: Vec2) -> Option<Vec2> {
    let mut u = 0.5;
    let mut v = 0.5;
    for _ in 0..32 {
        let r = bilinear(c, Vec2::new(u, v)) - p;
        let du_vec = (c[1] - c[0]).scale(1.0 - v) + (c[2] - c[3]).scale(v);
        let dv_vec = (c[3] - c[0]).scale(1.0 - u) + (c[2] - c[1]).scale(u);
        let det = du_vec.perp_dot(dv_vec);
        if det.abs() < 1e-12 {
            return None;
        }
        let du = r.perp_dot(dv_vec) / det;
        let dv = du_vec.perp_dot(r) / det;
        u -= du;
        v -= dv;
        if du.abs() + dv.abs() < 1e-12 {
            break;
        }
    }
    let uv = Vec2::new(u, v);
    uv.is_finite().then_some(uv)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use foundation::math::{Mat3, Mat4, Vec2, Vec3, WebMercator, Wgs84};

    use super::{ImageParams, ObliqueImage, TransformError};
    use crate::camera::CameraModel;
    use crate::direction::ViewDirection;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    fn footprint() -> [Vec3; 4] {
        [
            Vec3::new(100.0, 200.0, 0.0),
            Vec3::new(110.0, 200.0, 0.0),
            Vec3::new(110.0, 210.0, 0.0),
            Vec3::new(100.0, 210.0, 0.0),
        ]
    }

    fn params(camera: CameraModel) -> ImageParams {
        ImageParams {
            name: "img".to_string(),
            view_direction: ViewDirection::North,
            view_direction_angle: None,
            camera: Arc::new(camera),
            ground_footprint: footprint(),
            ground_center: None,
            projection_center: Some(Vec3::new(100.0, 200.0, 10.0)),
            pixel_to_world: Some(Mat3::diagonal(1e-4, 1e-4, -0.1)),
            world_to_pixel: None,
        }
    }

    /// Camera straight above `(100, 200)` at 10 m; one pixel spans 1 cm on the ground.
    fn linear_image() -> ObliqueImage {
        ObliqueImage::new(
            params(CameraModel::ideal("cam", [1000.0, 1000.0])),
            Arc::new(WebMercator),
        )
    }

    #[test]
    fn linear_camera_maps_midpoint() {
        let image = linear_image();
        let w = image
            .transform_pixel_to_world(Vec2::new(0.0, 0.0), 0.0)
            .expect("origin");
        assert_close(w.x, 100.0, 1e-9);
        assert_close(w.y, 200.0, 1e-9);
        let w = image
            .transform_pixel_to_world(Vec2::new(1000.0, 1000.0), 0.0)
            .expect("corner");
        assert_close(w.x, 110.0, 1e-9);
        assert_close(w.y, 210.0, 1e-9);

        let mid = image
            .transform_pixel_to_world(Vec2::new(500.0, 500.0), 0.0)
            .expect("mid");
        assert_close(mid.x, 105.0, 1e-9);
        assert_close(mid.y, 205.0, 1e-9);
        assert_close(mid.z, 0.0, 1e-12);

        let px = image
            .transform_world_to_pixel(Vec3::new(105.0, 205.0, 0.0), 0.0)
            .expect("inverse");
        assert_close(px.x, 500.0, 1e-6);
        assert_close(px.y, 500.0, 1e-6);
    }

    #[test]
    fn explicit_world_to_pixel_matrix_is_used() {
        // Inverse of the linear camera above, folded into one 3×4 projection.
        let mut p = params(CameraModel::ideal("cam", [1000.0, 1000.0]));
        p.world_to_pixel = Some(Mat4::from_3x4([
            [1e4, 0.0, 0.0, -1e6],
            [0.0, 1e4, 0.0, -2e6],
            [0.0, 0.0, -10.0, 100.0],
        ]));
        let image = ObliqueImage::new(p, Arc::new(WebMercator));
        let px = image
            .transform_world_to_pixel(Vec3::new(102.5, 207.5, 0.0), 0.0)
            .expect("pixel");
        assert_close(px.x, 250.0, 1e-6);
        assert_close(px.y, 750.0, 1e-6);
    }

    #[test]
    fn round_trip_with_distortion_and_oblique_pose() {
        let mut camera = CameraModel::ideal("cam", [4000.0, 3000.0]);
        camera.pixel_size = Vec2::new(0.004, 0.004);
        camera.distortion_forward = vec![0.0, 2e-6];
        camera.distortion_inverse = vec![0.0, -2e-6];
        let mut p = params(camera);
        p.projection_center = Some(Vec3::new(1000.0, 2000.0, 800.0));
        // Tilted camera: the ray's vertical component depends on the pixel row.
        p.pixel_to_world = Some(Mat3::new([
            [1e-3, 0.0, -2.0],
            [0.0, 1e-3, -1.5],
            [0.0, -2e-4, -0.8],
        ]));
        let image = ObliqueImage::new(p, Arc::new(WebMercator));

        for h in [0.0, 35.0, 120.0] {
            for pixel in [
                Vec2::new(0.0, 0.0),
                Vec2::new(3999.0, 0.0),
                Vec2::new(2000.0, 1500.0),
                Vec2::new(123.0, 2999.0),
            ] {
                let world = image.transform_pixel_to_world(pixel, h).expect("world");
                assert_close(world.z, h, 1e-9);
                let back = image.transform_world_to_pixel(world, h).expect("pixel");
                assert_close(back.x, pixel.x, 1e-2);
                assert_close(back.y, pixel.y, 1e-2);
            }
        }
    }

    #[test]
    fn footprint_fallback_is_bilinear() {
        let mut p = params(CameraModel::ideal("cam", [1000.0, 500.0]));
        p.projection_center = None;
        p.pixel_to_world = None;
        // A skewed quadrilateral.
        p.ground_footprint = [
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(100.0, 10.0, 3.0),
            Vec3::new(120.0, 80.0, 3.0),
            Vec3::new(-10.0, 60.0, 3.0),
        ];
        let image = ObliqueImage::new(p, Arc::new(WebMercator));
        assert!(!image.has_camera_pose());

        let corner = image
            .transform_pixel_to_world(Vec2::new(1000.0, 500.0), 7.0)
            .expect("corner");
        assert_close(corner.x, 120.0, 1e-9);
        assert_close(corner.y, 80.0, 1e-9);
        assert_close(corner.z, 7.0, 0.0);

        let pixel = Vec2::new(321.0, 123.0);
        let world = image.transform_pixel_to_world(pixel, 0.0).expect("world");
        let back = image.transform_world_to_pixel(world, 0.0).expect("pixel");
        assert_close(back.x, pixel.x, 1e-6);
        assert_close(back.y, pixel.y, 1e-6);
        assert_close(image.average_height(), 3.0, 1e-12);
    }

    #[test]
    fn horizontal_ray_is_rejected() {
        let mut p = params(CameraModel::ideal("cam", [1000.0, 1000.0]));
        p.pixel_to_world = Some(Mat3::new([
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0],
        ]));
        let image = ObliqueImage::new(p, Arc::new(WebMercator));
        assert_eq!(
            image.transform_pixel_to_world(Vec2::new(1.0, 1.0), 0.0),
            Err(TransformError::RayParallelToGround)
        );
    }

    #[test]
    fn ground_wrappers_convert_projection() {
        let mut p = params(CameraModel::ideal("cam", [1000.0, 1000.0]));
        // Small footprint around 13.4°E 52.5°N, footprint-only.
        p.projection_center = None;
        p.pixel_to_world = None;
        p.ground_footprint = [
            Vec3::new(13.40, 52.50, 0.0),
            Vec3::new(13.41, 52.50, 0.0),
            Vec3::new(13.41, 52.51, 0.0),
            Vec3::new(13.40, 52.51, 0.0),
        ];
        let image = ObliqueImage::new(p, Arc::new(Wgs84));
        let center = image.center_mercator();
        assert!(image.contains_ground(center));
        assert!(center.x > 1_400_000.0 && center.x < 1_500_000.0);

        let pixel = image
            .ground_to_pixel(Vec3::new(center.x, center.y, 0.0))
            .expect("pixel");
        assert_close(pixel.x, 500.0, 1.0);
        assert_close(pixel.y, 500.0, 1.0);
        let ground = image.pixel_to_ground(pixel, 0.0).expect("ground");
        assert_close(ground.x, center.x, 1e-3);
        assert_close(ground.y, center.y, 1e-3);
    }
}
