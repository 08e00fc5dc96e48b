//! Oblique metadata documents.
//!
//! Three shapes are accepted:
//!
//! * flat: `generalImageInfo` plus an `images` array of positional records
//!   `[name, cameraIndex, viewDirection, viewDirectionAngle, groundCoordinates,
//!   centerPointOnGround, projectionCenter, pToRealworldMatrix, pToImageMatrix]`;
//! * legacy flat: the same, but each image is an object with kebab-case keys;
//! * tiled: `generalImageInfo` plus `availableTiles`, each tile being a flat document of its own.
//!
//! Parsing is pure; the caller decides which projection the coordinates are in.

use std::sync::Arc;

use foundation::math::{Mat3, Mat4, Vec2, Vec3};
use serde_json::{Map, Value};
use streaming::TileCoordinate;

use crate::camera::CameraModel;
use crate::direction::ViewDirection;
use crate::error::ParseError;
use crate::image::ImageParams;

/// First tool version whose legacy documents carry a meaningful `view-direction-angle`.
pub const MIN_ANGLE_VERSION: (u32, u32) = (3, 4);

const DEFAULT_IMAGE_SIZE: [f64; 2] = [11608.0, 8708.0];
const DEFAULT_TILE_SIZE: [u32; 2] = [512, 512];

/// The `generalImageInfo` block shared by every image of a document.
#[derive(Debug, Clone)]
pub struct GeneralImageInfo {
    pub size: [f64; 2],
    pub tile_size: [u32; 2],
    pub tile_resolution: Vec<f64>,
    pub cameras: Vec<Arc<CameraModel>>,
    pub version: Option<(u32, u32)>,
}

impl GeneralImageInfo {
    pub fn camera_by_name(&self, name: &str) -> Option<&Arc<CameraModel>> {
        self.cameras.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone)]
pub enum MetadataDocument {
    Flat {
        info: GeneralImageInfo,
        images: Vec<ImageParams>,
    },
    Tiled {
        info: GeneralImageInfo,
        available_tiles: Vec<TileCoordinate>,
    },
}

pub fn parse_document(doc: &Value) -> Result<MetadataDocument, ParseError> {
    let obj = doc.as_object().ok_or(ParseError::UnsupportedShape)?;
    let info = parse_general_info(obj)?;

    if let Some(images) = obj.get("images") {
        let images = parse_images(images, &info)?;
        return Ok(MetadataDocument::Flat { info, images });
    }

    if let Some(tiles) = obj.get("availableTiles") {
        let keys = tiles
            .as_array()
            .ok_or_else(|| ParseError::invalid("availableTiles", "expected an array"))?;
        let mut available_tiles = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key
                .as_str()
                .ok_or_else(|| ParseError::invalid("availableTiles", "expected tile keys"))?;
            let tile = key
                .parse::<TileCoordinate>()
                .map_err(|e| ParseError::invalid("availableTiles", e.to_string()))?;
            available_tiles.push(tile);
        }
        return Ok(MetadataDocument::Tiled {
            info,
            available_tiles,
        });
    }

    Err(ParseError::UnsupportedShape)
}

/// Parses one tile document. A tile may repeat the camera block; otherwise the cameras of the
/// parent document are used.
pub fn parse_tile_images(
    doc: &Value,
    parent: &GeneralImageInfo,
) -> Result<Vec<ImageParams>, ParseError> {
    let obj = doc.as_object().ok_or(ParseError::UnsupportedShape)?;
    let images = obj.get("images").ok_or_else(|| ParseError::missing("images"))?;
    if obj.contains_key("generalImageInfo") {
        let info = parse_general_info(obj)?;
        parse_images(images, &info)
    } else {
        parse_images(images, parent)
    }
}

fn parse_general_info(doc: &Map<String, Value>) -> Result<GeneralImageInfo, ParseError> {
    let empty = Map::new();
    let info = match doc.get("generalImageInfo") {
        Some(Value::Object(o)) => o,
        Some(_) => return Err(ParseError::invalid("generalImageInfo", "expected an object")),
        None => &empty,
    };

    let size = match info.get("size") {
        Some(v) => pair("size", v)?,
        None => DEFAULT_IMAGE_SIZE,
    };
    let tile_size = match info.get("tile-size") {
        Some(v) => {
            let [w, h] = pair("tile-size", v)?;
            [w as u32, h as u32]
        }
        None => DEFAULT_TILE_SIZE,
    };
    let tile_resolution = match info.get("tile-resolution") {
        Some(v) => numbers("tile-resolution", v)?,
        None => Vec::new(),
    };
    let version = info
        .get("version")
        .or_else(|| doc.get("version"))
        .and_then(parse_version);

    let mut cameras = Vec::new();
    match info.get("cameraParameter") {
        Some(Value::Array(list)) => {
            for (index, entry) in list.iter().enumerate() {
                let fallback = format!("camera-{index}");
                cameras.push(Arc::new(parse_camera(
                    entry,
                    &fallback,
                    size,
                    tile_size,
                    &tile_resolution,
                )?));
            }
        }
        Some(Value::Object(by_name)) => {
            for (name, entry) in by_name {
                cameras.push(Arc::new(parse_camera(
                    entry,
                    name,
                    size,
                    tile_size,
                    &tile_resolution,
                )?));
            }
        }
        Some(_) => {
            return Err(ParseError::invalid(
                "cameraParameter",
                "expected an array or object",
            ));
        }
        None => {}
    }

    if cameras.is_empty() {
        let mut camera = CameraModel::ideal("default", size);
        camera.tile_size = tile_size;
        camera.tile_resolution_levels = tile_resolution.clone();
        cameras.push(Arc::new(camera));
    }

    Ok(GeneralImageInfo {
        size,
        tile_size,
        tile_resolution,
        cameras,
        version,
    })
}

fn parse_camera(
    value: &Value,
    fallback_name: &str,
    size: [f64; 2],
    tile_size: [u32; 2],
    tile_resolution: &[f64],
) -> Result<CameraModel, ParseError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::invalid("cameraParameter", "expected an object"))?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(fallback_name);

    let size = match obj.get("size") {
        Some(v) => pair("size", v)?,
        None => size,
    };
    let mut camera = CameraModel::ideal(name, size);
    camera.tile_size = tile_size;
    camera.tile_resolution_levels = tile_resolution.to_vec();
    if let Some(v) = obj.get("principal-point") {
        camera.principal_point = Vec2::from_array(pair("principal-point", v)?);
    }
    if let Some(v) = obj.get("pixel-size") {
        camera.pixel_size = Vec2::from_array(pair("pixel-size", v)?);
    }
    if let Some(v) = obj.get("radial-distorsion-found-2-expected") {
        camera.distortion_forward = numbers("radial-distorsion-found-2-expected", v)?;
    }
    if let Some(v) = obj.get("radial-distorsion-expected-2-found") {
        camera.distortion_inverse = numbers("radial-distorsion-expected-2-found", v)?;
    }
    Ok(camera)
}

fn parse_images(value: &Value, info: &GeneralImageInfo) -> Result<Vec<ImageParams>, ParseError> {
    let list = value
        .as_array()
        .ok_or_else(|| ParseError::invalid("images", "expected an array"))?;
    list.iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Array(fields) => parse_positional_image(fields, info),
            Value::Object(fields) => parse_legacy_image(fields, info),
            _ => Err(ParseError::invalid(
                format!("images[{index}]"),
                "expected an array or object",
            )),
        })
        .collect()
}

fn parse_positional_image(
    fields: &[Value],
    info: &GeneralImageInfo,
) -> Result<ImageParams, ParseError> {
    let field = |i: usize| fields.get(i).filter(|v| !v.is_null());

    let name = field(0)
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::missing("images[].name"))?
        .to_string();
    let camera = match field(1) {
        Some(Value::Number(n)) => {
            let index = n
                .as_u64()
                .ok_or_else(|| ParseError::invalid("cameraIndex", "expected an index"))?;
            info.cameras
                .get(index as usize)
                .cloned()
                .ok_or_else(|| ParseError::UnknownCamera {
                    image: name.clone(),
                    camera: index.to_string(),
                })?
        }
        Some(Value::String(camera)) => lookup_camera(info, &name, camera)?,
        Some(_) => return Err(ParseError::invalid("cameraIndex", "expected an index")),
        None => default_camera(info)?,
    };
    let view_direction = match field(2) {
        Some(v) => view_direction(v)?,
        None => return Err(ParseError::missing("viewDirection")),
    };
    let view_direction_angle = field(3).and_then(Value::as_f64);
    let ground_footprint = match field(4) {
        Some(v) => footprint(v)?,
        None => return Err(ParseError::missing("groundCoordinates")),
    };
    let ground_center = field(5)
        .map(|v| pair("centerPointOnGround", v).map(Vec2::from_array))
        .transpose()?;
    let projection_center = field(6)
        .map(|v| triple("projectionCenter", v).map(Vec3::from_array))
        .transpose()?;
    let pixel_to_world = field(7).map(mat3).transpose()?;
    let world_to_pixel = field(8).map(mat4).transpose()?;

    Ok(ImageParams {
        name,
        view_direction,
        view_direction_angle,
        camera,
        ground_footprint,
        ground_center,
        projection_center,
        pixel_to_world,
        world_to_pixel,
    })
}

fn parse_legacy_image(
    fields: &Map<String, Value>,
    info: &GeneralImageInfo,
) -> Result<ImageParams, ParseError> {
    let field = |key: &str| fields.get(key).filter(|v| !v.is_null());

    let name = field("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::missing("name"))?
        .to_string();
    let camera = match field("camera-name").and_then(Value::as_str) {
        Some(camera) => lookup_camera(info, &name, camera)?,
        None => default_camera(info)?,
    };
    let view_direction = match field("view-direction") {
        Some(v) => view_direction(v)?,
        None => return Err(ParseError::missing("view-direction")),
    };
    let view_direction_angle = if info.version.is_some_and(|v| v >= MIN_ANGLE_VERSION) {
        field("view-direction-angle").and_then(Value::as_f64)
    } else {
        None
    };
    let ground_footprint = match field("groundCoordinates") {
        Some(v) => footprint(v)?,
        None => return Err(ParseError::missing("groundCoordinates")),
    };
    let ground_center = field("centerPointOnGround")
        .map(|v| pair("centerPointOnGround", v).map(Vec2::from_array))
        .transpose()?;
    let projection_center = field("projection-center")
        .map(|v| triple("projection-center", v).map(Vec3::from_array))
        .transpose()?;
    let pixel_to_world = field("pToRealworld").map(mat3).transpose()?;
    let world_to_pixel = field("pToImage").map(mat4).transpose()?;

    Ok(ImageParams {
        name,
        view_direction,
        view_direction_angle,
        camera,
        ground_footprint,
        ground_center,
        projection_center,
        pixel_to_world,
        world_to_pixel,
    })
}

fn lookup_camera(
    info: &GeneralImageInfo,
    image: &str,
    camera: &str,
) -> Result<Arc<CameraModel>, ParseError> {
    info.camera_by_name(camera)
        .cloned()
        .ok_or_else(|| ParseError::UnknownCamera {
            image: image.to_string(),
            camera: camera.to_string(),
        })
}

fn default_camera(info: &GeneralImageInfo) -> Result<Arc<CameraModel>, ParseError> {
    info.cameras
        .first()
        .cloned()
        .ok_or_else(|| ParseError::missing("cameraParameter"))
}

fn view_direction(value: &Value) -> Result<ViewDirection, ParseError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(ViewDirection::from_code)
            .ok_or_else(|| ParseError::invalid("viewDirection", format!("unknown code {n}"))),
        Value::String(s) => s
            .parse::<ViewDirection>()
            .map_err(|e| ParseError::invalid("viewDirection", e)),
        _ => Err(ParseError::invalid(
            "viewDirection",
            "expected a code or name",
        )),
    }
}

fn parse_version(value: &Value) -> Option<(u32, u32)> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let mut parts = text.trim_start_matches(['v', 'V']).split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

fn numbers(field: &str, value: &Value) -> Result<Vec<f64>, ParseError> {
    let list = value
        .as_array()
        .ok_or_else(|| ParseError::invalid(field, "expected an array of numbers"))?;
    list.iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| ParseError::invalid(field, "expected an array of numbers"))
        })
        .collect()
}

fn fixed<const N: usize>(field: &str, value: &Value) -> Result<[f64; N], ParseError> {
    let values = numbers(field, value)?;
    values.try_into().map_err(|v: Vec<f64>| {
        ParseError::invalid(field, format!("expected {N} values, got {}", v.len()))
    })
}

fn pair(field: &str, value: &Value) -> Result<[f64; 2], ParseError> {
    let values = numbers(field, value)?;
    match values.as_slice() {
        [x, y, ..] => Ok([*x, *y]),
        _ => Err(ParseError::invalid(field, "expected at least 2 values")),
    }
}

fn triple(field: &str, value: &Value) -> Result<[f64; 3], ParseError> {
    fixed::<3>(field, value)
}

/// Four corners, each `[x, y]` or `[x, y, z]`.
fn footprint(value: &Value) -> Result<[Vec3; 4], ParseError> {
    const FIELD: &str = "groundCoordinates";
    let corners = value
        .as_array()
        .ok_or_else(|| ParseError::invalid(FIELD, "expected 4 corners"))?;
    if corners.len() != 4 {
        return Err(ParseError::invalid(
            FIELD,
            format!("expected 4 corners, got {}", corners.len()),
        ));
    }
    let mut out = [Vec3::default(); 4];
    for (slot, corner) in out.iter_mut().zip(corners) {
        let c = numbers(FIELD, corner)?;
        *slot = match c.as_slice() {
            [x, y] => Vec3::new(*x, *y, 0.0),
            [x, y, z, ..] => Vec3::new(*x, *y, *z),
            _ => return Err(ParseError::invalid(FIELD, "corner needs x and y")),
        };
    }
    Ok(out)
}

/// Nested rows or a flat row-major list.
fn flatten_matrix(field: &str, value: &Value) -> Result<Vec<f64>, ParseError> {
    let rows = value
        .as_array()
        .ok_or_else(|| ParseError::invalid(field, "expected a matrix"))?;
    if rows.iter().all(Value::is_array) {
        let mut out = Vec::new();
        for row in rows {
            out.extend(numbers(field, row)?);
        }
        Ok(out)
    } else {
        numbers(field, value)
    }
}

fn mat3(value: &Value) -> Result<Mat3, ParseError> {
    const FIELD: &str = "pToRealworldMatrix";
    let v = flatten_matrix(FIELD, value)?;
    if v.len() != 9 {
        return Err(ParseError::invalid(
            FIELD,
            format!("expected 9 values, got {}", v.len()),
        ));
    }
    Ok(Mat3::new([
        [v[0], v[1], v[2]],
        [v[3], v[4], v[5]],
        [v[6], v[7], v[8]],
    ]))
}

fn mat4(value: &Value) -> Result<Mat4, ParseError> {
    const FIELD: &str = "pToImageMatrix";
    let v = flatten_matrix(FIELD, value)?;
    let row = |r: usize| [v[r * 4], v[r * 4 + 1], v[r * 4 + 2], v[r * 4 + 3]];
    match v.len() {
        12 => Ok(Mat4::from_3x4([row(0), row(1), row(2)])),
        16 => Ok(Mat4::new([row(0), row(1), row(2), row(3)])),
        n => Err(ParseError::invalid(
            FIELD,
            format!("expected 12 or 16 values, got {n}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{MetadataDocument, parse_document, parse_tile_images};
    use crate::direction::ViewDirection;
    use crate::error::ParseError;
    use foundation::math::Vec2;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use streaming::TileCoordinate;

    fn camera_block() -> serde_json::Value {
        json!({
            "size": [4000, 3000],
            "tile-size": [256, 256],
            "tile-resolution": [1, 2, 4],
            "cameraParameter": [
                {
                    "name": "left",
                    "principal-point": [2001.5, 1498.0],
                    "pixel-size": [0.0046, 0.0046],
                    "radial-distorsion-expected-2-found": [0.0, -1e-6],
                    "radial-distorsion-found-2-expected": [0.0, 1e-6]
                },
                { "name": "right", "size": [3000, 4000] }
            ]
        })
    }

    #[test]
    fn parses_flat_positional_document() {
        let doc = json!({
            "generalImageInfo": camera_block(),
            "images": [[
                "img_1", 1, 2, 91.5,
                [[0, 0, 5], [10, 0, 5], [10, 10, 5], [0, 10, 5]],
                [5, 5],
                [5, -20, 300],
                [[1, 0, 0], [0, 1, 0], [0, 0, -1]],
                [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0]
            ]]
        });
        let MetadataDocument::Flat { info, images } = parse_document(&doc).expect("flat") else {
            panic!("expected a flat document");
        };
        assert_eq!(info.cameras.len(), 2);
        assert_eq!(info.tile_size, [256, 256]);
        assert_eq!(info.cameras[0].principal_point, Vec2::new(2001.5, 1498.0));
        assert_eq!(info.cameras[0].distortion_forward, vec![0.0, 1e-6]);
        assert_eq!(info.cameras[1].nominal_image_size, [3000.0, 4000.0]);
        assert_eq!(info.cameras[1].principal_point, Vec2::new(1500.0, 2000.0));

        let image = &images[0];
        assert_eq!(image.name, "img_1");
        assert_eq!(image.camera.name, "right");
        assert_eq!(image.view_direction, ViewDirection::East);
        assert_eq!(image.view_direction_angle, Some(91.5));
        assert_eq!(image.ground_footprint[2].z, 5.0);
        assert_eq!(image.ground_center, Some(Vec2::new(5.0, 5.0)));
        assert!(image.pixel_to_world.is_some());
        assert!(image.world_to_pixel.is_some());
    }

    #[test]
    fn parses_legacy_objects_and_gates_angle_on_version() {
        let image = json!({
            "name": "old",
            "camera-name": "left",
            "view-direction": "west",
            "view-direction-angle": 270.0,
            "groundCoordinates": [[0, 0], [1, 0], [1, 1], [0, 1]],
            "projection-center": [0.5, 0.5, 100]
        });
        let mut info = camera_block();
        info["version"] = json!("3.3");
        let doc = json!({ "generalImageInfo": info, "images": [image.clone()] });
        let MetadataDocument::Flat { images, .. } = parse_document(&doc).expect("legacy") else {
            panic!("expected a flat document");
        };
        assert_eq!(images[0].view_direction, ViewDirection::West);
        assert_eq!(images[0].view_direction_angle, None);
        assert_eq!(images[0].camera.name, "left");
        assert!(images[0].pixel_to_world.is_none());

        let mut info = camera_block();
        info["version"] = json!("3.4.1");
        let doc = json!({ "generalImageInfo": info, "images": [image] });
        let MetadataDocument::Flat { images, .. } = parse_document(&doc).expect("legacy") else {
            panic!("expected a flat document");
        };
        assert_eq!(images[0].view_direction_angle, Some(270.0));
    }

    #[test]
    fn parses_tiled_document_and_tiles() {
        let doc = json!({
            "generalImageInfo": camera_block(),
            "availableTiles": ["5/1/1", "5/2/1"]
        });
        let parsed = parse_document(&doc).expect("tiled");
        let MetadataDocument::Tiled {
            info,
            available_tiles,
        } = parsed
        else {
            panic!("expected a tiled document");
        };
        assert_eq!(
            available_tiles,
            vec![TileCoordinate::new(5, 1, 1), TileCoordinate::new(5, 2, 1)]
        );

        let tile = json!({
            "images": [["t", 0, 5, null, [[0, 0], [1, 0], [1, 1], [0, 1]], null, null, null, null]]
        });
        let images = parse_tile_images(&tile, &info).expect("tile");
        assert_eq!(images[0].camera.name, "left");
        assert_eq!(images[0].view_direction, ViewDirection::Nadir);
        assert_eq!(images[0].ground_center, None);
    }

    #[test]
    fn rejects_malformed_documents() {
        assert_eq!(
            parse_document(&json!({ "generalImageInfo": camera_block() })).unwrap_err(),
            ParseError::UnsupportedShape
        );
        let bad_camera = json!({
            "generalImageInfo": camera_block(),
            "images": [["x", 7, 1, null, [[0, 0], [1, 0], [1, 1], [0, 1]]]]
        });
        assert_eq!(
            parse_document(&bad_camera).unwrap_err(),
            ParseError::UnknownCamera {
                image: "x".to_string(),
                camera: "7".to_string()
            }
        );
        let short_footprint = json!({
            "images": [["x", 0, 1, null, [[0, 0], [1, 0], [1, 1]]]]
        });
        assert!(matches!(
            parse_document(&short_footprint),
            Err(ParseError::InvalidField { .. })
        ));
        assert!(matches!(
            parse_document(&json!({ "availableTiles": ["5/1"] })),
            Err(ParseError::InvalidField { .. })
        ));
    }

    #[test]
    fn missing_camera_block_uses_ideal_camera() {
        let doc = json!({
            "images": [["x", null, "north", null, [[0, 0], [1, 0], [1, 1], [0, 1]]]]
        });
        let MetadataDocument::Flat { info, images } = parse_document(&doc).expect("flat") else {
            panic!("expected a flat document");
        };
        assert_eq!(info.cameras.len(), 1);
        assert_eq!(images[0].camera.name, "default");
        assert!(images[0].camera.distortion_forward.is_empty());
    }
}
