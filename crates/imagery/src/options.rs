use std::sync::Arc;

use foundation::math::{Projection, WebMercator, Wgs84};
use serde::{Deserialize, Serialize};

/// Ground reference a data source publishes its coordinates in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProjectionKind {
    #[default]
    #[serde(rename = "EPSG:3857", alias = "webMercator", alias = "EPSG:900913")]
    WebMercator,
    #[serde(rename = "EPSG:4326", alias = "wgs84")]
    Wgs84,
}

impl ProjectionKind {
    pub fn into_projection(self) -> Arc<dyn Projection> {
        match self {
            ProjectionKind::WebMercator => Arc::new(WebMercator),
            ProjectionKind::Wgs84 => Arc::new(Wgs84),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetOptions {
    pub url: String,
    #[serde(default)]
    pub projection: ProjectionKind,
}

impl DataSetOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            projection: ProjectionKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOptions {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_min_zoom")]
    pub min_zoom: u8,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default)]
    pub data_sets: Vec<DataSetOptions>,
}

fn default_min_zoom() -> u8 {
    0
}

fn default_max_zoom() -> u8 {
    22
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            data_sets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectionOptions, DataSetOptions, ProjectionKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_with_defaults() {
        let options: CollectionOptions = serde_json::from_str(
            r#"{
                "name": "city",
                "maxZoom": 20,
                "dataSets": [
                    { "url": "https://host/a/" },
                    { "url": "https://host/b/image.json", "projection": "EPSG:4326" }
                ]
            }"#,
        )
        .expect("options");
        assert_eq!(
            options,
            CollectionOptions {
                name: "city".to_string(),
                min_zoom: 0,
                max_zoom: 20,
                data_sets: vec![
                    DataSetOptions::new("https://host/a/"),
                    DataSetOptions {
                        url: "https://host/b/image.json".to_string(),
                        projection: ProjectionKind::Wgs84,
                    },
                ],
            }
        );
        assert_eq!(
            ProjectionKind::Wgs84.into_projection().name(),
            "EPSG:4326"
        );
    }
}
