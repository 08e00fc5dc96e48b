//! Aggregation of several oblique data sets.
//!
//! The collection keeps a union of every source's images (first source wins on a name clash),
//! merges load states across sources, and picks the image to show for a ground coordinate.
//! All coordinates here are web mercator meters.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use foundation::Extent;
use foundation::math::Vec2;
use futures_util::future::join_all;
use parking_lot::RwLock;
use runtime::{ListenerKey, Notifier};
use streaming::{DataState, Fetcher, TileCoordinate, merge_states};

use crate::dataset::{ImagesLoaded, ObliqueDataSet};
use crate::direction::ViewDirection;
use crate::error::ImageryError;
use crate::image::ObliqueImage;
use crate::options::{CollectionOptions, DataSetOptions};

/// Read-only projection of an image for map display.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeature {
    pub name: String,
    pub view_direction: ViewDirection,
    pub footprint: [Vec2; 4],
    pub center: Vec2,
}

/// Read-only projection of a tile and its merged state for map display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileFeature {
    pub tile: TileCoordinate,
    pub state: DataState,
}

/// Outcome of [`ObliqueCollection::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, ImageryError)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ObliqueCollection {
    name: String,
    min_zoom: u8,
    max_zoom: u8,
    fetcher: Arc<dyn Fetcher>,
    shared: Arc<Shared>,
}

struct Shared {
    index: RwLock<CollectionIndex>,
    data_sets: RwLock<Vec<Registered>>,
    loaded: AtomicBool,
    images_loaded: Notifier<ImagesLoaded>,
}

struct Registered {
    data_set: Arc<ObliqueDataSet>,
    listener: ListenerKey,
}

#[derive(Default)]
struct CollectionIndex {
    images: Vec<Arc<ObliqueImage>>,
    by_name: HashMap<String, Arc<ObliqueImage>>,
    image_features: BTreeMap<String, ImageFeature>,
    tile_features: BTreeMap<TileCoordinate, TileFeature>,
}

impl CollectionIndex {
    fn merge(&mut self, images: &[Arc<ObliqueImage>]) -> Vec<Arc<ObliqueImage>> {
        let mut added = Vec::new();
        for image in images {
            if self.by_name.contains_key(image.name()) {
                continue;
            }
            self.by_name
                .insert(image.name().to_string(), image.clone());
            self.image_features.insert(
                image.name().to_string(),
                ImageFeature {
                    name: image.name().to_string(),
                    view_direction: image.view_direction(),
                    footprint: *image.footprint_mercator(),
                    center: image.center_mercator(),
                },
            );
            self.images.push(image.clone());
            added.push(image.clone());
        }
        added
    }
}

impl Shared {
    fn snapshot(&self) -> Vec<Arc<ObliqueDataSet>> {
        self.data_sets
            .read()
            .iter()
            .map(|r| r.data_set.clone())
            .collect()
    }

    fn merged_tiles(&self) -> BTreeMap<TileCoordinate, DataState> {
        let mut merged: BTreeMap<TileCoordinate, DataState> = BTreeMap::new();
        for data_set in self.snapshot() {
            for (tile, state) in data_set.tile_states() {
                merged
                    .entry(tile)
                    .and_modify(|s| *s = (*s).min(state))
                    .or_insert(state);
            }
        }
        merged
    }

    fn refresh_tile_features(&self) {
        let tiles = self.merged_tiles();
        self.index.write().tile_features = tiles
            .into_iter()
            .map(|(tile, state)| (tile, TileFeature { tile, state }))
            .collect();
    }

    fn on_images_loaded(&self, event: &ImagesLoaded) {
        let added = self.index.write().merge(&event.images);
        if event.tile.is_some() {
            self.refresh_tile_features();
        }
        if !added.is_empty() || event.tile.is_some() {
            self.images_loaded.emit(&ImagesLoaded {
                images: added,
                tile: event.tile,
            });
        }
    }
}

impl std::fmt::Debug for ObliqueCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObliqueCollection")
            .field("name", &self.name)
            .field("data_sets", &self.shared.data_sets.read().len())
            .field("images", &self.shared.index.read().images.len())
            .finish()
    }
}

impl ObliqueCollection {
    pub fn new(name: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        let defaults = CollectionOptions::default();
        Self {
            name: name.into(),
            min_zoom: defaults.min_zoom,
            max_zoom: defaults.max_zoom,
            fetcher,
            shared: Arc::new(Shared {
                index: RwLock::new(CollectionIndex::default()),
                data_sets: RwLock::new(Vec::new()),
                loaded: AtomicBool::new(false),
                images_loaded: Notifier::new(),
            }),
        }
    }

    /// Builds an unloaded collection with one data set per configured source.
    pub fn from_options(options: &CollectionOptions, fetcher: Arc<dyn Fetcher>) -> Self {
        let mut collection = Self::new(options.name.clone(), fetcher);
        collection.min_zoom = options.min_zoom;
        collection.max_zoom = options.max_zoom;
        for data_set in &options.data_sets {
            collection.register(Arc::new(ObliqueDataSet::from_options(
                data_set,
                collection.fetcher.clone(),
            )));
        }
        collection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    /// Fired whenever a source contributes images (or a tile finishes), with the images that
    /// were new to the collection.
    pub fn images_loaded(&self) -> &Notifier<ImagesLoaded> {
        &self.shared.images_loaded
    }

    pub fn data_sets(&self) -> Vec<Arc<ObliqueDataSet>> {
        self.shared.snapshot()
    }

    pub fn images(&self) -> Vec<Arc<ObliqueImage>> {
        self.shared.index.read().images.clone()
    }

    pub fn get_image_by_name(&self, name: &str) -> Option<Arc<ObliqueImage>> {
        self.shared.index.read().by_name.get(name).cloned()
    }

    pub fn image_features(&self) -> BTreeMap<String, ImageFeature> {
        self.shared.index.read().image_features.clone()
    }

    pub fn tile_features(&self) -> BTreeMap<TileCoordinate, TileFeature> {
        self.shared.index.read().tile_features.clone()
    }

    fn register(&self, data_set: Arc<ObliqueDataSet>) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let listener = data_set.images_loaded().subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_images_loaded(event);
            }
        });
        self.shared.index.write().merge(&data_set.images());
        self.shared.data_sets.write().push(Registered {
            data_set,
            listener,
        });
        self.shared.refresh_tile_features();
    }

    /// Registers a source. If the collection was loaded already, the source is loaded right
    /// away; the error of that load is returned but the source stays registered.
    pub async fn add_data_set(&self, data_set: Arc<ObliqueDataSet>) -> Result<(), ImageryError> {
        self.register(data_set.clone());
        if self.is_loaded() {
            data_set.load().await?;
            self.shared.refresh_tile_features();
        }
        Ok(())
    }

    pub async fn add_data_set_options(
        &self,
        options: &DataSetOptions,
    ) -> Result<Arc<ObliqueDataSet>, ImageryError> {
        let data_set = Arc::new(ObliqueDataSet::from_options(options, self.fetcher.clone()));
        self.add_data_set(data_set.clone()).await?;
        Ok(data_set)
    }

    /// Unregisters every source with this URL and drops images no remaining source provides.
    pub fn remove_data_set(&self, url: &str) -> bool {
        let removed: Vec<Registered> = {
            let mut data_sets = self.shared.data_sets.write();
            let (removed, kept): (Vec<Registered>, Vec<Registered>) = std::mem::take(&mut *data_sets)
                .into_iter()
                .partition(|r| r.data_set.url() == url);
            *data_sets = kept;
            removed
        };
        if removed.is_empty() {
            return false;
        }
        for r in &removed {
            r.data_set.images_loaded().unsubscribe(r.listener);
        }

        let mut index = CollectionIndex::default();
        for data_set in self.shared.snapshot() {
            index.merge(&data_set.images());
        }
        *self.shared.index.write() = index;
        self.shared.refresh_tile_features();
        true
    }

    /// Loads every source in parallel. One source failing does not stop the others.
    pub async fn load(&self) -> LoadReport {
        let data_sets = self.shared.snapshot();
        let results = join_all(data_sets.iter().map(|ds| ds.load())).await;
        self.shared.loaded.store(true, Ordering::Release);

        let mut report = LoadReport::default();
        for (data_set, result) in data_sets.iter().zip(results) {
            match result {
                Ok(()) => report.loaded.push(data_set.url().to_string()),
                Err(e) => {
                    tracing::warn!("failed to load oblique data set {}: {e}", data_set.url());
                    report.failed.push((data_set.url().to_string(), e));
                }
            }
        }
        self.shared.refresh_tile_features();
        tracing::info!(
            "{}: {} of {} data sets loaded, {} images",
            self.name,
            report.loaded.len(),
            data_sets.len(),
            self.shared.index.read().images.len()
        );
        report
    }

    /// Union of every tiled source's tiles with the worst state among sources declaring each.
    pub fn get_tiles(&self) -> BTreeMap<TileCoordinate, DataState> {
        self.shared.merged_tiles()
    }

    pub fn get_data_state_for_coordinate(&self, coordinate: Vec2) -> DataState {
        merge_states(
            self.shared
                .snapshot()
                .iter()
                .map(|ds| ds.get_data_state_for_coordinate(coordinate)),
        )
        .unwrap_or(DataState::Pending)
    }

    pub fn get_data_state_for_extent(&self, extent: &Extent) -> DataState {
        merge_states(
            self.shared
                .snapshot()
                .iter()
                .map(|ds| ds.get_data_state_for_extent(extent)),
        )
        .unwrap_or(DataState::Pending)
    }

    /// Loads the data around `coordinate` from every source. Tiled sources without a tile
    /// there load their nearest one.
    pub async fn load_data_for_coordinate(&self, coordinate: Vec2) {
        let data_sets = self.shared.snapshot();
        let results = join_all(
            data_sets
                .iter()
                .map(|ds| ds.load_data_for_coordinate(coordinate)),
        )
        .await;
        self.finish_data_load(&data_sets, results);
    }

    pub async fn load_data_for_extent(&self, extent: &Extent) {
        let data_sets = self.shared.snapshot();
        let results = join_all(data_sets.iter().map(|ds| ds.load_data_for_extent(extent))).await;
        self.finish_data_load(&data_sets, results);
    }

    fn finish_data_load(
        &self,
        data_sets: &[Arc<ObliqueDataSet>],
        results: Vec<Result<(), ImageryError>>,
    ) {
        for (data_set, result) in data_sets.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("failed to load oblique data from {}: {e}", data_set.url());
            }
        }
        self.shared.refresh_tile_features();
    }

    /// Picks among loaded images: those whose footprint contains `coordinate`, otherwise the
    /// one with the closest center. `direction` is a preference; when no candidate looks that
    /// way the first candidate is returned.
    pub fn get_image_for_coordinate(
        &self,
        coordinate: Vec2,
        direction: ViewDirection,
    ) -> Option<Arc<ObliqueImage>> {
        let index = self.shared.index.read();
        let mut candidates: Vec<&Arc<ObliqueImage>> = index
            .images
            .iter()
            .filter(|image| image.contains_ground(coordinate))
            .collect();
        if candidates.is_empty() {
            candidates.extend(index.images.iter().min_by(|a, b| {
                let da = a.center_mercator().distance(coordinate);
                let db = b.center_mercator().distance(coordinate);
                da.total_cmp(&db)
            }));
        }

        let chosen = candidates
            .iter()
            .filter(|image| image.view_direction() == direction)
            .min_by(|a, b| {
                let da = a.center_mercator().distance(coordinate);
                let db = b.center_mercator().distance(coordinate);
                da.total_cmp(&db)
            })
            .or_else(|| candidates.first())
            .map(|image| Arc::clone(*image));
        chosen
    }

    pub async fn load_image_for_coordinate(
        &self,
        coordinate: Vec2,
        direction: ViewDirection,
    ) -> Option<Arc<ObliqueImage>> {
        self.load_data_for_coordinate(coordinate).await;
        self.get_image_for_coordinate(coordinate, direction)
    }

    /// Like [`Self::load_image_for_coordinate`], but only true when the footprint of the
    /// chosen image really contains `coordinate`.
    pub async fn has_image_at_coordinate(
        &self,
        coordinate: Vec2,
        direction: ViewDirection,
    ) -> bool {
        self.load_image_for_coordinate(coordinate, direction)
            .await
            .is_some_and(|image| image.contains_ground(coordinate))
    }

    /// The neighbour of `image` in compass `bearing` (degrees, 0 = north, 90 = east) with the
    /// same view direction, or `None` when the loaded data holds no such image.
    pub async fn load_adjacent_image(
        &self,
        image: &ObliqueImage,
        bearing: f64,
    ) -> Option<Arc<ObliqueImage>> {
        let extent = image.extent_mercator();
        let step = (extent.width() + extent.height()) / 4.0;
        let heading = Vec2::new(bearing.to_radians().sin(), bearing.to_radians().cos());
        let origin = image.center_mercator();
        let target = origin + heading.scale(step);

        self.load_data_for_extent(&Extent::around(target, step.max(1.0)))
            .await;

        let index = self.shared.index.read();
        let neighbour = index
            .images
            .iter()
            .filter(|c| c.name() != image.name())
            .filter(|c| c.view_direction() == image.view_direction())
            .filter(|c| (c.center_mercator() - origin).dot(heading) > 0.0)
            .min_by(|a, b| {
                let da = a.center_mercator().distance(target);
                let db = b.center_mercator().distance(target);
                da.total_cmp(&db)
            })
            .cloned();
        neighbour
    }
}

impl Drop for ObliqueCollection {
    fn drop(&mut self) {
        for r in self.shared.data_sets.read().iter() {
            r.data_set.images_loaded().unsubscribe(r.listener);
        }
    }
}
