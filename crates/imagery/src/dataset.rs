//! One source of oblique metadata.
//!
//! A flat source becomes ready as soon as its document is parsed. A tiled source only learns
//! its available tiles from the document; images arrive tile by tile as callers ask for the
//! data around a coordinate or extent.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use foundation::Extent;
use foundation::math::{Projection, Vec2};
use futures_util::future::join_all;
use parking_lot::RwLock;
use runtime::Notifier;
use serde_json::Value;
use streaming::{
    DEFAULT_DOCUMENT, DataState, Fetcher, TileCoordinate, merge_states, normalize_source_url,
};
use tokio::sync::OnceCell;

use crate::camera::CameraModel;
use crate::error::ImageryError;
use crate::image::ObliqueImage;
use crate::metadata::{GeneralImageInfo, MetadataDocument, parse_document, parse_tile_images};
use crate::options::DataSetOptions;

/// Emitted once per parsed document: the flat document itself, or one tile.
#[derive(Debug, Clone)]
pub struct ImagesLoaded {
    pub images: Vec<Arc<ObliqueImage>>,
    pub tile: Option<TileCoordinate>,
}

pub struct ObliqueDataSet {
    url: String,
    base_url: String,
    projection: Arc<dyn Projection>,
    fetcher: Arc<dyn Fetcher>,
    inner: RwLock<Inner>,
    load_cell: OnceCell<()>,
    images_loaded: Notifier<ImagesLoaded>,
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    state: DataState,
    info: Option<GeneralImageInfo>,
    tiling: Option<Tiling>,
    images: Vec<Arc<ObliqueImage>>,
    names: HashSet<String>,
}

struct Tiling {
    level: u8,
    tiles: BTreeMap<TileCoordinate, TileSlot>,
}

struct TileSlot {
    state: DataState,
    cell: Arc<OnceCell<()>>,
}

impl Tiling {
    /// Available tiles intersecting `extent`.
    fn covered(&self, extent: &Extent) -> Vec<TileCoordinate> {
        let top_left =
            TileCoordinate::for_point(Vec2::new(extent.min[0], extent.max[1]), self.level);
        let bottom_right =
            TileCoordinate::for_point(Vec2::new(extent.max[0], extent.min[1]), self.level);
        self.tiles
            .keys()
            .filter(|t| {
                (top_left.x..=bottom_right.x).contains(&t.x)
                    && (top_left.y..=bottom_right.y).contains(&t.y)
            })
            .copied()
            .collect()
    }

    /// `target` itself when it is available, otherwise the closest available tile.
    fn nearest(&self, target: &TileCoordinate) -> Option<TileCoordinate> {
        if self.tiles.contains_key(target) {
            return Some(*target);
        }
        self.tiles
            .keys()
            .min_by_key(|t| t.grid_distance_squared(target))
            .copied()
    }

    /// The tile answering for `coordinate`.
    fn for_coordinate(&self, coordinate: Vec2) -> Option<TileCoordinate> {
        self.nearest(&TileCoordinate::for_point(coordinate, self.level))
    }

    /// Tiles answering for `extent`: those intersecting it, or the one nearest its center.
    fn for_extent(&self, extent: &Extent) -> Vec<TileCoordinate> {
        let covered = self.covered(extent);
        if !covered.is_empty() {
            return covered;
        }
        self.for_coordinate(extent.center()).into_iter().collect()
    }

    fn slots(
        &self,
        tiles: impl IntoIterator<Item = TileCoordinate>,
    ) -> Vec<(TileCoordinate, Arc<OnceCell<()>>)> {
        tiles
            .into_iter()
            .filter_map(|t| self.tiles.get(&t).map(|s| (t, s.cell.clone())))
            .collect()
    }

    fn state_of(&self, tiles: impl IntoIterator<Item = TileCoordinate>) -> Option<DataState> {
        merge_states(
            tiles
                .into_iter()
                .filter_map(|t| self.tiles.get(&t))
                .map(|s| s.state),
        )
    }
}

impl std::fmt::Debug for ObliqueDataSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ObliqueDataSet")
            .field("url", &self.url)
            .field("state", &inner.state)
            .field("tiled", &inner.tiling.is_some())
            .field("images", &inner.images.len())
            .finish()
    }
}

impl ObliqueDataSet {
    /// `url` may point at a document or at the directory holding `image.json`.
    pub fn new(url: &str, projection: Arc<dyn Projection>, fetcher: Arc<dyn Fetcher>) -> Self {
        let source = normalize_source_url(url);
        Self {
            url: source.url,
            base_url: source.base_url,
            projection,
            fetcher,
            inner: RwLock::new(Inner::default()),
            load_cell: OnceCell::new(),
            images_loaded: Notifier::new(),
        }
    }

    pub fn from_options(options: &DataSetOptions, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::new(&options.url, options.projection.into_projection(), fetcher)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    pub fn state(&self) -> DataState {
        self.inner.read().state
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().initialized
    }

    pub fn is_tiled(&self) -> bool {
        self.inner.read().tiling.is_some()
    }

    /// Zoom level of the tile index, once a tiled document has been read.
    pub fn tiling_level(&self) -> Option<u8> {
        self.inner.read().tiling.as_ref().map(|t| t.level)
    }

    pub fn images(&self) -> Vec<Arc<ObliqueImage>> {
        self.inner.read().images.clone()
    }

    pub fn camera_models(&self) -> Vec<Arc<CameraModel>> {
        self.inner
            .read()
            .info
            .as_ref()
            .map(|info| info.cameras.clone())
            .unwrap_or_default()
    }

    /// Per-tile states of a tiled source; empty for flat or uninitialized sources.
    pub fn tile_states(&self) -> BTreeMap<TileCoordinate, DataState> {
        self.inner
            .read()
            .tiling
            .as_ref()
            .map(|t| t.tiles.iter().map(|(k, s)| (*k, s.state)).collect())
            .unwrap_or_default()
    }

    pub fn images_loaded(&self) -> &Notifier<ImagesLoaded> {
        &self.images_loaded
    }

    /// Reads an already fetched document. Fails if a document was read before.
    pub fn initialize(&self, document: &Value) -> Result<(), ImageryError> {
        if self.inner.read().initialized {
            return Err(ImageryError::AlreadyInitialized {
                url: self.url.clone(),
            });
        }
        let parsed = parse_document(document)?;

        let event = {
            let mut inner = self.inner.write();
            if inner.initialized {
                return Err(ImageryError::AlreadyInitialized {
                    url: self.url.clone(),
                });
            }
            inner.initialized = true;
            match parsed {
                MetadataDocument::Flat { info, images } => {
                    inner.info = Some(info);
                    let images: Vec<_> = images
                        .into_iter()
                        .map(|p| Arc::new(ObliqueImage::new(p, self.projection.clone())))
                        .collect();
                    let added = inner.append(images);
                    inner.state.advance(DataState::Ready);
                    tracing::debug!("{}: {} images", self.url, added.len());
                    Some(ImagesLoaded {
                        images: added,
                        tile: None,
                    })
                }
                MetadataDocument::Tiled {
                    info,
                    available_tiles,
                } => {
                    inner.info = Some(info);
                    inner.tiling = Some(self.build_tiling(available_tiles));
                    inner.state.advance(DataState::Ready);
                    None
                }
            }
        };

        if let Some(event) = event {
            self.images_loaded.emit(&event);
        }
        Ok(())
    }

    fn build_tiling(&self, available: Vec<TileCoordinate>) -> Tiling {
        let level = available.iter().map(|t| t.zoom).max().unwrap_or(0);
        let mut tiles = BTreeMap::new();
        let mut skipped = 0usize;
        for tile in available {
            if tile.zoom != level {
                skipped += 1;
                continue;
            }
            tiles.insert(
                tile,
                TileSlot {
                    state: DataState::Pending,
                    cell: Arc::new(OnceCell::new()),
                },
            );
        }
        if skipped > 0 {
            tracing::warn!(
                "{}: ignoring {skipped} tiles not on tiling level {level}",
                self.url
            );
        }
        tracing::debug!("{}: {} tiles at level {level}", self.url, tiles.len());
        Tiling { level, tiles }
    }

    /// Fetches and reads the document. Concurrent callers share one request; after a failure
    /// the next call tries again.
    pub async fn load(&self) -> Result<(), ImageryError> {
        self.load_cell
            .get_or_try_init(|| async {
                let initialized = self.inner.read().initialized;
                if initialized {
                    return Ok(());
                }
                self.inner.write().state.advance(DataState::Loading);
                let document = self.fetcher.fetch_json(&self.url).await?;
                match self.initialize(&document) {
                    Err(ImageryError::AlreadyInitialized { .. }) => Ok(()),
                    other => other,
                }
            })
            .await
            .map(|_| ())
    }

    /// Loads the tile holding `coordinate`, or the nearest available tile when the index has
    /// a gap there.
    pub async fn load_data_for_coordinate(&self, coordinate: Vec2) -> Result<(), ImageryError> {
        self.load().await?;
        let tiles = {
            let inner = self.inner.read();
            match &inner.tiling {
                Some(tiling) => tiling.slots(tiling.for_coordinate(coordinate)),
                None => Vec::new(),
            }
        };
        self.load_tiles(tiles).await
    }

    pub async fn load_data_for_extent(&self, extent: &Extent) -> Result<(), ImageryError> {
        self.load().await?;
        let tiles = {
            let inner = self.inner.read();
            match &inner.tiling {
                Some(tiling) => tiling.slots(tiling.for_extent(extent)),
                None => Vec::new(),
            }
        };
        self.load_tiles(tiles).await
    }

    /// Loads one tile of a tiled source.
    pub async fn load_tile(&self, tile: TileCoordinate) -> Result<(), ImageryError> {
        self.load().await?;
        let cell = {
            let inner = self.inner.read();
            let tiling = inner.tiling.as_ref().ok_or_else(|| ImageryError::NotTiled {
                url: self.url.clone(),
            })?;
            tiling.tiles.get(&tile).map(|s| s.cell.clone())
        };
        match cell {
            Some(cell) => self.load_tiles(vec![(tile, cell)]).await,
            None => Ok(()),
        }
    }

    async fn load_tiles(
        &self,
        tiles: Vec<(TileCoordinate, Arc<OnceCell<()>>)>,
    ) -> Result<(), ImageryError> {
        let results = join_all(
            tiles
                .iter()
                .map(|(tile, cell)| cell.get_or_try_init(|| self.fetch_tile(*tile))),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    async fn fetch_tile(&self, tile: TileCoordinate) -> Result<(), ImageryError> {
        self.set_tile_state(tile, DataState::Loading);
        let url = self.tile_url(&tile);
        tracing::debug!("loading tile {tile} from {url}");
        let document = self.fetcher.fetch_json(&url).await?;

        let event = {
            let mut inner = self.inner.write();
            let info = inner.info.as_ref().ok_or_else(|| ImageryError::NotTiled {
                url: self.url.clone(),
            })?;
            let params = parse_tile_images(&document, info)?;
            let images: Vec<_> = params
                .into_iter()
                .map(|p| Arc::new(ObliqueImage::new(p, self.projection.clone())))
                .collect();
            let added = inner.append(images);
            if let Some(slot) = inner.tiling.as_mut().and_then(|t| t.tiles.get_mut(&tile)) {
                slot.state.advance(DataState::Ready);
            }
            ImagesLoaded {
                images: added,
                tile: Some(tile),
            }
        };
        tracing::debug!("tile {tile}: {} images", event.images.len());
        self.images_loaded.emit(&event);
        Ok(())
    }

    fn set_tile_state(&self, tile: TileCoordinate, state: DataState) {
        let mut inner = self.inner.write();
        if let Some(slot) = inner.tiling.as_mut().and_then(|t| t.tiles.get_mut(&tile)) {
            slot.state.advance(state);
        }
    }

    pub fn tile_url(&self, tile: &TileCoordinate) -> String {
        if self.base_url.is_empty() {
            format!("{tile}/{DEFAULT_DOCUMENT}")
        } else {
            format!("{}/{tile}/{DEFAULT_DOCUMENT}", self.base_url)
        }
    }

    /// The source-wide state for flat sources; for tiled sources the state of the tile holding
    /// `coordinate`, or of the nearest available tile.
    pub fn get_data_state_for_coordinate(&self, coordinate: Vec2) -> DataState {
        let inner = self.inner.read();
        inner
            .tiling
            .as_ref()
            .and_then(|tiling| tiling.state_of(tiling.for_coordinate(coordinate)))
            .unwrap_or(inner.state)
    }

    /// Worst state over the tiles intersecting `extent`, falling back to the tile nearest its
    /// center.
    pub fn get_data_state_for_extent(&self, extent: &Extent) -> DataState {
        let inner = self.inner.read();
        inner
            .tiling
            .as_ref()
            .and_then(|tiling| tiling.state_of(tiling.for_extent(extent)))
            .unwrap_or(inner.state)
    }
}

impl Inner {
    /// Adds images not seen before and returns them.
    fn append(&mut self, images: Vec<Arc<ObliqueImage>>) -> Vec<Arc<ObliqueImage>> {
        let mut added = Vec::with_capacity(images.len());
        for image in images {
            if self.names.insert(image.name().to_string()) {
                self.images.push(image.clone());
                added.push(image);
            }
        }
        added
    }
}
