//! Two-way synchronisation between ground geometries and their image-space shadows.
//!
//! While an oblique image is displayed, every ground feature inside its footprint is mirrored
//! into a shadow store in pixel coordinates. Edits on either side are converted to the other
//! after a quiet period of [`DEBOUNCE`]. All bookkeeping lives in one task; the
//! [`GeometrySync`] handle only sends it commands.
//!
//! Per feature at most one conversion runs at a time. A request arriving while one is in flight
//! bumps the feature's generation, so the running result is discarded on arrival, and is
//! replayed once the running conversion finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use foundation::math::{Vec2, Vec3};
use imagery::ObliqueImage;
use parking_lot::RwLock;
use runtime::{Debouncer, Fired, Metrics, Ticket};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ConversionError;
use crate::geometry::Geometry;
use crate::store::{FeatureId, FeatureStore, StoreEvent};
use crate::terrain::TerrainProvider;

/// Quiet period before an edit is converted to the other space.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Gauge holding the number of conversions currently running.
pub const IN_FLIGHT: &str = "in_flight";

/// The image currently on screen, as published by whatever drives image selection.
pub type ActiveImage = watch::Receiver<Option<Arc<ObliqueImage>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    /// Vertices used to draw a circle in image space.
    pub circle_segments: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            circle_segments: 64,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum Direction {
    ToImage,
    ToGround,
}

impl Direction {
    fn opposite(self) -> Self {
        match self {
            Direction::ToImage => Direction::ToGround,
            Direction::ToGround => Direction::ToImage,
        }
    }

    fn metric(self, what: Outcome) -> &'static str {
        match (self, what) {
            (Direction::ToImage, Outcome::Started) => "to_image.started",
            (Direction::ToImage, Outcome::Committed) => "to_image.committed",
            (Direction::ToImage, Outcome::Discarded) => "to_image.discarded",
            (Direction::ToImage, Outcome::Failed) => "to_image.failed",
            (Direction::ToImage, Outcome::Coalesced) => "to_image.coalesced",
            (Direction::ToGround, Outcome::Started) => "to_ground.started",
            (Direction::ToGround, Outcome::Committed) => "to_ground.committed",
            (Direction::ToGround, Outcome::Discarded) => "to_ground.discarded",
            (Direction::ToGround, Outcome::Failed) => "to_ground.failed",
            (Direction::ToGround, Outcome::Coalesced) => "to_ground.coalesced",
        }
    }
}

#[derive(Debug, Copy, Clone)]
enum Outcome {
    Started,
    Committed,
    Discarded,
    Failed,
    Coalesced,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum Activity {
    #[default]
    Idle,
    ConvertingToImage,
    ConvertingToGround,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum SlotState {
    #[default]
    Idle,
    Scheduled(Ticket),
    InFlight,
}

/// Sync state of one ground feature.
#[derive(Debug, Default)]
struct Record {
    activity: Activity,
    to_image: SlotState,
    to_ground: SlotState,
    generation: u64,
    shadow: Option<FeatureId>,
    /// Request that arrived while a conversion was running; `true` skips the debounce.
    rerun: Option<(Direction, bool)>,
}

impl Record {
    fn slot_mut(&mut self, direction: Direction) -> &mut SlotState {
        match direction {
            Direction::ToImage => &mut self.to_image,
            Direction::ToGround => &mut self.to_ground,
        }
    }

    fn is_settled(&self) -> bool {
        self.activity == Activity::Idle
            && self.to_image == SlotState::Idle
            && self.to_ground == SlotState::Idle
            && self.shadow.is_none()
    }
}

enum Command {
    Activate {
        ground: mpsc::UnboundedReceiver<StoreEvent>,
        shadow: mpsc::UnboundedReceiver<StoreEvent>,
    },
    Deactivate,
    Destroy,
}

struct Completion {
    original: FeatureId,
    direction: Direction,
    generation: u64,
    epoch: u64,
    result: Result<Geometry, ConversionError>,
}

struct Shared {
    metrics: Metrics,
    originals: RwLock<HashMap<FeatureId, FeatureId>>,
}

/// Handle to a running synchronisation task. Must be created inside a tokio runtime.
pub struct GeometrySync {
    ground: FeatureStore,
    shadow: FeatureStore,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for GeometrySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometrySync")
            .field("ground", &self.ground)
            .field("shadow", &self.shadow)
            .finish()
    }
}

impl GeometrySync {
    pub fn new(
        ground: FeatureStore,
        active_image: ActiveImage,
        terrain: Arc<dyn TerrainProvider>,
        options: SyncOptions,
    ) -> Self {
        let shadow = FeatureStore::new(format!("{}-shadow", ground.name()));
        let shared = Arc::new(Shared {
            metrics: Metrics::new(),
            originals: RwLock::new(HashMap::new()),
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (debouncer, fired_rx) = Debouncer::new();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let image = active_image.borrow().clone();
        let task = SyncTask {
            ground: ground.clone(),
            shadow: shadow.clone(),
            image_rx: active_image,
            image,
            image_closed: false,
            terrain,
            options,
            shared: shared.clone(),
            debouncer,
            done_tx,
            active: false,
            ground_rx: None,
            shadow_rx: None,
            epoch: 0,
            records: HashMap::new(),
            by_shadow: HashMap::new(),
            circles: HashSet::new(),
            own_ground_writes: HashSet::new(),
            own_shadow_writes: HashSet::new(),
            in_flight: 0,
        };
        let handle = tokio::spawn(task.run(command_rx, fired_rx, done_rx));

        Self {
            ground,
            shadow,
            commands,
            shared,
            task: Some(handle),
        }
    }

    /// Starts listening to both stores and mirrors the features inside the current image.
    pub fn activate(&self) {
        // Subscribing here rather than in the task means no edit made after this call is missed.
        let _ = self.commands.send(Command::Activate {
            ground: self.ground.subscribe(),
            shadow: self.shadow.subscribe(),
        });
    }

    /// Stops listening. Pending ground-bound conversions are flushed; the shadow store keeps
    /// its features until the image changes.
    pub fn deactivate(&self) {
        let _ = self.commands.send(Command::Deactivate);
    }

    /// Stops the task and empties the shadow store.
    pub async fn destroy(mut self) {
        let _ = self.commands.send(Command::Destroy);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("geometry sync task ended abnormally: {e}");
            }
        }
    }

    /// Image-space features, in pixel coordinates of the active image.
    pub fn shadow_store(&self) -> &FeatureStore {
        &self.shadow
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    /// The ground feature a shadow feature mirrors.
    pub fn original_of(&self, shadow: FeatureId) -> Option<FeatureId> {
        self.shared.originals.read().get(&shadow).copied()
    }
}

impl Drop for GeometrySync {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct SyncTask {
    ground: FeatureStore,
    shadow: FeatureStore,
    image_rx: ActiveImage,
    image: Option<Arc<ObliqueImage>>,
    image_closed: bool,
    terrain: Arc<dyn TerrainProvider>,
    options: SyncOptions,
    shared: Arc<Shared>,
    debouncer: Debouncer<(FeatureId, Direction)>,
    done_tx: mpsc::UnboundedSender<Completion>,
    active: bool,
    ground_rx: Option<mpsc::UnboundedReceiver<StoreEvent>>,
    shadow_rx: Option<mpsc::UnboundedReceiver<StoreEvent>>,
    /// Bumped whenever image-bound results become worthless (image change, deactivation).
    epoch: u64,
    records: HashMap<FeatureId, Record>,
    by_shadow: HashMap<FeatureId, FeatureId>,
    /// Ground features whose geometry is a circle.
    circles: HashSet<FeatureId>,
    own_ground_writes: HashSet<u64>,
    own_shadow_writes: HashSet<u64>,
    in_flight: i64,
}

async fn next_event(rx: &mut Option<mpsc::UnboundedReceiver<StoreEvent>>) -> Option<StoreEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SyncTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut fired_rx: mpsc::UnboundedReceiver<Fired<(FeatureId, Direction)>>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Activate { ground, shadow }) => self.activate(ground, shadow),
                    Some(Command::Deactivate) => self.deactivate(),
                    Some(Command::Destroy) | None => {
                        self.shutdown();
                        break;
                    }
                },
                event = next_event(&mut self.ground_rx) => match event {
                    Some(event) => self.on_ground_event(event),
                    None => self.ground_rx = None,
                },
                event = next_event(&mut self.shadow_rx) => match event {
                    Some(event) => self.on_shadow_event(event),
                    None => self.shadow_rx = None,
                },
                changed = self.image_rx.changed(), if !self.image_closed => match changed {
                    Ok(()) => self.on_image_changed(),
                    Err(_) => self.image_closed = true,
                },
                Some(fired) = fired_rx.recv() => self.on_fired(fired),
                Some(done) = done_rx.recv() => self.on_completed(done),
            }
        }
    }

    fn activate(
        &mut self,
        ground: mpsc::UnboundedReceiver<StoreEvent>,
        shadow: mpsc::UnboundedReceiver<StoreEvent>,
    ) {
        if self.active {
            return;
        }
        self.active = true;
        self.ground_rx = Some(ground);
        self.shadow_rx = Some(shadow);
        self.own_ground_writes.clear();
        self.own_shadow_writes.clear();
        debug!("geometry sync activated");

        // Cached shadows may have outlived their originals while inactive.
        let stale: Vec<FeatureId> = self
            .records
            .iter()
            .filter(|(id, r)| r.shadow.is_some() && !self.still_mirrorable(**id))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.forget(id);
        }
        self.populate();
    }

    fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.ground_rx = None;
        self.shadow_rx = None;
        self.flush_to_ground();
        self.drop_to_image();
        self.epoch += 1;
        debug!("geometry sync deactivated");
    }

    fn shutdown(&mut self) {
        self.debouncer.cancel_all();
        self.records.clear();
        self.by_shadow.clear();
        self.shared.originals.write().clear();
        self.shadow.clear();
        debug!("geometry sync destroyed");
    }

    fn still_mirrorable(&self, id: FeatureId) -> bool {
        match (&self.image, self.ground.get(id)) {
            (Some(image), Some(feature)) => feature.geometry.touches(image.footprint_mercator()),
            _ => false,
        }
    }

    /// Requests an immediate conversion of every ground feature inside the image.
    fn populate(&mut self) {
        let Some(image) = self.image.clone() else {
            return;
        };
        let footprint = *image.footprint_mercator();
        for feature in self.ground.features_in_extent(&image.extent_mercator()) {
            if !feature.geometry.touches(&footprint) {
                continue;
            }
            // Its write-back will trigger the conversion.
            let busy = self
                .records
                .get(&feature.id)
                .is_some_and(|r| r.activity == Activity::ConvertingToGround);
            if !busy {
                self.request(feature.id, Direction::ToImage, true);
            }
        }
    }

    fn on_ground_event(&mut self, event: StoreEvent) {
        let own = self.own_ground_writes.remove(&event.revision());
        match event {
            StoreEvent::Removed { id, .. } => self.forget(id),
            StoreEvent::Added { id, .. } | StoreEvent::Changed { id, .. } => {
                if self.image.is_none() {
                    return;
                }
                if !self.still_mirrorable(id) {
                    if self.records.contains_key(&id) {
                        self.forget(id);
                    }
                    return;
                }
                // A write-back of our own needs no debounce: the edit has settled already.
                self.request(id, Direction::ToImage, own);
            }
        }
    }

    fn on_shadow_event(&mut self, event: StoreEvent) {
        if self.own_shadow_writes.remove(&event.revision()) {
            return;
        }
        let Some(&original) = self.by_shadow.get(&event.id()) else {
            debug!("ignoring unmirrored shadow feature {}", event.id());
            return;
        };
        match event {
            StoreEvent::Removed { .. } => {
                debug!("shadow of {original} removed, removing original");
                self.forget(original);
                self.ground.remove(original);
            }
            StoreEvent::Changed { .. } => self.request(original, Direction::ToGround, false),
            StoreEvent::Added { .. } => {}
        }
    }

    fn on_image_changed(&mut self) {
        let next = self.image_rx.borrow_and_update().clone();
        let same = match (&self.image, &next) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }

        // Ground-bound edits still convert against the image they were made in.
        self.flush_to_ground();
        self.drop_to_image();
        self.clear_shadow();
        self.epoch += 1;
        self.image = next;
        debug!(
            "active image changed to {:?}",
            self.image.as_ref().map(|i| i.name().to_string())
        );
        if self.active {
            self.populate();
        }
    }

    fn flush_to_ground(&mut self) {
        let scheduled: Vec<FeatureId> = self
            .records
            .iter()
            .filter(|(_, r)| matches!(r.to_ground, SlotState::Scheduled(_)))
            .map(|(id, _)| *id)
            .collect();
        for id in scheduled {
            self.debouncer.cancel(&(id, Direction::ToGround));
            if let Some(record) = self.records.get_mut(&id) {
                record.to_ground = SlotState::Idle;
            }
            self.start(id, Direction::ToGround);
        }
    }

    fn drop_to_image(&mut self) {
        for (id, record) in self.records.iter_mut() {
            if matches!(record.to_image, SlotState::Scheduled(_)) {
                self.debouncer.cancel(&(*id, Direction::ToImage));
                record.to_image = SlotState::Idle;
            }
            if record.rerun.is_some_and(|(d, _)| d == Direction::ToImage) {
                record.rerun = None;
            }
        }
    }

    fn clear_shadow(&mut self) {
        self.by_shadow.clear();
        self.shared.originals.write().clear();
        for record in self.records.values_mut() {
            record.shadow = None;
        }
        self.records.retain(|_, r| !r.is_settled());
        self.shadow.clear();
    }

    /// Drops all sync state of a ground feature, including its shadow.
    fn forget(&mut self, id: FeatureId) {
        self.debouncer.cancel(&(id, Direction::ToImage));
        self.debouncer.cancel(&(id, Direction::ToGround));
        self.circles.remove(&id);
        if let Some(record) = self.records.remove(&id) {
            if let Some(shadow) = record.shadow {
                self.by_shadow.remove(&shadow);
                self.shared.originals.write().remove(&shadow);
                self.shadow.remove(shadow);
            }
        }
    }

    fn request(&mut self, id: FeatureId, direction: Direction, immediate: bool) {
        let record = self.records.entry(id).or_default();
        record.generation += 1;

        let other = direction.opposite();
        if matches!(record.slot_mut(other), SlotState::Scheduled(_)) {
            self.debouncer.cancel(&(id, other));
            *record.slot_mut(other) = SlotState::Idle;
        }

        if record.activity != Activity::Idle {
            self.debouncer.cancel(&(id, direction));
            *record.slot_mut(direction) = SlotState::Idle;
            record.rerun = Some((direction, immediate));
            self.shared.metrics.inc(direction.metric(Outcome::Coalesced));
            return;
        }

        if immediate {
            self.debouncer.cancel(&(id, direction));
            *record.slot_mut(direction) = SlotState::Idle;
            self.start(id, direction);
        } else {
            let ticket = self.debouncer.schedule((id, direction), DEBOUNCE);
            *record.slot_mut(direction) = SlotState::Scheduled(ticket);
        }
    }

    fn on_fired(&mut self, fired: Fired<(FeatureId, Direction)>) {
        if !self.debouncer.accept(&fired) {
            return;
        }
        let (id, direction) = fired.key;
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        *record.slot_mut(direction) = SlotState::Idle;
        if record.activity != Activity::Idle {
            record.rerun = Some((direction, true));
            return;
        }
        self.start(id, direction);
    }

    /// Reads the current geometry and spawns its conversion.
    fn start(&mut self, id: FeatureId, direction: Direction) {
        let Some(image) = self.image.clone() else {
            return;
        };
        let geometry = match direction {
            Direction::ToImage => self.ground.get(id),
            Direction::ToGround => self
                .records
                .get(&id)
                .and_then(|r| r.shadow)
                .and_then(|s| self.shadow.get(s)),
        }
        .map(|f| f.geometry);
        let Some(geometry) = geometry else {
            return;
        };

        if direction == Direction::ToImage {
            if geometry.is_circle() {
                self.circles.insert(id);
            } else {
                self.circles.remove(&id);
            }
        }
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        record.activity = match direction {
            Direction::ToImage => Activity::ConvertingToImage,
            Direction::ToGround => Activity::ConvertingToGround,
        };
        *record.slot_mut(direction) = SlotState::InFlight;

        let job = Job {
            direction,
            image,
            geometry,
            circle: self.circles.contains(&id),
            terrain: self.terrain.clone(),
            segments: self.options.circle_segments,
        };
        let generation = record.generation;
        let epoch = self.epoch;
        let done = self.done_tx.clone();
        self.shared.metrics.inc(direction.metric(Outcome::Started));
        self.in_flight += 1;
        self.shared.metrics.set_gauge(IN_FLIGHT, self.in_flight);
        tokio::spawn(async move {
            let result = job.run().await;
            let _ = done.send(Completion {
                original: id,
                direction,
                generation,
                epoch,
                result,
            });
        });
    }

    fn on_completed(&mut self, done: Completion) {
        self.in_flight -= 1;
        self.shared.metrics.set_gauge(IN_FLIGHT, self.in_flight);
        let direction = done.direction;
        let Some(record) = self.records.get_mut(&done.original) else {
            self.shared.metrics.inc(direction.metric(Outcome::Discarded));
            return;
        };
        record.activity = Activity::Idle;
        *record.slot_mut(direction) = SlotState::Idle;
        let current = record.generation == done.generation;
        let rerun = record.rerun.take();

        match done.result {
            Err(e) => {
                warn!(
                    "conversion of feature {} {direction:?} failed: {e}",
                    done.original
                );
                self.shared.metrics.inc(direction.metric(Outcome::Failed));
            }
            Ok(geometry) if current => self.commit(done.original, direction, done.epoch, geometry),
            Ok(_) => self.shared.metrics.inc(direction.metric(Outcome::Discarded)),
        }

        if let Some((direction, immediate)) = rerun {
            self.request(done.original, direction, immediate);
        } else if self.records.get(&done.original).is_some_and(Record::is_settled) {
            self.records.remove(&done.original);
        }
    }

    fn commit(&mut self, original: FeatureId, direction: Direction, epoch: u64, geometry: Geometry) {
        if !self.ground.contains(original) {
            self.shared.metrics.inc(direction.metric(Outcome::Discarded));
            return;
        }
        match direction {
            Direction::ToImage => {
                if epoch != self.epoch {
                    self.shared.metrics.inc(direction.metric(Outcome::Discarded));
                    return;
                }
                let Some(record) = self.records.get_mut(&original) else {
                    return;
                };
                match record.shadow.filter(|s| self.shadow.contains(*s)) {
                    Some(shadow) => {
                        if let Some(revision) = self.shadow.set_geometry(shadow, geometry) {
                            self.own_shadow_writes.insert(revision);
                        }
                    }
                    None => {
                        let shadow = self.shadow.add(geometry);
                        if let Some(feature) = self.shadow.get(shadow) {
                            self.own_shadow_writes.insert(feature.revision);
                        }
                        record.shadow = Some(shadow);
                        self.by_shadow.insert(shadow, original);
                        self.shared.originals.write().insert(shadow, original);
                    }
                }
            }
            Direction::ToGround => {
                if let Some(revision) = self.ground.set_geometry(original, geometry) {
                    self.own_ground_writes.insert(revision);
                }
            }
        }
        self.shared.metrics.inc(direction.metric(Outcome::Committed));
    }
}

/// One conversion, run off the sync task.
struct Job {
    direction: Direction,
    image: Arc<ObliqueImage>,
    geometry: Geometry,
    circle: bool,
    terrain: Arc<dyn TerrainProvider>,
    segments: usize,
}

impl Job {
    async fn run(self) -> Result<Geometry, ConversionError> {
        match self.direction {
            Direction::ToImage => self.to_image().await,
            Direction::ToGround => self.to_ground().await,
        }
    }

    async fn to_image(&self) -> Result<Geometry, ConversionError> {
        let shape = self
            .geometry
            .polygonize(self.segments)
            .ok_or(ConversionError::Degenerate)?;
        let points: Vec<Vec2> = shape.coordinates().iter().map(|c| c.xy()).collect();
        let heights = self.sample(&points).await?;
        let mut heights = heights.into_iter();
        shape.try_map(|c| -> Result<Vec3, ConversionError> {
            let height = heights.next().unwrap_or(c.z);
            let pixel = self.image.ground_to_pixel(Vec3::new(c.x, c.y, height))?;
            Ok(Vec3::new(pixel.x, pixel.y, height))
        })
    }

    async fn to_ground(&self) -> Result<Geometry, ConversionError> {
        let shape = self
            .geometry
            .polygonize(self.segments)
            .ok_or(ConversionError::Degenerate)?;

        // First pass on the mean footprint height to find where to sample the terrain.
        let base = self.image.average_height();
        let rough = shape.try_map(|c| self.image.pixel_to_ground(c.xy(), base))?;
        let points: Vec<Vec2> = rough.coordinates().iter().map(|c| c.xy()).collect();
        let heights = self.sample(&points).await?;
        let mut heights = heights.into_iter();
        let ground = shape.try_map(|c| -> Result<Vec3, ConversionError> {
            let height = heights.next().unwrap_or(base);
            Ok(self.image.pixel_to_ground(c.xy(), height)?)
        })?;

        if self.circle {
            ground
                .circle_from_polygon()
                .ok_or(ConversionError::Degenerate)
        } else {
            Ok(ground)
        }
    }

    async fn sample(&self, points: &[Vec2]) -> Result<Vec<f64>, ConversionError> {
        if points.is_empty() {
            return Err(ConversionError::Degenerate);
        }
        Ok(self.terrain.sample_heights(&self.image, points).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use foundation::math::{Mat3, Vec2, Vec3, WebMercator};
    use imagery::{CameraModel, ImageParams, ObliqueImage, ViewDirection};
    use tokio::sync::watch;

    use super::{GeometrySync, IN_FLIGHT, SyncOptions};
    use crate::geometry::Geometry;
    use crate::store::{FeatureId, FeatureStore};
    use crate::terrain::{FlatTerrain, TerrainError, TerrainProvider};

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    /// Camera 10 m above `origin` looking straight down; pixel `(x, y)` sees
    /// `origin + (x, y) / 100` on the ground.
    fn image(name: &str, origin: Vec2) -> Arc<ObliqueImage> {
        let (x, y) = (origin.x, origin.y);
        Arc::new(ObliqueImage::new(
            ImageParams {
                name: name.to_string(),
                view_direction: ViewDirection::Nadir,
                view_direction_angle: None,
                camera: Arc::new(CameraModel::ideal("cam", [1000.0, 1000.0])),
                ground_footprint: [
                    Vec3::new(x, y, 0.0),
                    Vec3::new(x + 10.0, y, 0.0),
                    Vec3::new(x + 10.0, y + 10.0, 0.0),
                    Vec3::new(x, y + 10.0, 0.0),
                ],
                ground_center: None,
                projection_center: Some(Vec3::new(x, y, 10.0)),
                pixel_to_world: Some(Mat3::diagonal(1e-4, 1e-4, -0.1)),
                world_to_pixel: None,
            },
            Arc::new(WebMercator),
        ))
    }

    fn point(x: f64, y: f64) -> Geometry {
        Geometry::Point(Vec3::new(x, y, 0.0))
    }

    fn xy(geometry: &Geometry) -> Vec2 {
        match geometry {
            Geometry::Point(p) => p.xy(),
            other => panic!("expected a point, got {other:?}"),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    struct Setup {
        ground: FeatureStore,
        images: watch::Sender<Option<Arc<ObliqueImage>>>,
        sync: GeometrySync,
    }

    fn setup_with(terrain: Arc<dyn TerrainProvider>) -> Setup {
        let ground = FeatureStore::new("ground");
        let (images, rx) = watch::channel(Some(image("a", Vec2::new(100.0, 200.0))));
        let sync = GeometrySync::new(ground.clone(), rx, terrain, SyncOptions::default());
        sync.activate();
        Setup {
            ground,
            images,
            sync,
        }
    }

    fn setup() -> Setup {
        setup_with(Arc::new(FlatTerrain::at(0.0)))
    }

    fn only_shadow(sync: &GeometrySync) -> (FeatureId, Geometry) {
        let features = sync.shadow_store().features();
        assert_eq!(features.len(), 1, "expected one shadow feature");
        (features[0].id, features[0].geometry.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn mirrors_and_debounces_ground_edits() {
        let s = setup();
        let id = s.ground.add(point(105.0, 205.0));
        settle().await;

        let (shadow, geometry) = only_shadow(&s.sync);
        let p = xy(&geometry);
        assert_close(p.x, 500.0, 1e-6);
        assert_close(p.y, 500.0, 1e-6);
        assert_eq!(s.sync.original_of(shadow), Some(id));
        assert_eq!(s.sync.metrics().counter("to_image.started"), 1);

        for x in [106.0, 107.0, 108.0] {
            s.ground.set_geometry(id, point(x, 205.0)).expect("exists");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        settle().await;

        assert_eq!(s.sync.metrics().counter("to_image.started"), 2);
        let (same, geometry) = only_shadow(&s.sync);
        assert_eq!(same, shadow);
        assert_close(xy(&geometry).x, 800.0, 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn same_feature_twice_mirrors_once() {
        let s = setup();
        s.ground.insert(FeatureId(42), point(101.0, 201.0));
        s.ground.insert(FeatureId(42), point(102.0, 202.0));
        settle().await;

        let (shadow, geometry) = only_shadow(&s.sync);
        assert_eq!(s.sync.original_of(shadow), Some(FeatureId(42)));
        assert_close(xy(&geometry).x, 200.0, 1e-6);
        assert_eq!(s.sync.metrics().counter("to_image.started"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn image_edits_flow_back_to_ground() {
        let s = setup();
        let id = s.ground.add(point(105.0, 205.0));
        settle().await;
        let (shadow, _) = only_shadow(&s.sync);

        s.sync
            .shadow_store()
            .set_geometry(shadow, Geometry::Point(Vec3::new(250.0, 750.0, 0.0)))
            .expect("shadow exists");
        settle().await;

        let ground = xy(&s.ground.get(id).expect("ground").geometry);
        assert_close(ground.x, 102.5, 1e-9);
        assert_close(ground.y, 207.5, 1e-9);
        let metrics = s.sync.metrics();
        assert_eq!(metrics.counter("to_ground.committed"), 1);
        // The write-back is re-mirrored once and not echoed again.
        assert_eq!(metrics.counter("to_image.committed"), 2);
        assert_eq!(metrics.counter("to_ground.started"), 1);
        assert_eq!(s.sync.shadow_store().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn circles_stay_circles() {
        let s = setup();
        let id = s.ground.add(Geometry::Circle {
            center: Vec3::new(105.0, 205.0, 0.0),
            radius: 2.0,
        });
        settle().await;

        let (shadow, geometry) = only_shadow(&s.sync);
        let Geometry::Polygon(rings) = geometry else {
            panic!("expected the circle as a polygon in image space");
        };
        assert_eq!(rings[0].len(), 65);

        // Drag the whole shape one meter east.
        let moved = Geometry::Polygon(vec![
            rings[0]
                .iter()
                .map(|c| Vec3::new(c.x + 100.0, c.y, c.z))
                .collect(),
        ]);
        s.sync
            .shadow_store()
            .set_geometry(shadow, moved)
            .expect("shadow exists");
        settle().await;

        let Geometry::Circle { center, radius } = s.ground.get(id).expect("ground").geometry
        else {
            panic!("expected a circle on the ground");
        };
        assert_close(center.x, 106.0, 1e-6);
        assert_close(center.y, 205.0, 1e-6);
        assert_close(radius, 2.0, 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn image_change_flushes_and_repopulates() {
        let s = setup();
        let first = s.ground.add(point(105.0, 205.0));
        let second = s.ground.add(point(205.0, 205.0));
        settle().await;
        let (shadow, _) = only_shadow(&s.sync);
        assert_eq!(s.sync.original_of(shadow), Some(first));

        // An image-space edit still pending when the image changes is not lost.
        s.sync
            .shadow_store()
            .set_geometry(shadow, Geometry::Point(Vec3::new(250.0, 750.0, 0.0)))
            .expect("shadow exists");
        s.images
            .send(Some(image("b", Vec2::new(200.0, 200.0))))
            .expect("receiver alive");
        settle().await;

        let moved = xy(&s.ground.get(first).expect("first").geometry);
        assert_close(moved.x, 102.5, 1e-9);
        assert_close(moved.y, 207.5, 1e-9);

        let (shadow, geometry) = only_shadow(&s.sync);
        assert_eq!(s.sync.original_of(shadow), Some(second));
        assert_close(xy(&geometry).x, 500.0, 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn lines_crossing_the_image_are_mirrored() {
        let s = setup();
        let id = s.ground.add(Geometry::LineString(vec![
            Vec3::new(90.0, 205.0, 0.0),
            Vec3::new(120.0, 205.0, 0.0),
        ]));
        settle().await;

        let (shadow, geometry) = only_shadow(&s.sync);
        assert_eq!(s.sync.original_of(shadow), Some(id));
        let Geometry::LineString(line) = geometry else {
            panic!("expected a line in image space");
        };
        assert_close(line[0].x, -1000.0, 1e-6);
        assert_close(line[1].x, 2000.0, 1e-6);
        assert_close(line[1].y, 500.0, 1e-6);

        // Still crossing after an edit, so the mirror stays.
        s.ground
            .set_geometry(
                id,
                Geometry::LineString(vec![
                    Vec3::new(105.0, 190.0, 0.0),
                    Vec3::new(105.0, 220.0, 0.0),
                ]),
            )
            .expect("exists");
        settle().await;
        let (same, _) = only_shadow(&s.sync);
        assert_eq!(same, shadow);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_the_footprint_or_removal_drops_the_shadow() {
        let s = setup();
        let a = s.ground.add(point(105.0, 205.0));
        let b = s.ground.add(point(106.0, 206.0));
        settle().await;
        assert_eq!(s.sync.shadow_store().len(), 2);

        s.ground.set_geometry(a, point(500.0, 500.0)).expect("exists");
        s.ground.remove(b).expect("exists");
        settle().await;
        assert!(s.sync.shadow_store().is_empty());
        assert!(s.ground.contains(a));
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_sync_keeps_its_cache() {
        let s = setup();
        let id = s.ground.add(point(105.0, 205.0));
        settle().await;
        s.sync.deactivate();
        settle().await;

        s.ground.set_geometry(id, point(101.0, 201.0)).expect("exists");
        settle().await;
        let (_, geometry) = only_shadow(&s.sync);
        assert_close(xy(&geometry).x, 500.0, 1e-6);

        s.images.send(None).expect("receiver alive");
        settle().await;
        assert!(s.sync.shadow_store().is_empty());
    }

    struct BrokenTerrain;

    impl TerrainProvider for BrokenTerrain {
        fn sample_heights<'a>(
            &'a self,
            _image: &'a ObliqueImage,
            _points: &'a [Vec2],
        ) -> streaming::BoxFuture<'a, Result<Vec<f64>, TerrainError>> {
            Box::pin(async {
                Err(TerrainError {
                    message: "no elevation data".to_string(),
                })
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_conversion_is_skipped() {
        let s = setup_with(Arc::new(BrokenTerrain));
        s.ground.add(point(105.0, 205.0));
        settle().await;
        assert!(s.sync.shadow_store().is_empty());
        assert_eq!(s.sync.metrics().counter("to_image.failed"), 1);
        assert_eq!(s.sync.metrics().counter("to_image.committed"), 0);
    }

    struct StalledTerrain;

    impl TerrainProvider for StalledTerrain {
        fn sample_heights<'a>(
            &'a self,
            _image: &'a ObliqueImage,
            _points: &'a [Vec2],
        ) -> streaming::BoxFuture<'a, Result<Vec<f64>, TerrainError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn running_conversions_are_gauged() {
        let s = setup_with(Arc::new(StalledTerrain));
        let id = s.ground.add(point(105.0, 205.0));
        settle().await;
        assert_eq!(s.sync.metrics().gauge(IN_FLIGHT), Some(1));

        // A second edit waits for the stalled conversion instead of starting another.
        s.ground.set_geometry(id, point(106.0, 205.0)).expect("exists");
        settle().await;
        assert_eq!(s.sync.metrics().gauge(IN_FLIGHT), Some(1));
        assert_eq!(s.sync.metrics().counter("to_image.started"), 1);
        assert_eq!(s.sync.metrics().counter("to_image.coalesced"), 1);
        assert!(s.sync.shadow_store().is_empty());

        let ok = setup();
        ok.ground.add(point(105.0, 205.0));
        settle().await;
        assert_eq!(ok.sync.metrics().gauge(IN_FLIGHT), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_clears_the_shadow_store() {
        let s = setup();
        s.ground.add(point(105.0, 205.0));
        settle().await;
        let shadow = s.sync.shadow_store().clone();
        assert_eq!(shadow.len(), 1);
        s.sync.destroy().await;
        assert!(shadow.is_empty());
    }
}
