//! Load coordination: one cancellable, progress-reporting operation per asset.
//!
//! [`Loader::start`] spawns a worker for the asset, then a coordinator task that turns the
//! worker's messages into [`LoadEvent`]s. On `success` the coordinator materializes the
//! textures into a pool private to this load and builds the scene graph. The caller gets a
//! [`LoadHandle`], which is both the event stream and the cancel switch.
//!
//! Every load ends in exactly one of [`LoadState::Succeeded`], [`LoadState::Failed`] or
//! [`LoadState::Cancelled`]. The first two are announced with a final [`LoadEvent::Ready`] or
//! [`LoadEvent::Failed`]; cancellation is silent.

use std::{
    cell::Cell,
    fmt,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use instant::Instant;
use tokio::sync::mpsc;

use crate::{
    builder,
    context::{CancellationToken, LoaderConfig},
    data_structures::scene_graph::SceneNode,
    error::LoadError,
    protocol::{Classified, DecodedAsset, LoadRequest, WorkerMessage, classify},
    resources::texture::TexturePool,
    worker::{DecodeWorker, GltfWorker, Outbox, WorkerTask, spawn_task},
};

static NEXT_LOAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Set while a callback of [`Loader::start_with_callbacks`] runs on this thread.
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed,
    Cancelled,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoadState::Succeeded | LoadState::Failed | LoadState::Cancelled
        )
    }
}

/// What the caller observes about one load.
pub enum LoadEvent {
    /// Fraction of the asset read so far, in `[0, 1]`. Never decreases.
    Progress(f32),
    /// A texture could not be decoded; its material was built without a map.
    Warning { texture_id: u32, error: LoadError },
    /// The built scene. Always the last event.
    Ready(Box<dyn SceneNode>),
    /// The load failed. Always the last event.
    Failed(LoadError),
}

impl fmt::Debug for LoadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadEvent::Progress(ratio) => f.debug_tuple("Progress").field(ratio).finish(),
            LoadEvent::Warning { texture_id, error } => f
                .debug_struct("Warning")
                .field("texture_id", texture_id)
                .field("error", error)
                .finish(),
            LoadEvent::Ready(root) => f.debug_tuple("Ready").field(&root.name()).finish(),
            LoadEvent::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

impl LoadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadEvent::Ready(_) | LoadEvent::Failed(_))
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State of one load shared between the handle and the coordinator task.
struct LoadShared {
    load_id: u64,
    url: String,
    state: Mutex<LoadState>,
    token: CancellationToken,
    worker: Mutex<Option<WorkerTask>>,
    /// Held while a callback runs, so `cancel` cannot return in the middle of a delivery.
    delivery: Mutex<()>,
}

impl LoadShared {
    /// Send a non-terminal event, unless the load already left `Loading`.
    fn emit(&self, events: &mpsc::UnboundedSender<LoadEvent>, event: LoadEvent) {
        let state = locked(&self.state);
        if *state == LoadState::Loading {
            let _ = events.send(event);
        }
    }

    /// Move to a terminal state and announce it. Returns `false` if some other transition
    /// (usually a cancel) got there first, in which case nothing is sent.
    fn finish(
        &self,
        next: LoadState,
        events: &mpsc::UnboundedSender<LoadEvent>,
        event: Option<LoadEvent>,
    ) -> bool {
        let mut state = locked(&self.state);
        if *state != LoadState::Loading {
            return false;
        }
        *state = next;
        if let Some(event) = event {
            let _ = events.send(event);
        }
        true
    }

    fn terminate_worker(&self) {
        if let Some(mut worker) = locked(&self.worker).take() {
            worker.terminate();
        }
    }

    fn cancel(&self) -> bool {
        // A callback cancelling its own load already holds the delivery lock.
        let _delivery = (!DELIVERING.get()).then(|| locked(&self.delivery));
        {
            let mut state = locked(&self.state);
            if *state != LoadState::Loading {
                return false;
            }
            *state = LoadState::Cancelled;
        }
        self.token.cancel();
        self.terminate_worker();
        log::info!("load {} cancelled: {}", self.load_id, self.url);
        true
    }
}

/// Cancels one load. Cheap to clone; cancelling more than once is a no-op.
#[derive(Clone)]
pub struct Canceller {
    shared: Arc<LoadShared>,
}

impl Canceller {
    /// Returns `true` if this call cancelled the load.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    pub fn state(&self) -> LoadState {
        *locked(&self.shared.state)
    }
}

/// The caller's side of one load.
///
/// Dropping the handle while the load is still running cancels it.
pub struct LoadHandle {
    shared: Arc<LoadShared>,
    events: mpsc::UnboundedReceiver<LoadEvent>,
    coordinator: Option<WorkerTask>,
}

impl LoadHandle {
    pub fn load_id(&self) -> u64 {
        self.shared.load_id
    }

    pub fn state(&self) -> LoadState {
        *locked(&self.shared.state)
    }

    /// Stop the load. The worker is torn down now; work already running in the coordinator
    /// finishes, but its result is discarded. No events are observed after this returns.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The next event, or `None` once the load is over or was cancelled.
    pub async fn next_event(&mut self) -> Option<LoadEvent> {
        if self.state() == LoadState::Cancelled {
            return None;
        }
        let event = self.events.recv().await?;
        if self.state() == LoadState::Cancelled {
            return None;
        }
        Some(event)
    }

    /// Wait for the terminal event, skipping progress and warnings.
    pub async fn finish(mut self) -> Option<Result<Box<dyn SceneNode>, LoadError>> {
        while let Some(event) = self.next_event().await {
            match event {
                LoadEvent::Ready(root) => return Some(Ok(root)),
                LoadEvent::Failed(error) => return Some(Err(error)),
                LoadEvent::Progress(_) | LoadEvent::Warning { .. } => {}
            }
        }
        None
    }
}

impl Stream for LoadHandle {
    type Item = LoadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LoadEvent>> {
        if self.state() == LoadState::Cancelled {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(_)) if self.state() == LoadState::Cancelled => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for LoadHandle {
    fn drop(&mut self) {
        self.shared.cancel();
        // The coordinator is finished or about to notice the cancellation either way.
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.detach();
        }
    }
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("load_id", &self.shared.load_id)
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}

type ProgressCallback = Box<dyn FnMut(f32) + Send>;
type SuccessCallback = Box<dyn FnOnce(Box<dyn SceneNode>) + Send>;
type ErrorCallback = Box<dyn FnOnce(LoadError) + Send>;
type WarningCallback = Box<dyn FnMut(u32, LoadError) + Send>;

/// Push-style observers for [`Loader::start_with_callbacks`]. Unset callbacks ignore their event.
#[derive(Default)]
pub struct LoadCallbacks {
    on_progress: Option<ProgressCallback>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_warning: Option<WarningCallback>,
}

impl LoadCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(f32) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(Box<dyn SceneNode>) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(LoadError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_warning(mut self, f: impl FnMut(u32, LoadError) + Send + 'static) -> Self {
        self.on_warning = Some(Box::new(f));
        self
    }

    fn dispatch(&mut self, event: LoadEvent) {
        match event {
            LoadEvent::Progress(ratio) => {
                if let Some(f) = self.on_progress.as_mut() {
                    f(ratio);
                }
            }
            LoadEvent::Warning { texture_id, error } => {
                if let Some(f) = self.on_warning.as_mut() {
                    f(texture_id, error);
                }
            }
            LoadEvent::Ready(root) => {
                if let Some(f) = self.on_success.take() {
                    f(root);
                }
            }
            LoadEvent::Failed(error) => {
                if let Some(f) = self.on_error.take() {
                    f(error);
                }
            }
        }
    }
}

/// Starts loads with one decode worker and one configuration.
pub struct Loader {
    worker: Arc<dyn DecodeWorker>,
    config: LoaderConfig,
}

impl Loader {
    pub fn new(worker: impl DecodeWorker + 'static, config: LoaderConfig) -> Self {
        Self {
            worker: Arc::new(worker),
            config,
        }
    }

    /// A loader decoding glTF / GLB files in-process.
    pub fn gltf(config: LoaderConfig) -> Self {
        Self::new(GltfWorker::new(config.clone()), config)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Start loading `url`. Must be called from within a tokio runtime on native targets.
    ///
    /// Failing to start the worker is not an error here: it arrives as the handle's only
    /// event, [`LoadEvent::Failed`] with [`LoadError::Spawn`].
    pub fn start(&self, url: &str, decoder_asset_path: &str) -> LoadHandle {
        let load_id = NEXT_LOAD_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(LoadShared {
            load_id,
            url: url.to_string(),
            state: Mutex::new(LoadState::Idle),
            token: CancellationToken::new(),
            worker: Mutex::new(None),
            delivery: Mutex::new(()),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut handle = LoadHandle {
            shared: Arc::clone(&shared),
            events: events_rx,
            coordinator: None,
        };

        log::info!("load {load_id} started: {url}");
        *locked(&shared.state) = LoadState::Loading;

        let (outbox, inbox) = Outbox::channel();
        let request = LoadRequest::new(url, decoder_asset_path);
        match self.worker.spawn(request, outbox) {
            Ok(worker) => *locked(&shared.worker) = Some(worker),
            Err(error) => {
                log::error!("load {load_id}: {error}");
                shared.finish(LoadState::Failed, &events_tx, Some(LoadEvent::Failed(error)));
                return handle;
            }
        }

        let coordinator = coordinate(
            Arc::clone(&shared),
            inbox,
            events_tx.clone(),
            self.config.clone(),
        );
        match spawn_task(coordinator) {
            Ok(task) => handle.coordinator = Some(task),
            Err(error) => {
                log::error!("load {load_id}: {error}");
                shared.terminate_worker();
                shared.finish(LoadState::Failed, &events_tx, Some(LoadEvent::Failed(error)));
            }
        }
        handle
    }

    /// Start loading `url` and deliver its events to `callbacks` instead of a stream.
    ///
    /// Exactly one of `on_success` / `on_error` runs, after every `on_progress`, unless the load
    /// is cancelled through the returned [`Canceller`], in which case neither runs.
    pub fn start_with_callbacks(
        &self,
        url: &str,
        decoder_asset_path: &str,
        mut callbacks: LoadCallbacks,
    ) -> Canceller {
        let mut handle = self.start(url, decoder_asset_path);
        let canceller = handle.canceller();
        if handle.state() == LoadState::Failed {
            // Nothing is running; deliver the failure right away.
            while let Ok(event) = handle.events.try_recv() {
                callbacks.dispatch(event);
            }
            return canceller;
        }
        let driver = async move {
            while let Some(event) = handle.next_event().await {
                if !deliver(&handle.shared, &mut callbacks, event) {
                    break;
                }
            }
        };
        match spawn_task(driver) {
            Ok(task) => task.detach(),
            Err(error) => log::error!("could not deliver load events: {error}"),
        }
        canceller
    }
}

/// Run the callback for `event` unless the load was cancelled after the event was received.
fn deliver(shared: &LoadShared, callbacks: &mut LoadCallbacks, event: LoadEvent) -> bool {
    struct Delivering;
    impl Drop for Delivering {
        fn drop(&mut self) {
            DELIVERING.set(false);
        }
    }

    let _delivery = locked(&shared.delivery);
    if *locked(&shared.state) == LoadState::Cancelled {
        return false;
    }
    DELIVERING.set(true);
    let _delivering = Delivering;
    callbacks.dispatch(event);
    true
}

async fn coordinate(
    shared: Arc<LoadShared>,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    events: mpsc::UnboundedSender<LoadEvent>,
    config: LoaderConfig,
) {
    let load_id = shared.load_id;
    let started = Instant::now();
    let mut last_ratio = 0.0f32;

    let outcome = loop {
        let Some(raw) = inbox.recv().await else {
            break Err(LoadError::WorkerExited);
        };
        if shared.token.is_cancelled() {
            return;
        }
        match classify(raw) {
            Classified::Progress(progress) => {
                let ratio = progress.ratio();
                if ratio < last_ratio {
                    log::debug!("load {load_id}: dropping regressed progress {ratio}");
                    continue;
                }
                last_ratio = ratio;
                shared.emit(&events, LoadEvent::Progress(ratio));
            }
            Classified::Success(asset) => {
                break materialize_and_build(&shared, *asset, &events, &config).await;
            }
            Classified::Error(info) => break Err(LoadError::Decode(info)),
            Classified::Unknown(reason) => {
                log::warn!("load {load_id}: ignoring worker message: {reason}");
            }
        }
    };

    inbox.close();
    while let Ok(late) = inbox.try_recv() {
        log::debug!("load {load_id}: ignoring message after the result: {late:?}");
    }

    if shared.token.is_cancelled() {
        log::debug!("load {load_id}: discarding result of cancelled load");
        return;
    }
    match outcome {
        Ok(mut root) => {
            root.update_world_transform_all();
            let nodes = root.node_count();
            if shared.finish(LoadState::Succeeded, &events, Some(LoadEvent::Ready(root))) {
                log::info!(
                    "load {load_id} finished in {:?} ({nodes} nodes): {}",
                    started.elapsed(),
                    shared.url
                );
            }
        }
        Err(LoadError::Cancelled) => {}
        Err(error) => {
            if shared.finish(LoadState::Failed, &events, None) {
                log::error!("load {load_id} failed: {error}");
                let _ = events.send(LoadEvent::Failed(error));
            }
        }
    }
    shared.terminate_worker();
}

async fn materialize_and_build(
    shared: &LoadShared,
    asset: DecodedAsset,
    events: &mpsc::UnboundedSender<LoadEvent>,
    config: &LoaderConfig,
) -> Result<Box<dyn SceneNode>, LoadError> {
    let DecodedAsset {
        scene_data,
        texture_buffers,
    } = asset;
    log::debug!(
        "load {}: decoded {} nodes, {} textures",
        shared.load_id,
        scene_data.node_count(),
        texture_buffers.len()
    );
    let textures = TexturePool::with_buffers(shared.load_id, texture_buffers);
    textures.materialize_all();

    let root = builder::build(&scene_data, &textures, &shared.token).await?;

    for (texture_id, error) in textures.take_failures() {
        if config.emit_texture_warnings {
            shared.emit(events, LoadEvent::Warning { texture_id, error });
        }
    }
    Ok(root)
}
