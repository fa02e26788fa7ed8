#![allow(dead_code)]

use std::{
    io::Cursor,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use flow_loader::{
    LoadError, LoadEvent, LoadHandle,
    protocol::{
        DecodedAsset, ErrorInfo, GeometryDescriptor, IndexBuffer, IndexWidth, LoadRequest,
        MaterialDescriptor, MeshDescriptor, Progress, SerializedNode, WorkerMessage,
    },
    worker::{DecodeWorker, Outbox, WorkerTask, spawn_task},
};

/// One thing a [`ScriptedWorker`] does.
#[derive(Clone, Debug)]
pub enum Step {
    Send(WorkerMessage),
    Sleep(Duration),
    /// Never finish; only teardown ends the worker.
    Hang,
}

pub fn progress(loaded: f64, total: f64) -> Step {
    Step::Send(WorkerMessage::Progress(Progress::new(loaded, total)))
}

pub fn success(scene_data: SerializedNode, texture_buffers: Vec<Vec<u8>>) -> Step {
    Step::Send(WorkerMessage::Success(DecodedAsset {
        scene_data,
        texture_buffers,
    }))
}

pub fn error(message: &str) -> Step {
    Step::Send(WorkerMessage::Error {
        error: ErrorInfo::new(message),
    })
}

/// Flag that flips when the value holding it is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// In-process worker replaying a fixed list of steps.
#[derive(Clone)]
pub struct ScriptedWorker {
    steps: Vec<Step>,
    torn_down: Arc<AtomicBool>,
    spawned: Arc<AtomicUsize>,
    requests: Arc<std::sync::Mutex<Vec<LoadRequest>>>,
}

impl ScriptedWorker {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            torn_down: Arc::new(AtomicBool::new(false)),
            spawned: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// `true` once the worker's task was dropped, either finished or aborted.
    pub fn torn_down(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.torn_down)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl DecodeWorker for ScriptedWorker {
    fn spawn(&self, request: LoadRequest, outbox: Outbox) -> Result<WorkerTask, LoadError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let steps = self.steps.clone();
        let flag = DropFlag(Arc::clone(&self.torn_down));
        spawn_task(async move {
            let _flag = flag;
            for step in steps {
                match step {
                    Step::Send(message) => {
                        outbox.send(message);
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        })
    }
}

/// Worker that cannot be started.
pub struct BrokenWorker;

impl DecodeWorker for BrokenWorker {
    fn spawn(&self, _request: LoadRequest, _outbox: Outbox) -> Result<WorkerTask, LoadError> {
        Err(LoadError::Spawn("no execution context available".to_string()))
    }
}

/// Every event of `handle` until the stream ends. Panics if that takes longer than 5 seconds.
pub async fn collect_events(mut handle: LoadHandle) -> Vec<LoadEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
    })
    .await
    .expect("load did not finish in time");
    events
}

pub fn progress_ratios(events: &[LoadEvent]) -> Vec<f32> {
    events
        .iter()
        .filter_map(|event| match event {
            LoadEvent::Progress(ratio) => Some(*ratio),
            _ => None,
        })
        .collect()
}

pub fn terminal_count(events: &[LoadEvent]) -> usize {
    events.iter().filter(|event| event.is_terminal()).count()
}

pub fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(pixel));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .expect("failed to encode png fixture");
    bytes.into_inner()
}

pub fn triangle_mesh(map_id: Option<u32>) -> MeshDescriptor {
    MeshDescriptor {
        geometry: GeometryDescriptor {
            position: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            ..Default::default()
        },
        material: MaterialDescriptor {
            map_id,
            ..Default::default()
        },
    }
}

pub fn quad_mesh(width: IndexWidth) -> MeshDescriptor {
    MeshDescriptor {
        geometry: GeometryDescriptor {
            position: vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, //
                0.0, 1.0, 0.0,
            ],
            normal: Some([0.0, 0.0, 1.0].repeat(4)),
            uv: Some(vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]),
            index: Some(IndexBuffer {
                values: vec![0, 1, 2, 0, 2, 3],
                width,
            }),
        },
        material: MaterialDescriptor::default(),
    }
}

/// The scene from the loader's documentation: a root group with a single triangle leaf.
pub fn root_with_leaf() -> SerializedNode {
    SerializedNode::group(
        "root",
        vec![SerializedNode::with_mesh("leaf", triangle_mesh(None))],
    )
}

/// A fresh, empty directory below the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "flow-loader-{name}-{}-{:?}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("failed to create temp dir");
    dir
}
