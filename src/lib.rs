//! flow-loader
//!
//! Cancellable, progress-reporting background loading of 3D assets for native and WASM
//! viewers. A load hands the asset to a decode worker, turns the worker's messages into an
//! ordered event stream, materializes the decoded textures and rebuilds the asset as a tree of
//! renderer-native scene objects.
//!
//! High-level modules
//! - `protocol`: messages exchanged with a decode worker and their JSON-lines encoding
//! - `worker`: the worker boundary and the built-in glTF and external-program workers
//! - `loader`: starts loads, coordinates them and exposes the cancellable event stream
//! - `builder`: turns a serialized node tree into scene objects
//! - `data_structures`: scene graph, geometry, material and texture types
//! - `resources`: asset fetching, glTF conversion and texture decoding
//! - `context`: loader configuration and cancellation
//! - `error`: the error every failed load reports
//! - `gpu`: uploads a loaded scene into wgpu buffers and textures
//!

pub mod builder;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod gpu;
pub mod loader;
pub mod protocol;
pub mod resources;
pub mod worker;

// Re-exports commonly used types for convenience in downstream code.
pub use context::{CancellationToken, LoaderConfig};
pub use data_structures::scene_graph::{ContainerNode, MeshNode, SceneNode};
pub use error::LoadError;
pub use loader::{Canceller, LoadCallbacks, LoadEvent, LoadHandle, LoadState, Loader};
pub use protocol::{LoadRequest, SerializedNode, WorkerMessage};
pub use worker::{DecodeWorker, GltfWorker, Outbox, WorkerTask};
#[cfg(not(target_arch = "wasm32"))]
pub use worker::CommandWorker;

/// Route `log` output to stderr (native, filtered by `RUST_LOG`) or the browser console (wasm).
/// Safe to call more than once.
pub fn init_logger() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            log::debug!("logger already initialized: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            log::debug!("logger already initialized: {}", e);
        }
    }
}
