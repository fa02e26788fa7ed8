//! The background worker boundary.
//!
//! A worker gets exactly one [`LoadRequest`] and answers through an [`Outbox`], the sending half
//! of a typed channel of [`WorkerMessage`]s. Whatever runs behind a [`DecodeWorker`] (a task in
//! this process, or a separate decoder program) is owned by its [`WorkerTask`]; terminating or
//! dropping the task tears the worker down.

use futures::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;

use crate::{
    context::LoaderConfig,
    error::LoadError,
    protocol::{DecodedAsset, ErrorInfo, LoadRequest, Progress, WorkerMessage},
    resources::{gltf_import, load_binary},
};

/// Something that can decode an asset in the background.
pub trait DecodeWorker: Send + Sync {
    /// Start decoding `request`, reporting through `outbox`.
    ///
    /// Must not block. Dropping the outbox without sending `success` or `error` counts as the
    /// worker dying.
    fn spawn(&self, request: LoadRequest, outbox: Outbox) -> Result<WorkerTask, LoadError>;
}

/// Sending half of a worker's egress channel.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// `false` once the coordinator stopped listening.
    pub fn send(&self, message: WorkerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn progress(&self, loaded: u64, total: u64) -> bool {
        self.send(WorkerMessage::Progress(Progress::new(
            loaded as f64,
            total as f64,
        )))
    }

    pub fn success(&self, asset: DecodedAsset) -> bool {
        self.send(WorkerMessage::Success(asset))
    }

    pub fn error(&self, error: impl Into<ErrorInfo>) -> bool {
        self.send(WorkerMessage::Error {
            error: error.into(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Ownership of one running background task. Dropping it aborts the task.
#[derive(Debug)]
pub struct WorkerTask {
    abort: Option<AbortHandle>,
}

impl WorkerTask {
    /// Abort the task. Its future is dropped the next time the executor looks at it, which also
    /// drops anything it owns, such as a child process or the outbox.
    pub fn terminate(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.abort.is_none()
    }

    /// Let the task run to completion on its own.
    pub fn detach(mut self) {
        self.abort = None;
    }
}

impl Drop for WorkerTask {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Run `task` in the background. Natively this needs a surrounding tokio runtime.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_task<F>(task: F) -> Result<WorkerTask, LoadError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let runtime =
        tokio::runtime::Handle::try_current().map_err(|e| LoadError::Spawn(e.to_string()))?;
    let (abort, registration) = AbortHandle::new_pair();
    runtime.spawn(Abortable::new(task, registration));
    Ok(WorkerTask { abort: Some(abort) })
}

/// Run `task` in the background on the browser's event loop.
#[cfg(target_arch = "wasm32")]
pub fn spawn_task<F>(task: F) -> Result<WorkerTask, LoadError>
where
    F: Future<Output = ()> + 'static,
{
    let (abort, registration) = AbortHandle::new_pair();
    wasm_bindgen_futures::spawn_local(async move {
        let _ = Abortable::new(task, registration).await;
    });
    Ok(WorkerTask { abort: Some(abort) })
}

/// Reads and decodes glTF / GLB files in a background task.
#[derive(Clone, Debug, Default)]
pub struct GltfWorker {
    config: LoaderConfig,
}

impl GltfWorker {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }
}

impl DecodeWorker for GltfWorker {
    fn spawn(&self, request: LoadRequest, outbox: Outbox) -> Result<WorkerTask, LoadError> {
        let config = self.config.clone();
        spawn_task(async move {
            let decoded = async {
                let bytes = load_binary(
                    &request.url,
                    &config.assets_root,
                    config.read_chunk_size,
                    |loaded, total| {
                        outbox.progress(loaded, total);
                    },
                )
                .await?;
                gltf_import::import(&request, bytes, &config).await
            }
            .await;
            match decoded {
                Ok(asset) => outbox.success(asset),
                Err(e) => outbox.error(e),
            };
        })
    }
}

/// Runs an external decoder program per load.
///
/// The program receives the [`LoadRequest`] as one JSON line on stdin and answers with one
/// [`WorkerMessage`] JSON object per line on stdout. Its stderr is inherited. The process is
/// killed when the worker is torn down.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct CommandWorker {
    program: std::path::PathBuf,
    args: Vec<String>,
}

#[cfg(not(target_arch = "wasm32"))]
impl CommandWorker {
    pub fn new(program: impl Into<std::path::PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl DecodeWorker for CommandWorker {
    fn spawn(&self, request: LoadRequest, outbox: Outbox) -> Result<WorkerTask, LoadError> {
        use std::process::Stdio;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        use crate::protocol::{decode_line, encode_line};

        let spawn_error = |e: &dyn std::fmt::Display| {
            LoadError::Spawn(format!("{}: {e}", self.program.display()))
        };

        let line = encode_line(&request).map_err(|e| spawn_error(&format!("{e:#}")))?;
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&e))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(&"stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(&"stdout is not piped"))?;
        let program = self.program.display().to_string();
        log::debug!("started decoder {program} (pid {:?})", child.id());

        spawn_task(async move {
            // Owned by the task so that aborting it kills the process.
            let _child = child;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                log::warn!("could not send request to {program}: {e}");
                return;
            }
            drop(stdin);

            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        if !outbox.send(decode_line(&line)) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("reading from {program} failed: {e}");
                        break;
                    }
                }
            }
        })
    }
}
