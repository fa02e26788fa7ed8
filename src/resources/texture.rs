//! Turns encoded image bytes into renderer-native [`Texture`]s.
//!
//! Every load owns one [`TexturePool`]. Texture ids are only unique inside one asset, so pools
//! are never shared between loads and are dropped together with the load that created them.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::{
    data_structures::texture::Texture,
    error::LoadError,
    worker::{WorkerTask, spawn_task},
};

/// Decode `buffer` into a display-ready texture without blocking the caller.
///
/// Natively the decode starts immediately on tokio's blocking pool, so this must be called from
/// within a runtime. On wasm32 nothing is decoded until the returned future is first polled.
/// An empty buffer resolves to `Ok(None)`: the material simply has no map.
pub fn materialize(buffer: Vec<u8>) -> BoxFuture<'static, Result<Option<Texture>, LoadError>> {
    if buffer.is_empty() {
        return future::ready(Ok(None)).boxed();
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        let decode = tokio::task::spawn_blocking(move || decode_surface(&buffer));
        return async move {
            decode
                .await
                .map_err(|e| LoadError::Texture(format!("decode task failed: {e}")))?
                .map(Some)
        }
        .boxed();
    }

    #[cfg(target_arch = "wasm32")]
    {
        return async move { decode_surface(&buffer).map(Some) }.boxed();
    }
}

fn decode_surface(bytes: &[u8]) -> Result<Texture, LoadError> {
    // `image` never premultiplies, which is what the renderer expects.
    let img = image::load_from_memory(bytes).map_err(|e| LoadError::Texture(e.to_string()))?;
    Ok(Texture::display_ready(img.to_rgba8()))
}

type SharedTexture = Shared<BoxFuture<'static, Option<Arc<Texture>>>>;
type Entries = Mutex<HashMap<u32, Entry>>;

enum Entry {
    /// Encoded bytes nobody asked for yet.
    Raw(Vec<u8>),
    Materializing(SharedTexture),
    Ready(Arc<Texture>),
    /// Empty or undecodable buffer.
    Missing,
}

/// Per-load texture cache keyed by texture id.
///
/// Each id is decoded at most once; concurrent lookups of the same id await the same decode.
/// A finished decode lands in the cache by itself, whether or not anyone awaited it.
pub struct TexturePool {
    load_id: u64,
    entries: Arc<Entries>,
    failures: Arc<Mutex<BTreeMap<u32, LoadError>>>,
    /// Tasks driving decodes started by [`TexturePool::materialize_all`]; aborted with the pool.
    drivers: Mutex<Vec<WorkerTask>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TexturePool {
    pub fn new(load_id: u64) -> Self {
        Self {
            load_id,
            entries: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(BTreeMap::new())),
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// A pool holding `buffers` undecoded; the index of a buffer is its texture id.
    pub fn with_buffers(load_id: u64, buffers: Vec<Vec<u8>>) -> Self {
        let pool = Self::new(load_id);
        {
            let mut entries = locked(&pool.entries);
            for (id, buffer) in buffers.into_iter().enumerate() {
                entries.insert(id as u32, Entry::Raw(buffer));
            }
        }
        pool
    }

    pub fn load_id(&self) -> u64 {
        self.load_id
    }

    pub fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start decoding every buffer that has not been started yet, in the background.
    pub fn materialize_all(&self) {
        let started: Vec<SharedTexture> = {
            let mut entries = locked(&self.entries);
            let ids: Vec<u32> = entries
                .iter()
                .filter(|(_, entry)| matches!(entry, Entry::Raw(_)))
                .map(|(&id, _)| id)
                .collect();
            ids.into_iter()
                .map(|id| self.start(&mut entries, id))
                .collect()
        };
        let mut drivers = locked(&self.drivers);
        for shared in started {
            match spawn_task(shared.map(|_| ())) {
                Ok(task) => drivers.push(task),
                // Still decoded on the first resolve.
                Err(e) => log::debug!("load {}: texture decode not driven: {e}", self.load_id),
            }
        }
    }

    /// Put an already materialized texture into the pool, replacing whatever was there.
    pub fn store(&self, id: u32, texture: Texture) {
        locked(&self.entries).insert(id, Entry::Ready(Arc::new(texture)));
    }

    /// The texture for `id` if it has finished materializing successfully.
    pub fn get(&self, id: u32) -> Option<Arc<Texture>> {
        match locked(&self.entries).get(&id)? {
            Entry::Ready(texture) => Some(Arc::clone(texture)),
            Entry::Materializing(shared) => shared.peek().cloned().flatten(),
            Entry::Raw(_) | Entry::Missing => None,
        }
    }

    /// Wait for the texture for `id`, materializing it first if nobody has asked for it yet.
    ///
    /// Resolves to `None` for unknown ids, empty buffers and failed decodes.
    pub async fn resolve(&self, id: u32) -> Option<Arc<Texture>> {
        let shared = {
            let mut entries = locked(&self.entries);
            let started = match entries.get(&id) {
                None => {
                    log::warn!(
                        "load {}: material references texture {id}, which the asset does not contain",
                        self.load_id
                    );
                    return None;
                }
                Some(Entry::Ready(texture)) => return Some(Arc::clone(texture)),
                Some(Entry::Missing) => return None,
                Some(Entry::Materializing(shared)) => Some(shared.clone()),
                Some(Entry::Raw(_)) => None,
            };
            started.unwrap_or_else(|| self.start(&mut entries, id))
        };
        shared.await
    }

    /// Texture decode failures recorded so far, drained in id order.
    pub fn take_failures(&self) -> Vec<(u32, LoadError)> {
        std::mem::take(&mut *locked(&self.failures))
            .into_iter()
            .collect()
    }

    fn start(&self, entries: &mut HashMap<u32, Entry>, id: u32) -> SharedTexture {
        let buffer = match entries.remove(&id) {
            Some(Entry::Raw(buffer)) => buffer,
            Some(Entry::Materializing(shared)) => {
                entries.insert(id, Entry::Materializing(shared.clone()));
                return shared;
            }
            Some(Entry::Ready(texture)) => {
                entries.insert(id, Entry::Ready(Arc::clone(&texture)));
                return future::ready(Some(texture)).boxed().shared();
            }
            Some(Entry::Missing) | None => Vec::new(),
        };
        let load_id = self.load_id;
        let failures = Arc::clone(&self.failures);
        // The entry owns this future, so it only holds the cache weakly.
        let cache = Arc::downgrade(&self.entries);
        let decode = materialize(buffer);
        let shared = async move {
            let texture = match decode.await {
                Ok(texture) => texture.map(Arc::new),
                Err(e) => {
                    log::warn!("load {load_id}: texture {id} dropped: {e}");
                    locked(&failures).insert(id, e);
                    None
                }
            };
            if let Some(cache) = cache.upgrade() {
                let mut entries = locked(&cache);
                // A texture stored meanwhile wins.
                if matches!(entries.get(&id), Some(Entry::Materializing(_))) {
                    let entry = texture.clone().map_or(Entry::Missing, Entry::Ready);
                    entries.insert(id, entry);
                }
            }
            texture
        }
        .boxed()
        .shared();
        entries.insert(id, Entry::Materializing(shared.clone()));
        shared
    }
}
