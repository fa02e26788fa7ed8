//! Everything that turns bytes from outside the process into loader data: fetching asset
//! files, converting glTF documents into serialized node trees, and decoding textures.

pub mod gltf_import;
pub mod texture;

#[cfg(not(target_arch = "wasm32"))]
use std::path::{Path, PathBuf};

use anyhow::Context;

#[cfg(target_arch = "wasm32")]
fn format_url(file_name: &str) -> anyhow::Result<reqwest::Url> {
    if let Ok(url) = reqwest::Url::parse(file_name) {
        return Ok(url);
    }
    let window = web_sys::window().context("no window available")?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| anyhow::anyhow!("window has no origin"))?;
    let base = reqwest::Url::parse(&format!("{}/assets/", origin))?;
    Ok(base.join(file_name)?)
}

/// Where a url points to on disk. Relative paths are resolved against `assets_root`.
#[cfg(not(target_arch = "wasm32"))]
pub fn resolve_path(url: &str, assets_root: &Path) -> anyhow::Result<PathBuf> {
    if url.starts_with("http://") || url.starts_with("https://") {
        anyhow::bail!("remote urls are only fetched on wasm32; {url} must be a local path");
    }
    let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(assets_root.join(path))
    }
}

/// Read a whole asset, reporting `(loaded, total)` bytes after every chunk.
pub async fn load_binary(
    url: &str,
    #[cfg_attr(target_arch = "wasm32", allow(unused))] assets_root: &std::path::Path,
    #[cfg_attr(target_arch = "wasm32", allow(unused))] chunk_size: usize,
    mut on_progress: impl FnMut(u64, u64),
) -> anyhow::Result<Vec<u8>> {
    #[cfg(target_arch = "wasm32")]
    let data = {
        let url = format_url(url)?;
        let data = reqwest::get(url.clone())
            .await
            .with_context(|| format!("fetching {url}"))?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec();
        on_progress(data.len() as u64, data.len() as u64);
        data
    };

    #[cfg(not(target_arch = "wasm32"))]
    let data = {
        use tokio::io::AsyncReadExt;

        let path = resolve_path(url, assets_root)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let total = file.metadata().await?.len();
        let mut data = Vec::with_capacity(total as usize);
        let mut chunk = vec![0u8; chunk_size.max(1)];
        loop {
            let read = file
                .read(&mut chunk)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..read]);
            on_progress(data.len() as u64, total.max(data.len() as u64));
        }
        data
    };

    Ok(data)
}

/// File name without directories or extension, used to name the root of a loaded scene.
pub fn asset_name(url: &str) -> String {
    let file = url.rsplit(['/', '\\']).next().unwrap_or(url);
    let stem = file.split(['?', '#']).next().unwrap_or(file);
    match stem.rsplit_once('.') {
        Some((name, _)) if !name.is_empty() => name.to_string(),
        _ => stem.to_string(),
    }
}

/// Run CPU-heavy work off the calling task. On wasm32 there is no thread pool, so it runs inline.
pub async fn run_blocking<T, F>(work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    #[cfg(not(target_arch = "wasm32"))]
    let out = tokio::task::spawn_blocking(work)
        .await
        .context("blocking task panicked or was cancelled")?;
    #[cfg(target_arch = "wasm32")]
    let out = work();
    Ok(out)
}
