//! Messages exchanged with a background decode worker.
//!
//! The coordinator sends exactly one [`LoadRequest`] into a worker and receives a stream of
//! [`WorkerMessage`]s back: zero or more `progress` messages followed by exactly one of
//! `success` or `error`. Everything here is plain data so that the same shapes can cross a
//! process boundary as JSON lines (see [`decode_line`] / [`encode_line`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ingress message: what to load and where the decoder finds its own assets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub url: String,
    pub decoder_asset_path: String,
}

impl LoadRequest {
    pub fn new(url: impl Into<String>, decoder_asset_path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            decoder_asset_path: decoder_asset_path.into(),
        }
    }
}

/// Egress message as produced by the transport.
///
/// `Unknown` absorbs any tag this version does not understand so that newer workers can talk to
/// older coordinators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Progress(Progress),
    Success(DecodedAsset),
    Error {
        error: ErrorInfo,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub loaded: f64,
    pub total: f64,
}

impl Progress {
    pub fn new(loaded: f64, total: f64) -> Self {
        Self { loaded, total }
    }

    /// `loaded / total` clamped to `[0, 1]`. An unknown size (`total == 0`) reports `0`.
    pub fn ratio(&self) -> f32 {
        if self.total <= 0.0 {
            return 0.0;
        }
        (self.loaded / self.total).clamp(0.0, 1.0) as f32
    }

    fn is_well_formed(&self) -> bool {
        self.loaded.is_finite()
            && self.total.is_finite()
            && self.loaded >= 0.0
            && self.total >= 0.0
            && (self.total == 0.0 || self.loaded <= self.total)
    }
}

/// Payload of a `success` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedAsset {
    pub scene_data: SerializedNode,
    /// Encoded image files; the position in this list is the texture id.
    #[serde(default)]
    pub texture_buffers: Vec<Vec<u8>>,
}

/// Human readable failure description reported by a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<anyhow::Error> for ErrorInfo {
    fn from(e: anyhow::Error) -> Self {
        // `{:#}` keeps the whole context chain on one line.
        Self::new(format!("{e:#}"))
    }
}

/// Engine-agnostic description of one node of the decoded hierarchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub name: String,
    /// Column-major 4x4 local transform.
    pub matrix: [f32; 16],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshDescriptor>,
    #[serde(default)]
    pub children: Vec<SerializedNode>,
}

impl SerializedNode {
    pub const IDENTITY: [f32; 16] = [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ];

    pub fn group(name: impl Into<String>, children: Vec<SerializedNode>) -> Self {
        Self {
            name: name.into(),
            matrix: Self::IDENTITY,
            mesh: None,
            children,
        }
    }

    pub fn with_mesh(name: impl Into<String>, mesh: MeshDescriptor) -> Self {
        Self {
            name: name.into(),
            matrix: Self::IDENTITY,
            mesh: Some(mesh),
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshDescriptor {
    pub geometry: GeometryDescriptor,
    pub material: MaterialDescriptor,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryDescriptor {
    /// Flat `xyz` triples.
    pub position: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexBuffer>,
}

/// Declared bit width of an index buffer; travels as the number `16` or `32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum IndexWidth {
    U16,
    U32,
}

impl TryFrom<u8> for IndexWidth {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            16 => Ok(Self::U16),
            32 => Ok(Self::U32),
            other => Err(format!("unsupported index width {other}")),
        }
    }
}

impl From<IndexWidth> for u8 {
    fn from(width: IndexWidth) -> Self {
        match width {
            IndexWidth::U16 => 16,
            IndexWidth::U32 => 32,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuffer {
    pub values: Vec<u32>,
    pub width: IndexWidth,
}

impl IndexBuffer {
    /// Declares the narrowest width able to hold every value.
    pub fn new_narrowest(values: Vec<u32>) -> Self {
        let width = if values.iter().all(|&v| v <= u32::from(u16::MAX)) {
            IndexWidth::U16
        } else {
            IndexWidth::U32
        };
        Self { values, width }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialDescriptor {
    pub color: [f32; 3],
    pub metalness: f32,
    pub roughness: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<u32>,
}

impl Default for MaterialDescriptor {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            metalness: 0.0,
            roughness: 1.0,
            map_id: None,
        }
    }
}

/// A worker message after validation.
#[derive(Clone, Debug, PartialEq)]
pub enum Classified {
    Progress(Progress),
    Success(Box<DecodedAsset>),
    Error(ErrorInfo),
    /// Malformed or unrecognised; the reason is only used for logging.
    Unknown(String),
}

/// Sorts a raw message into one of the known shapes. Pure and total.
pub fn classify(raw: WorkerMessage) -> Classified {
    match raw {
        WorkerMessage::Progress(progress) if progress.is_well_formed() => {
            Classified::Progress(progress)
        }
        WorkerMessage::Progress(progress) => Classified::Unknown(format!(
            "malformed progress {}/{}",
            progress.loaded, progress.total
        )),
        WorkerMessage::Success(asset) => Classified::Success(Box::new(asset)),
        WorkerMessage::Error { error } => Classified::Error(error),
        WorkerMessage::Unknown => Classified::Unknown("unrecognised message type".to_string()),
    }
}

/// Parses one JSON line from an out-of-process worker. Anything unparseable is `Unknown`.
pub fn decode_line(line: &str) -> WorkerMessage {
    match serde_json::from_str(line.trim()) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("unparseable worker line ({e}): {:.80}", line);
            WorkerMessage::Unknown
        }
    }
}

pub fn encode_line<T: Serialize>(message: &T) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
