//! glTF / GLB → [`DecodedAsset`].
//!
//! This is the decode step the default worker runs: it resolves buffers and images, then walks
//! the default scene and flattens every primitive into the engine-agnostic protocol types.

use anyhow::{Context, bail};
use base64::Engine;

use crate::{
    context::LoaderConfig,
    protocol::{
        DecodedAsset, GeometryDescriptor, IndexBuffer, IndexWidth, LoadRequest, MaterialDescriptor,
        MeshDescriptor, SerializedNode,
    },
    resources::{asset_name, load_binary, run_blocking},
};

/// Extensions whose absence changes geometry; the file cannot be loaded without a decoder.
const COMPRESSION_EXTENSIONS: &[&str] = &["KHR_draco_mesh_compression", "EXT_meshopt_compression"];

/// Extensions that only affect shading and can be ignored.
const IGNORABLE_EXTENSIONS: &[&str] = &[
    "KHR_materials_unlit",
    "KHR_texture_transform",
    "KHR_materials_emissive_strength",
];

pub async fn import(
    request: &LoadRequest,
    bytes: Vec<u8>,
    config: &LoaderConfig,
) -> anyhow::Result<DecodedAsset> {
    let gltf = ::gltf::Gltf::from_slice(&bytes).with_context(|| {
        format!(
            "parsing {} (decoder assets: {})",
            request.url, request.decoder_asset_path
        )
    })?;
    check_required_extensions(&gltf.document, &request.decoder_asset_path)?;

    // Load buffers
    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            ::gltf::buffer::Source::Bin => gltf
                .blob
                .clone()
                .context("buffer refers to the GLB binary chunk, but there is none")?,
            ::gltf::buffer::Source::Uri(uri) => fetch_uri(uri, &request.url, config)
                .await
                .with_context(|| format!("loading buffer {}", buffer.index()))?,
        };
        buffers.push(data);
    }

    // Images stay encoded; the coordinator decodes them.
    let mut texture_buffers = Vec::new();
    for image in gltf.images() {
        let data = match image.source() {
            ::gltf::image::Source::View { view, .. } => buffers
                .get(view.buffer().index())
                .and_then(|buffer| buffer.get(view.offset()..view.offset() + view.length()))
                .map(<[u8]>::to_vec)
                .with_context(|| format!("image {} points outside its buffer", image.index()))?,
            ::gltf::image::Source::Uri { uri, .. } => {
                match fetch_uri(uri, &request.url, config).await {
                    Ok(data) => data,
                    Err(e) => {
                        // An empty buffer materializes to "no map".
                        log::warn!("image {} ({uri}) could not be loaded: {e:#}", image.index());
                        Vec::new()
                    }
                }
            }
        };
        texture_buffers.push(data);
    }

    let name = asset_name(&request.url);
    let document = gltf.document;
    let scene_data = run_blocking(move || serialize_scene(&document, &buffers, name)).await??;
    Ok(DecodedAsset {
        scene_data,
        texture_buffers,
    })
}

fn check_required_extensions(
    document: &::gltf::Document,
    decoder_asset_path: &str,
) -> anyhow::Result<()> {
    for extension in document.extensions_required() {
        if COMPRESSION_EXTENSIONS.contains(&extension) {
            bail!(
                "asset requires {extension}, which no mesh decoder at '{decoder_asset_path}' provides"
            );
        }
        if !IGNORABLE_EXTENSIONS.contains(&extension) {
            bail!("{extension} is unsupported");
        }
    }
    Ok(())
}

async fn fetch_uri(uri: &str, asset_url: &str, config: &LoaderConfig) -> anyhow::Result<Vec<u8>> {
    if let Some(data) = uri.strip_prefix("data:") {
        let (header, payload) = data.split_once(',').context("malformed data uri")?;
        if !header.ends_with(";base64") {
            bail!("only base64 data uris are supported");
        }
        return Ok(base64::engine::general_purpose::STANDARD.decode(payload)?);
    }
    // Relative to the directory of the asset itself.
    let url = match asset_url.rfind(['/', '\\']) {
        Some(slash) => format!("{}{}", &asset_url[..=slash], uri),
        None => uri.to_string(),
    };
    load_binary(&url, &config.assets_root, config.read_chunk_size, |_, _| {}).await
}

pub fn serialize_scene(
    document: &::gltf::Document,
    buffers: &[Vec<u8>],
    name: String,
) -> anyhow::Result<SerializedNode> {
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .context("asset contains no scene")?;
    let children = scene
        .nodes()
        .map(|node| serialize_node(&node, buffers))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(SerializedNode::group(name, children))
}

fn serialize_node(node: &::gltf::Node, buffers: &[Vec<u8>]) -> anyhow::Result<SerializedNode> {
    let name = node
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("node_{}", node.index()));

    let mut mesh = None;
    let mut children = Vec::new();
    if let Some(gltf_mesh) = node.mesh() {
        let mut primitives = Vec::new();
        for primitive in gltf_mesh.primitives() {
            if let Some(descriptor) = serialize_primitive(&primitive, buffers)
                .with_context(|| format!("mesh {} of node {name}", gltf_mesh.index()))?
            {
                primitives.push(descriptor);
            }
        }
        // A node holds one mesh; extra primitives become children in the node's local space.
        if primitives.len() == 1 {
            mesh = primitives.pop();
        } else {
            let mesh_name = gltf_mesh.name().unwrap_or(&name).to_string();
            children.extend(
                primitives
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| SerializedNode::with_mesh(format!("{mesh_name}_{i}"), p)),
            );
        }
    }

    for child in node.children() {
        children.push(serialize_node(&child, buffers)?);
    }

    Ok(SerializedNode {
        name,
        matrix: column_major(node.transform().matrix()),
        mesh,
        children,
    })
}

fn serialize_primitive(
    primitive: &::gltf::Primitive,
    buffers: &[Vec<u8>],
) -> anyhow::Result<Option<MeshDescriptor>> {
    if primitive.mode() != ::gltf::mesh::Mode::Triangles {
        log::warn!(
            "skipping primitive {} with unsupported mode {:?}",
            primitive.index(),
            primitive.mode()
        );
        return Ok(None);
    }
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

    let position: Vec<f32> = reader
        .read_positions()
        .context("primitive has no POSITION attribute")?
        .flatten()
        .collect();
    let normal = reader
        .read_normals()
        .map(|normals| normals.flatten().collect());
    let uv = reader
        .read_tex_coords(0)
        .map(|coords| coords.into_f32().flatten().collect());
    let index = match (primitive.indices(), reader.read_indices()) {
        (Some(accessor), Some(indices)) => {
            let width = match accessor.data_type() {
                ::gltf::accessor::DataType::U32 => IndexWidth::U32,
                _ => IndexWidth::U16,
            };
            Some(IndexBuffer {
                values: indices.into_u32().collect(),
                width,
            })
        }
        _ => None,
    };

    let pbr = primitive.material().pbr_metallic_roughness();
    let [r, g, b, _] = pbr.base_color_factor();
    let material = MaterialDescriptor {
        color: [r, g, b],
        metalness: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        map_id: pbr
            .base_color_texture()
            .map(|info| info.texture().source().index() as u32),
    };

    Ok(Some(MeshDescriptor {
        geometry: GeometryDescriptor {
            position,
            normal,
            uv,
            index,
        },
        material,
    }))
}

fn column_major(matrix: [[f32; 4]; 4]) -> [f32; 16] {
    let mut out = [0.0; 16];
    for (column, values) in matrix.iter().enumerate() {
        out[column * 4..column * 4 + 4].copy_from_slice(values);
    }
    out
}
