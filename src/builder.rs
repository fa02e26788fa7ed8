//! Serialized node tree → scene graph.

use futures::future::{self, BoxFuture, FutureExt};

use crate::{
    context::CancellationToken,
    data_structures::scene_graph::{
        ContainerNode, Geometry, Indices, Mat4, Material, MeshNode, SceneNode,
    },
    error::LoadError,
    protocol::{GeometryDescriptor, IndexWidth, MaterialDescriptor, SerializedNode},
    resources::texture::TexturePool,
};

/// Build the scene object for `node` and, recursively, all of its children.
///
/// Children are built concurrently but attached in their serialized order. A mesh waits only
/// for the texture its own material references. Any invalid mesh fails the whole build; after
/// `token` is cancelled the build stops at the next node or texture and returns
/// [`LoadError::Cancelled`].
pub fn build<'a>(
    node: &'a SerializedNode,
    textures: &'a TexturePool,
    token: &'a CancellationToken,
) -> BoxFuture<'a, Result<Box<dyn SceneNode>, LoadError>> {
    async move {
        if token.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let mut object: Box<dyn SceneNode> = match &node.mesh {
            Some(mesh) => {
                let geometry = build_geometry(&mesh.geometry)
                    .map_err(|e| LoadError::build(format!("node '{}': {e}", node.name)))?;
                let material = build_material(&mesh.material, textures).await;
                if token.is_cancelled() {
                    return Err(LoadError::Cancelled);
                }
                Box::new(MeshNode::new(&node.name, geometry, material))
            }
            None => Box::new(ContainerNode::new(&node.name)),
        };

        object.set_local_transform(matrix_from_column_major(&node.matrix));
        // The serialized matrix is final.
        object.core_mut().matrix_auto_update = false;

        let children = future::try_join_all(
            node.children
                .iter()
                .map(|child| build(child, textures, token)),
        )
        .await?;
        for child in children {
            object.add_child(child);
        }
        Ok(object)
    }
    .boxed()
}

pub fn matrix_from_column_major(m: &[f32; 16]) -> Mat4 {
    Mat4::from([
        [m[0], m[1], m[2], m[3]],
        [m[4], m[5], m[6], m[7]],
        [m[8], m[9], m[10], m[11]],
        [m[12], m[13], m[14], m[15]],
    ])
}

fn build_geometry(desc: &GeometryDescriptor) -> Result<Geometry, String> {
    if desc.position.is_empty() {
        return Err("mesh has no positions".to_string());
    }
    if desc.position.len() % 3 != 0 {
        return Err(format!(
            "position length {} is not a multiple of 3",
            desc.position.len()
        ));
    }
    let vertex_count = desc.position.len() / 3;
    let positions = triples(&desc.position);

    let normals = match &desc.normal {
        Some(normal) if normal.len() != desc.position.len() => {
            return Err(format!(
                "{} normal components for {} vertices",
                normal.len(),
                vertex_count
            ));
        }
        Some(normal) => Some(triples(normal)),
        None => None,
    };

    let uvs = match &desc.uv {
        Some(uv) if uv.len() != vertex_count * 2 => {
            return Err(format!(
                "{} uv components for {} vertices",
                uv.len(),
                vertex_count
            ));
        }
        Some(uv) => Some(uv.chunks_exact(2).map(|c| [c[0], c[1]]).collect()),
        None => None,
    };

    let indices = match &desc.index {
        Some(index) => {
            if index.values.len() % 3 != 0 {
                return Err(format!(
                    "index count {} is not a multiple of 3",
                    index.values.len()
                ));
            }
            if let Some(bad) = index.values.iter().find(|&&v| v as usize >= vertex_count) {
                return Err(format!("index {bad} out of range for {vertex_count} vertices"));
            }
            // Keep the declared width: never widen or narrow.
            Some(match index.width {
                IndexWidth::U16 => Indices::U16(
                    index
                        .values
                        .iter()
                        .map(|&v| narrow_index(v))
                        .collect::<Result<_, _>>()?,
                ),
                IndexWidth::U32 => Indices::U32(index.values.clone()),
            })
        }
        // Flat triangle list.
        None => None,
    };

    Ok(Geometry {
        positions,
        normals,
        uvs,
        indices,
    })
}

async fn build_material(desc: &MaterialDescriptor, textures: &TexturePool) -> Material {
    let map = match desc.map_id {
        Some(id) => textures.resolve(id).await,
        None => None,
    };
    Material {
        color: desc.color,
        metalness: desc.metalness,
        roughness: desc.roughness,
        map,
    }
}

fn triples(values: &[f32]) -> Vec<[f32; 3]> {
    values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
}

fn narrow_index(value: u32) -> Result<u16, String> {
    u16::try_from(value).map_err(|_| format!("index {value} does not fit in 16 bits"))
}
