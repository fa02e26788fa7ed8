//! Uploading a built scene into wgpu resources.
//!
//! Nothing here is needed to load an asset; it is the hand-off from the loader to a renderer.
//! Call [`SceneNode::update_world_transforms`] first if the tree was modified after loading.

use std::{collections::HashMap, sync::Arc};

use wgpu::util::DeviceExt;

use crate::data_structures::{
    scene_graph::{Mat4, MeshNode, ModelVertex, SceneNode},
    texture::{GpuTexture, Texture},
};

impl ModelVertex {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// One mesh of the scene, ready to draw.
pub struct GpuMesh {
    pub name: String,
    pub vertex_buffer: wgpu::Buffer,
    /// `None` for flat triangle lists; draw `0..num_elements` vertices instead.
    pub index_buffer: Option<(wgpu::Buffer, wgpu::IndexFormat)>,
    pub num_elements: u32,
    pub world: Mat4,
    pub color: [f32; 3],
    pub metalness: f32,
    pub roughness: f32,
    pub map: Option<Arc<GpuTexture>>,
}

/// Upload every mesh below `root`. Textures shared between materials are uploaded once.
pub fn upload_scene(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    root: &dyn SceneNode,
) -> Vec<GpuMesh> {
    let mut textures: HashMap<*const Texture, Arc<GpuTexture>> = HashMap::new();
    let mut meshes = Vec::new();
    crate::data_structures::scene_graph::for_each_mesh(root, &mut |mesh| {
        let map = mesh.material.map.as_ref().map(|texture| {
            textures
                .entry(Arc::as_ptr(texture))
                .or_insert_with(|| {
                    Arc::new(GpuTexture::from_texture(
                        device,
                        queue,
                        texture,
                        Some(&format!("{} map", mesh.name())),
                    ))
                })
                .clone()
        });
        meshes.push(upload_mesh(device, mesh, map));
    });
    meshes
}

fn upload_mesh(device: &wgpu::Device, mesh: &MeshNode, map: Option<Arc<GpuTexture>>) -> GpuMesh {
    let vertices = mesh.geometry.to_vertices();
    let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{:?} Vertex Buffer", mesh.name())),
        contents: bytemuck::cast_slice(&vertices),
        usage: wgpu::BufferUsages::VERTEX,
    });

    let (index_buffer, num_elements) = match &mesh.geometry.indices {
        Some(indices) => {
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{:?} Index Buffer", mesh.name())),
                contents: indices.as_bytes(),
                usage: wgpu::BufferUsages::INDEX,
            });
            (Some((buffer, indices.format())), indices.len() as u32)
        }
        None => (None, vertices.len() as u32),
    };

    GpuMesh {
        name: mesh.name().to_string(),
        vertex_buffer,
        index_buffer,
        num_elements,
        world: mesh.get_world_transform(),
        color: mesh.material.color,
        metalness: mesh.material.metalness,
        roughness: mesh.material.roughness,
        map,
    }
}
