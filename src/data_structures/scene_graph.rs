//! Scene graph of renderer-native objects.
//!
//! A loaded asset becomes a tree of boxed [`SceneNode`]s: [`ContainerNode`]s for plain grouping
//! nodes and [`MeshNode`]s for nodes that carry a [`Geometry`] and a [`Material`]. Parents own
//! their children; the whole tree is dropped together.

use std::sync::Arc;

use cgmath::SquareMatrix;

use crate::data_structures::texture::Texture;

pub type Mat4 = cgmath::Matrix4<f32>;

/// Index data at the width the asset declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Indices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    pub fn len(&self) -> usize {
        match self {
            Indices::U16(values) => values.len(),
            Indices::U32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            Indices::U16(values) => Box::new(values.iter().map(|&v| u32::from(v))),
            Indices::U32(values) => Box::new(values.iter().copied()),
        }
    }

    pub fn format(&self) -> wgpu::IndexFormat {
        match self {
            Indices::U16(_) => wgpu::IndexFormat::Uint16,
            Indices::U32(_) => wgpu::IndexFormat::Uint32,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            Indices::U16(values) => bytemuck::cast_slice(values),
            Indices::U32(values) => bytemuck::cast_slice(values),
        }
    }
}

/// Vertex layout used when a geometry is uploaded.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

/// Triangle-list geometry. Without indices every three vertices form one triangle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub indices: Option<Indices>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    /// Interleave the attributes. Missing normals and uvs are zero-filled.
    pub fn to_vertices(&self) -> Vec<ModelVertex> {
        self.positions
            .iter()
            .enumerate()
            .map(|(i, &position)| ModelVertex {
                position,
                tex_coords: self
                    .uvs
                    .as_ref()
                    .and_then(|uvs| uvs.get(i).copied())
                    .unwrap_or_default(),
                normal: self
                    .normals
                    .as_ref()
                    .and_then(|normals| normals.get(i).copied())
                    .unwrap_or_default(),
            })
            .collect()
    }
}

/// Metallic-roughness material.
#[derive(Clone, Debug)]
pub struct Material {
    pub color: [f32; 3],
    pub metalness: f32,
    pub roughness: f32,
    pub map: Option<Arc<Texture>>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            metalness: 0.0,
            roughness: 1.0,
            map: None,
        }
    }
}

/// State every node has, regardless of what it renders.
#[derive(Debug)]
pub struct NodeCore {
    pub name: String,
    local: Mat4,
    world: Mat4,
    /// When `true` a renderer may recompute the local matrix on its own; loaded nodes carry a
    /// final matrix and have this switched off.
    pub matrix_auto_update: bool,
    children: Vec<Box<dyn SceneNode>>,
}

impl NodeCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: Mat4::identity(),
            world: Mat4::identity(),
            matrix_auto_update: true,
            children: Vec::new(),
        }
    }
}

pub trait SceneNode: std::fmt::Debug + Send + Sync {
    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    /// `Some` for nodes that render a mesh.
    fn mesh(&self) -> Option<&MeshNode> {
        None
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    fn get_local_transform(&self) -> Mat4 {
        self.core().local
    }

    fn set_local_transform(&mut self, matrix: Mat4) {
        self.core_mut().local = matrix;
    }

    fn get_world_transform(&self) -> Mat4 {
        self.core().world
    }

    fn matrix_auto_update(&self) -> bool {
        self.core().matrix_auto_update
    }

    fn get_children(&self) -> &Vec<Box<dyn SceneNode>> {
        &self.core().children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.core_mut().children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.core_mut().children.push(child);
    }

    /// Recompute world matrices for this subtree given the parent's world matrix.
    fn update_world_transforms(&mut self, parent: &Mat4) {
        let world = *parent * self.core().local;
        self.core_mut().world = world;
        for child in self.get_children_mut() {
            child.update_world_transforms(&world);
        }
    }

    fn update_world_transform_all(&mut self) {
        self.update_world_transforms(&Mat4::identity());
    }

    /// Number of nodes in this subtree, including `self`.
    fn node_count(&self) -> usize {
        1 + self
            .get_children()
            .iter()
            .map(|child| child.node_count())
            .sum::<usize>()
    }

    /// Longest path from this node to a leaf, counted in nodes.
    fn depth(&self) -> usize {
        1 + self
            .get_children()
            .iter()
            .map(|child| child.depth())
            .max()
            .unwrap_or(0)
    }
}

/// Depth-first search by name, usable on trait objects.
pub fn find_in<'a>(node: &'a dyn SceneNode, name: &str) -> Option<&'a dyn SceneNode> {
    if node.name() == name {
        return Some(node);
    }
    node.get_children()
        .iter()
        .find_map(|child| find_in(child.as_ref(), name))
}

/// Visit every mesh in the subtree, parents before children.
pub fn for_each_mesh<'a>(node: &'a dyn SceneNode, f: &mut dyn FnMut(&'a MeshNode)) {
    if let Some(mesh) = node.mesh() {
        f(mesh);
    }
    for child in node.get_children() {
        for_each_mesh(child.as_ref(), f);
    }
}

/// A grouping node without anything to render.
#[derive(Debug)]
pub struct ContainerNode {
    core: NodeCore,
}

impl ContainerNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: NodeCore::new(name),
        }
    }
}

impl SceneNode for ContainerNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
}

/// A node rendering one geometry with one material.
#[derive(Debug)]
pub struct MeshNode {
    core: NodeCore,
    pub geometry: Geometry,
    pub material: Material,
}

impl MeshNode {
    pub fn new(name: impl Into<String>, geometry: Geometry, material: Material) -> Self {
        Self {
            core: NodeCore::new(name),
            geometry,
            material,
        }
    }
}

impl SceneNode for MeshNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn mesh(&self) -> Option<&MeshNode> {
        Some(self)
    }
}
