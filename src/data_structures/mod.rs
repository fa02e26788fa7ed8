//! Renderer-native data structures a load produces.
//!
//! - `scene_graph` holds the node tree, geometry and material types
//! - `texture` holds decoded textures and their GPU counterpart

pub mod scene_graph;
pub mod texture;
