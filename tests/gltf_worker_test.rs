use std::path::Path;

use base64::Engine;
use flow_loader::{
    LoadError, LoadEvent, Loader, LoaderConfig,
    data_structures::scene_graph::find_in,
    protocol::{Classified, LoadRequest, classify},
    resources::asset_name,
    worker::{DecodeWorker, GltfWorker, Outbox},
};

mod common;
use common::test_utils::{collect_events, png_bytes, progress_ratios, temp_dir};

/// A glTF file with one textured triangle, everything embedded as data uris.
fn triangle_gltf(extensions_required: &[&str]) -> String {
    let mut buffer = Vec::new();
    for value in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
        buffer.extend_from_slice(&value.to_le_bytes());
    }
    for value in [0u16, 1, 2] {
        buffer.extend_from_slice(&value.to_le_bytes());
    }
    let encode = |bytes: &[u8]| base64::engine::general_purpose::STANDARD.encode(bytes);
    let buffer_uri = format!("data:application/octet-stream;base64,{}", encode(&buffer));
    let image_uri = format!(
        "data:image/png;base64,{}",
        encode(&png_bytes(2, 2, [200, 100, 50, 255]))
    );

    serde_json::json!({
        "asset": { "version": "2.0" },
        "extensionsUsed": extensions_required,
        "extensionsRequired": extensions_required,
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "tri", "mesh": 0, "translation": [1.0, 2.0, 3.0] }],
        "meshes": [{
            "name": "tri_mesh",
            "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }]
        }],
        "materials": [{
            "pbrMetallicRoughness": {
                "baseColorFactor": [0.5, 0.25, 1.0, 1.0],
                "metallicFactor": 0.0,
                "roughnessFactor": 0.75,
                "baseColorTexture": { "index": 0 }
            }
        }],
        "textures": [{ "source": 0 }],
        "images": [{ "uri": image_uri }],
        "buffers": [{ "byteLength": buffer.len(), "uri": buffer_uri }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
        ],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
            },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
        ]
    })
    .to_string()
}

fn write_asset(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).expect("failed to write asset");
}

#[tokio::test]
async fn should_load_gltf_from_assets_root() {
    let dir = temp_dir("gltf");
    write_asset(&dir, "triangle.gltf", &triangle_gltf(&[]));
    let config = LoaderConfig::default()
        .with_assets_root(&dir)
        .with_read_chunk_size(256);

    let events = collect_events(Loader::gltf(config).start("triangle.gltf", "decoders/")).await;

    let ratios = progress_ratios(&events);
    assert!(ratios.len() > 1, "chunked read reports progress: {ratios:?}");
    assert!(ratios.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(ratios.last(), Some(&1.0));

    let Some(LoadEvent::Ready(root)) = events.last() else {
        panic!("expected ready, got {:?}", events.last());
    };
    assert_eq!(root.name(), "triangle");
    let node = find_in(root.as_ref(), "tri").expect("node by name");
    let translation = node.get_local_transform().w;
    assert_eq!((translation.x, translation.y, translation.z), (1.0, 2.0, 3.0));

    let mesh = node.mesh().expect("single primitive becomes the node's mesh");
    assert_eq!(mesh.geometry.vertex_count(), 3);
    assert_eq!(
        mesh.geometry.indices,
        Some(flow_loader::data_structures::scene_graph::Indices::U16(vec![0, 1, 2]))
    );
    assert_eq!(mesh.material.color, [0.5, 0.25, 1.0]);
    assert_eq!(mesh.material.roughness, 0.75);
    let map = mesh.material.map.as_ref().expect("base color texture");
    assert_eq!(map.dimensions(), (2, 2));
}

#[tokio::test]
async fn should_emit_protocol_messages() {
    let dir = temp_dir("gltf-messages");
    write_asset(&dir, "triangle.gltf", &triangle_gltf(&[]));
    let worker = GltfWorker::new(LoaderConfig::default().with_assets_root(&dir));
    let (outbox, mut inbox) = Outbox::channel();
    let _task = worker
        .spawn(LoadRequest::new("triangle.gltf", ""), outbox)
        .unwrap();

    let mut terminal = None;
    while let Some(message) = inbox.recv().await {
        match classify(message) {
            Classified::Progress(_) => assert!(terminal.is_none(), "progress after result"),
            other => terminal = Some(other),
        }
    }
    let Some(Classified::Success(asset)) = terminal else {
        panic!("expected success, got {terminal:?}");
    };
    assert_eq!(asset.texture_buffers.len(), 1);
    let mesh = asset.scene_data.children[0].mesh.as_ref().unwrap();
    assert_eq!(mesh.material.map_id, Some(0));
}

#[tokio::test]
async fn should_name_decoder_path_for_compressed_meshes() {
    let dir = temp_dir("gltf-draco");
    write_asset(
        &dir,
        "compressed.gltf",
        &triangle_gltf(&["KHR_draco_mesh_compression"]),
    );
    let loader = Loader::gltf(LoaderConfig::default().with_assets_root(&dir));
    let result = loader
        .start("compressed.gltf", "/static/draco/")
        .finish()
        .await
        .expect("terminal event");

    match result {
        Err(LoadError::Decode(info)) => {
            assert!(info.message.contains("/static/draco/"), "{}", info.message)
        }
        Err(other) => panic!("expected decode error, got {other:?}"),
        Ok(_) => panic!("compressed asset must not load"),
    }
}

#[tokio::test]
async fn should_fail_for_missing_file() {
    let dir = temp_dir("gltf-missing");
    let loader = Loader::gltf(LoaderConfig::default().with_assets_root(&dir));
    let result = loader.start("nope.glb", "").finish().await.expect("terminal event");
    match result {
        Err(LoadError::Decode(info)) => assert!(info.message.contains("nope.glb")),
        Err(other) => panic!("expected decode error, got {other:?}"),
        Ok(_) => panic!("missing asset must not load"),
    }
}

#[tokio::test]
async fn should_fail_for_garbage_file() {
    let dir = temp_dir("gltf-garbage");
    write_asset(&dir, "garbage.glb", "definitely not gltf");
    let loader = Loader::gltf(LoaderConfig::default().with_assets_root(&dir));
    let result = loader.start("garbage.glb", "").finish().await.expect("terminal event");
    assert!(matches!(result, Err(LoadError::Decode(_))));
}

#[test]
fn should_name_asset_after_file() {
    assert_eq!(asset_name("models/wood_hut_v2.gltf"), "wood_hut_v2");
    assert_eq!(asset_name("https://example.com/a/b.glb?v=2"), "b");
    assert_eq!(asset_name("plain"), "plain");
}

#[test]
fn should_read_assets_root_from_env() {
    // SAFETY: no other test in this binary reads the variable.
    unsafe { std::env::set_var(flow_loader::context::ASSETS_ENV, "/srv/models") };
    let config = LoaderConfig::from_env();
    unsafe { std::env::remove_var(flow_loader::context::ASSETS_ENV) };
    assert_eq!(config.assets_root, Path::new("/srv/models"));
    assert_eq!(LoaderConfig::default().assets_root, Path::new("./assets"));
}
