use flow_loader::protocol::{
    Classified, IndexWidth, LoadRequest, Progress, WorkerMessage, classify, decode_line,
    encode_line,
};

#[test]
fn should_classify_well_formed_progress() {
    let classified = classify(WorkerMessage::Progress(Progress::new(5.0, 10.0)));
    assert_eq!(classified, Classified::Progress(Progress::new(5.0, 10.0)));
}

#[test]
fn should_treat_malformed_progress_as_unknown() {
    for progress in [
        Progress::new(11.0, 10.0),
        Progress::new(-1.0, 10.0),
        Progress::new(f64::NAN, 10.0),
        Progress::new(1.0, f64::INFINITY),
    ] {
        let classified = classify(WorkerMessage::Progress(progress));
        assert!(
            matches!(classified, Classified::Unknown(_)),
            "{progress:?} was classified as {classified:?}"
        );
    }
}

#[test]
fn should_guard_progress_ratio_against_unknown_total() {
    assert_eq!(Progress::new(100.0, 0.0).ratio(), 0.0);
    assert_eq!(Progress::new(1.0, 4.0).ratio(), 0.25);
    assert_eq!(Progress::new(4.0, 4.0).ratio(), 1.0);
}

#[test]
fn should_decode_success_line() {
    let line = r#"{
        "type": "success",
        "sceneData": {
            "name": "root",
            "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1],
            "children": [{
                "name": "leaf",
                "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 2,0,0,1],
                "mesh": {
                    "geometry": {
                        "position": [0,0,0, 1,0,0, 0,1,0],
                        "index": { "values": [0, 1, 2], "width": 16 }
                    },
                    "material": { "color": [1, 0, 0], "metalness": 0.5, "roughness": 0.25, "mapId": 3 }
                }
            }]
        },
        "textureBuffers": [[137, 80, 78, 71]]
    }"#
    .replace('\n', " ");

    let Classified::Success(asset) = classify(decode_line(&line)) else {
        panic!("expected success");
    };
    assert_eq!(asset.scene_data.name, "root");
    assert!(asset.scene_data.mesh.is_none());
    assert_eq!(asset.scene_data.node_count(), 2);
    let leaf = &asset.scene_data.children[0];
    assert_eq!(leaf.matrix[12], 2.0);
    let mesh = leaf.mesh.as_ref().expect("leaf has a mesh");
    let index = mesh.geometry.index.as_ref().expect("mesh is indexed");
    assert_eq!(index.width, IndexWidth::U16);
    assert_eq!(index.values, vec![0, 1, 2]);
    assert!(mesh.geometry.normal.is_none());
    assert_eq!(mesh.material.map_id, Some(3));
    assert_eq!(asset.texture_buffers, vec![vec![137, 80, 78, 71]]);
}

#[test]
fn should_decode_error_line() {
    let message = decode_line(r#"{"type":"error","error":{"message":"bad magic"}}"#);
    match classify(message) {
        Classified::Error(info) => assert_eq!(info.message, "bad magic"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[test]
fn should_tolerate_unknown_and_garbage_lines() {
    assert_eq!(
        decode_line(r#"{"type":"heartbeat","at":12}"#),
        WorkerMessage::Unknown
    );
    assert_eq!(decode_line("not json at all"), WorkerMessage::Unknown);
    assert_eq!(decode_line(r#"{"loaded":1,"total":2}"#), WorkerMessage::Unknown);
    assert!(matches!(
        classify(WorkerMessage::Unknown),
        Classified::Unknown(_)
    ));
}

#[test]
fn should_reject_unsupported_index_width() {
    let line = r#"{"type":"success","sceneData":{"name":"r","matrix":[1,0,0,0,0,1,0,0,0,0,1,0,0,0,0,1],
        "mesh":{"geometry":{"position":[0,0,0],"index":{"values":[0],"width":8}},
        "material":{"color":[1,1,1],"metalness":0,"roughness":1}}}}"#
        .replace('\n', " ");
    assert_eq!(decode_line(&line), WorkerMessage::Unknown);
}

#[test]
fn should_encode_request_as_one_camel_case_line() {
    let line = encode_line(&LoadRequest::new("models/hut.glb", "decoders/")).unwrap();
    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1);
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["url"], "models/hut.glb");
    assert_eq!(value["decoderAssetPath"], "decoders/");
}

#[test]
fn should_encode_messages_readable_by_decode_line() {
    let message = WorkerMessage::Progress(Progress::new(3.0, 9.0));
    let line = encode_line(&message).unwrap();
    assert!(line.contains(r#""type":"progress""#));
    assert_eq!(decode_line(&line), message);
}

#[test]
fn should_pick_narrowest_index_width() {
    use flow_loader::protocol::IndexBuffer;

    assert_eq!(IndexBuffer::new_narrowest(vec![0, 65535]).width, IndexWidth::U16);
    assert_eq!(IndexBuffer::new_narrowest(vec![0, 65536]).width, IndexWidth::U32);
}
