use super::*;
use serde_json::json;

fn sample_frame() -> Frame {
    let mut data = Data::new();
    data.insert("x".into(), json!(1.25));
    data.insert("ok".into(), json!(true));
    data.insert("tags".into(), json!(["a", "b"]));
    data.insert("nested".into(), json!({"k": "v"}));
    data.insert("nil".into(), Value::Null);
    Frame {
        id: Uuid::new_v4(),
        parent_id: Some(Uuid::new_v4()),
        ts: 42,
        board_id: Some(Uuid::new_v4()),
        from: Some("user-1".to_owned()),
        syscall: "task:moved".to_owned(),
        status: Status::Done,
        data,
    }
}

fn wire_with(id: &str, status: i32, data: Option<prost_types::Value>) -> Vec<u8> {
    let wire = WireFrame {
        id: id.to_owned(),
        parent_id: None,
        ts: 1,
        board_id: None,
        from: None,
        syscall: "board:join".to_owned(),
        status,
        data,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");
    bytes
}

#[derive(Debug, thiserror::Error)]
#[error("board gone")]
struct Gone;

impl ErrorCode for Gone {
    fn error_code(&self) -> &'static str {
        "E_NOT_FOUND"
    }
}

#[test]
fn status_numeric_mapping_matches_wire_enum() {
    assert_eq!(Status::Request.as_i32(), 0);
    assert_eq!(Status::Done.as_i32(), 1);
    assert_eq!(Status::Error.as_i32(), 2);
    assert_eq!(Status::Cancel.as_i32(), 3);
    assert_eq!(Status::Item.as_i32(), 4);
}

#[test]
fn status_from_wire_rejects_out_of_range_value() {
    let err = Status::from_i32(99).expect_err("status should be invalid");
    assert!(matches!(err, CodecError::InvalidStatus(99)));
}

#[test]
fn terminal_statuses() {
    assert!(Status::Done.is_terminal());
    assert!(Status::Error.is_terminal());
    assert!(Status::Cancel.is_terminal());
    assert!(!Status::Request.is_terminal());
    assert!(!Status::Item.is_terminal());
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = sample_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_status() {
    let bytes = wire_with(&Uuid::new_v4().to_string(), 77, None);
    let err = decode_frame(&bytes).expect_err("status should fail");
    assert!(matches!(err, CodecError::InvalidStatus(77)));
}

#[test]
fn decode_frame_rejects_non_uuid_id() {
    let bytes = wire_with("id-1", Status::Request.as_i32(), None);
    let err = decode_frame(&bytes).expect_err("id should fail");
    assert!(matches!(err, CodecError::InvalidId { field: "id", .. }));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_map() {
    let bytes = wire_with(&Uuid::new_v4().to_string(), Status::Request.as_i32(), None);
    let frame = decode_frame(&bytes).expect("decode");
    assert!(frame.data.is_empty());
}

#[test]
fn decode_frame_drops_non_object_payload() {
    let nan = prost_types::Value { kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)) };
    let bytes = wire_with(&Uuid::new_v4().to_string(), Status::Request.as_i32(), Some(nan));
    let frame = decode_frame(&bytes).expect("decode");
    assert!(frame.data.is_empty());
}

#[test]
fn integral_numbers_stay_integral_across_the_wire() {
    let frame = Frame::request("task:moved", Data::new())
        .with_data("source_index", 2)
        .with_data("ratio", 0.5);
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data.get("source_index"), Some(&json!(2)));
    assert_eq!(decoded.data.get("ratio"), Some(&json!(0.5)));
}

#[test]
fn reply_inherits_syscall_board_and_parent() {
    let board_id = Uuid::new_v4();
    let req = Frame::request("board:join", Data::new()).with_board_id(board_id);
    let done = req.done();
    assert_eq!(done.parent_id, Some(req.id));
    assert_eq!(done.board_id, Some(board_id));
    assert_eq!(done.syscall, "board:join");
    assert_eq!(done.status, Status::Done);
    assert_ne!(done.id, req.id);
}

#[test]
fn error_from_carries_code_and_retryable() {
    let req = Frame::request("board:join", Data::new());
    let err = req.error_from(&Gone);
    assert_eq!(err.status, Status::Error);
    assert_eq!(err.data.get(FRAME_CODE), Some(&json!("E_NOT_FOUND")));
    assert_eq!(err.data.get(FRAME_MESSAGE), Some(&json!("board gone")));
    assert_eq!(err.data.get(FRAME_RETRYABLE), Some(&json!(false)));
}

#[test]
fn prefix_and_op_split_on_first_colon() {
    let frame = Frame::request("board:member-added", Data::new());
    assert_eq!(frame.prefix(), "board");
    assert_eq!(frame.op(), "member-added");

    let bare = Frame::request("ping", Data::new());
    assert_eq!(bare.prefix(), "ping");
    assert_eq!(bare.op(), "");
}

#[test]
fn uuid_field_parses_string_values_only() {
    let id = Uuid::new_v4();
    let frame = Frame::request("board:join", Data::new())
        .with_data("board_id", id.to_string())
        .with_data("bad", "nope")
        .with_data("num", 3);
    assert_eq!(frame.uuid_field("board_id"), Some(id));
    assert_eq!(frame.uuid_field("bad"), None);
    assert_eq!(frame.uuid_field("num"), None);
    assert_eq!(frame.uuid_field("missing"), None);
}

#[test]
fn event_and_decode_use_the_payload_shape() {
    let board_id = Uuid::new_v4();
    let payload = events::ColumnDeleted { board_id, column_id: Uuid::new_v4() };
    let frame = Frame::event(events::COLUMN_DELETED, &payload);
    assert_eq!(frame.status, Status::Request);
    assert_eq!(frame.data.get("board_id"), Some(&json!(board_id.to_string())));

    let back: events::ColumnDeleted = frame.decode().expect("decode payload");
    assert_eq!(back, payload);
}

#[test]
fn frame_json_uses_lowercase_status() {
    let frame = Frame::request("session:heartbeat", Data::new());
    let text = serde_json::to_string(&frame).expect("serialize");
    assert!(text.contains("\"status\":\"request\""));
    let back: Frame = serde_json::from_str(&text).expect("deserialize");
    assert_eq!(back, frame);
}

#[test]
fn frame_json_tolerates_missing_data() {
    let id = Uuid::new_v4();
    let text = format!(r#"{{"id":"{id}","parent_id":null,"ts":1,"from":null,"syscall":"session:heartbeat","status":"request"}}"#);
    let frame: Frame = serde_json::from_str(&text).expect("deserialize");
    assert!(frame.data.is_empty());
    assert_eq!(frame.board_id, None);
}
