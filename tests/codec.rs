//! Integration tests for the packet codec: round-trips, presence
//! handling, nested packets and stream framing.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use realm_core::core::{
    drain_frames, FieldType, FieldValue, Header, Message, Schema, FRONT_GUARD_BYTE, HEADER_LEN,
    REAR_GUARD_BYTE,
};
use realm_core::error::{CoreError, DecodeError};

fn item_schema() -> Schema {
    Schema::define(
        1,
        &[
            (FieldType::UInt8, 1),
            (FieldType::UInt32, 1),
            (FieldType::MemoryBlock, 1),
        ],
    )
    .expect("schema")
}

fn encode(message: &Message<'_>, header: Header) -> Vec<u8> {
    let mut buf = vec![0u8; 1024];
    let len = message.encode_top_level(&mut buf, header).expect("encode");
    buf.truncate(len);
    buf
}

#[test]
fn test_all_fields_roundtrip() {
    let schema = item_schema();
    let bytes = encode(
        &Message::new(&schema)
            .with(0, 3u8)
            .with(1, 77u32)
            .with(2, FieldValue::block(b"hello")),
        Header::new(9),
    );

    let decoded = schema.decode_top_level(&bytes).expect("decode");
    assert_eq!(decoded.get::<u8>(0), Some(3));
    assert_eq!(decoded.get::<u32>(1), Some(77));
    let block = decoded.block(2).expect("block present");
    assert_eq!(block, b"hello");
    assert_eq!(block.len(), 5);
    assert_eq!(decoded.header().map(|h| h.msg_type), Some(9));
}

#[test]
fn test_absent_field_leaves_output_untouched() {
    let schema = item_schema();
    let bytes = encode(
        &Message::new(&schema)
            .with(0, 3u8)
            .with(2, FieldValue::block(b"hello")),
        Header::new(9),
    );

    let decoded = schema.decode_top_level(&bytes).expect("decode");
    assert!(!decoded.is_present(1));
    let mut id = 0xDEAD_BEEFu32;
    assert!(!decoded.read_into(1, &mut id));
    assert_eq!(id, 0xDEAD_BEEF);
    assert_eq!(decoded.get::<u32>(1), None);
}

#[test]
fn test_sub_packet_decodes_independently() {
    let inner = Schema::define(
        1,
        &[
            (FieldType::UInt8, 1),
            (FieldType::UInt32, 1),
            (FieldType::Char, 8),
        ],
    )
    .expect("inner schema");
    let outer = Schema::define(2, &[(FieldType::UInt16, 1), (FieldType::Packet, 1)])
        .expect("outer schema");

    let nested = Message::new(&inner)
        .with(0, 1u8)
        .with(1, 500u32)
        .with(2, "sword")
        .encode_nested_to_vec()
        .expect("nested");

    let bytes = encode(
        &Message::new(&outer)
            .with(0, 42u16)
            .with(1, FieldValue::packet(&nested)),
        Header::new(4),
    );

    let decoded = outer.decode_top_level(&bytes).expect("decode outer");
    assert_eq!(decoded.get::<u16>(0), Some(42));
    let sub = decoded.packet(1).expect("packet present");
    assert_eq!(sub, nested.as_slice());

    let inner_decoded = inner.decode_nested(sub).expect("decode inner");
    assert_eq!(inner_decoded.get::<u8>(0), Some(1));
    assert_eq!(inner_decoded.get::<u32>(1), Some(500));
    assert_eq!(inner_decoded.chars_str(2), Some("sword"));
    assert!(inner_decoded.header().is_none());
}

#[test]
fn test_encoded_size_counts_only_present_fields() {
    let schema = item_schema();
    let flag_word = 1;

    let empty = Message::new(&schema);
    assert_eq!(empty.encoded_len().unwrap(), HEADER_LEN + flag_word + 1);

    let partial = Message::new(&schema).with(1, 5u32);
    assert_eq!(partial.encoded_len().unwrap(), HEADER_LEN + flag_word + 4 + 1);

    let full = Message::new(&schema)
        .with(0, 1u8)
        .with(1, 5u32)
        .with(2, FieldValue::block(b"abc"));
    let bytes = encode(&full, Header::new(1));
    assert_eq!(bytes.len(), HEADER_LEN + flag_word + 1 + 4 + 2 + 3 + 1);
    assert_eq!(bytes.len(), full.encoded_len().unwrap());
    assert_eq!(bytes[0], FRONT_GUARD_BYTE);
    assert_eq!(*bytes.last().unwrap(), REAR_GUARD_BYTE);
    assert_eq!(bytes[HEADER_LEN], 0b111);
}

#[test]
fn test_header_fields_are_little_endian() {
    let schema = item_schema();
    let header = Header {
        msg_type: 7,
        flags: 0x80,
        owner_id: 0x0403_0201,
        frame_tick: 0x0807_0605,
    };
    let bytes = encode(&Message::new(&schema).with(0, 1u8), header);
    assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]) as usize, bytes.len());
    assert_eq!(bytes[3], 7);
    assert_eq!(bytes[4], 0x80);
    assert_eq!(&bytes[5..9], &[1, 2, 3, 4]);
    assert_eq!(&bytes[9..13], &[5, 6, 7, 8]);

    let decoded = schema.decode_top_level(&bytes).unwrap();
    assert_eq!(decoded.header(), Some(&header));
}

#[test]
fn test_empty_block_is_distinct_from_absent() {
    let schema = item_schema();
    let present = encode(
        &Message::new(&schema).with(2, FieldValue::block(&[])),
        Header::new(1),
    );
    let absent = encode(&Message::new(&schema), Header::new(1));

    let decoded = schema.decode_top_level(&present).unwrap();
    assert_eq!(decoded.block(2), Some(&[][..]));
    assert!(decoded.is_present(2));

    let decoded = schema.decode_top_level(&absent).unwrap();
    assert_eq!(decoded.block(2), None);
    assert!(!decoded.is_present(2));
}

#[test]
fn test_packet_array_reads_actual_count() {
    let inner = Schema::define(1, &[(FieldType::UInt16, 1)]).unwrap();
    let outer = Schema::define(1, &[(FieldType::Packet, 4)]).unwrap();

    let a = Message::new(&inner).with(0, 10u16).encode_nested_to_vec().unwrap();
    let b = Message::new(&inner).with(0, 20u16).encode_nested_to_vec().unwrap();
    let list: [&[u8]; 2] = [&a, &b];

    let bytes = encode(
        &Message::new(&outer).with(0, FieldValue::packets(&list)),
        Header::new(2),
    );
    let decoded = outer.decode_top_level(&bytes).unwrap();
    assert_eq!(decoded.packet_count(0), Some(2));

    let values: Vec<u16> = decoded
        .packets(0)
        .map(|p| inner.decode_nested(p).unwrap().get::<u16>(0).unwrap())
        .collect();
    assert_eq!(values, vec![10, 20]);
}

#[test]
fn test_packet_array_over_capacity_fails() {
    let inner = Schema::define(1, &[(FieldType::UInt8, 1)]).unwrap();
    let outer = Schema::define(1, &[(FieldType::Packet, 2)]).unwrap();
    let one = Message::new(&inner).with(0, 1u8).encode_nested_to_vec().unwrap();
    let list: [&[u8]; 3] = [&one, &one, &one];

    let mut buf = vec![0u8; 256];
    let result = Message::new(&outer)
        .with(0, FieldValue::packets(&list))
        .encode_top_level(&mut buf, Header::new(1));
    assert!(matches!(result, Err(CoreError::Encode { field: 0, .. })));
}

#[test]
fn test_packet_array_count_over_capacity_rejected_on_decode() {
    let inner = Schema::define(1, &[(FieldType::UInt8, 1)]).unwrap();
    let wide = Schema::define(1, &[(FieldType::Packet, 4)]).unwrap();
    let narrow = Schema::define(1, &[(FieldType::Packet, 2)]).unwrap();
    let one = Message::new(&inner).with(0, 1u8).encode_nested_to_vec().unwrap();
    let list: [&[u8]; 3] = [&one, &one, &one];

    let bytes = encode(
        &Message::new(&wide).with(0, FieldValue::packets(&list)),
        Header::new(1),
    );
    assert!(wide.decode_top_level(&bytes).is_ok());
    assert!(narrow.decode_top_level(&bytes).is_err());
}

#[test]
fn test_truncation_at_every_offset_fails() {
    let schema = item_schema();
    let bytes = encode(
        &Message::new(&schema)
            .with(0, 3u8)
            .with(1, 77u32)
            .with(2, FieldValue::block(b"hello world")),
        Header::new(3),
    );
    for cut in 0..bytes.len() {
        assert!(
            schema.decode_top_level(&bytes[..cut]).is_err(),
            "decode succeeded on {cut} of {} bytes",
            bytes.len()
        );
    }
    assert!(schema.decode_top_level(&bytes).is_ok());
}

#[test]
fn test_nested_truncation_fails() {
    let schema = item_schema();
    let nested = Message::new(&schema)
        .with(1, 9u32)
        .with(2, FieldValue::block(b"xyz"))
        .encode_nested_to_vec()
        .unwrap();
    for cut in 0..nested.len() {
        assert!(schema.decode_nested(&nested[..cut]).is_err());
    }
    assert_eq!(schema.decode_nested(&nested).unwrap().get::<u32>(1), Some(9));
}

#[test]
fn test_corrupted_guards_are_rejected() {
    let schema = item_schema();
    let bytes = encode(&Message::new(&schema).with(0, 1u8), Header::new(1));

    let mut front = bytes.clone();
    front[0] ^= 0xFF;
    assert!(matches!(
        schema.decode_top_level(&front),
        Err(CoreError::Decode(DecodeError::BadGuard))
    ));

    let mut rear = bytes.clone();
    let last = rear.len() - 1;
    rear[last] ^= 0xFF;
    assert!(schema.decode_top_level(&rear).is_err());
}

#[test]
fn test_block_length_overrunning_message_fails() {
    let schema = item_schema();
    let mut bytes = encode(
        &Message::new(&schema).with(2, FieldValue::block(b"abcd")),
        Header::new(1),
    );
    // Block length prefix sits right after the one-byte flag word.
    let prefix = HEADER_LEN + 1;
    bytes[prefix..prefix + 2].copy_from_slice(&200u16.to_le_bytes());
    assert!(schema.decode_top_level(&bytes).is_err());
}

#[test]
fn test_schema_definition_errors() {
    assert!(matches!(
        Schema::define(3, &[(FieldType::UInt8, 1)]),
        Err(CoreError::InvalidFlagWidth(3))
    ));
    assert!(matches!(
        Schema::define(1, &[(FieldType::UInt8, 0)]),
        Err(CoreError::Schema(_))
    ));
    let nine = [(FieldType::UInt8, 1); 9];
    assert!(Schema::define(1, &nine).is_err());
    assert!(Schema::define(2, &nine).is_ok());
}

#[test]
fn test_encode_errors() {
    let schema = item_schema();

    let mut small = [0u8; 8];
    assert!(matches!(
        Message::new(&schema).with(1, 1u32).encode_top_level(&mut small, Header::new(1)),
        Err(CoreError::BufferTooSmall { .. })
    ));

    let mut buf = [0u8; 64];
    assert!(matches!(
        Message::new(&schema).with(1, 1u16).encode_top_level(&mut buf, Header::new(1)),
        Err(CoreError::Encode { field: 1, .. })
    ));
    assert!(matches!(
        Message::new(&schema).with(7, 1u8).encode_top_level(&mut buf, Header::new(1)),
        Err(CoreError::FieldOutOfRange(7))
    ));

    let big = Schema::define(1, &[(FieldType::MemoryBlock, 1), (FieldType::MemoryBlock, 1)]).unwrap();
    let chunk = vec![0u8; 40_000];
    let mut huge = vec![0u8; 90_000];
    assert!(matches!(
        Message::new(&big)
            .with(0, FieldValue::block(&chunk))
            .with(1, FieldValue::block(&chunk))
            .encode_top_level(&mut huge, Header::new(1)),
        Err(CoreError::OversizedPacket(_))
    ));
}

#[test]
fn test_positions_and_raw_chars() {
    let schema = Schema::define(
        1,
        &[(FieldType::Pos, 1), (FieldType::Char, 4), (FieldType::PosBaseMeter, 1)],
    )
    .unwrap();
    let bytes = encode(
        &Message::new(&schema)
            .with(0, [1.5f32, -2.0, 3.25])
            .with(1, "ab")
            .with(2, [-1i16, 0, 7]),
        Header::new(1),
    );
    let decoded = schema.decode_top_level(&bytes).unwrap();
    assert_eq!(decoded.get::<[f32; 3]>(0), Some([1.5, -2.0, 3.25]));
    assert_eq!(decoded.chars(1), Some(&b"ab\0\0"[..]));
    assert_eq!(decoded.chars_str(1), Some("ab"));
    assert_eq!(decoded.get::<[i16; 3]>(2), Some([-1, 0, 7]));
}

#[test]
fn test_framer_splits_stream_across_reads() {
    let schema = item_schema();
    let mut stream = Vec::new();
    for id in 0..3u32 {
        stream.extend(encode(&Message::new(&schema).with(1, id), Header::new(1)));
    }

    let mut src = BytesMut::new();
    let mut frames = Vec::new();
    for chunk in stream.chunks(7) {
        src.extend_from_slice(chunk);
        drain_frames(&mut src, &mut frames).expect("in sync");
    }
    assert!(src.is_empty());
    let ids: Vec<u32> = frames
        .iter()
        .map(|f| schema.decode_top_level(f).unwrap().get::<u32>(1).unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn test_framer_rejects_desynchronised_stream() {
    let mut src = BytesMut::from(&[0x00u8, 0x10, 0x00, 0x01][..]);
    let mut frames = Vec::new();
    assert!(drain_frames(&mut src, &mut frames).is_err());
    assert!(frames.is_empty());
}
