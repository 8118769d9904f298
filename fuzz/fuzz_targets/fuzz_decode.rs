#![no_main]

use libfuzzer_sys::fuzz_target;
use realm_core::core::{drain_frames, FieldType, Schema};

fuzz_target!(|data: &[u8]| {
    // Decode must reject or accept without panicking or reading out of bounds.
    let Ok(schema) = Schema::define(
        2,
        &[
            (FieldType::UInt8, 1),
            (FieldType::UInt32, 1),
            (FieldType::MemoryBlock, 1),
            (FieldType::Packet, 1),
            (FieldType::Packet, 8),
            (FieldType::Char, 16),
        ],
    ) else {
        return;
    };

    if let Ok(decoded) = schema.decode_top_level(data) {
        if let Some(inner) = decoded.packet(3) {
            let _ = schema.decode_nested(inner);
        }
        for element in decoded.packets(4) {
            let _ = schema.decode_nested(element);
        }
    }
    let _ = schema.decode_nested(data);

    let mut src = bytes::BytesMut::from(data);
    let mut frames = Vec::new();
    let _ = drain_frames(&mut src, &mut frames);
});
