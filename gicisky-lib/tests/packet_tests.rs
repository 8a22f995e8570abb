//! Chunking of the image payload into indexed packets

mod common;

use common::*;
use gicisky_lib::packet::{Response, chunk_count, image_chunk_packet, size_packet};

#[test]
fn test_chunks_cover_payload_without_gaps() {
    for (total, chunk_size) in [(8000, 240), (4000, 240), (33000, 240), (9600, 20), (1, 240), (481, 240)] {
        let payload: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let count = chunk_count(total, chunk_size).unwrap();

        let mut reassembled = Vec::with_capacity(total);
        for index in 0..count {
            let packet = image_chunk_packet(index, &payload, chunk_size).unwrap();
            assert_eq!(&packet[..4], &index.to_le_bytes());
            assert!(packet.len() - 4 <= chunk_size);
            reassembled.extend_from_slice(&packet[4..]);
        }
        assert_eq!(reassembled, payload, "total {total} chunk {chunk_size}");
        assert!(image_chunk_packet(count, &payload, chunk_size).is_err());
    }
}

#[test]
fn test_size_packet_for_models() {
    // 296x128 two-plane panel
    assert_eq!(hex::encode(size_packet(9472)), "0200250000000000");
    // 400x300 two-plane panel
    assert_eq!(hex::encode(size_packet(30000)), "0230750000000000");
}

#[test]
fn test_responses() {
    assert_eq!(Response::from(hex_to_bytes("01f400")), Response::Ready);
    assert_eq!(Response::from(hex_to_bytes("02")), Response::SizeAccepted);
    assert_eq!(Response::from(hex_to_bytes("050022000000")), Response::ChunkRequest(34));
    assert_eq!(Response::from(hex_to_bytes("0500ffffffff")), Response::ChunkRequest(u32::MAX));
    assert_eq!(
        Response::from(hex_to_bytes("0301")),
        Response::Other(hex_to_bytes("0301"))
    );
}
