use crate::constants::{CHUNK_INDEX_SIZE, CHUNK_REQUEST_SIZE};
use crate::error::GiciskyError;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// First byte of every command-channel packet and notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Start = 0x01,
    AnnounceSize = 0x02,
    BeginImage = 0x03,
    /// Device asks for the image chunk at the carried index
    ChunkRequest = 0x05,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Announce-size command (8 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SizePacketRaw {
    pub opcode: u8,
    /// Total payload size, all planes concatenated
    pub size: U32,
    pub reserved: [u8; 3],
}

/// Chunk-request notification prefix: opcode, status, chunk index
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ChunkRequestRaw {
    pub opcode: u8,
    pub status: u8,
    pub index: U32,
}

/// Single-byte command packet.
///
/// Use [`size_packet`] for [`Opcode::AnnounceSize`], which carries a payload.
pub fn command_packet(opcode: Opcode) -> Bytes {
    Bytes::copy_from_slice(&[opcode.into()])
}

/// Announce the total payload size to the device
pub fn size_packet(total_size: u32) -> Bytes {
    let raw = SizePacketRaw {
        opcode: Opcode::AnnounceSize.into(),
        size: U32::new(total_size),
        reserved: [0; 3],
    };
    Bytes::copy_from_slice(raw.as_bytes())
}

/// Number of chunks needed to carry `total_size` bytes.
///
/// Chunk indices travel as a `u32`, so a count that does not fit is an error.
pub fn chunk_count(total_size: usize, chunk_size: usize) -> Result<u32, GiciskyError> {
    if chunk_size == 0 {
        return Err(GiciskyError::InvalidPacket("Chunk size must be non-zero".to_string()));
    }
    let count = total_size.div_ceil(chunk_size);
    u32::try_from(count)
        .map_err(|_| GiciskyError::InvalidPacket(format!("{} chunks exceed the u32 index range", count)))
}

/// Indexed image chunk: 4-byte LE index followed by the slice of `payload` it covers
pub fn image_chunk_packet(index: u32, payload: &[u8], chunk_size: usize) -> Result<Bytes, GiciskyError> {
    if chunk_size == 0 {
        return Err(GiciskyError::InvalidPacket("Chunk size must be non-zero".to_string()));
    }
    let start = index as usize * chunk_size;
    if start >= payload.len() {
        return Err(GiciskyError::InvalidPacket(format!(
            "Chunk {} starts at byte {} past payload end {}",
            index,
            start,
            payload.len()
        )));
    }
    let end = (start + chunk_size).min(payload.len());

    let mut packet = BytesMut::with_capacity(CHUNK_INDEX_SIZE + end - start);
    packet.put_u32_le(index);
    packet.extend_from_slice(&payload[start..end]);
    Ok(packet.freeze())
}

/// A device notification on the command characteristic, classified by shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `01 F4 00`: device accepted the start command
    Ready,
    /// `02`: device accepted the announced size
    SizeAccepted,
    /// `05 00 <u32 LE>`: device wants the chunk at this index next
    ChunkRequest(u32),
    /// Anything else, kept verbatim for diagnostics
    Other(Bytes),
}

impl Response {
    /// Classify a raw notification payload
    pub fn parse(bytes: &[u8]) -> Self {
        Self::from(Bytes::copy_from_slice(bytes))
    }
}

impl From<Bytes> for Response {
    fn from(bytes: Bytes) -> Self {
        let opcode = match bytes.first() {
            Some(&b) => Opcode::from_primitive(b),
            None => return Response::Other(bytes),
        };

        match opcode {
            Opcode::Start if bytes.starts_with(&[0x01, 0xF4, 0x00]) => Response::Ready,
            Opcode::AnnounceSize => Response::SizeAccepted,
            Opcode::ChunkRequest if bytes.len() >= CHUNK_REQUEST_SIZE => {
                match ChunkRequestRaw::ref_from_prefix(bytes.as_ref()) {
                    Ok((raw, _)) if raw.status == 0x00 => Response::ChunkRequest(raw.index.get()),
                    _ => Response::Other(bytes),
                }
            }
            _ => Response::Other(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_packets() {
        assert_eq!(command_packet(Opcode::Start).as_ref(), &[0x01]);
        assert_eq!(command_packet(Opcode::BeginImage).as_ref(), &[0x03]);
    }

    #[test]
    fn test_size_packet_layout() {
        // 250x128 two-plane panel: 8000 bytes
        let packet = size_packet(8000);
        assert_eq!(hex::encode(&packet), "02401f0000000000");
        assert_eq!(packet.len(), crate::constants::SIZE_PACKET_SIZE);
    }

    #[test]
    fn test_image_chunk_packet() {
        let payload: Vec<u8> = (0..=255).collect();
        let first = image_chunk_packet(0, &payload, 240).unwrap();
        assert_eq!(&first[..4], &[0, 0, 0, 0]);
        assert_eq!(first.len(), 4 + 240);
        assert_eq!(first[4], 0);

        let last = image_chunk_packet(1, &payload, 240).unwrap();
        assert_eq!(&last[..4], &[1, 0, 0, 0]);
        assert_eq!(&last[4..], &payload[240..]);

        assert!(image_chunk_packet(2, &payload, 240).is_err());
        assert!(image_chunk_packet(0, &payload, 0).is_err());
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(8000, 240).unwrap(), 34);
        assert_eq!(chunk_count(480, 240).unwrap(), 2);
        assert_eq!(chunk_count(0, 240).unwrap(), 0);
        assert!(matches!(chunk_count(480, 0), Err(GiciskyError::InvalidPacket(_))));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_chunk_count_beyond_index_range() {
        let total = (u32::MAX as usize + 1) * 20;
        assert!(matches!(chunk_count(total, 20), Err(GiciskyError::InvalidPacket(_))));
        assert_eq!(chunk_count(u32::MAX as usize * 20, 20).unwrap(), u32::MAX);
    }

    #[test]
    fn test_response_classification() {
        let parse = |hex_data: &str| Response::from(Bytes::from(hex::decode(hex_data).unwrap()));

        assert_eq!(parse("01f400"), Response::Ready);
        assert_eq!(parse("01f40000"), Response::Ready);
        assert!(matches!(parse("010000"), Response::Other(_)));
        assert_eq!(parse("02"), Response::SizeAccepted);
        assert_eq!(parse("05002a000000"), Response::ChunkRequest(42));
        assert!(matches!(parse("05002a00"), Response::Other(_)));
        assert!(matches!(parse("05012a000000"), Response::Other(_)));
        assert!(matches!(parse(""), Response::Other(_)));
        assert_eq!(Response::parse(&[0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0xff]), Response::ChunkRequest(1));
    }
}
