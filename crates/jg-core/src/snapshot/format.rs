//! JGA Snapshot Format v1 Constants
//!
//! All values are little-endian.

/// Magic bytes: "JGA1"
pub const JGA_MAGIC: [u8; 4] = [0x4A, 0x47, 0x41, 0x31];

/// Current format version
pub const JGA_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Section directory entry size
pub const SECTION_ENTRY_SIZE: usize = 24;

// =============================================================================
// Header Field Offsets
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "JGA1"
    pub const MAGIC: usize = 0;
    /// u16 version
    pub const VERSION: usize = 4;
    /// u16 flags
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 64)
    pub const HEADER_BYTES: usize = 8;
    /// u32 sectionCount
    pub const SECTION_COUNT: usize = 12;
    /// u32 sectionDirOffset
    pub const SECTION_DIR_OFFSET: usize = 16;
    /// u32 sectionDirBytes
    pub const SECTION_DIR_BYTES: usize = 20;
    /// u32 buildId
    pub const BUILD_ID: usize = 24;
    /// u32 snapshotCrc32
    pub const SNAPSHOT_CRC32: usize = 28;
}

bitflags::bitflags! {
    /// Header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SnapshotFlags: u16 {
        /// Snapshot includes CRC32 checksum
        const HAS_CRC32 = 1 << 0;
    }
}

// =============================================================================
// Section Directory Entry Offsets
// =============================================================================

pub mod section_entry {
    /// u16 section id
    pub const ID: usize = 0;
    /// u16 flags
    pub const FLAGS: usize = 2;
    /// u32 file offset
    pub const OFFSET: usize = 4;
    /// u32 byte length
    pub const LENGTH: usize = 8;
    /// u32 element count
    pub const COUNT: usize = 12;
    /// u32 CRC32 of the section bytes
    pub const CRC32: usize = 16;
}

// =============================================================================
// Section IDs
// =============================================================================

/// Section type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionId {
    /// Automaton metadata
    Meta = 0x0001,
    /// Flattened transition table (u32 per cell)
    Transitions = 0x0002,
    /// Output bitmap (u32 per state)
    Output = 0x0003,
}

impl TryFrom<u16> for SectionId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Meta),
            0x0002 => Ok(Self::Transitions),
            0x0003 => Ok(Self::Output),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Meta Section Layout
// =============================================================================

/// Meta section size
pub const META_SIZE: usize = 16;

pub mod meta {
    /// u32 number of states
    pub const NUM_STATES: usize = 0;
    /// u32 alphabet size (always 16)
    pub const ALPHABET_SIZE: usize = 4;
    /// u32 fingerprint length the automaton was built for
    pub const FINGERPRINT_LEN: usize = 8;
    /// u32 number of accepted patterns
    pub const PATTERN_COUNT: usize = 12;
}

// =============================================================================
// Helpers
// =============================================================================

/// Align offset to boundary.
#[inline]
pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Validate magic bytes.
#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == JGA_MAGIC
}

/// Read u16 little-endian.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read u32 little-endian.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Write u16 little-endian.
#[inline]
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write u32 little-endian.
#[inline]
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Encode a `u32` array as little-endian bytes.
pub fn encode_u32_array(values: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for value in values {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Decode little-endian bytes into a `u32` array. `None` if the length is
/// not a multiple of four.
pub fn decode_u32_array(data: &[u8]) -> Option<Vec<u32>> {
    if data.len() % 4 != 0 {
        return None;
    }
    Some(
        data.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_offset() {
        assert_eq!(align_offset(0, 4), 0);
        assert_eq!(align_offset(5, 4), 8);
        assert_eq!(align_offset(8, 4), 8);
    }

    #[test]
    fn test_u32_array_codec() {
        let values = [0u32, 1, 0xdead_beef, u32::MAX];
        let bytes = encode_u32_array(&values);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..12], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(decode_u32_array(&bytes).unwrap(), values);
        assert!(decode_u32_array(&bytes[..7]).is_none());
    }

    #[test]
    fn test_section_id_roundtrip() {
        for id in [SectionId::Meta, SectionId::Transitions, SectionId::Output] {
            assert_eq!(SectionId::try_from(id as u16), Ok(id));
        }
        assert!(SectionId::try_from(0x00ff).is_err());
    }
}
