//! Zero-copy JGA Snapshot Loader

use std::collections::HashMap;

use super::format::*;
use crate::automaton::{AutomatonError, DenseAutomaton};
use crate::fingerprint::ALPHABET_SIZE;
use crate::hash::{crc32, Crc32};

/// Error type for snapshot loading.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("CRC32 mismatch: stored={stored}, computed={computed}")]
    Crc32Mismatch { stored: u32, computed: u32 },
    #[error("Invalid section: {0}")]
    InvalidSection(String),
    #[error("Data too short")]
    DataTooShort,
    #[error("Invalid automaton: {0}")]
    Automaton(#[from] AutomatonError),
}

/// Section metadata.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub id: SectionId,
    pub flags: u16,
    pub offset: usize,
    pub length: usize,
    pub count: usize,
    pub crc32: u32,
}

/// Decoded `Meta` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub num_states: usize,
    pub alphabet_size: usize,
    pub fingerprint_len: usize,
    pub pattern_count: usize,
}

/// Zero-copy snapshot view.
pub struct Snapshot<'a> {
    data: &'a [u8],
    pub version: u16,
    pub flags: SnapshotFlags,
    pub build_id: u32,
    sections: HashMap<SectionId, SectionInfo>,
}

impl<'a> Snapshot<'a> {
    /// Load a snapshot from bytes.
    pub fn load(data: &'a [u8]) -> Result<Self, SnapshotError> {
        if data.len() < HEADER_SIZE {
            return Err(SnapshotError::DataTooShort);
        }

        // Validate magic
        if !validate_magic(data) {
            return Err(SnapshotError::InvalidMagic);
        }

        // Read header
        let version = read_u16_le(data, header::VERSION);
        if version != JGA_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let flags = SnapshotFlags::from_bits_truncate(read_u16_le(data, header::FLAGS));
        let section_count = read_u32_le(data, header::SECTION_COUNT) as usize;
        let section_dir_offset = read_u32_le(data, header::SECTION_DIR_OFFSET) as usize;
        let build_id = read_u32_le(data, header::BUILD_ID);

        if flags.contains(SnapshotFlags::HAS_CRC32) {
            let stored = read_u32_le(data, header::SNAPSHOT_CRC32);

            // Everything except the CRC field itself
            let mut hasher = Crc32::new();
            hasher.update(&data[..header::SNAPSHOT_CRC32]);
            hasher.update(&data[header::SNAPSHOT_CRC32 + 4..]);
            let computed = hasher.finish();

            if stored != computed {
                return Err(SnapshotError::Crc32Mismatch { stored, computed });
            }
        }

        // Parse section directory
        let mut sections = HashMap::new();
        for i in 0..section_count {
            let entry_offset = section_dir_offset + i * SECTION_ENTRY_SIZE;
            if entry_offset + SECTION_ENTRY_SIZE > data.len() {
                return Err(SnapshotError::InvalidSection(format!(
                    "directory entry {i} out of bounds"
                )));
            }

            let id_raw = read_u16_le(data, entry_offset + section_entry::ID);
            let id = match SectionId::try_from(id_raw) {
                Ok(id) => id,
                Err(_) => continue, // Skip unknown sections
            };

            let info = SectionInfo {
                id,
                flags: read_u16_le(data, entry_offset + section_entry::FLAGS),
                offset: read_u32_le(data, entry_offset + section_entry::OFFSET) as usize,
                length: read_u32_le(data, entry_offset + section_entry::LENGTH) as usize,
                count: read_u32_le(data, entry_offset + section_entry::COUNT) as usize,
                crc32: read_u32_le(data, entry_offset + section_entry::CRC32),
            };

            if info.offset + info.length > data.len() {
                return Err(SnapshotError::InvalidSection(format!("{id:?} out of bounds")));
            }
            let computed = crc32(&data[info.offset..info.offset + info.length]);
            if computed != info.crc32 {
                return Err(SnapshotError::Crc32Mismatch { stored: info.crc32, computed });
            }

            sections.insert(id, info);
        }

        Ok(Self { data, version, flags, build_id, sections })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn get_section(&self, id: SectionId) -> Option<&'a [u8]> {
        let info = self.sections.get(&id)?;
        Some(&self.data[info.offset..info.offset + info.length])
    }

    /// Get section info.
    pub fn get_section_info(&self, id: SectionId) -> Option<&SectionInfo> {
        self.sections.get(&id)
    }

    /// Decode the `Meta` section.
    pub fn meta(&self) -> Result<SnapshotMeta, SnapshotError> {
        let data = self
            .get_section(SectionId::Meta)
            .ok_or_else(|| SnapshotError::InvalidSection("missing Meta".to_string()))?;
        if data.len() < META_SIZE {
            return Err(SnapshotError::InvalidSection("Meta too short".to_string()));
        }
        Ok(SnapshotMeta {
            num_states: read_u32_le(data, meta::NUM_STATES) as usize,
            alphabet_size: read_u32_le(data, meta::ALPHABET_SIZE) as usize,
            fingerprint_len: read_u32_le(data, meta::FINGERPRINT_LEN) as usize,
            pattern_count: read_u32_le(data, meta::PATTERN_COUNT) as usize,
        })
    }

    /// Rebuild the dense automaton stored in this snapshot.
    pub fn automaton(&self) -> Result<DenseAutomaton, SnapshotError> {
        let meta = self.meta()?;
        if meta.alphabet_size != ALPHABET_SIZE {
            return Err(SnapshotError::InvalidSection(format!(
                "alphabet size {} (expected {ALPHABET_SIZE})",
                meta.alphabet_size
            )));
        }

        let transitions = self.u32_section(SectionId::Transitions)?;
        let output = self.u32_section(SectionId::Output)?;
        Ok(DenseAutomaton::from_parts(meta.num_states, transitions, output)?)
    }

    fn u32_section(&self, id: SectionId) -> Result<Vec<u32>, SnapshotError> {
        let data = self
            .get_section(id)
            .ok_or_else(|| SnapshotError::InvalidSection(format!("missing {id:?}")))?;
        decode_u32_array(data)
            .ok_or_else(|| SnapshotError::InvalidSection(format!("{id:?} not u32-aligned")))
    }

    /// Total snapshot size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}
