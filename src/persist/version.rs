/// Protocol revision of a persisted data record.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct ProtocolVersion(pub u16);

/// Legacy revision: header carries no source list and records have no CRC
/// trailer. Accepted on read only.
pub const PROTOCOL_V2: ProtocolVersion = ProtocolVersion(2);

/// Latest revision; the writer always emits this.
pub const PROTOCOL_V3: ProtocolVersion = ProtocolVersion(3);

impl ProtocolVersion {
    pub fn is_supported(&self) -> bool {
        *self >= PROTOCOL_V2 && *self <= PROTOCOL_V3
    }

    pub fn is_latest(&self) -> bool {
        *self == PROTOCOL_V3
    }

    /// Whether records of this revision end with a CRC32 trailer.
    pub(crate) fn has_crc(&self) -> bool {
        *self >= PROTOCOL_V3
    }

    /// Whether the header of this revision carries the source list.
    pub(crate) fn has_sources(&self) -> bool {
        *self >= PROTOCOL_V3
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
