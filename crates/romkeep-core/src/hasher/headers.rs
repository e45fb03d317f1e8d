//! Copier and emulator headers that catalogs hash without.

/// Bytes needed to recognise any supported header.
pub const HEADER_PROBE_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownHeader {
    /// iNES / NES 2.0
    Ines,
    /// Famicom Disk System (fwNES)
    Fds,
    Atari7800,
    AtariLynx,
    /// Super Magicom / Super Wild Card style copier header
    SnesCopier,
}

impl KnownHeader {
    pub fn size(self) -> usize {
        match self {
            KnownHeader::Ines | KnownHeader::Fds => 16,
            KnownHeader::AtariLynx => 64,
            KnownHeader::Atari7800 => 128,
            KnownHeader::SnesCopier => 512,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KnownHeader::Ines => "iNES",
            KnownHeader::Fds => "FDS",
            KnownHeader::Atari7800 => "Atari 7800",
            KnownHeader::AtariLynx => "Atari Lynx",
            KnownHeader::SnesCopier => "SNES copier",
        }
    }
}

const SNES_EXTENSIONS: [&str; 4] = ["smc", "sfc", "swc", "fig"];

/// Recognise a header from the first bytes of a file.
///
/// `file_size` is the full size of the file; a header is only reported when
/// there is data behind it.
pub fn detect(head: &[u8], extension: Option<&str>, file_size: u64) -> Option<KnownHeader> {
    let header = if head.starts_with(b"NES\x1a") {
        Some(KnownHeader::Ines)
    } else if head.starts_with(b"FDS\x1a") {
        Some(KnownHeader::Fds)
    } else if head.len() > 9 && &head[1..10] == b"ATARI7800" {
        Some(KnownHeader::Atari7800)
    } else if head.starts_with(b"LYNX\0") {
        Some(KnownHeader::AtariLynx)
    } else if extension.map_or(false, |ext| {
        SNES_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }) && file_size % 1024 == 512
    {
        Some(KnownHeader::SnesCopier)
    } else {
        None
    };

    header.filter(|h| file_size > h.size() as u64)
}
