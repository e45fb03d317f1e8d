pub mod headers;

use crate::catalog::RomHashes;
use crate::error::{Error, Result};
use headers::{KnownHeader, HEADER_PROBE_LEN};
use md5::{Digest, Md5};
use sha1::Sha1;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::trace;

/// Hashes of one file, plus the headerless variant when a known header was found.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHashes {
    pub size: u64,
    pub hashes: RomHashes,
    pub header: Option<KnownHeader>,
    pub headerless: Option<RomHashes>,
}

struct MultiHasher {
    crc32: crc32fast::Hasher,
    md5: Md5,
    sha1: Sha1,
}

impl MultiHasher {
    fn new() -> Self {
        Self {
            crc32: crc32fast::Hasher::new(),
            md5: Md5::new(),
            sha1: Sha1::new(),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.crc32.update(chunk);
        self.md5.update(chunk);
        self.sha1.update(chunk);
    }

    fn finish(self) -> RomHashes {
        RomHashes {
            crc32: Some(format!("{:08x}", self.crc32.finalize())),
            md5: Some(format!("{:032x}", self.md5.finalize())),
            sha1: Some(format!("{:040x}", self.sha1.finalize())),
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Single pass CRC32/MD5/SHA1 over `reader` in `chunk_size` pieces.
///
/// `should_stop` is polled after every chunk; returning true aborts with
/// `Error::Cancelled`. `declared_size` is only used for header detection.
pub fn hash_reader<R: Read>(
    mut reader: R,
    extension: Option<&str>,
    declared_size: u64,
    chunk_size: usize,
    should_stop: &dyn Fn() -> bool,
) -> Result<FileHashes> {
    let mut buf = vec![0u8; chunk_size.max(HEADER_PROBE_LEN)];
    let mut n = fill(&mut reader, &mut buf)?;

    let header = headers::detect(&buf[..n], extension, declared_size.max(n as u64));
    let mut full = MultiHasher::new();
    let mut stripped = header.map(|_| MultiHasher::new());
    let mut total: u64 = 0;

    while n > 0 {
        let chunk = &buf[..n];
        full.update(chunk);
        if let (Some(hasher), Some(h)) = (stripped.as_mut(), header) {
            let skip = (h.size() as u64).saturating_sub(total).min(n as u64) as usize;
            hasher.update(&chunk[skip..]);
        }
        total += n as u64;

        if should_stop() {
            return Err(Error::Cancelled);
        }
        n = fill(&mut reader, &mut buf)?;
    }

    Ok(FileHashes {
        size: total,
        hashes: full.finish(),
        header,
        headerless: stripped.map(MultiHasher::finish),
    })
}

pub fn hash_file(path: &Path, chunk_size: usize, should_stop: &dyn Fn() -> bool) -> Result<FileHashes> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let extension = path.extension().and_then(|e| e.to_str());
    let result = hash_reader(file, extension, size, chunk_size, should_stop)?;
    trace!(
        "Hashed {} ({} bytes, header: {:?})",
        path.display(),
        result.size,
        result.header.map(KnownHeader::name)
    );
    Ok(result)
}

pub fn hash_bytes(data: &[u8]) -> RomHashes {
    let mut hasher = MultiHasher::new();
    hasher.update(data);
    hasher.finish()
}
