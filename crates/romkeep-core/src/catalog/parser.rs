use super::clrmamepro::ClrMameProParser;
use super::logiqx::LogiqxParser;
use super::{Catalog, CatalogHeader, Game, InvalidEntryPolicy, ParseReport};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

/// Bytes inspected when sniffing a catalog's format.
const SNIFF_LEN: u64 = 4096;

/// Capability shared by every catalog format.
pub trait CatalogParser {
    /// Cheap check on the first few KiB of the document.
    fn sniff(&self, head: &str) -> bool;

    /// Parse the document, handing each title to `on_game` as soon as it is complete.
    fn parse_streaming<R: BufRead>(
        &self,
        reader: R,
        policy: InvalidEntryPolicy,
        on_game: &mut dyn FnMut(Game) -> Result<()>,
    ) -> Result<(CatalogHeader, ParseReport)>;
}

/// The closed set of supported catalog formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogFormat {
    /// Logiqx / MAME XML datafiles, read as a stream of tag events.
    Logiqx,
    /// ClrMamePro `keyword ( key value ... )` blocks.
    ClrMamePro,
}

impl CatalogFormat {
    pub const ALL: [CatalogFormat; 2] = [CatalogFormat::Logiqx, CatalogFormat::ClrMamePro];

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogFormat::Logiqx => "logiqx",
            CatalogFormat::ClrMamePro => "clrmamepro",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Look at the start of `reader` without moving its position.
    pub fn can_parse<R: Read + Seek>(self, reader: &mut R) -> Result<bool> {
        let head = peek_head(reader)?;
        Ok(self.sniff(&head))
    }

    /// Find the format of a document, leaving the reader where it was.
    pub fn detect<R: Read + Seek>(reader: &mut R) -> Result<CatalogFormat> {
        let head = peek_head(reader)?;
        Self::ALL
            .into_iter()
            .find(|f| f.sniff(&head))
            .ok_or_else(|| Error::parse("unrecognized catalog format"))
    }

    fn sniff(self, head: &str) -> bool {
        match self {
            CatalogFormat::Logiqx => LogiqxParser.sniff(head),
            CatalogFormat::ClrMamePro => ClrMameProParser.sniff(head),
        }
    }

    pub fn parse_streaming<R: Read>(
        self,
        reader: R,
        policy: InvalidEntryPolicy,
        on_game: &mut dyn FnMut(Game) -> Result<()>,
    ) -> Result<(CatalogHeader, ParseReport)> {
        let reader = BufReader::new(reader);
        match self {
            CatalogFormat::Logiqx => LogiqxParser.parse_streaming(reader, policy, on_game),
            CatalogFormat::ClrMamePro => ClrMameProParser.parse_streaming(reader, policy, on_game),
        }
    }

    /// Parse the whole document into memory.
    pub fn parse<R: Read>(
        self,
        reader: R,
        policy: InvalidEntryPolicy,
    ) -> Result<(Catalog, ParseReport)> {
        let mut games = Vec::new();
        let (header, report) = self.parse_streaming(reader, policy, &mut |game| {
            games.push(game);
            Ok(())
        })?;
        Ok((
            Catalog {
                format: self,
                header,
                games,
            },
            report,
        ))
    }
}

impl fmt::Display for CatalogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn peek_head<R: Read + Seek>(reader: &mut R) -> Result<String> {
    let start = reader.stream_position()?;
    let mut buf = Vec::with_capacity(SNIFF_LEN as usize);
    reader.by_ref().take(SNIFF_LEN).read_to_end(&mut buf)?;
    reader.seek(SeekFrom::Start(start))?;
    let text = String::from_utf8_lossy(&buf);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_detect_restores_position() {
        let data = b"clrmamepro (\n\tname \"Test\"\n)\n".to_vec();
        let mut cursor = Cursor::new(data);
        let format = CatalogFormat::detect(&mut cursor).unwrap();
        assert_eq!(format, CatalogFormat::ClrMamePro);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_detect_xml() {
        let data = br#"<?xml version="1.0"?>
<!DOCTYPE datafile PUBLIC "-//Logiqx//DTD ROM Management Datafile//EN" "">
<datafile><header><name>X</name></header></datafile>"#
            .to_vec();
        let mut cursor = Cursor::new(data);
        assert!(CatalogFormat::Logiqx.can_parse(&mut cursor).unwrap());
        assert!(!CatalogFormat::ClrMamePro.can_parse(&mut cursor).unwrap());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_detect_unknown_is_parse_error() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        assert!(matches!(
            CatalogFormat::detect(&mut cursor),
            Err(Error::Parse(_))
        ));
    }
}
