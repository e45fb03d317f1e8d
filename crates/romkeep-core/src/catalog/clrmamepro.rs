//! ClrMamePro block catalogs:
//!
//! ```text
//! clrmamepro (
//!     name "Nintendo - Game Boy"
//! )
//! game (
//!     name "Tetris (World)"
//!     rom ( name "Tetris (World).gb" size 32768 crc 46df91ad )
//! )
//! ```

use super::parser::CatalogParser;
use super::{CatalogHeader, Game, InvalidEntryPolicy, ParseReport, RomEntry, RomStatus};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::io::BufRead;
use std::str::FromStr;
use tracing::{debug, warn};

lazy_static! {
    static ref LEADING_BLOCK: Regex =
        Regex::new(r"^\s*(clrmamepro|game|machine|resource)\s*\(").unwrap();
    static ref PAIR: Regex =
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s+(?:"((?:[^"\\]|\\.)*)"|([^\s()"]+))"#).unwrap();
}

const GAME_BLOCKS: [&str; 3] = ["game", "machine", "resource"];

pub struct ClrMameProParser;

impl CatalogParser for ClrMameProParser {
    fn sniff(&self, head: &str) -> bool {
        LEADING_BLOCK.is_match(head)
    }

    fn parse_streaming<R: BufRead>(
        &self,
        mut reader: R,
        policy: InvalidEntryPolicy,
        on_game: &mut dyn FnMut(Game) -> Result<()>,
    ) -> Result<(CatalogHeader, ParseReport)> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| Error::parse(format!("catalog is not valid UTF-8 text: {}", e)))?;

        let mut header = CatalogHeader::default();
        let mut report = ParseReport::default();

        let (_, blocks) = split_blocks(&text)?;
        let mut recognized = 0;

        for block in blocks {
            if block.keyword == "clrmamepro" {
                recognized += 1;
                read_header(block.body, &mut header);
                continue;
            }
            if !GAME_BLOCKS.contains(&block.keyword.as_str()) {
                debug!("Ignoring unknown '{}' block", block.keyword);
                continue;
            }
            recognized += 1;

            match read_game(block.body, policy, &mut report)? {
                Some(game) => {
                    report.games += 1;
                    on_game(game)?;
                }
                None => {
                    report.skipped_elements += 1;
                    report.warnings.push(format!("{} block without a name", block.keyword));
                    warn!("Skipping {} block without a name", block.keyword);
                }
            }
        }

        if recognized == 0 {
            return Err(Error::parse("no clrmamepro blocks found"));
        }

        if header.name.is_empty() {
            header.name = "Unnamed catalog".to_string();
        }
        debug!(
            "Parsed block catalog '{}': {} games, {} roms, {} skipped",
            header.name, report.games, report.roms, report.skipped_roms
        );
        Ok((header, report))
    }
}

/// A `keyword ( body )` block found at the outermost level of some text.
struct Block<'a> {
    keyword: String,
    body: &'a str,
}

/// Split `text` into its outermost `keyword ( ... )` blocks, returning the text
/// left outside every block alongside them.
///
/// Parentheses and backslash escapes inside quoted strings are ignored, so
/// blocks may share a line and names may contain `(`, `)` or `rom (`.
fn split_blocks(text: &str) -> Result<(String, Vec<Block<'_>>)> {
    let mut rest = String::with_capacity(text.len());
    let mut blocks = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;
    let mut keyword = String::new();
    let mut body_start = 0;

    for (i, c) in text.char_indices() {
        if quoted {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                quoted = false;
            }
            if depth == 0 {
                rest.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                quoted = true;
                if depth == 0 {
                    rest.push(c);
                }
            }
            '(' => {
                if depth == 0 {
                    keyword = take_trailing_word(&mut rest);
                    body_start = i + 1;
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err(Error::parse("unexpected closing parenthesis"));
                }
                depth -= 1;
                if depth == 0 {
                    blocks.push(Block {
                        keyword: std::mem::take(&mut keyword),
                        body: &text[body_start..i],
                    });
                    rest.push(' ');
                }
            }
            _ if depth == 0 => rest.push(c),
            _ => {}
        }
    }

    if quoted {
        return Err(Error::parse("unterminated quoted string"));
    }
    if depth > 0 {
        return Err(Error::parse("block is missing its closing parenthesis"));
    }
    Ok((rest, blocks))
}

/// Remove the identifier that ends `rest` and return it lowercased.
fn take_trailing_word(rest: &mut String) -> String {
    let trimmed = rest.trim_end().len();
    rest.truncate(trimmed);
    let start = rest
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map_or(0, |i| i + 1);
    let word = rest[start..].to_ascii_lowercase();
    rest.truncate(start);
    word
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `key value` pairs of one block. The first occurrence of a key wins.
fn read_pairs(body: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    for cap in PAIR.captures_iter(body) {
        let key = cap[1].to_ascii_lowercase();
        let value = match (cap.get(2), cap.get(3)) {
            (Some(quoted), _) => unescape(quoted.as_str()),
            (None, Some(bare)) => bare.as_str().to_string(),
            _ => continue,
        };
        pairs.entry(key).or_insert(value);
    }
    pairs
}

fn read_header(body: &str, header: &mut CatalogHeader) {
    let mut pairs = read_pairs(body);
    header.name = pairs.remove("name").unwrap_or_default();
    header.description = pairs.remove("description");
    header.version = pairs.remove("version");
    header.date = pairs.remove("date");
    header.author = pairs.remove("author");
    header.homepage = pairs.remove("homepage");
    header.url = pairs.remove("url");
    header.category = pairs.remove("category");
}

fn read_game(
    segment: &str,
    policy: InvalidEntryPolicy,
    report: &mut ParseReport,
) -> Result<Option<Game>> {
    let (rest, sub_blocks) = split_blocks(segment)?;
    let mut pairs = read_pairs(&rest);
    let Some(name) = pairs.remove("name") else {
        return Ok(None);
    };

    let mut game = Game::new(name);
    game.description = pairs.remove("description");
    game.year = pairs.remove("year");
    game.publisher = pairs.remove("manufacturer").or_else(|| pairs.remove("publisher"));
    game.category = pairs.remove("category").or_else(|| pairs.remove("genre"));
    game.clone_of = pairs.remove("cloneof");
    game.rom_of = pairs.remove("romof");
    game.region = pairs.remove("region");
    game.languages = pairs.remove("languages").or_else(|| pairs.remove("language"));

    for block in sub_blocks.iter().filter(|b| b.keyword == "rom") {
        match read_rom(block.body) {
            Ok(rom) => {
                report.roms += 1;
                game.roms.push(rom);
            }
            Err(err) => report.reject(policy, err)?,
        }
    }
    Ok(Some(game))
}

fn read_rom(body: &str) -> Result<RomEntry> {
    let mut pairs = read_pairs(body);
    let name = pairs.remove("name").unwrap_or_default();
    let size = match pairs.remove("size") {
        Some(s) => Some(
            s.parse::<u64>()
                .map_err(|_| Error::validation(format!("rom '{}': invalid size '{}'", name, s)))?,
        ),
        None => None,
    };
    let status = match pairs.remove("status").or_else(|| pairs.remove("flags")) {
        Some(s) => RomStatus::from_str(&s)?,
        None => RomStatus::Good,
    };
    RomEntry::new(
        name,
        size,
        pairs.get("crc").map(String::as_str),
        pairs.get("md5").map(String::as_str),
        pairs.get("sha1").map(String::as_str),
        status,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogFormat;

    const SAMPLE: &str = r#"clrmamepro (
	name "Nintendo - Game Boy"
	description "Nintendo - Game Boy (20240101)"
	version 20240101
	homepage "No-Intro"
)

game (
	name "Tetris (World) (Rev 1)"
	description "Tetris (World) (Rev 1)"
	rom ( name "Tetris (World) (Rev 1).gb" size 32768 crc 46DF91AD md5 084F1E457749CDEC86183189BD88CE69 sha1 74591CC9501AF93873F9A5D3EB12DA12C0723BBC )
)

game (
	name "Tetris (Japan)"
	cloneof "Tetris (World) (Rev 1)"
	rom ( name "Tetris (Japan) (rom) (v1.0).gb" size 32768 crc 63F9407D flags baddump )
	rom ( name "Broken.gb" size abc crc 00000000 )
)
"#;

    #[test]
    fn test_parse_blocks() {
        let (catalog, report) = CatalogFormat::ClrMamePro
            .parse(SAMPLE.as_bytes(), InvalidEntryPolicy::Skip)
            .unwrap();
        assert_eq!(catalog.header.name, "Nintendo - Game Boy");
        assert_eq!(catalog.header.version.as_deref(), Some("20240101"));
        assert_eq!(catalog.games.len(), 2);
        assert_eq!(report.roms, 2);
        assert_eq!(report.skipped_roms, 1);

        let tetris = &catalog.games[0];
        assert_eq!(tetris.name, "Tetris (World) (Rev 1)");
        assert_eq!(tetris.roms[0].hashes.crc32.as_deref(), Some("46df91ad"));
        assert_eq!(tetris.roms[0].size, Some(32768));

        let japan = &catalog.games[1];
        assert_eq!(japan.clone_of.as_deref(), Some("Tetris (World) (Rev 1)"));
        assert_eq!(japan.roms[0].name, "Tetris (Japan) (rom) (v1.0).gb");
        assert_eq!(japan.roms[0].status, RomStatus::BadDump);
    }

    #[test]
    fn test_quoted_parenthesis_in_name() {
        let text = "game (\n\tname \"Weird (Name) rom (x\"\n\trom ( name \"a ) b.bin\" size 4 crc 12345678 )\n)\n";
        let (catalog, _) = CatalogFormat::ClrMamePro
            .parse(text.as_bytes(), InvalidEntryPolicy::Fail)
            .unwrap();
        assert_eq!(catalog.games[0].name, "Weird (Name) rom (x");
        assert_eq!(catalog.games[0].roms[0].name, "a ) b.bin");
    }

    #[test]
    fn test_quoted_rom_keyword_in_description_keeps_roms() {
        let text = "game (\n\tname \"Demo\"\n\tdescription \"has rom ( inside\"\n\trom ( name \"a.bin\" size 4 crc 12345678 )\n\trom ( name \"b.bin\" size 4 crc 87654321 )\n)\n";
        let (catalog, report) = CatalogFormat::ClrMamePro
            .parse(text.as_bytes(), InvalidEntryPolicy::Fail)
            .unwrap();
        let game = &catalog.games[0];
        assert_eq!(game.description.as_deref(), Some("has rom ( inside"));
        assert_eq!(game.roms.len(), 2, "quoted keyword should not hide real roms");
        assert_eq!(game.roms[1].name, "b.bin");
        assert_eq!(report.roms, 2);
    }

    #[test]
    fn test_blocks_sharing_one_line() {
        let text = "clrmamepro ( name \"Mini\" ) game ( name \"A\" rom ( name \"a.bin\" size 1 crc 00000001 ) ) game ( name \"B\" rom ( name \"b.bin\" size 1 crc 00000002 ) )";
        let (catalog, report) = CatalogFormat::ClrMamePro
            .parse(text.as_bytes(), InvalidEntryPolicy::Fail)
            .unwrap();
        assert_eq!(catalog.header.name, "Mini");
        let names: Vec<&str> = catalog.games.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(catalog.games[1].roms[0].name, "b.bin");
        assert_eq!(report.games, 2);
    }

    #[test]
    fn test_unterminated_rom_block_is_parse_error() {
        let text = "game (\n\tname \"X\"\n\trom ( name \"x.bin\" size 4 crc 12345678 \n";
        let result = CatalogFormat::ClrMamePro.parse(text.as_bytes(), InvalidEntryPolicy::Skip);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_sniff_requires_leading_keyword() {
        assert!(ClrMameProParser.sniff("clrmamepro (\n name \"x\"\n)"));
        assert!(ClrMameProParser.sniff("\n\ngame ( name \"x\" )"));
        assert!(!ClrMameProParser.sniff("hello\ngame ( name \"x\" )"));
    }
}
