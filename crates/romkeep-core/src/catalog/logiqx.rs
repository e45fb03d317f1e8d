//! Streaming reader for Logiqx/MAME XML datafiles.
//!
//! The document is walked as a sequence of tag events with an explicit element
//! stack, so only the title currently being read is held in memory. Elements the
//! reader does not know are ignored.

use super::parser::CatalogParser;
use super::{CatalogHeader, Game, InvalidEntryPolicy, ParseReport, RomEntry, RomStatus};
use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use std::str::FromStr;
use tracing::{debug, warn};

const TITLE_ELEMENTS: [&[u8]; 3] = [b"game", b"machine", b"software"];

pub struct LogiqxParser;

impl CatalogParser for LogiqxParser {
    fn sniff(&self, head: &str) -> bool {
        head.contains("<datafile")
            || head.contains("<mame")
            || head.contains("<softwarelist")
            || (head.starts_with("<?xml") && head.contains("<game"))
    }

    fn parse_streaming<R: BufRead>(
        &self,
        reader: R,
        policy: InvalidEntryPolicy,
        on_game: &mut dyn FnMut(Game) -> Result<()>,
    ) -> Result<(CatalogHeader, ParseReport)> {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut header = CatalogHeader::default();
        let mut report = ParseReport::default();
        let mut saw_root = false;
        // Stack depth of the open title element, and the title itself.
        let mut game_depth: Option<usize> = None;
        let mut game: Option<Game> = None;
        // Stack depth of a nameless title whose subtree is being skipped.
        let mut skip_depth: Option<usize> = None;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                Error::parse(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            match event {
                Event::Eof => break,
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    if stack.is_empty() {
                        saw_root = true;
                        read_root_attributes(&e, &name, &mut header)?;
                    } else if skip_depth.is_some() {
                        // Inside a nameless title.
                    } else if game.is_none() && is_title(&name) {
                        match open_title(&e)? {
                            Some(g) => {
                                game = Some(g);
                                game_depth = Some(stack.len());
                            }
                            None => {
                                skip_nameless(&name, &mut report);
                                skip_depth = Some(stack.len());
                            }
                        }
                    } else if let Some(g) = game.as_mut() {
                        read_title_child(&e, &name, g, policy, &mut report)?;
                    } else if stack.len() == 1 && name.as_slice() != b"header" {
                        report.skipped_elements += 1;
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = e.name().as_ref().to_vec();
                    if stack.is_empty() {
                        saw_root = true;
                    } else if skip_depth.is_some() {
                    } else if game.is_none() && is_title(&name) {
                        // A title without children has no ROMs.
                        match open_title(&e)? {
                            Some(g) => {
                                report.games += 1;
                                on_game(g)?;
                            }
                            None => skip_nameless(&name, &mut report),
                        }
                    } else if let Some(g) = game.as_mut() {
                        read_title_child(&e, &name, g, policy, &mut report)?;
                    } else if stack.len() == 1 {
                        report.skipped_elements += 1;
                    }
                }
                Event::Text(_) | Event::CData(_) if skip_depth.is_some() => {}
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::parse(format!("bad text content: {}", e)))?;
                    apply_text(&stack, game_depth, game.as_mut(), &mut header, &text);
                }
                Event::CData(t) => {
                    let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    apply_text(&stack, game_depth, game.as_mut(), &mut header, &text);
                }
                Event::End(_) => {
                    stack.pop();
                    if skip_depth == Some(stack.len()) {
                        skip_depth = None;
                    }
                    if game_depth == Some(stack.len()) {
                        if let Some(g) = game.take() {
                            report.games += 1;
                            on_game(g)?;
                        }
                        game_depth = None;
                    }
                }
                _ => {}
            }
            buf.clear();
        }

        if !saw_root {
            return Err(Error::parse("document has no root element"));
        }
        if !stack.is_empty() {
            return Err(Error::parse(format!(
                "unexpected end of document inside <{}>",
                String::from_utf8_lossy(stack.last().map(Vec::as_slice).unwrap_or_default())
            )));
        }
        if header.name.is_empty() {
            header.name = "Unnamed catalog".to_string();
        }

        debug!(
            "Parsed XML catalog '{}': {} games, {} roms, {} skipped",
            header.name, report.games, report.roms, report.skipped_roms
        );
        Ok((header, report))
    }
}

fn is_title(name: &[u8]) -> bool {
    TITLE_ELEMENTS.contains(&name)
}

fn attr(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(|err| Error::parse(format!("bad attribute: {}", err)))?;
        if a.key.as_ref() == key {
            let value = a
                .unescape_value()
                .map_err(|err| Error::parse(format!("bad attribute value: {}", err)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn read_root_attributes(e: &BytesStart, name: &[u8], header: &mut CatalogHeader) -> Result<()> {
    match name {
        b"mame" => {
            header.name = "MAME".to_string();
            header.version = attr(e, b"build")?;
        }
        b"softwarelist" => {
            header.name = attr(e, b"name")?.unwrap_or_default();
            header.description = attr(e, b"description")?;
        }
        _ => {}
    }
    Ok(())
}

fn skip_nameless(element: &[u8], report: &mut ParseReport) {
    let element = String::from_utf8_lossy(element);
    warn!("Skipping <{}> without a name attribute", element);
    report.skipped_elements += 1;
    report.warnings.push(format!("<{}> without a name attribute", element));
}

/// `None` when the title has no usable name.
fn open_title(e: &BytesStart) -> Result<Option<Game>> {
    let Some(name) = attr(e, b"name")?.filter(|n| !n.trim().is_empty()) else {
        return Ok(None);
    };
    let mut game = Game::new(name);
    game.clone_of = attr(e, b"cloneof")?.filter(|s| !s.is_empty());
    game.rom_of = attr(e, b"romof")?.filter(|s| !s.is_empty());
    Ok(Some(game))
}

fn read_title_child(
    e: &BytesStart,
    name: &[u8],
    game: &mut Game,
    policy: InvalidEntryPolicy,
    report: &mut ParseReport,
) -> Result<()> {
    match name {
        b"rom" => match read_rom(e) {
            Ok(rom) => {
                report.roms += 1;
                game.roms.push(rom);
            }
            Err(err) => report.reject(policy, err)?,
        },
        b"release" => {
            if game.region.is_none() {
                game.region = attr(e, b"region")?;
            }
            if game.languages.is_none() {
                game.languages = attr(e, b"language")?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn read_rom(e: &BytesStart) -> Result<RomEntry> {
    let name = attr(e, b"name")?.unwrap_or_default();
    let size = match attr(e, b"size")? {
        Some(s) => Some(s.trim().parse::<u64>().map_err(|_| {
            Error::validation(format!("rom '{}': invalid size '{}'", name, s))
        })?),
        None => None,
    };
    let status = match attr(e, b"status")? {
        Some(s) => RomStatus::from_str(&s)?,
        None => RomStatus::Good,
    };
    let crc = attr(e, b"crc")?;
    let md5 = attr(e, b"md5")?;
    let sha1 = attr(e, b"sha1")?;
    RomEntry::new(
        name,
        size,
        crc.as_deref(),
        md5.as_deref(),
        sha1.as_deref(),
        status,
    )
}

fn apply_text(
    stack: &[Vec<u8>],
    game_depth: Option<usize>,
    game: Option<&mut Game>,
    header: &mut CatalogHeader,
    text: &str,
) {
    let Some(element) = stack.last() else {
        return;
    };
    let parent = stack.len().checked_sub(2).map(|i| stack[i].as_slice());
    let value = Some(text.to_string());

    if let (Some(g), Some(depth)) = (game, game_depth) {
        // Only direct children of the title element carry metadata.
        if stack.len() != depth + 2 {
            return;
        }
        match element.as_slice() {
            b"description" => g.description = value,
            b"year" => g.year = value,
            b"manufacturer" | b"publisher" => g.publisher = value,
            b"category" | b"genre" => g.category = value,
            b"region" => g.region = value,
            b"languages" | b"language" => g.languages = value,
            _ => {}
        }
        return;
    }

    if parent == Some(b"header".as_slice()) {
        match element.as_slice() {
            b"name" => header.name = text.to_string(),
            b"description" => header.description = value,
            b"version" => header.version = value,
            b"date" => header.date = value,
            b"author" => header.author = value,
            b"homepage" => header.homepage = value,
            b"url" => header.url = value,
            b"category" => header.category = value,
            _ => {}
        }
    }
}
