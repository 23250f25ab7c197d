//! Text collation encoding for index entries.
//!
//! Text is the hardest index key type: Access folds case and diacritics
//! out of the primary comparison but keeps every distinction recoverable
//! by emitting up to four byte streams per value:
//!
//! - **inline** bytes: the folded primary weights, compared first;
//! - **extra** bytes: one code per inline character, preserving the
//!   case/accent information the fold discarded;
//! - **crazy codes**: 2-bit tokens for a handful of ligature characters,
//!   packed three to a byte under a 0x80 prefix with a fixed suffix;
//! - **unprintable codes**: characters stripped from the inline stream
//!   entirely (apostrophe, hyphen, controls), re-registered as an offset
//!   back into the entry plus their bytes.
//!
//! Which stream a character feeds is decided by its *handler*, looked up
//! in per-sort-order tables shipped as text resources
//! (`resources/index_codes_genleg.txt` for Access 2000-2007,
//! `resources/index_codes_gen.txt` for 2010+) and loaded lazily per table
//! half (below U+0100, and U+0100-U+FFFF). The line format is documented
//! at the top of each resource file.

use std::sync::OnceLock;

use crate::jet::format::SortOrder;
use crate::JetError;

/// Longest prefix of a text value that contributes to its index entry.
pub const MAX_TEXT_INDEX_CHARS: usize = 255;

/// Terminates the inline stream.
const END_TEXT: u8 = 0x01;
/// Extra-code slot of a character with nothing to preserve.
const EXTRA_PLACEHOLDER: u8 = 0x02;
/// Prefix bit of every packed crazy-code byte.
const CRAZY_CODE_START: u8 = 0x80;
/// Fixed trailer of the crazy-code block.
const CRAZY_CODES_SUFFIX: [u8; 5] = [0xFF, 0x02, 0x80, 0xFF, 0x80];
/// Separator between an unprintable offset and its bytes.
const UNPRINTABLE_MID: u8 = 0x06;

const GENERAL_LEGACY_SOURCE: &str = include_str!("../../resources/index_codes_genleg.txt");
const GENERAL_SOURCE: &str = include_str!("../../resources/index_codes_gen.txt");

/// Handler classifications from the resource tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerKind {
    Simple,
    International,
    Unprintable,
    UnprintableExt,
    InternationalExt,
    Ignored,
    Surrogate,
}

/// One character's contribution to the output streams.
#[derive(Debug, Clone)]
struct CharHandler {
    kind: HandlerKind,
    inline: Vec<u8>,
    extra: u8,
    crazy: u8,
}

#[derive(Debug)]
struct Rule {
    start: u32,
    end: u32,
    kind: HandlerKind,
    fields: Vec<(Vec<u8>, bool)>,
}

impl Rule {
    fn handler_at(&self, cp: u32) -> CharHandler {
        let step = (cp - self.start) as u8;
        let field = |i: usize| -> Vec<u8> {
            match self.fields.get(i) {
                Some((bytes, increment)) => {
                    let mut out = bytes.clone();
                    if *increment {
                        if let Some(last) = out.last_mut() {
                            *last = last.wrapping_add(step);
                        }
                    }
                    out
                }
                None => Vec::new(),
            }
        };
        let byte = |i: usize| field(i).first().copied().unwrap_or(0);

        match self.kind {
            HandlerKind::Simple => CharHandler {
                kind: self.kind,
                inline: field(0),
                extra: 0,
                crazy: 0,
            },
            HandlerKind::International => CharHandler {
                kind: self.kind,
                inline: field(0),
                extra: byte(1),
                crazy: 0,
            },
            HandlerKind::Unprintable => CharHandler {
                kind: self.kind,
                inline: field(0),
                extra: 0,
                crazy: 0,
            },
            HandlerKind::UnprintableExt => CharHandler {
                kind: self.kind,
                inline: Vec::new(),
                extra: byte(0),
                crazy: 0,
            },
            HandlerKind::InternationalExt => CharHandler {
                kind: self.kind,
                inline: field(0),
                extra: byte(1),
                crazy: byte(2) & 0x03,
            },
            HandlerKind::Ignored | HandlerKind::Surrogate => CharHandler {
                kind: self.kind,
                inline: Vec::new(),
                extra: 0,
                crazy: 0,
            },
        }
    }
}

fn parse_hex_field(token: &str) -> Option<(Vec<u8>, bool)> {
    let (hex, increment) = match token.strip_suffix('+') {
        Some(rest) => (rest, true),
        None => (token, false),
    };
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        bytes.push(u8::from_str_radix(&hex[i..i + 2], 16).ok()?);
    }
    Some((bytes, increment))
}

fn parse_rules(source: &str, low_half: bool) -> Vec<Rule> {
    let mut rules = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        // shipped resources are validated by the test suite
        let range = tokens.next().expect("sort table line has a range");
        let (start, end) = match range.split_once('-') {
            Some((a, b)) => (
                u32::from_str_radix(a, 16).expect("sort table range start"),
                u32::from_str_radix(b, 16).expect("sort table range end"),
            ),
            None => {
                let cp = u32::from_str_radix(range, 16).expect("sort table code point");
                (cp, cp)
            }
        };
        if low_half != (end < 0x100) {
            continue;
        }
        let kind = match tokens.next().expect("sort table line has a kind") {
            "S" => HandlerKind::Simple,
            "I" => HandlerKind::International,
            "U" => HandlerKind::Unprintable,
            "UX" => HandlerKind::UnprintableExt,
            "IX" => HandlerKind::InternationalExt,
            "X" => HandlerKind::Ignored,
            "G" => HandlerKind::Surrogate,
            other => panic!("unknown sort table kind {:?}", other),
        };
        let fields = tokens
            .map(|t| parse_hex_field(t).expect("sort table hex field"))
            .collect();
        rules.push(Rule {
            start,
            end,
            kind,
            fields,
        });
    }
    rules
}

fn build_low(source: &str) -> Vec<Option<CharHandler>> {
    let rules = parse_rules(source, true);
    let mut table: Vec<Option<CharHandler>> = vec![None; 256];
    for rule in &rules {
        for cp in rule.start..=rule.end {
            let slot = &mut table[cp as usize];
            // first matching line wins
            if slot.is_none() {
                *slot = Some(rule.handler_at(cp));
            }
        }
    }
    table
}

fn low_table(order: SortOrder) -> &'static [Option<CharHandler>] {
    static LEGACY: OnceLock<Vec<Option<CharHandler>>> = OnceLock::new();
    static GENERAL: OnceLock<Vec<Option<CharHandler>>> = OnceLock::new();
    match order {
        SortOrder::GeneralLegacy => LEGACY.get_or_init(|| build_low(GENERAL_LEGACY_SOURCE)),
        SortOrder::General => GENERAL.get_or_init(|| build_low(GENERAL_SOURCE)),
    }
}

fn high_rules(order: SortOrder) -> &'static [Rule] {
    static LEGACY: OnceLock<Vec<Rule>> = OnceLock::new();
    static GENERAL: OnceLock<Vec<Rule>> = OnceLock::new();
    match order {
        SortOrder::GeneralLegacy => LEGACY.get_or_init(|| parse_rules(GENERAL_LEGACY_SOURCE, false)),
        SortOrder::General => GENERAL.get_or_init(|| parse_rules(GENERAL_SOURCE, false)),
    }
}

fn handler_for(cp: u32, order: SortOrder) -> Result<CharHandler, JetError> {
    if cp < 0x100 {
        return low_table(order)[cp as usize].clone().ok_or_else(|| {
            JetError::Unsupported(format!("no collation handler for U+{:04X}", cp))
        });
    }
    for rule in high_rules(order) {
        if cp >= rule.start && cp <= rule.end {
            return Ok(rule.handler_at(cp));
        }
    }
    // unlisted characters are stripped inline and registered verbatim
    Ok(CharHandler {
        kind: HandlerKind::Unprintable,
        inline: vec![(cp >> 8) as u8, (cp & 0xFF) as u8],
        extra: 0,
        crazy: 0,
    })
}

/// The inline (primary-weight) stream of `s` alone: case and diacritics
/// folded away, unprintables stripped. Two strings with equal folds are
/// equal under the case-insensitive column matcher.
pub fn fold_text(s: &str, order: SortOrder) -> Result<Vec<u8>, JetError> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars().take(MAX_TEXT_INDEX_CHARS) {
        let cp = c as u32;
        if cp > 0xFFFF {
            return Err(JetError::Unsupported(format!(
                "character U+{:X} outside the basic plane",
                cp
            )));
        }
        let handler = handler_for(cp, order)?;
        match handler.kind {
            HandlerKind::Simple
            | HandlerKind::International
            | HandlerKind::InternationalExt => out.extend_from_slice(&handler.inline),
            HandlerKind::Unprintable
            | HandlerKind::UnprintableExt
            | HandlerKind::Ignored => {}
            HandlerKind::Surrogate => {
                return Err(JetError::Unsupported(format!(
                    "unpaired surrogate U+{:04X}",
                    cp
                )))
            }
        }
    }
    Ok(out)
}

/// Append the collation key of `s` to `out`.
///
/// The caller has already written the column's entry flag byte; for a
/// descending column this routine complements everything it produced,
/// bracketed by the pre/post-invert terminators.
pub fn encode_text_key(
    out: &mut Vec<u8>,
    s: &str,
    order: SortOrder,
    ascending: bool,
) -> Result<(), JetError> {
    let start = out.len();
    let mut extras: Vec<u8> = Vec::new();
    let mut crazies: Vec<u8> = Vec::new();
    let mut unprintables: Vec<(u16, Vec<u8>)> = Vec::new();
    let mut inline_chars = 0usize;

    for c in s.chars().take(MAX_TEXT_INDEX_CHARS) {
        let cp = c as u32;
        if cp > 0xFFFF {
            return Err(JetError::Unsupported(format!(
                "character U+{:X} outside the basic plane in a text index",
                cp
            )));
        }
        let handler = handler_for(cp, order)?;
        match handler.kind {
            HandlerKind::Simple => {
                out.extend_from_slice(&handler.inline);
                extras.push(EXTRA_PLACEHOLDER);
                inline_chars += 1;
            }
            HandlerKind::International => {
                out.extend_from_slice(&handler.inline);
                extras.push(handler.extra);
                inline_chars += 1;
            }
            HandlerKind::InternationalExt => {
                out.extend_from_slice(&handler.inline);
                extras.push(handler.extra);
                crazies.push(handler.crazy);
                inline_chars += 1;
            }
            HandlerKind::Unprintable => {
                // chars whose inline bytes survived so far, counting real
                // extras once each but never the run at the very start
                let real_extras = extras.iter().filter(|&&e| e != EXTRA_PLACEHOLDER).count();
                let leading_run = extras
                    .iter()
                    .take_while(|&&e| e != EXTRA_PLACEHOLDER)
                    .count();
                let accounted = inline_chars + real_extras - leading_run;
                let offset = (7 + 4 * accounted as u16) | 0x8000;
                unprintables.push((offset, handler.inline.clone()));
            }
            HandlerKind::UnprintableExt => {
                if let Some(last) = extras.last_mut() {
                    *last |= handler.extra;
                }
            }
            HandlerKind::Ignored => {}
            HandlerKind::Surrogate => {
                return Err(JetError::Unsupported(format!(
                    "unpaired surrogate U+{:04X} in a text index",
                    cp
                )))
            }
        }
    }

    out.push(END_TEXT);

    while extras.last() == Some(&EXTRA_PLACEHOLDER) {
        extras.pop();
    }
    if !extras.is_empty() {
        out.extend_from_slice(&extras);
    }

    if !crazies.is_empty() || !unprintables.is_empty() {
        out.push(END_TEXT);
        out.push(END_TEXT);

        if !crazies.is_empty() {
            for chunk in crazies.chunks(3) {
                let mut byte = CRAZY_CODE_START;
                for (i, code) in chunk.iter().enumerate() {
                    byte |= code << (2 * i);
                }
                out.push(byte);
            }
            out.extend_from_slice(&CRAZY_CODES_SUFFIX);
        }

        for (offset, bytes) in &unprintables {
            out.push((offset >> 8) as u8);
            out.push((offset & 0xFF) as u8);
            out.push(UNPRINTABLE_MID);
            out.extend_from_slice(bytes);
        }
    }

    if !ascending {
        out.push(0x00);
        for b in &mut out[start..] {
            *b = !*b;
        }
        out.push(0x00);
    }
    Ok(())
}
