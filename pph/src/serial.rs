//! Text serialization of the complete table state.
//!
//! The format is line oriented: a magic line, then blocks separated by
//! blank lines holding the key-function UUID, the PRNG seed, the
//! secondary-hash family, the table parameters, the non-empty headers and
//! the non-empty slots. Non-alphanumeric key bytes travel as `\xHHHH`
//! escapes, so every row splits on whitespace. The parameter row carries the
//! header count twice (a legacy of the format); both fields are emitted and
//! accepted.

use std::io::{self, BufRead, Write};

use crate::error::Error;
use crate::family::{Family, FamilyEntry};
use crate::table::{Header, Slot, Table};

const MAGIC: &str = "pph version 1.0.0";

/// Reasons a serialized table can be rejected.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum ParseError {
    /// Missing or wrong magic line.
    Magic,
    /// The input ended inside a block.
    UnexpectedEnd,
    /// A row has the wrong number of fields.
    FieldCount,
    /// A numeric field could not be parsed.
    Number,
    /// An index field references outside its array.
    IndexOutOfRange,
    /// A `\xHHHH` escape is malformed or exceeds a byte value.
    Escape,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Magic => write!(f, "missing magic line {MAGIC:?}"),
            ParseError::UnexpectedEnd => write!(f, "unexpected end of input"),
            ParseError::FieldCount => write!(f, "wrong number of fields in a row"),
            ParseError::Number => write!(f, "unparsable numeric field"),
            ParseError::IndexOutOfRange => write!(f, "index references outside its array"),
            ParseError::Escape => write!(f, "malformed \\xHHHH escape"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Escapes every non-alphanumeric byte of `bytes` as `\xHHHH`, uppercase.
fn escape_bytes(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            write!(out, "\\x{byte:04X}").unwrap();
        }
    }
    out
}

/// Inverse of [`escape_bytes`]; rejects escapes that do not fit a byte.
fn unescape_bytes(field: &str) -> Result<Box<[u8]>, ParseError> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if i + 6 > bytes.len() || bytes[i + 1] != b'x' {
                return Err(ParseError::Escape);
            }
            let hex = std::str::from_utf8(&bytes[i + 2..i + 6]).map_err(|_| ParseError::Escape)?;
            let value = u16::from_str_radix(hex, 16).map_err(|_| ParseError::Escape)?;
            if value > 0xFF {
                return Err(ParseError::Escape);
            }
            out.push(value as u8);
            i += 6;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out.into_boxed_slice())
}

/// Next line of `input`, trimmed; `None` at end of input.
fn next_line(input: &mut dyn BufRead) -> Result<Option<String>, Error> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Next line of `input`, trimmed; the input must not end here.
fn required_line(input: &mut dyn BufRead) -> Result<String, Error> {
    next_line(input)?.ok_or(Error::Parse(ParseError::UnexpectedEnd))
}

fn parse_u64(field: &str) -> Result<u64, ParseError> {
    field.parse().map_err(|_| ParseError::Number)
}

fn parse_u32(field: &str) -> Result<u32, ParseError> {
    field.parse().map_err(|_| ParseError::Number)
}

impl Table {
    /// Writes the table in the textual `pph version 1.0.0` format.
    pub fn write(&self, output: &mut dyn Write) -> io::Result<()> {
        let parts = self.parts();
        writeln!(output, "{MAGIC}")?;
        writeln!(output)?;
        writeln!(output, "{}", escape_bytes(parts.uuid.as_bytes()))?;
        writeln!(output)?;
        writeln!(output, "{}", parts.seed)?;
        writeln!(output)?;
        writeln!(output, "{}", parts.family.len())?;
        writeln!(output)?;
        for (i, entry) in parts.family.entries().iter().enumerate() {
            writeln!(output, "{} {} {} {}", i, entry.modulus, entry.multiplier, entry.adjustment)?;
        }
        writeln!(output)?;
        writeln!(
            output,
            "{} {} {} {} {} {} {}",
            parts.headers.len(),
            parts.n,
            parts.p,
            parts.s,
            parts.multiplier,
            parts.adjustment,
            parts.timeout_ms
        )?;
        writeln!(output)?;
        for (b, hdr) in parts.headers.iter().enumerate() {
            if hdr.r != 0 {
                writeln!(output, "{} {} {} {}", b, hdr.p, hdr.i, hdr.r)?;
            }
        }
        writeln!(output)?;
        writeln!(output, "{}", parts.slots.len())?;
        writeln!(output)?;
        for (x, slot) in parts.slots.iter().enumerate() {
            if !slot.is_free() {
                writeln!(
                    output,
                    "{} {} {} {}",
                    x,
                    escape_bytes(&parts.keys[slot.key as usize]),
                    slot.val,
                    slot.owner
                )?;
            }
        }
        writeln!(output)
    }

    /// Parses a table previously produced by [`Table::write`].
    ///
    /// The table is parsed into a fresh value, so a failed load exposes no
    /// partial state. An unknown key-function UUID falls back to DJB.
    pub fn read(input: &mut dyn BufRead) -> Result<Table, Error> {
        if required_line(input)? != MAGIC {
            return Err(ParseError::Magic.into());
        }
        next_line(input)?;

        let uuid = String::from_utf8(unescape_bytes(&required_line(input)?)?.into_vec())
            .map_err(|_| ParseError::Escape)?;
        next_line(input)?;

        let seed = parse_u64(&required_line(input)?)?;
        next_line(input)?;

        let family_len = parse_u64(&required_line(input)?)? as usize;
        if family_len == 0 {
            return Err(ParseError::IndexOutOfRange.into());
        }
        next_line(input)?;

        let mut entries = vec![FamilyEntry::default(); family_len];
        loop {
            let line = required_line(input)?;
            if line.is_empty() {
                break;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(ParseError::FieldCount.into());
            }
            let i = parse_u64(fields[0])? as usize;
            if i >= family_len {
                return Err(ParseError::IndexOutOfRange.into());
            }
            entries[i] = FamilyEntry {
                modulus: parse_u64(fields[1])?,
                multiplier: parse_u64(fields[2])?,
                adjustment: parse_u64(fields[3])?,
            };
        }

        let line = required_line(input)?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 7 {
            return Err(ParseError::FieldCount.into());
        }
        let header_count = parse_u64(fields[0])? as usize;
        let n = parse_u64(fields[1])?;
        let p: f64 = fields[2].parse().map_err(|_| ParseError::Number)?;
        let s = parse_u64(fields[3])?;
        let multiplier = parse_u64(fields[4])?;
        let adjustment = parse_u64(fields[5])?;
        let timeout_ms = parse_u64(fields[6])?;
        next_line(input)?;

        let mut headers = vec![Header::default(); header_count].into_boxed_slice();
        loop {
            let Some(line) = next_line(input)? else {
                return Err(ParseError::UnexpectedEnd.into());
            };
            if line.is_empty() {
                break;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(ParseError::FieldCount.into());
            }
            let b = parse_u64(fields[0])? as usize;
            if b >= header_count {
                return Err(ParseError::IndexOutOfRange.into());
            }
            headers[b] = Header {
                p: parse_u64(fields[1])?,
                i: parse_u32(fields[2])?,
                r: parse_u32(fields[3])?,
            };
        }

        let slot_count = parse_u64(&required_line(input)?)? as usize;
        next_line(input)?;

        let mut slots = vec![Slot::FREE; slot_count];
        let mut keys: Vec<Box<[u8]>> = Vec::new();
        loop {
            let Some(line) = next_line(input)? else {
                break;
            };
            if line.is_empty() {
                break;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(ParseError::FieldCount.into());
            }
            let x = parse_u64(fields[0])? as usize;
            if x >= slot_count {
                return Err(ParseError::IndexOutOfRange.into());
            }
            let key = unescape_bytes(fields[1])?;
            let val = parse_u64(fields[2])?;
            let owner = parse_u32(fields[3])?;
            let key_index =
                u32::try_from(keys.len()).map_err(|_| ParseError::IndexOutOfRange)?;
            keys.push(key);
            slots[x] = Slot { key: key_index, val, owner };
        }

        // Every referenced window must fit the parsed arrays.
        for hdr in headers.iter() {
            if hdr.r == 0 {
                continue;
            }
            if hdr.i as usize >= family_len {
                return Err(ParseError::IndexOutOfRange.into());
            }
            let end = hdr
                .p
                .checked_add(hdr.r as u64)
                .ok_or(ParseError::IndexOutOfRange)?;
            if end > slot_count as u64 {
                return Err(ParseError::IndexOutOfRange.into());
            }
        }

        Ok(Table::from_parts(
            n,
            p,
            s,
            headers,
            slots,
            keys,
            Family::from_entries(entries),
            uuid,
            multiplier,
            adjustment,
            timeout_ms,
            seed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyfn;
    use crate::table::tests::{boxed_keys, build};
    use crate::table::{BuildConf, EMPTY_VAL};

    fn to_text(table: &Table) -> String {
        let mut buf = Vec::new();
        table.write(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn from_text(text: &str) -> Result<Table, Error> {
        Table::read(&mut text.as_bytes())
    }

    #[test]
    fn escape_round_trip() {
        assert_eq!(escape_bytes(b"alnum123"), "alnum123");
        assert_eq!(escape_bytes(b"a-b"), "a\\x002Db");
        assert_eq!(escape_bytes(b"\x00\xFF"), "\\x0000\\x00FF");
        for key in [&b"plain"[..], b"with space", b"\x00\x01\xFE\xFF", b"u\xC3\xBCber"] {
            assert_eq!(unescape_bytes(&escape_bytes(key)).unwrap().as_ref(), key);
        }
    }

    #[test]
    fn bad_escapes_are_rejected() {
        assert_eq!(unescape_bytes("\\x00"), Err(ParseError::Escape));
        assert_eq!(unescape_bytes("\\xZZZZ"), Err(ParseError::Escape));
        assert_eq!(unescape_bytes("\\x0100"), Err(ParseError::Escape));
        assert_eq!(unescape_bytes("a\\y0000"), Err(ParseError::Escape));
    }

    #[test]
    fn round_trip_eight_keys() {
        let table = build(boxed_keys(["a", "b", "c", "d", "e", "f", "g", "h"]), &BuildConf::seed(1)).unwrap();
        let text = to_text(&table);
        let reread = from_text(&text).unwrap();
        assert_eq!(reread.uuid(), table.uuid());
        assert_eq!(reread.num_slots(), table.num_slots());
        assert_eq!(reread.family_size(), table.family_size());
        assert_eq!(reread.header_size(), table.header_size());
        for (j, key) in ["a", "b", "c", "d", "e", "f", "g", "h"].iter().enumerate() {
            assert_eq!(reread.find_val(key.as_bytes()), j as u64);
        }
        assert_eq!(reread.find_val(b"i"), EMPTY_VAL);
        reread.verify().unwrap();
    }

    #[test]
    fn round_trip_preserves_text() {
        let table = build(boxed_keys(["alpha", "beta", "gamma"]), &BuildConf::seed(1)).unwrap();
        let text = to_text(&table);
        assert!(text.starts_with("pph version 1.0.0\n"));
        let reread = from_text(&text).unwrap();
        assert_eq!(to_text(&reread), text);
    }

    #[test]
    fn round_trip_binary_keys() {
        let keys: Vec<Box<[u8]>> = vec![
            b"space key".to_vec().into_boxed_slice(),
            b"\x00null".to_vec().into_boxed_slice(),
            b"\xFF\xFE\xFD".to_vec().into_boxed_slice(),
            b"tab\tkey".to_vec().into_boxed_slice(),
        ];
        let values = [10, 20, 30, 40];
        let mut table = Table::new();
        table.setup(4, &BuildConf::seed(1));
        table.load(keys.clone(), &values).unwrap();
        let reread = from_text(&to_text(&table)).unwrap();
        for (key, val) in keys.iter().zip(values) {
            assert_eq!(reread.find_val(key), val);
        }
    }

    #[test]
    fn round_trip_empty_table() {
        let table = build(Vec::new(), &BuildConf::seed(1)).unwrap();
        let reread = from_text(&to_text(&table)).unwrap();
        assert!(Table::not_found(reread.find_val(b"anything")));
    }

    #[test]
    fn unknown_uuid_falls_back_to_djb_on_read() {
        // A table built with DJB still answers correctly after its UUID is
        // replaced by an unregistered one, since unknown UUIDs resolve to DJB.
        let table = build(boxed_keys(["alpha", "beta", "gamma"]), &BuildConf::seed(1)).unwrap();
        let text = to_text(&table).replace(
            &escape_bytes(keyfn::DJB_UUID.as_bytes()),
            &escape_bytes(b"11111111-2222-3333-4444-555555555555"),
        );
        let reread = from_text(&text).unwrap();
        assert_eq!(reread.uuid(), "11111111-2222-3333-4444-555555555555");
        assert_eq!(reread.find_val(b"alpha"), 0);
        assert_eq!(reread.find_val(b"beta"), 1);
        assert_eq!(reread.find_val(b"gamma"), 2);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        assert!(matches!(
            from_text("pph version 2.0.0\n"),
            Err(Error::Parse(ParseError::Magic))
        ));
        assert!(matches!(from_text(""), Err(Error::Parse(ParseError::UnexpectedEnd))));
    }

    #[test]
    fn wrong_parameter_field_count_is_rejected() {
        let table = build(boxed_keys(["alpha", "beta", "gamma"]), &BuildConf::seed(1)).unwrap();
        let text = to_text(&table);
        // Drop the last field of the 7-token parameter row.
        let corrupted: String = text
            .lines()
            .map(|line| {
                if line.split_whitespace().count() == 7 {
                    line.rsplit_once(' ').unwrap().0.to_string()
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        assert!(matches!(
            from_text(&corrupted),
            Err(Error::Parse(ParseError::FieldCount))
        ));
    }

    #[test]
    fn out_of_range_slot_index_is_rejected() {
        let table = build(boxed_keys(["alpha", "beta", "gamma"]), &BuildConf::seed(1)).unwrap();
        let slot_count = table.num_slots();
        let text = to_text(&table);
        let corrupted = text.replace(&format!("\n{slot_count}\n"), "\n2\n");
        assert!(matches!(
            from_text(&corrupted),
            Err(Error::Parse(ParseError::IndexOutOfRange))
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let table = build(boxed_keys(["alpha", "beta", "gamma"]), &BuildConf::seed(1)).unwrap();
        let text = to_text(&table);
        let cut = text.lines().take(8).collect::<Vec<_>>().join("\n");
        assert!(from_text(&cut).is_err());
    }
}
