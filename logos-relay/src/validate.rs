//! Structural check of Yrs v1 blobs before they reach the Yrs decoder.
//!
//! The decoder trusts its input: strings are taken as UTF-8 without
//! validation, element counts drive allocations up front, and nested `Any`
//! values recurse without a limit. A client-supplied blob is walked here
//! first, field for field in the order Yrs reads it, and refused if it
//! could not be decoded safely.

use yrs::encoding::read::{Cursor, Error, Read};

const BLOCK_GC: u8 = 0;
const BLOCK_SKIP: u8 = 10;

const CONTENT_DELETED: u8 = 1;
const CONTENT_JSON: u8 = 2;
const CONTENT_BINARY: u8 = 3;
const CONTENT_STRING: u8 = 4;
const CONTENT_EMBED: u8 = 5;
const CONTENT_FORMAT: u8 = 6;
const CONTENT_TYPE: u8 = 7;
const CONTENT_ANY: u8 = 8;
const CONTENT_DOC: u8 = 9;
const CONTENT_MOVE: u8 = 11;

const HAS_ORIGIN: u8 = 0b1000_0000;
const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
const HAS_PARENT_SUB: u8 = 0b0010_0000;

const TYPE_XML_ELEMENT: u8 = 3;

/// Deepest `Any` nesting accepted.
const MAX_NESTING: usize = 128;

/// Check that `blob` is a well-formed v1 update.
pub(crate) fn check_update(blob: &[u8]) -> Result<(), Error> {
    let mut cur = Cursor::new(blob);

    let clients: u32 = cur.read_var()?;
    ensure_fits(&cur, clients as u64)?;
    for _ in 0..clients {
        let blocks: u32 = cur.read_var()?;
        ensure_fits(&cur, blocks as u64)?;
        let _client: u32 = cur.read_var()?;
        let mut clock: u32 = cur.read_var()?;
        for _ in 0..blocks {
            let len = check_block(&mut cur)?;
            clock = clock
                .checked_add(len)
                .ok_or_else(|| Error::Custom("block clock overflows".to_string()))?;
        }
    }

    check_delete_set(&mut cur)
}

/// Check that `blob` is a well-formed v1 state vector.
pub(crate) fn check_state_vector(blob: &[u8]) -> Result<(), Error> {
    let mut cur = Cursor::new(blob);
    let len: u32 = cur.read_var()?;
    ensure_fits(&cur, len as u64)?;
    for _ in 0..len {
        let _client: u64 = cur.read_var()?;
        let _clock: u32 = cur.read_var()?;
    }
    Ok(())
}

/// Every counted element takes at least one byte, so a count larger than
/// what is left of the input is a lie.
fn ensure_fits(cur: &Cursor<'_>, count: u64) -> Result<(), Error> {
    let remaining = (cur.buf.len() - cur.next) as u64;
    if count > remaining {
        return Err(Error::Custom(format!(
            "declared {count} elements but only {remaining} bytes remain"
        )));
    }
    Ok(())
}

/// Returns the number of UTF-16 code units, which is how Yrs measures text.
fn check_string(cur: &mut Cursor<'_>) -> Result<u32, Error> {
    let bytes = cur.read_buf()?;
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Custom(format!("string is not valid UTF-8: {e}")))?;
    Ok(text.encode_utf16().count() as u32)
}

fn check_id(cur: &mut Cursor<'_>) -> Result<(), Error> {
    let _client: u64 = cur.read_var()?;
    let _clock: u32 = cur.read_var()?;
    Ok(())
}

/// Returns the clock length the block occupies.
fn check_block(cur: &mut Cursor<'_>) -> Result<u32, Error> {
    let info = cur.read_u8()?;
    match info {
        BLOCK_SKIP | BLOCK_GC => cur.read_var(),
        info => {
            if info & HAS_ORIGIN != 0 {
                check_id(cur)?;
            }
            if info & HAS_RIGHT_ORIGIN != 0 {
                check_id(cur)?;
            }
            if info & (HAS_ORIGIN | HAS_RIGHT_ORIGIN) == 0 {
                let named_parent: u32 = cur.read_var()?;
                if named_parent == 1 {
                    check_string(cur)?;
                } else {
                    check_id(cur)?;
                }
                if info & HAS_PARENT_SUB != 0 {
                    check_string(cur)?;
                }
            }
            check_content(cur, info & 0b1111)
        }
    }
}

fn check_content(cur: &mut Cursor<'_>, kind: u8) -> Result<u32, Error> {
    match kind {
        CONTENT_DELETED => cur.read_var(),
        CONTENT_JSON => {
            // Yrs reads one entry more than the declared count
            let declared: u32 = cur.read_var()?;
            if declared > i32::MAX as u32 {
                return Err(Error::UnexpectedValue);
            }
            ensure_fits(cur, declared as u64 + 1)?;
            for _ in 0..=declared {
                check_string(cur)?;
            }
            Ok(declared + 1)
        }
        CONTENT_BINARY => {
            cur.read_buf()?;
            Ok(1)
        }
        CONTENT_STRING => check_string(cur),
        CONTENT_EMBED => {
            check_string(cur)?;
            Ok(1)
        }
        CONTENT_FORMAT => {
            check_string(cur)?;
            check_string(cur)?;
            Ok(1)
        }
        CONTENT_TYPE => {
            match cur.read_u8()? {
                TYPE_XML_ELEMENT => {
                    check_string(cur)?;
                }
                0 | 1 | 2 | 4 | 5 | 6 | 9 | 15 => {}
                _ => return Err(Error::UnexpectedValue),
            }
            Ok(1)
        }
        CONTENT_ANY => {
            let len: u32 = cur.read_var()?;
            ensure_fits(cur, len as u64)?;
            for _ in 0..len {
                check_any(cur, 0)?;
            }
            Ok(len)
        }
        CONTENT_DOC => {
            check_string(cur)?;
            check_any(cur, 0)?;
            Ok(1)
        }
        CONTENT_MOVE => {
            let flags: i64 = cur.read_var()?;
            check_id(cur)?;
            if flags & 0b1 == 0 {
                check_id(cur)?;
            }
            Ok(1)
        }
        _ => Err(Error::UnexpectedValue),
    }
}

fn check_any(cur: &mut Cursor<'_>, depth: usize) -> Result<(), Error> {
    if depth > MAX_NESTING {
        return Err(Error::Custom(format!("value nested deeper than {MAX_NESTING}")));
    }
    match cur.read_u8()? {
        120 | 121 | 126 | 127 => {}
        125 => {
            let _: i64 = cur.read_var()?;
        }
        124 => {
            cur.read_exact(4)?;
        }
        122 | 123 => {
            cur.read_exact(8)?;
        }
        119 => {
            check_string(cur)?;
        }
        118 => {
            let len: u64 = cur.read_var()?;
            ensure_fits(cur, len)?;
            for _ in 0..len {
                check_string(cur)?;
                check_any(cur, depth + 1)?;
            }
        }
        117 => {
            let len: u64 = cur.read_var()?;
            ensure_fits(cur, len)?;
            for _ in 0..len {
                check_any(cur, depth + 1)?;
            }
        }
        116 => {
            cur.read_buf()?;
        }
        _ => return Err(Error::UnexpectedValue),
    }
    Ok(())
}

fn check_delete_set(cur: &mut Cursor<'_>) -> Result<(), Error> {
    let clients: u32 = cur.read_var()?;
    ensure_fits(cur, clients as u64)?;
    for _ in 0..clients {
        let _client: u32 = cur.read_var()?;
        let ranges: u32 = cur.read_var()?;
        ensure_fits(cur, ranges as u64)?;
        for _ in 0..ranges {
            let clock: u32 = cur.read_var()?;
            let len: u32 = cur.read_var()?;
            clock
                .checked_add(len)
                .ok_or_else(|| Error::Custom("deleted range overflows".to_string()))?;
        }
    }
    Ok(())
}
