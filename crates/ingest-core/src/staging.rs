//! Staging file format shared by the multi-row ingestor and the bulk-load
//! facility it drives.
//!
//! Records are terminated by [`LINE_SEPARATOR`] and fields separated by
//! [`FIELD_SEPARATOR`]. These are ASCII control bytes so they do not collide
//! with warehouse data. An intentionally empty string is written as two
//! [`STRING_ENCLOSURE`] bytes to tell it apart from NULL, which is written
//! as `\N`. Backslash is the bulk loader's escape character, so backslashes
//! in values are doubled.

/// Field separator (ASCII RS).
pub const FIELD_SEPARATOR: u8 = 0x1e;

/// Record terminator (ASCII GS).
pub const LINE_SEPARATOR: u8 = 0x1d;

/// Optional string enclosure (ASCII US).
pub const STRING_ENCLOSURE: u8 = 0x1f;

/// Marker the bulk loader reads as SQL NULL.
pub const NULL_MARKER: &[u8] = b"\\N";

/// A decoded field: `None` is SQL NULL.
pub type StagedField = Option<Vec<u8>>;

/// One field of a record about to be staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Null,
    Empty,
    Ordinal(u64),
    Bytes(&'a [u8]),
}

/// Append the encoded form of `field` to `buf`.
pub fn encode_field(buf: &mut Vec<u8>, field: FieldValue<'_>) {
    match field {
        FieldValue::Null => buf.extend_from_slice(NULL_MARKER),
        FieldValue::Empty => buf.extend_from_slice(&[STRING_ENCLOSURE, STRING_ENCLOSURE]),
        FieldValue::Ordinal(n) => buf.extend_from_slice(n.to_string().as_bytes()),
        FieldValue::Bytes(bytes) => {
            for &b in bytes {
                if b == b'\\' {
                    buf.push(b'\\');
                }
                buf.push(b);
            }
        }
    }
}

/// Append one complete record (fields plus terminator) to `buf`.
pub fn encode_record<'a>(buf: &mut Vec<u8>, fields: impl IntoIterator<Item = FieldValue<'a>>) {
    for (idx, field) in fields.into_iter().enumerate() {
        if idx > 0 {
            buf.push(FIELD_SEPARATOR);
        }
        encode_field(buf, field);
    }
    buf.push(LINE_SEPARATOR);
}

/// Decode staged data the way the bulk loader reads it.
pub fn decode_records(data: &[u8]) -> Vec<Vec<StagedField>> {
    data.split(|&b| b == LINE_SEPARATOR)
        .filter(|line| !line.is_empty())
        .map(|line| line.split(|&b| b == FIELD_SEPARATOR).map(decode_field).collect())
        .collect()
}

fn decode_field(raw: &[u8]) -> StagedField {
    if raw == NULL_MARKER {
        return None;
    }

    let raw = match raw {
        [STRING_ENCLOSURE, inner @ .., STRING_ENCLOSURE] => inner,
        other => other,
    };

    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'0') => out.push(0),
            Some(b'b') => out.push(0x08),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'Z') => out.push(0x1a),
            Some(&other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    Some(out)
}
