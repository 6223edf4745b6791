//! Responder identity on disk: alternating kind/payload lines.

use std::io;
use std::path::Path;

use scout_core::protocol::KIND_ROOM_CONTROLLER;
use scout_core::wire::MAX_PAYLOAD;
use scout_core::IdentityRecord;

/// Identity advertised when no valid identity file exists.
fn default_identity() -> Vec<IdentityRecord> {
    vec![IdentityRecord {
        kind: KIND_ROOM_CONTROLLER,
        payload: "New Room".to_string(),
    }]
}

/// Load identity records from `path`, or create the file with the default
/// identity if it is missing or malformed.
pub fn load_or_create(path: &Path) -> io::Result<Vec<IdentityRecord>> {
    match std::fs::read_to_string(path).ok().and_then(|s| parse(&s)) {
        Some(records) => Ok(records),
        None => {
            let records = default_identity();
            log::warn!(
                "identity file {} missing or malformed, writing default",
                path.display()
            );
            store(path, &records)?;
            Ok(records)
        }
    }
}

/// Parse alternating kind/payload lines. None when the text cannot be an
/// identity list: empty, odd line count, unparsable kind, or a payload too
/// long to ever encode.
fn parse(text: &str) -> Option<Vec<IdentityRecord>> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() || lines.len() % 2 != 0 {
        return None;
    }
    let mut records = Vec::with_capacity(lines.len() / 2);
    for pair in lines.chunks(2) {
        let kind: u8 = pair[0].trim().parse().ok()?;
        let payload = pair[1].to_string();
        if payload.len() > MAX_PAYLOAD {
            return None;
        }
        records.push(IdentityRecord { kind, payload });
    }
    Some(records)
}

/// Write identity records in the same alternating-line format.
pub fn store(path: &Path, records: &[IdentityRecord]) -> io::Result<()> {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.kind.to_string());
        out.push('\n');
        out.push_str(&record.payload);
        out.push('\n');
    }
    std::fs::write(path, out)
}
