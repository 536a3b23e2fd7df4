//! Canonical byte encoding of an entry's hashed fields.
//!
//! The output is a pure function of field values: no map iteration order,
//! no float formatting, no platform width leaks into it. Every field that
//! contributes to the hash is written explicitly, in this order:
//!
//!   1. domain tag `chainlog.entry.v1`
//!   2. entry_id as 16 raw UUID bytes
//!   3. partition_key
//!   4. sequence as u64
//!   5. timestamp as i64 seconds + u32 subsecond nanos
//!   6. actor_id
//!   7. action as one tag byte
//!   8. entity type, entity id
//!   9. before_state   (0x00 absent | 0x01 value)
//!  10. after_state    (0x00 absent | 0x01 value)
//!  11. idempotency_key (0x00 absent | 0x01 string)
//!
//! Integers are big-endian. Strings are a u32 byte length followed by UTF-8.

use chrono::{DateTime, Utc};

use chainlog_contracts::{
    entry::{Action, AuditEntry, EntityRef, EntryId},
    error::{ChainError, ChainResult},
    state::StateValue,
};

/// Domain separation tag written first into every encoding.
pub const ENTRY_DOMAIN: &str = "chainlog.entry.v1";

/// Deepest snapshot nesting the encoder accepts.
pub const MAX_DEPTH: usize = 64;

const ABSENT: u8 = 0x00;
const PRESENT: u8 = 0x01;

const TAG_NULL: u8 = b'N';
const TAG_FALSE: u8 = b'F';
const TAG_TRUE: u8 = b'T';
const TAG_INTEGER: u8 = b'I';
const TAG_FLOAT: u8 = b'D';
const TAG_STRING: u8 = b'S';
const TAG_LIST: u8 = b'L';
const TAG_MAP: u8 = b'M';

/// Borrowed view of every hashed field of an entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryFields<'a> {
    pub entry_id: EntryId,
    pub partition_key: &'a str,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor_id: &'a str,
    pub action: Action,
    pub entity_ref: &'a EntityRef,
    pub before_state: Option<&'a StateValue>,
    pub after_state: Option<&'a StateValue>,
    pub idempotency_key: Option<&'a str>,
}

impl<'a> EntryFields<'a> {
    /// Borrow the hashed fields of a stored entry.
    pub fn of(entry: &'a AuditEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            partition_key: &entry.partition_key,
            sequence: entry.sequence,
            timestamp: entry.timestamp,
            actor_id: &entry.actor_id,
            action: entry.action,
            entity_ref: &entry.entity_ref,
            before_state: entry.before_state.as_ref(),
            after_state: entry.after_state.as_ref(),
            idempotency_key: entry.idempotency_key.as_deref(),
        }
    }
}

/// Stable one-byte code for each action.
pub fn action_tag(action: Action) -> u8 {
    match action {
        Action::Create => 1,
        Action::Update => 2,
        Action::Delete => 3,
        Action::CompensatingCorrection => 4,
    }
}

/// Encode `fields` into their canonical byte form.
///
/// Fails with `EncodingError` if a snapshot holds a non-finite float, nests
/// deeper than `MAX_DEPTH`, or a string is too long for its length prefix.
pub fn encode(fields: &EntryFields<'_>) -> ChainResult<Vec<u8>> {
    let mut out = Vec::with_capacity(256);

    put_str(&mut out, ENTRY_DOMAIN)?;
    out.extend_from_slice(fields.entry_id.0.as_bytes());
    put_str(&mut out, fields.partition_key)?;
    out.extend_from_slice(&fields.sequence.to_be_bytes());
    out.extend_from_slice(&fields.timestamp.timestamp().to_be_bytes());
    out.extend_from_slice(&fields.timestamp.timestamp_subsec_nanos().to_be_bytes());
    put_str(&mut out, fields.actor_id)?;
    out.push(action_tag(fields.action));
    put_str(&mut out, &fields.entity_ref.entity_type)?;
    put_str(&mut out, &fields.entity_ref.entity_id)?;
    put_optional_value(&mut out, fields.before_state)?;
    put_optional_value(&mut out, fields.after_state)?;
    match fields.idempotency_key {
        None => out.push(ABSENT),
        Some(key) => {
            out.push(PRESENT);
            put_str(&mut out, key)?;
        }
    }

    Ok(out)
}

/// Encode the hashed fields of a stored entry.
pub fn encode_entry(entry: &AuditEntry) -> ChainResult<Vec<u8>> {
    encode(&EntryFields::of(entry))
}

/// Encode a standalone snapshot value.
pub fn encode_value(value: &StateValue) -> ChainResult<Vec<u8>> {
    let mut out = Vec::new();
    put_value(&mut out, value, 0)?;
    Ok(out)
}

// ── Primitives ────────────────────────────────────────────────────────────────

fn put_len(out: &mut Vec<u8>, len: usize) -> ChainResult<()> {
    let len = u32::try_from(len).map_err(|_| ChainError::EncodingError {
        reason: format!("length {len} exceeds the u32 length prefix"),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_str(out: &mut Vec<u8>, s: &str) -> ChainResult<()> {
    put_len(out, s.len())?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_optional_value(out: &mut Vec<u8>, value: Option<&StateValue>) -> ChainResult<()> {
    match value {
        None => out.push(ABSENT),
        Some(v) => {
            out.push(PRESENT);
            put_value(out, v, 0)?;
        }
    }
    Ok(())
}

fn put_value(out: &mut Vec<u8>, value: &StateValue, depth: usize) -> ChainResult<()> {
    if depth > MAX_DEPTH {
        return Err(ChainError::EncodingError {
            reason: format!("snapshot nests deeper than {MAX_DEPTH} levels"),
        });
    }

    match value {
        StateValue::Null => out.push(TAG_NULL),
        StateValue::Bool(false) => out.push(TAG_FALSE),
        StateValue::Bool(true) => out.push(TAG_TRUE),
        StateValue::Integer(i) => {
            out.push(TAG_INTEGER);
            out.extend_from_slice(&i.to_be_bytes());
        }
        StateValue::Float(f) => {
            if !f.is_finite() {
                return Err(ChainError::EncodingError {
                    reason: format!("non-finite number {f} has no canonical form"),
                });
            }
            // -0.0 and 0.0 compare equal; give them one encoding.
            let f = if *f == 0.0 { 0.0f64 } else { *f };
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        StateValue::String(s) => {
            out.push(TAG_STRING);
            put_str(out, s)?;
        }
        StateValue::List(items) => {
            out.push(TAG_LIST);
            put_len(out, items.len())?;
            for item in items {
                put_value(out, item, depth + 1)?;
            }
        }
        StateValue::Map(map) => {
            out.push(TAG_MAP);
            put_len(out, map.len())?;
            // BTreeMap iterates in sorted key order.
            for (key, item) in map {
                put_str(out, key)?;
                put_value(out, item, depth + 1)?;
            }
        }
    }

    Ok(())
}
