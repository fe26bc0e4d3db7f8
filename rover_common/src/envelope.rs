//! NDJSON envelope codec for Core ↔ Worker messages.
//!
//! Wire format: one JSON object per line, newline-terminated. Payload
//! fields are inline: not nested under a `payload` key: so the header
//! fields are reserved names.
//!
//! ```text
//! {"v":2,"type":"tts.event.energy","src":"tts","seq":11,"t_ns":0,"energy":180}
//! ```

use serde_json::{Map, Value};
use thiserror::Error;

/// Current envelope schema version.
pub const SCHEMA_VERSION: u64 = 2;

/// Malformed envelope line.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("empty line")]
    Empty,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected JSON object")]
    NotObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Parsed NDJSON message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub v: u64,
    pub msg_type: String,
    pub src: String,
    pub seq: u64,
    pub t_ns: u64,
    /// Inline payload fields (everything that is not a header field).
    pub payload: Map<String, Value>,

    // Optional header fields, present on some message types.
    pub ref_seq: Option<u64>,
    pub session_id: Option<String>,
    pub err: Option<String>,
}

impl Envelope {
    /// Build an outbound envelope with an empty payload.
    pub fn new(msg_type: impl Into<String>, src: impl Into<String>, seq: u64, t_ns: u64) -> Self {
        Self {
            v: SCHEMA_VERSION,
            msg_type: msg_type.into(),
            src: src.into(),
            seq,
            t_ns,
            payload: Map::new(),
            ref_seq: None,
            session_id: None,
            err: None,
        }
    }

    /// Attach payload fields (builder style).
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Fetch a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Payload string field, or the default when absent/mistyped.
    pub fn str_field(&self, key: &str) -> &str {
        self.payload.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// Payload float field, or the given default.
    pub fn f64_field(&self, key: &str, default: f64) -> f64 {
        self.payload.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    /// Payload integer field, or the given default.
    pub fn i64_field(&self, key: &str, default: i64) -> i64 {
        self.payload.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    /// Payload bool field, or the given default.
    pub fn bool_field(&self, key: &str, default: bool) -> bool {
        self.payload.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    // ── Serialisation ────────────────────────────────────────────

    /// Serialise to a single NDJSON line, newline-terminated.
    pub fn to_line(&self) -> Vec<u8> {
        let mut d = Map::new();
        d.insert("v".into(), Value::from(self.v));
        d.insert("type".into(), Value::from(self.msg_type.clone()));
        d.insert("src".into(), Value::from(self.src.clone()));
        d.insert("seq".into(), Value::from(self.seq));
        d.insert("t_ns".into(), Value::from(self.t_ns));
        if let Some(ref_seq) = self.ref_seq {
            d.insert("ref_seq".into(), Value::from(ref_seq));
        }
        if let Some(ref sid) = self.session_id {
            d.insert("session_id".into(), Value::from(sid.clone()));
        }
        if let Some(ref err) = self.err {
            d.insert("err".into(), Value::from(err.clone()));
        }
        for (k, v) in &self.payload {
            d.insert(k.clone(), v.clone());
        }
        let mut line = serde_json::to_vec(&Value::Object(d)).unwrap_or_default();
        line.push(b'\n');
        line
    }

    // ── Deserialisation ──────────────────────────────────────────

    /// Parse a single NDJSON line into an [`Envelope`].
    pub fn from_line(line: &str) -> Result<Self, EnvelopeError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(EnvelopeError::Empty);
        }
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(mut d) = value else {
            return Err(EnvelopeError::NotObject);
        };

        let msg_type = take_str(&mut d, "type")?;
        let src = take_str(&mut d, "src")?;
        let seq = take_u64(&mut d, "seq")?;
        let t_ns = take_u64(&mut d, "t_ns")?;
        let v = d
            .remove("v")
            .and_then(|v| v.as_u64())
            .unwrap_or(SCHEMA_VERSION);

        let ref_seq = d.remove("ref_seq").and_then(|v| v.as_u64());
        let session_id = d
            .remove("session_id")
            .and_then(|v| v.as_str().map(str::to_owned));
        let err = d.remove("err").and_then(|v| v.as_str().map(str::to_owned));

        Ok(Self {
            v,
            msg_type,
            src,
            seq,
            t_ns,
            payload: d,
            ref_seq,
            session_id,
            err,
        })
    }
}

fn take_str(d: &mut Map<String, Value>, key: &'static str) -> Result<String, EnvelopeError> {
    match d.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(EnvelopeError::MissingField(key)),
    }
}

fn take_u64(d: &mut Map<String, Value>, key: &'static str) -> Result<u64, EnvelopeError> {
    d.remove(key)
        .and_then(|v| v.as_u64())
        .ok_or(EnvelopeError::MissingField(key))
}

/// Per-source monotonically increasing sequence counter.
#[derive(Debug, Default)]
pub struct SeqCounter {
    value: u64,
}

impl SeqCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u64 {
        let v = self.value;
        self.value += 1;
        v
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}
