//! Parameter registry: central store for all tunable robot parameters.
//!
//! Each parameter is registered with a typed definition (kind, bounds,
//! default, mutability). `set` validates against the definition and
//! invokes registered change callbacks; an invalid set leaves the stored
//! value untouched. Supervisor-owned runtime parameters persist to an
//! atomically-written JSON overrides file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Parameter value, one of the three supported kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(v as f64),
            Self::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }
}

/// Declared value kind for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Float,
    Int,
    Bool,
}

/// When a parameter may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    Runtime,
    BootOnly,
}

/// Rejected parameter write.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParamError {
    #[error("unknown param: {0}")]
    Unknown(String),

    #[error("{name} is boot_only")]
    BootOnly { name: String },

    #[error("{name} must be {expected:?}")]
    WrongKind { name: String, expected: ParamKind },

    #[error("{name} below min ({min})")]
    BelowMin { name: String, min: f64 },

    #[error("{name} above max ({max})")]
    AboveMax { name: String, max: f64 },
}

/// One registered parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub kind: ParamKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub default: ParamValue,
    pub value: ParamValue,
    pub mutable: Mutability,
    pub doc: String,
}

impl ParamDef {
    pub fn new(
        name: impl Into<String>,
        kind: ParamKind,
        default: ParamValue,
        min: Option<f64>,
        max: Option<f64>,
        doc: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            min,
            max,
            value: default.clone(),
            default,
            mutable: Mutability::Runtime,
            doc: doc.into(),
        }
    }

    fn validate(&self, value: &ParamValue) -> Result<(), ParamError> {
        if self.mutable == Mutability::BootOnly {
            return Err(ParamError::BootOnly { name: self.name.clone() });
        }
        let kind_ok = matches!(
            (self.kind, value),
            (ParamKind::Float, ParamValue::Float(_))
                | (ParamKind::Float, ParamValue::Int(_))
                | (ParamKind::Int, ParamValue::Int(_))
                | (ParamKind::Bool, ParamValue::Bool(_))
        );
        if !kind_ok {
            return Err(ParamError::WrongKind {
                name: self.name.clone(),
                expected: self.kind,
            });
        }
        if let Some(v) = value.as_f64() {
            if let Some(min) = self.min {
                if v < min {
                    return Err(ParamError::BelowMin { name: self.name.clone(), min });
                }
            }
            if let Some(max) = self.max {
                if v > max {
                    return Err(ParamError::AboveMax { name: self.name.clone(), max });
                }
            }
        }
        Ok(())
    }
}

type ChangeCallback = Box<dyn Fn(&str, &ParamValue) + Send>;

/// Central parameter store with validation and change callbacks.
#[derive(Default)]
pub struct ParamRegistry {
    params: BTreeMap<String, ParamDef>,
    on_change: Vec<ChangeCallback>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked after any param value changes.
    pub fn on_change(&mut self, cb: impl Fn(&str, &ParamValue) + Send + 'static) {
        self.on_change.push(Box::new(cb));
    }

    pub fn register(&mut self, def: ParamDef) {
        self.params.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.params.get(name)
    }

    pub fn get_f64(&self, name: &str, default: f64) -> f64 {
        self.params
            .get(name)
            .and_then(|p| p.value.as_f64())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.params
            .get(name)
            .and_then(|p| p.value.as_bool())
            .unwrap_or(default)
    }

    /// Validate and store a new value, then fire change callbacks.
    /// The stored value is untouched on any validation failure.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        let def = self
            .params
            .get_mut(name)
            .ok_or_else(|| ParamError::Unknown(name.to_string()))?;
        def.validate(&value)?;
        def.value = value;
        info!("param: {} = {:?}", name, def.value);
        let stored = def.value.clone();
        for cb in &self.on_change {
            cb(name, &stored);
        }
        Ok(())
    }

    /// Snapshot of all definitions, sorted by name.
    pub fn snapshot(&self) -> Vec<ParamDef> {
        self.params.values().cloned().collect()
    }
}

// ─── Persistence ────────────────────────────────────────────────────

/// Default overrides file: `~/.config/rover/params.json`.
pub fn default_params_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".config/rover/params.json")
}

/// Apply saved overrides from disk. Unknown or invalid values are
/// skipped with a warning; a missing or corrupt file is not an error.
pub fn load_params(registry: &mut ParamRegistry, path: &Path) {
    let Ok(text) = std::fs::read_to_string(path) else {
        return;
    };
    let saved: BTreeMap<String, Value> = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            warn!("param overrides unreadable at {}: {}", path.display(), e);
            return;
        }
    };

    let mut applied = 0usize;
    for (name, raw) in saved {
        let Ok(value) = serde_json::from_value::<ParamValue>(raw) else {
            continue;
        };
        match registry.set(&name, value) {
            Ok(()) => applied += 1,
            Err(e) => warn!("skipped persisted param {}: {}", name, e),
        }
    }
    info!("loaded {} persisted params from {}", applied, path.display());
}

/// Upsert one value in the overrides file via temp-file + rename.
pub fn save_param(path: &Path, name: &str, value: &ParamValue) -> std::io::Result<()> {
    let mut existing: BTreeMap<String, ParamValue> = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();
    existing.insert(name.to_string(), value.clone());

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut f, &existing)?;
        f.write_all(b"\n")?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
