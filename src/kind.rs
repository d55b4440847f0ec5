//! Label normalization.
//!
//! Raw detector labels are mapped onto a closed, configured set of canonical
//! event kinds. Matching is a case-sensitive substring test in configured
//! order; the first kind contained in the raw label wins.

use anyhow::{anyhow, Result};

use crate::detect::RawLabel;

/// Upper bound on configured kinds. Active event tables are sized by the
/// configured set, this only caps pathological configurations.
pub const MAX_EVENT_KINDS: usize = 32;

/// Index of a canonical kind inside its `KindSet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindId(u8);

impl KindId {
    pub(crate) const fn from_index(index: usize) -> Self {
        KindId(index as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outcome of normalizing one raw label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Normalized {
    /// The label contains a tracked kind.
    Kind(KindId),
    /// A well-formed label that matches no tracked kind (detector noise).
    Untracked,
    /// The detector returned something that is not a label string.
    Invalid(String),
}

/// The configured set of canonical event kinds, in enumeration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindSet {
    kinds: Vec<String>,
}

impl KindSet {
    /// Build a kind set, rejecting configurations that would make
    /// normalization ambiguous or break the output filename contract.
    pub fn new<I, S>(kinds: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
        if kinds.is_empty() {
            return Err(anyhow!("at least one event kind must be configured"));
        }
        if kinds.len() > MAX_EVENT_KINDS {
            return Err(anyhow!(
                "too many event kinds ({} > {})",
                kinds.len(),
                MAX_EVENT_KINDS
            ));
        }
        for kind in &kinds {
            validate_kind_name(kind)?;
        }
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                if a == b {
                    return Err(anyhow!("event kind '{}' is configured twice", a));
                }
                if a.contains(b.as_str()) || b.contains(a.as_str()) {
                    return Err(anyhow!(
                        "event kinds '{}' and '{}' overlap; normalization would be ambiguous",
                        a,
                        b
                    ));
                }
            }
        }
        Ok(Self { kinds })
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Canonical name of a kind.
    pub fn name(&self, id: KindId) -> &str {
        &self.kinds[id.index()]
    }

    /// Look up a kind by its exact canonical name.
    pub fn id_of(&self, name: &str) -> Option<KindId> {
        self.kinds
            .iter()
            .position(|k| k == name)
            .map(|i| KindId(i as u8))
    }

    /// Map a raw detector label to a canonical kind.
    pub fn normalize(&self, raw: &RawLabel) -> Normalized {
        let label = match raw {
            RawLabel::Name(name) => name,
            RawLabel::ClassIndex(idx) => {
                return Normalized::Invalid(format!("invalid_label_class_{}", idx))
            }
        };
        self.kinds
            .iter()
            .position(|kind| label.contains(kind.as_str()))
            .map(|i| Normalized::Kind(KindId(i as u8)))
            .unwrap_or(Normalized::Untracked)
    }
}

fn validate_kind_name(kind: &str) -> Result<()> {
    if kind.is_empty() {
        return Err(anyhow!("event kind must not be empty"));
    }
    if !kind
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(anyhow!(
            "event kind '{}' must only contain [A-Za-z0-9_-]",
            kind
        ));
    }
    Ok(())
}
