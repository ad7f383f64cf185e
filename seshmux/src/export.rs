//! Snapshot export and import.
//!
//! An export is a versioned, tagged envelope holding either a plaintext
//! identity list or a single opaque encrypted record. Encryption is
//! byte-in/byte-out: the host encrypts around `export_snapshot` and decrypts
//! before `import_snapshot`; the core never holds key material. Compression
//! is content-agnostic, so the core applies it itself above a size
//! threshold, flagged by `compressed: true` with the payload moved into a
//! replacement blob field.

use std::io::{Read, Write};

use base64::Engine as _;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use seshmux_core::{time as clock, IdentityId};

use crate::{
    engine::{Engine, NotReady},
    persist::PersistError,
    snapshot::IdentityRecord,
};

/// Current export format version.
pub const EXPORT_VERSION: u32 = 1;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// What an export covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportScope {
    One(IdentityId),
    All,
}

/// An opaque host-encrypted payload. The core round-trips the record without
/// interpreting it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub algorithm: String,
    pub key_len: u32,
    pub iterations: u32,
    pub salt: String,
    pub iv: String,
    pub ciphertext: String,
}

/// The export file format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: u32,
    pub scope: ExportScope,
    #[serde(with = "time::serde::timestamp")]
    pub exported_at: OffsetDateTime,
    /// Plaintext identities, absent when compressed or encrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identities: Option<Vec<IdentityRecord>>,
    #[serde(default)]
    pub compressed: bool,
    /// Deflated identity list (base64), replacing `identities` when
    /// `compressed` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deflated: Option<String>,
    /// Host-encrypted payload; mutually exclusive with the plaintext fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<EncryptedBlob>,
}

/// How an import resolves id or name collisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Imported identity gets a fresh id and a suffixed name.
    Rename,
    /// Colliding identities are skipped.
    Skip,
    /// Colliding identities are replaced in place.
    Replace,
}

/// Itemized import outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub attempted: usize,
    pub imported: usize,
    pub renamed: usize,
    pub skipped: usize,
    pub replaced: usize,
    pub errors: Vec<String>,
}

/// The error type returned by [`Engine::export_snapshot`].
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    NotReady(#[from] NotReady),
    #[error("unknown identity")]
    UnknownIdentity,
    #[error("bulk export is not available on the current tier")]
    NotPermitted,
    #[error("export serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The error type returned by [`Engine::import_snapshot`].
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    NotReady(#[from] NotReady),
    #[error("import file is malformed: {0}")]
    Malformed(String),
    #[error("import file version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("import file is encrypted; decrypt it before importing")]
    EncryptedPayload,
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl Engine {
    /// Serializes one identity (or, tier permitting, all of them) into an
    /// export envelope. Payloads above the compression threshold are
    /// deflated.
    pub fn export_snapshot(&self, scope: ExportScope) -> Result<Vec<u8>, ExportError> {
        self.ensure_ready()?;
        let records: Vec<IdentityRecord> = {
            let state = self.inner.state.lock();
            match scope {
                ExportScope::One(id) => {
                    let identity =
                        state.registry.get(id).ok_or(ExportError::UnknownIdentity)?;
                    vec![IdentityRecord::from(identity)]
                }
                ExportScope::All => {
                    if !state.policy.may_export_all() {
                        return Err(ExportError::NotPermitted);
                    }
                    state.registry.iter().map(IdentityRecord::from).collect()
                }
            }
        };

        let payload = serde_json::to_vec(&records)?;
        let mut envelope = ExportEnvelope {
            version: EXPORT_VERSION,
            scope,
            exported_at: clock::now(),
            identities: None,
            compressed: false,
            deflated: None,
            encrypted: None,
        };

        if payload.len() > self.inner.config.export_compression_threshold {
            envelope.compressed = true;
            envelope.deflated = Some(BASE64.encode(deflate(&payload)));
        } else {
            envelope.identities = Some(records);
        }

        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Imports identities from an export envelope, resolving collisions per
    /// `policy`, and durably persists the result.
    pub async fn import_snapshot(
        &self,
        bytes: &[u8],
        policy: ConflictPolicy,
    ) -> Result<ImportReport, ImportError> {
        self.ensure_ready()?;
        let envelope: ExportEnvelope = serde_json::from_slice(bytes)
            .map_err(|err| ImportError::Malformed(err.to_string()))?;
        if envelope.version > EXPORT_VERSION {
            return Err(ImportError::UnsupportedVersion(envelope.version));
        }
        if envelope.encrypted.is_some() {
            return Err(ImportError::EncryptedPayload);
        }

        let records: Vec<IdentityRecord> = if envelope.compressed {
            let deflated = envelope
                .deflated
                .ok_or_else(|| ImportError::Malformed("compressed flag without blob".into()))?;
            let compressed = BASE64
                .decode(deflated)
                .map_err(|err| ImportError::Malformed(err.to_string()))?;
            let payload = inflate(&compressed)
                .map_err(|err| ImportError::Malformed(err.to_string()))?;
            serde_json::from_slice(&payload)
                .map_err(|err| ImportError::Malformed(err.to_string()))?
        } else {
            envelope.identities.unwrap_or_default()
        };

        let mut report = ImportReport {
            attempted: records.len(),
            ..ImportReport::default()
        };

        {
            let mut state = self.inner.state.lock();
            for record in records {
                let admission = state.policy.max_concurrent_identities();
                let id = record.meta.id;
                let id_taken = state.registry.contains(id);
                let name_taken = record
                    .meta
                    .name
                    .as_deref()
                    .is_some_and(|name| state.registry.is_name_taken(name, None));

                match policy {
                    ConflictPolicy::Skip if id_taken || name_taken => {
                        report.skipped += 1;
                        continue;
                    }
                    ConflictPolicy::Replace if id_taken => {
                        state.registry.delete(id);
                        state.bindings.remove_identity(id);
                        state.trail.forget_identity(id);
                        state.registry.insert(record.into_identity());
                        report.replaced += 1;
                        report.imported += 1;
                        continue;
                    }
                    _ => {}
                }

                if let Some(limit) = admission {
                    if state.registry.len() >= limit {
                        report
                            .errors
                            .push(format!("identity {id}: tier limit of {limit} reached"));
                        continue;
                    }
                }

                let mut identity = record.into_identity();
                let mut renamed = false;
                if id_taken {
                    identity.id = IdentityId::generate();
                    renamed = true;
                }
                if let Some(name) = identity.name.clone() {
                    if state.registry.is_name_taken(&name, None) {
                        identity.name = Some(unique_name(&state.registry, &name));
                        renamed = true;
                    }
                }
                state.registry.insert(identity);
                report.imported += 1;
                if renamed {
                    report.renamed += 1;
                }
            }
        }

        self.inner.persist.immediate().await?;
        Ok(report)
    }
}

fn unique_name(registry: &crate::registry::Registry, base: &str) -> String {
    for n in 2.. {
        let candidate = format!("{base} ({n})");
        if !registry.is_name_taken(&candidate, None) {
            return candidate;
        }
    }
    unreachable!("name counter exhausted")
}

// Writes into an in-memory `Vec` cannot fail.
fn deflate(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(bytes);
    encoder.finish().unwrap_or_default()
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
