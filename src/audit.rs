use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::provider::Provider;

// Bounded on disk; not configurable.
const AUDIT_MAX_FILES: usize = 10;
const AUDIT_MAX_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// One line of the audit log. Never carries a credential value, only its fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub ts_ms: i64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AuditEvent {
    pub fn now(kind: &str) -> Self {
        Self {
            ts_ms: chrono::Utc::now().timestamp_millis(),
            kind: kind.to_string(),
            provider: None,
            user_id: None,
            fingerprint: None,
            outcome: None,
            note: None,
        }
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn user(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(str::to_string);
        self
    }

    pub fn fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Append-only JSONL audit trail under `audit/<YYYY-MM>.jsonl`.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
    enabled: bool,
}

impl AuditLog {
    pub fn new(dir: PathBuf, enabled: bool) -> Self {
        Self { dir, enabled }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), false)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Best effort: a failed write is logged and dropped.
    pub fn record(&self, event: AuditEvent) {
        if !self.enabled {
            return;
        }
        if let Err(err) = append_event(&self.dir, &event) {
            warn!(kind = %event.kind, error = %err, "audit append failed");
        }
    }

    pub fn read(&self, limit: usize, before_ts_ms: Option<i64>) -> io::Result<Vec<AuditEvent>> {
        read_events_before(&self.dir, limit, before_ts_ms)
    }
}

pub fn append_event(audit_dir: &Path, event: &AuditEvent) -> io::Result<()> {
    let ts = chrono::Utc::now();
    let path = audit_dir.join(format!("{}-{:02}.jsonl", ts.year(), ts.month()));
    fs::create_dir_all(audit_dir)?;
    let line = serde_json::to_string(event)? + "\n";
    let mut f = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    f.write_all(line.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
    }
    let _ = rotate_by_size(&path, AUDIT_MAX_FILES, AUDIT_MAX_SIZE_BYTES);
    Ok(())
}

/// Shift `path` to `path.1` (and older files up by one) once it reaches `max_size_bytes`.
fn rotate_by_size(path: &Path, max_files: usize, max_size_bytes: u64) -> io::Result<()> {
    if max_files == 0 || max_size_bytes == 0 || !path.exists() {
        return Ok(());
    }
    if fs::metadata(path)?.len() < max_size_bytes {
        return Ok(());
    }
    let rotated = |idx: usize| PathBuf::from(format!("{}.{}", path.to_string_lossy(), idx));
    for idx in (1..=max_files).rev() {
        let current = rotated(idx);
        if !current.exists() {
            continue;
        }
        if idx == max_files {
            let _ = fs::remove_file(&current);
        } else {
            let _ = fs::rename(&current, rotated(idx + 1));
        }
    }
    fs::rename(path, rotated(1))
}

// (month prefix, rotation index) for "2026-10.jsonl.3"; index 0 is the live file.
fn file_order_key(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match name.split_once(".jsonl") {
        Some((prefix, rest)) => (
            prefix.to_string(),
            rest.strip_prefix('.')
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        ),
        None => (name.to_string(), 0),
    }
}

/// Newest first. `before_ts_ms` is an exclusive cursor for paging backwards.
pub fn read_events_before(
    audit_dir: &Path,
    limit: usize,
    before_ts_ms: Option<i64>,
) -> io::Result<Vec<AuditEvent>> {
    if limit == 0 || !audit_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(audit_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort_by(|a, b| {
        let (a_prefix, a_idx) = file_order_key(a);
        let (b_prefix, b_idx) = file_order_key(b);
        b_prefix.cmp(&a_prefix).then(a_idx.cmp(&b_idx))
    });

    let mut out = Vec::new();
    for path in files {
        let raw = fs::read_to_string(&path).unwrap_or_default();
        for line in raw.lines().rev().filter(|l| !l.trim().is_empty()) {
            let Ok(event) = serde_json::from_str::<AuditEvent>(line) else {
                continue;
            };
            if before_ts_ms.is_some_and(|before| event.ts_ms >= before) {
                continue;
            }
            out.push(event);
            if out.len() >= limit {
                return Ok(out);
            }
        }
    }
    Ok(out)
}
