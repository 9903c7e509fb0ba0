use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BackendError, SecretBackend, SecretRow};
use crate::provider::Provider;

/// In-process secret backend. Counts calls so callers can assert on network usage.
#[derive(Debug, Default)]
pub struct MemorySecretBackend {
    rows: Mutex<Vec<SecretRow>>,
    table_missing: AtomicBool,
    selects: AtomicUsize,
    upserts: AtomicUsize,
}

impl MemorySecretBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a deployment where the backing table was never created.
    pub fn set_table_missing(&self, missing: bool) {
        self.table_missing.store(missing, Ordering::SeqCst);
    }

    pub fn insert_row(&self, user_id: &str, provider: Provider, secret: &str) {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        upsert_row(
            &mut rows,
            SecretRow {
                user_id: user_id.to_string(),
                provider,
                secret: secret.to_string(),
                updated_at_ms: chrono::Utc::now().timestamp_millis(),
            },
        );
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn select_calls(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn check_table(&self) -> Result<(), BackendError> {
        if self.table_missing.load(Ordering::SeqCst) {
            return Err(BackendError::TableMissing);
        }
        Ok(())
    }
}

pub(super) fn upsert_row(rows: &mut Vec<SecretRow>, row: SecretRow) {
    if let Some(idx) = rows
        .iter()
        .position(|r| r.user_id == row.user_id && r.provider == row.provider)
    {
        rows[idx] = row;
    } else {
        rows.push(row);
    }
}

#[async_trait]
impl SecretBackend for MemorySecretBackend {
    async fn select(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<SecretRow>, BackendError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.check_table()?;
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .iter()
            .find(|r| r.user_id == user_id && r.provider == provider)
            .cloned())
    }

    async fn upsert(&self, row: SecretRow) -> Result<(), BackendError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check_table()?;
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        upsert_row(&mut rows, row);
        Ok(())
    }
}
