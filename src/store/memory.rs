use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{RecordFilter, RecordStore};
use crate::error::{Error, Result};
use crate::models::{Item, RecordKey};

/// In-process `RecordStore` whose writes and reads can be made to fail,
/// for exercising reconciliation without touching disk.
pub struct MemoryStore {
    name: &'static str,
    records: Mutex<Vec<Item>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            records: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn with_records(name: &'static str, records: Vec<Item>) -> Self {
        let store = Self::new(name);
        *store.lock() = records;
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<Item> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Item>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} store is failing writes", self.name),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn upsert(&self, item: &Item) -> Result<()> {
        self.check_writes()?;
        let mut records = self.lock();
        let key = item.record_key();
        match records.iter_mut().find(|r| r.record_key() == key) {
            Some(existing) => *existing = item.clone(),
            None => records.push(item.clone()),
        }
        Ok(())
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.check_writes()?;
        self.lock().retain(|r| r.record_key() != *key);
        Ok(())
    }

    async fn query(&self, filter: RecordFilter) -> Result<Vec<Item>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} store is failing reads", self.name),
            )));
        }
        Ok(self.lock().iter().filter(|r| filter.matches(r)).cloned().collect())
    }
}
