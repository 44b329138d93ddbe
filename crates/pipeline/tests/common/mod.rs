//! Shared fixtures for pipeline integration tests.
//!
//! Prompts are identified by their `style` (`"p0"`, `"p1"`, ...) so the
//! scripted session can decide per prompt what to report.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tunefleet_core::prompt::{Prompt, PromptPool};
use tunefleet_db::{LedgerSnapshot, LedgerStore, MemoryStore, StoreError};
use tunefleet_events::{EventBus, EventKind, FleetEvent};
use tunefleet_pipeline::{
    AutomationSession, GenerationOptions, ItemResult, QueueManager, SessionError, SessionFactory,
};

// ---------------------------------------------------------------------------
// Prompt pools
// ---------------------------------------------------------------------------

pub fn pool(n: usize) -> PromptPool {
    (0..n)
        .map(|i| Prompt::new(format!("p{i}")).with_title(format!("Song {i}")))
        .collect()
}

pub fn styles(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("p{i}")).collect()
}

// ---------------------------------------------------------------------------
// Scripted session
// ---------------------------------------------------------------------------

/// What the scripted sessions should do, plus what they observed.
#[derive(Default)]
pub struct Script {
    /// Prompts reported as `Failure`.
    pub fail_items: HashSet<String>,
    /// A batch containing one of these prompts kills the session.
    pub die_on: HashSet<String>,
    /// A batch containing one of these prompts returns results only for
    /// the prompts before it.
    pub truncate_at: HashSet<String>,
    /// Accounts whose session cannot be opened.
    pub fail_open: HashSet<String>,
    /// Cancel this token once this many batches have been answered.
    pub cancel_after: Option<(usize, CancellationToken)>,

    /// Prompts whose outcome was reported, in order.
    pub submitted: Vec<String>,
    pub batches_answered: usize,
    pub opened: Vec<String>,
    pub closed: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedFactory {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edit(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }

    pub fn submitted(&self) -> Vec<String> {
        self.script.lock().unwrap().submitted.clone()
    }

    pub fn reset_log(&self) {
        let mut s = self.script.lock().unwrap();
        s.submitted.clear();
        s.batches_answered = 0;
        s.opened.clear();
        s.closed = 0;
    }
}

struct ScriptedSession {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl AutomationSession for ScriptedSession {
    async fn submit_batch(
        &mut self,
        prompts: &[Prompt],
        _options: &GenerationOptions,
    ) -> Result<Vec<ItemResult>, SessionError> {
        let mut s = self.script.lock().unwrap();
        if prompts.iter().any(|p| s.die_on.contains(&p.style)) {
            return Err(SessionError::Unavailable("browser closed".into()));
        }

        let mut results = Vec::new();
        for p in prompts {
            if s.truncate_at.contains(&p.style) {
                break;
            }
            s.submitted.push(p.style.clone());
            if s.fail_items.contains(&p.style) {
                results.push(ItemResult::failure(format!("{} rejected", p.style)));
            } else {
                results.push(ItemResult::success(format!("clip-{}", p.style)));
            }
        }

        s.batches_answered += 1;
        if let Some((after, token)) = &s.cancel_after {
            if s.batches_answered >= *after {
                token.cancel();
            }
        }
        Ok(results)
    }

    async fn close(&mut self) {
        self.script.lock().unwrap().closed += 1;
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self, account_ref: &str) -> Result<Box<dyn AutomationSession>, SessionError> {
        let mut s = self.script.lock().unwrap();
        if s.fail_open.contains(account_ref) {
            return Err(SessionError::Unavailable(format!("cannot open profile {account_ref}")));
        }
        s.opened.push(account_ref.to_string());
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Failing store
// ---------------------------------------------------------------------------

/// A [`MemoryStore`] whose saves start failing after a budget runs out.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    budget: Mutex<Option<usize>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` more successful saves, then fail every save.
    pub fn fail_after(&self, n: usize) {
        *self.budget.lock().unwrap() = Some(n);
    }
}

#[async_trait]
impl LedgerStore for FailingStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        {
            let mut budget = self.budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => {
                    return Err(StoreError::Io {
                        path: "queue_state.json".into(),
                        source: std::io::Error::other("disk full"),
                    });
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.save(snapshot).await
    }
}

// ---------------------------------------------------------------------------
// Ledger + events helpers
// ---------------------------------------------------------------------------

pub async fn memory_ledger() -> (Arc<QueueManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = QueueManager::open(store.clone()).await.unwrap();
    (Arc::new(ledger), store)
}

/// Every event currently buffered in `rx`.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<FleetEvent>) -> Vec<EventKind> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event.kind);
    }
    out
}

pub fn bus() -> Arc<EventBus> {
    Arc::new(EventBus::new(4096))
}
