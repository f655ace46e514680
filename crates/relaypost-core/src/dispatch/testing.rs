//! Scripted relay client for dispatch tests

use crate::relay::{OutboundMessage, RelayClient, RelayError, RelaySession};
use async_trait::async_trait;
use relaypost_common::RelayEndpoint;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// What the next `send` does
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    Transient,
    Permanent,
    Unexpected,
    Panic,
}

/// Holds every send until released
pub struct Gate {
    entered: AtomicUsize,
    release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: AtomicUsize::new(0),
            release: Semaphore::new(0),
        })
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    async fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

/// Follows a script of outcomes, then succeeds forever
pub struct ScriptedClient {
    script: Arc<std::sync::Mutex<VecDeque<Step>>>,
    attempts: Arc<Mutex<Vec<OutboundMessage>>>,
    open: Arc<AtomicUsize>,
    gate: Option<Arc<Gate>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Arc::new(std::sync::Mutex::new(script.into())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    pub fn gated(script: Vec<Step>, gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    /// Messages handed to `send`, in order
    pub async fn attempts(&self) -> Vec<OutboundMessage> {
        self.attempts.lock().await.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayClient for ScriptedClient {
    async fn connect(&self, _endpoint: &RelayEndpoint) -> Result<Box<dyn RelaySession>, RelayError> {
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            attempts: self.attempts.clone(),
            open: Some(self.open.clone()),
            gate: self.gate.clone(),
        }))
    }
}

struct ScriptedSession {
    script: Arc<std::sync::Mutex<VecDeque<Step>>>,
    attempts: Arc<Mutex<Vec<OutboundMessage>>>,
    open: Option<Arc<AtomicUsize>>,
    gate: Option<Arc<Gate>>,
}

impl ScriptedSession {
    fn release(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl RelaySession for ScriptedSession {
    async fn authenticate(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), RelayError> {
        self.attempts.lock().await.push(message.clone());
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Ok);
        match step {
            Step::Ok => Ok(()),
            Step::Transient => Err(RelayError::transient("421 try again later")),
            Step::Permanent => Err(RelayError::permanent("535 authentication failed")),
            Step::Unexpected => Err(RelayError::unexpected("garbled reply")),
            Step::Panic => panic!("scripted panic"),
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}
