//! Scripted in-memory transport for exercising the manager and RPC client.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use canopy_transfer::{Channel, Result, TransferError, Transport};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The test's end of an in-memory channel.
pub struct Peer {
    /// Messages to deliver to the channel owner; drop to close the stream
    pub to_client: mpsc::UnboundedSender<String>,
    /// Messages the channel owner sent
    pub from_client: mpsc::UnboundedReceiver<String>,
}

pub struct MemoryChannel {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// A connected channel and the peer end controlling it.
pub fn pair() -> (MemoryChannel, Peer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    (
        MemoryChannel { inbound, outbound },
        Peer {
            to_client,
            from_client,
        },
    )
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        self.outbound
            .send(text.to_string())
            .map_err(|_| TransferError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        self.inbound.close();
        Ok(())
    }
}

/// Outcome of one scripted connect.
pub enum Step {
    Refuse,
    Accept(MemoryChannel),
}

/// Transport that plays back a script of connect outcomes, refusing once
/// the script runs out, and records when each attempt happened.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Whole seconds between consecutive attempts.
    pub fn gaps(&self) -> Vec<u64> {
        let attempts = self.attempts.lock().unwrap();
        attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs_f64().round() as u64)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _address: &str) -> Result<Box<dyn Channel>> {
        self.attempts.lock().unwrap().push(Instant::now());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Accept(channel)) => Ok(Box::new(channel)),
            Some(Step::Refuse) | None => Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            ))),
        }
    }
}
