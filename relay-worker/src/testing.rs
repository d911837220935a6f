//! In-memory doubles shared by unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::dispatcher::{Dispatch, DispatchOutcome};
use crate::error::{BrokerError, DispatchError};
use crate::queue::{Acknowledge, HackathonPayload, HackathonTeamMember, Payload, Settlement};

/// Records every settlement sent through it.
#[derive(Debug, Clone, Default)]
pub struct RecordingAcker {
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

impl RecordingAcker {
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().unwrap().clone()
    }

    fn record(&self, settlement: Settlement) -> Result<(), BrokerError> {
        self.settlements.lock().unwrap().push(settlement);
        Ok(())
    }
}

#[async_trait]
impl Acknowledge for RecordingAcker {
    async fn acknowledge(&self) -> Result<(), BrokerError> {
        self.record(Settlement::Ack)
    }

    async fn requeue(&self) -> Result<(), BrokerError> {
        self.record(Settlement::Requeue)
    }

    async fn dead_letter(&self) -> Result<(), BrokerError> {
        self.record(Settlement::DeadLetter)
    }
}

/// Scripted reply for one dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    Retryable,
    Fatal,
}

/// Dispatcher replaying a script, then succeeding forever.
///
/// Tracks call start times and fails the test if two calls overlap.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDispatcher {
    script: Arc<Mutex<VecDeque<Reply>>>,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
    in_flight: Arc<AtomicUsize>,
    latency: Duration,
}

impl ScriptedDispatcher {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn call_labels(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
    }
}

#[async_trait]
impl<P: Payload> Dispatch<P> for ScriptedDispatcher {
    async fn dispatch(&self, payload: &P) -> DispatchOutcome {
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));
        assert_eq!(concurrent, 0, "dispatch calls overlapped");

        self.calls
            .lock()
            .unwrap()
            .push((payload.label().to_string(), Instant::now()));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Success);

        match reply {
            Reply::Success => DispatchOutcome::Success,
            Reply::Retryable => DispatchOutcome::Retryable(DispatchError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            )),
            Reply::Fatal => {
                let err = serde_json::from_str::<u32>("not json").unwrap_err();
                DispatchOutcome::Fatal(DispatchError::Serialize(err))
            }
        }
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Collects formatted log output so tests can assert on it.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Route events on this thread into the buffer until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn hackathon_body(team_name: &str) -> Vec<u8> {
    let payload = HackathonPayload {
        team_name: team_name.to_string(),
        leader_name: "Ada".to_string(),
        leader_email: "ada@example.com".to_string(),
        leader_phone_number: "555-0100".to_string(),
        leader_college_name: "State U".to_string(),
        problem_statement: "PS-3".to_string(),
        team_members: vec![HackathonTeamMember {
            name: "Bob".to_string(),
            email: "bob@example.com".to_string(),
            phone_number: "555-0101".to_string(),
            college_name: "State U".to_string(),
        }],
    };
    serde_json::to_vec(&payload).unwrap()
}
