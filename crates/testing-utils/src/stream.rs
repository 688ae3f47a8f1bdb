//! In-memory stream with consumer-group semantics
//!
//! Models a single consumer group over a main stream plus its dead-letter
//! stream: a delivery cursor, a pending-entries list with per-entry idle time
//! and delivery counters, and ownership transfer for stale entries.

use async_trait::async_trait;
use relay_core::{RelayError, RelayResult, StreamConfig};
use relay_domain::{
    MessageConsumer, PendingClaimer, PendingEntry, Producer, StreamEntry, TaskMessage,
    FIELD_ERROR, FIELD_LAST_ERROR,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct PendingRecord {
    seq: u64,
    consumer: String,
    delivered_at: Instant,
    extra_idle: Duration,
    times_delivered: u64,
}

impl PendingRecord {
    fn idle(&self) -> Duration {
        self.delivered_at.elapsed() + self.extra_idle
    }
}

#[derive(Debug, Default)]
struct StreamState {
    next_seq: u64,
    streams: HashMap<String, Vec<(u64, StreamEntry)>>,
    cursor: usize,
    pending: HashMap<String, PendingRecord>,
    acked: Vec<String>,
    fail_reads: usize,
    fail_appends: usize,
}

impl StreamState {
    fn append(&mut self, stream: &str, fields: HashMap<String, String>) -> String {
        self.next_seq += 1;
        let seq = self.next_seq;
        let id = format!("{seq}-0");
        self.streams
            .entry(stream.to_string())
            .or_default()
            .push((seq, StreamEntry { id: id.clone(), fields }));
        id
    }

    fn lookup(&self, stream: &str, id: &str) -> Option<StreamEntry> {
        self.streams
            .get(stream)?
            .iter()
            .find(|(_, e)| e.id == id)
            .map(|(_, e)| e.clone())
    }
}

#[derive(Clone)]
pub struct MemoryStream {
    config: StreamConfig,
    state: Arc<Mutex<StreamState>>,
}

impl MemoryStream {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(StreamState::default())),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// A group member reading under `name`
    pub fn consumer(&self, name: &str) -> MemoryConsumer {
        MemoryConsumer {
            name: name.to_string(),
            stream: self.clone(),
        }
    }

    /// Append an arbitrary field map, bypassing the message codec
    pub fn append_raw(&self, fields: &[(&str, &str)]) -> String {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.lock().unwrap().append(&self.config.stream, fields)
    }

    /// Make the next `times` reads fail with a queue error
    pub fn fail_next_reads(&self, times: usize) {
        self.state.lock().unwrap().fail_reads = times;
    }

    /// Make the next `times` appends (enqueue, requeue, dead-letter) fail
    pub fn fail_next_appends(&self, times: usize) {
        self.state.lock().unwrap().fail_appends = times;
    }

    pub fn entries(&self) -> Vec<StreamEntry> {
        self.stream_entries(&self.config.stream)
    }

    pub fn dlq_entries(&self) -> Vec<StreamEntry> {
        self.stream_entries(&self.config.dlq_stream)
    }

    /// Every message appended to the main stream, decoded
    pub fn published(&self) -> Vec<TaskMessage> {
        self.entries()
            .iter()
            .filter_map(|e| TaskMessage::from_fields(&e.id, &e.fields).ok())
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<(&String, &PendingRecord)> = state.pending.iter().collect();
        records.sort_by_key(|(_, r)| r.seq);
        records.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.state.lock().unwrap().pending.contains_key(id)
    }

    pub fn acked_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    /// Pretend every pending entry has been idle for an extra `by`
    pub fn age_pending(&self, by: Duration) {
        for record in self.state.lock().unwrap().pending.values_mut() {
            record.extra_idle += by;
        }
    }

    fn stream_entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .map(|entries| entries.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }

    fn append(&self, stream: &str, fields: Vec<(String, String)>) -> RelayResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_appends > 0 {
            state.fail_appends -= 1;
            return Err(RelayError::message_queue("injected append failure"));
        }
        Ok(state.append(stream, fields.into_iter().collect()))
    }

    fn ack(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if state.pending.remove(id).is_some() {
            state.acked.push(id.to_string());
        }
    }
}

#[async_trait]
impl Producer for MemoryStream {
    async fn enqueue(&self, message: &TaskMessage) -> RelayResult<String> {
        self.append(&self.config.stream, message.to_fields(message.attempt))
    }
}

pub struct MemoryConsumer {
    name: String,
    stream: MemoryStream,
}

impl MemoryConsumer {
    fn deliver_batch(&self) -> RelayResult<Vec<StreamEntry>> {
        let mut state = self.stream.state.lock().unwrap();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(RelayError::message_queue("injected read failure"));
        }

        let available: Vec<(u64, StreamEntry)> = state
            .streams
            .get(&self.stream.config.stream)
            .map(|entries| {
                entries
                    .iter()
                    .skip(state.cursor)
                    .take(self.stream.config.batch_size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        state.cursor += available.len();
        let now = Instant::now();
        for (seq, entry) in &available {
            state.pending.insert(
                entry.id.clone(),
                PendingRecord {
                    seq: *seq,
                    consumer: self.name.clone(),
                    delivered_at: now,
                    extra_idle: Duration::ZERO,
                    times_delivered: 1,
                },
            );
        }
        Ok(available.into_iter().map(|(_, e)| e).collect())
    }
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn read(&self) -> RelayResult<Vec<TaskMessage>> {
        let entries = self.deliver_batch()?;
        if entries.is_empty() {
            tokio::time::sleep(self.stream.config.block()).await;
            return Ok(Vec::new());
        }

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match TaskMessage::from_fields(&entry.id, &entry.fields) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(message_id = %entry.id, error = %e, "dropping malformed entry");
                    self.stream.ack(&entry.id);
                }
            }
        }
        Ok(messages)
    }

    async fn ack_entry(&self, entry_id: &str) -> RelayResult<()> {
        self.stream.ack(entry_id);
        Ok(())
    }

    async fn requeue_with_attempt(
        &self,
        message: &TaskMessage,
        attempt: u32,
        reason: &str,
    ) -> RelayResult<()> {
        let attempt = if attempt == 0 { message.attempt.max(1) } else { attempt };

        let mut fields = message.to_fields(attempt);
        if !reason.is_empty() {
            fields.push((FIELD_LAST_ERROR.to_string(), reason.to_string()));
        }
        let delay = self.stream.config.requeue_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        // the original stays pending until its replacement exists
        self.stream.append(&self.stream.config.stream, fields)?;
        self.stream.ack(&message.id);
        Ok(())
    }

    async fn send_dlq(&self, message: &TaskMessage, reason: &str) -> RelayResult<()> {
        let mut fields = message.to_fields(message.attempt);
        fields.push((FIELD_ERROR.to_string(), reason.to_string()));
        self.stream.append(&self.stream.config.dlq_stream, fields)?;
        self.stream.ack(&message.id);
        Ok(())
    }
}

#[async_trait]
impl PendingClaimer for MemoryConsumer {
    async fn list_stale(&self, min_idle: Duration, count: usize) -> RelayResult<Vec<PendingEntry>> {
        let state = self.stream.state.lock().unwrap();
        let mut stale: Vec<(u64, PendingEntry)> = state
            .pending
            .iter()
            .filter(|(_, r)| r.idle() >= min_idle)
            .map(|(id, r)| {
                (
                    r.seq,
                    PendingEntry {
                        id: id.clone(),
                        consumer: r.consumer.clone(),
                        idle: r.idle(),
                        times_delivered: r.times_delivered,
                    },
                )
            })
            .collect();
        stale.sort_by_key(|(seq, _)| *seq);
        Ok(stale.into_iter().take(count).map(|(_, e)| e).collect())
    }

    async fn claim(
        &self,
        entry: &PendingEntry,
        min_idle: Duration,
    ) -> RelayResult<Option<StreamEntry>> {
        let mut state = self.stream.state.lock().unwrap();
        let Some(record) = state.pending.get_mut(&entry.id) else {
            return Ok(None);
        };
        if record.idle() < min_idle {
            return Ok(None);
        }
        record.consumer = self.name.clone();
        record.delivered_at = Instant::now();
        record.extra_idle = Duration::ZERO;
        record.times_delivered += 1;
        Ok(state.lookup(&self.stream.config.stream, &entry.id))
    }

    async fn ack_claimed(&self, entry_id: &str) -> RelayResult<()> {
        self.stream.ack(entry_id);
        Ok(())
    }
}
