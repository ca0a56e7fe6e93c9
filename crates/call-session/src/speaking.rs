//! Speaking activity detector.
//!
//! Turns periodic volume telemetry into a debounced "who is talking" set.
//! Every sample at or above the threshold (re)arms a per-participant decay
//! timer; a participant leaves the set when their timer fires without having
//! been re-armed. Samples below the threshold are ignored, so continuous speech
//! keeps a participant in the set and a pause of one decay period clears them.

use crate::transport::VolumeSample;
use common::types::ParticipantId;
use std::collections::{BTreeSet, HashMap};
use std::future::poll_fn;
use std::time::Duration;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::trace;

/// Debounced speaking set with one decay timer per participant.
#[derive(Debug)]
pub struct SpeakingDetector {
    threshold: u32,
    decay: Duration,
    /// Live timer key for every participant currently in the set.
    active: HashMap<ParticipantId, delay_queue::Key>,
    timers: DelayQueue<ParticipantId>,
}

impl SpeakingDetector {
    #[must_use]
    pub fn new(threshold: u32, decay: Duration) -> Self {
        Self {
            threshold,
            decay,
            active: HashMap::new(),
            timers: DelayQueue::new(),
        }
    }

    /// Process one telemetry batch. Returns the participants that started
    /// speaking with this batch.
    pub fn observe(&mut self, samples: &[VolumeSample]) -> Vec<ParticipantId> {
        let mut started = Vec::new();

        for sample in samples.iter().filter(|s| s.level >= self.threshold) {
            if let Some(key) = self.active.get(&sample.participant_id) {
                // Supersede the pending timer in place.
                self.timers.reset(key, self.decay);
            } else {
                let key = self.timers.insert(sample.participant_id.clone(), self.decay);
                self.active.insert(sample.participant_id.clone(), key);
                started.push(sample.participant_id.clone());
                trace!(
                    target: "call.speaking",
                    participant_id = %sample.participant_id,
                    level = sample.level,
                    "Participant started speaking"
                );
            }
        }

        started
    }

    /// Wait for the next decay timer to fire and return the participant it
    /// cleared. Returns `None` immediately when no timer is pending.
    pub async fn next_expired(&mut self) -> Option<ParticipantId> {
        let expired = poll_fn(|cx| self.timers.poll_expired(cx)).await?;
        let participant_id = expired.into_inner();
        self.active.remove(&participant_id);
        trace!(
            target: "call.speaking",
            participant_id = %participant_id,
            "Participant stopped speaking"
        );
        Some(participant_id)
    }

    /// Forget a participant (e.g. they left). Returns `true` if they were in
    /// the set.
    pub fn forget(&mut self, participant_id: &ParticipantId) -> bool {
        match self.active.remove(participant_id) {
            Some(key) => {
                self.timers.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Drop every participant and cancel all timers.
    pub fn clear(&mut self) {
        self.active.clear();
        self.timers.clear();
    }

    #[must_use]
    pub fn is_speaking(&self, participant_id: &ParticipantId) -> bool {
        self.active.contains_key(participant_id)
    }

    /// Whether no timer is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Current speaking set, ordered.
    #[must_use]
    pub fn speaking(&self) -> BTreeSet<ParticipantId> {
        self.active.keys().cloned().collect()
    }
}
