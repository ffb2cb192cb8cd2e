//! Best-effort pattern detection
//!
//! Both detectors are cheap enough to run inline on the processor's task:
//! a transition-count Markov model over per-document action sequences, and
//! hour-of-day histograms compared against the global action distribution.
//! Detections are advisory: they feed the published snapshot and metrics,
//! never the privatization path.

use std::collections::HashMap;

use serde::Serialize;

use sift_core::{Event, ACTION_CODE_LIMIT};

/// Minimum observations before a transition can be reported
const MIN_TRANSITION_COUNT: u32 = 8;

/// Transition probability threshold
const MIN_CONFIDENCE: f64 = 0.8;

/// Halve all transition counts after this many observed events (sliding
/// window by exponential decay)
const DECAY_EVERY: u64 = 4096;

/// Minimum events in an hour bucket before it can be reported
const MIN_HOUR_SUPPORT: u64 = 32;

/// L1 distance between an hour's action distribution and the global one
/// above which the hour is reported
const DIVERGENCE_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencePattern {
    pub from: u16,
    pub to: u16,
    pub count: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalPattern {
    pub hour: u8,
    pub divergence: f64,
    pub support: u64,
}

/// Immutable snapshot published via arc-swap after each flush.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternSnapshot {
    pub sequences: Vec<SequencePattern>,
    pub temporal: Vec<TemporalPattern>,
    /// Bumped on every publish so readers can detect staleness
    pub generation: u64,
}

/// Markov-style transition model over action codes, chained per document
/// so unrelated documents do not manufacture transitions.
#[derive(Debug, Default)]
pub struct SequenceDetector {
    last_action: HashMap<u64, u16>,
    transitions: HashMap<(u16, u16), u32>,
    observed: u64,
}

impl SequenceDetector {
    pub fn observe(&mut self, event: &Event) {
        if let Some(prev) = self.last_action.insert(event.document_id, event.action) {
            *self.transitions.entry((prev, event.action)).or_insert(0) += 1;
        }
        self.observed += 1;
        if self.observed % DECAY_EVERY == 0 {
            self.decay();
        }
    }

    /// Halve counts and drop the ones that reach zero; old behavior fades
    /// instead of dominating forever.
    fn decay(&mut self) {
        self.transitions.retain(|_, count| {
            *count /= 2;
            *count > 0
        });
        // Bound the per-document chain table as well
        if self.last_action.len() > 65_536 {
            self.last_action.clear();
        }
    }

    /// Transitions that pass both the support and confidence gates.
    pub fn scan(&self) -> Vec<SequencePattern> {
        let mut from_totals: HashMap<u16, u32> = HashMap::new();
        for (&(from, _), &count) in &self.transitions {
            *from_totals.entry(from).or_insert(0) += count;
        }

        let mut patterns: Vec<SequencePattern> = self
            .transitions
            .iter()
            .filter_map(|(&(from, to), &count)| {
                let total = *from_totals.get(&from)?;
                let confidence = count as f64 / total as f64;
                (count >= MIN_TRANSITION_COUNT && confidence > MIN_CONFIDENCE).then_some(
                    SequencePattern {
                        from,
                        to,
                        count,
                        confidence,
                    },
                )
            })
            .collect();
        patterns.sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));
        patterns
    }
}

/// Hour-of-day histograms per action code.
#[derive(Debug)]
pub struct TemporalDetector {
    hour_actions: Vec<[u64; ACTION_CODE_LIMIT as usize]>,
    global_actions: [u64; ACTION_CODE_LIMIT as usize],
}

impl Default for TemporalDetector {
    fn default() -> Self {
        Self {
            hour_actions: vec![[0; ACTION_CODE_LIMIT as usize]; 24],
            global_actions: [0; ACTION_CODE_LIMIT as usize],
        }
    }
}

impl TemporalDetector {
    pub fn observe(&mut self, event: &Event) {
        let hour = (event.timestamp / 3600 % 24) as usize;
        self.hour_actions[hour][event.action as usize] += 1;
        self.global_actions[event.action as usize] += 1;
    }

    /// Hours whose action mix diverges materially from the overall mix.
    pub fn scan(&self) -> Vec<TemporalPattern> {
        let global_total: u64 = self.global_actions.iter().sum();
        if global_total == 0 {
            return Vec::new();
        }

        (0..24)
            .filter_map(|hour| {
                let bucket = &self.hour_actions[hour];
                let support: u64 = bucket.iter().sum();
                if support < MIN_HOUR_SUPPORT {
                    return None;
                }
                let divergence: f64 = bucket
                    .iter()
                    .zip(&self.global_actions)
                    .map(|(&h, &g)| {
                        (h as f64 / support as f64 - g as f64 / global_total as f64).abs()
                    })
                    .sum();
                (divergence > DIVERGENCE_THRESHOLD).then_some(TemporalPattern {
                    hour: hour as u8,
                    divergence,
                    support,
                })
            })
            .collect()
    }
}
