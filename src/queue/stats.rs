use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

const DURATION_SAMPLES: usize = 100;

/// Running counters kept by the queue
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    pub enqueued: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub expired: u64,
    pub filtered: u64,
    durations: VecDeque<Duration>,
}

impl StatsRecorder {
    pub fn record_duration(&mut self, elapsed: Duration) {
        if self.durations.len() == DURATION_SAMPLES {
            self.durations.pop_front();
        }
        self.durations.push_back(elapsed);
    }

    pub fn snapshot(&self, total_queued: usize, oldest_message_age_ms: Option<i64>) -> QueueStats {
        let attempts = self.processed + self.failed;
        let error_rate = if attempts == 0 {
            0.0
        } else {
            self.failed as f64 / attempts as f64
        };

        let total: Duration = self.durations.iter().sum();
        let samples = self.durations.len();
        let average_processing_ms = if samples == 0 {
            0.0
        } else {
            total.as_secs_f64() * 1000.0 / samples as f64
        };
        let throughput = if total.is_zero() {
            0.0
        } else {
            samples as f64 / total.as_secs_f64()
        };

        QueueStats {
            total_queued,
            total_enqueued: self.enqueued,
            processed: self.processed,
            failed: self.failed,
            dropped: self.dropped,
            expired: self.expired,
            filtered: self.filtered,
            error_rate,
            throughput,
            average_processing_ms,
            oldest_message_age_ms,
        }
    }
}

/// Point in time view of queue health
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_queued: usize,
    pub total_enqueued: u64,
    pub processed: u64,
    /// Failed attempts, including ones that were retried
    pub failed: u64,
    /// Messages discarded after failing, or evicted on overflow
    pub dropped: u64,
    pub expired: u64,
    pub filtered: u64,
    pub error_rate: f64,
    /// Messages per second of processing time
    pub throughput: f64,
    pub average_processing_ms: f64,
    pub oldest_message_age_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats() {
        let stats = StatsRecorder::default().snapshot(0, None);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.throughput, 0.0);
    }

    #[test]
    fn rates_from_counters_and_durations() {
        let mut recorder = StatsRecorder::default();
        recorder.processed = 3;
        recorder.failed = 1;
        recorder.record_duration(Duration::from_millis(250));
        recorder.record_duration(Duration::from_millis(250));
        let stats = recorder.snapshot(2, Some(40));
        assert_eq!(stats.error_rate, 0.25);
        assert!((stats.throughput - 4.0).abs() < 1e-9);
        assert!((stats.average_processing_ms - 250.0).abs() < 1e-9);
        assert_eq!(stats.oldest_message_age_ms, Some(40));
    }

    #[test]
    fn keeps_bounded_samples() {
        let mut recorder = StatsRecorder::default();
        for _ in 0..(DURATION_SAMPLES + 10) {
            recorder.record_duration(Duration::from_millis(1));
        }
        assert_eq!(recorder.durations.len(), DURATION_SAMPLES);
    }
}
