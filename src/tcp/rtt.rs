//! Round-trip estimation and the per-connection retransmission timer.
//!
//! The estimator is the shift-based form of Jacobson's algorithm:
//!
//! ```text
//! delta  = |rtt - srtt|
//! rttvar = rttvar - (rttvar >> BETA) + (delta >> BETA)
//! srtt   = srtt   - (srtt   >> ALPHA) + (rtt   >> ALPHA)
//! rto    = srtt + max(G, K * rttvar)
//! ```
//!
//! Only one sample is in flight at a time, identified by the sequence number
//! whose acknowledgment completes it. Retransmitting cancels the sample
//! (Karn's algorithm).

use crate::config::TcpConfig;
use crate::tcp::wrap32::Wrap32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RttSample {
    ack_at: Wrap32, // Acknowledging this (or beyond) completes the sample
    sent_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttEstimator {
    srtt: u64,
    rttvar: u64,
    rto: u64,
    sample: Option<RttSample>,
    last_armed: u64,
}

impl RttEstimator {
    pub fn new(initial_rto: u64) -> Self {
        RttEstimator {
            srtt: 0,
            rttvar: 0,
            rto: initial_rto,
            sample: None,
            last_armed: 0,
        }
    }

    pub fn srtt(&self) -> u64 {
        self.srtt
    }

    pub fn rttvar(&self) -> u64 {
        self.rttvar
    }

    pub fn rto(&self) -> u64 {
        self.rto
    }

    /// First measurement, taken over the SYN / SYN+ACK exchange.
    pub fn seed(&mut self, rtt: u64, config: &TcpConfig) {
        self.srtt = rtt;
        self.rttvar = rtt / 2;
        self.rto = self.compute_rto(config);
    }

    /// Fold an accepted sample into the smoothed estimate.
    pub fn update(&mut self, rtt: u64, config: &TcpConfig) {
        let delta = rtt.abs_diff(self.srtt);

        self.rttvar = self.rttvar - (self.rttvar >> config.rtt_beta) + (delta >> config.rtt_beta);
        self.srtt = self.srtt - (self.srtt >> config.rtt_alpha) + (rtt >> config.rtt_alpha);
        self.rto = self.compute_rto(config);
    }

    fn compute_rto(&self, config: &TcpConfig) -> u64 {
        self.srtt + config.rtt_floor_ms.max(config.rtt_k * self.rttvar)
    }

    /// Start timing the segment ending at `ack_at`, unless a sample is already
    /// in flight or the last one started less than the sampling interval ago.
    pub fn arm(&mut self, ack_at: Wrap32, now: u64, config: &TcpConfig) {
        if self.sample.is_some() {
            return;
        }
        if self.last_armed != 0 && now.saturating_sub(self.last_armed) < config.rtt_sample_interval_ms {
            return;
        }

        self.sample = Some(RttSample { ack_at, sent_at: now });
        self.last_armed = now.max(1);
    }

    /// Drop the in-flight sample; its segment is about to be retransmitted.
    pub fn cancel(&mut self) {
        self.sample = None;
    }

    /// Called for every acknowledgment that advances the send window.
    /// Returns the measured round trip when it completes the in-flight sample.
    pub fn on_ack(&mut self, ack: Wrap32, now: u64, config: &TcpConfig) -> Option<u64> {
        let sample = self.sample?;
        if ack.before(sample.ack_at) {
            return None;
        }

        self.sample = None;
        let rtt = now.saturating_sub(sample.sent_at);
        self.update(rtt, config);
        Some(rtt)
    }
}

/// Outcome of checking the retransmission timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCheck {
    /// Still within the current timeout.
    Pending,
    /// The backed-off RTO elapsed; something should be resent.
    Expired,
    /// No progress for longer than the connection budget; give up.
    Exhausted,
}

/// Exponential-backoff timer shared by data, SYN and FIN retransmission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RexmitTimer {
    last_sent: u64,
    progress_since: u64,
    retries: u32,
}

impl RexmitTimer {
    pub fn new(now: u64) -> Self {
        RexmitTimer {
            last_sent: now,
            progress_since: now,
            retries: 0,
        }
    }

    /// Fresh transmission or forward progress: reset backoff and the connection budget.
    pub fn restart(&mut self, now: u64) {
        *self = RexmitTimer::new(now);
    }

    /// A retransmission went out: double the next timeout.
    pub fn backoff(&mut self, now: u64) {
        self.last_sent = now;
        self.retries += 1;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Timeout currently in force: `base << retries`, capped per segment.
    pub fn timeout(&self, base: u64, config: &TcpConfig) -> u64 {
        let factor = 1u64.checked_shl(self.retries).unwrap_or(u64::MAX);
        base.saturating_mul(factor).min(config.max_segment_delay_ms)
    }

    pub fn check(&self, now: u64, base: u64, config: &TcpConfig) -> TimerCheck {
        if now.saturating_sub(self.progress_since) > config.max_connection_delay_ms {
            return TimerCheck::Exhausted;
        }

        if now > self.last_sent + self.timeout(base, config) {
            TimerCheck::Expired
        } else {
            TimerCheck::Pending
        }
    }
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TcpConfig {
        TcpConfig::default()
    }

    #[test]
    fn test_seed_from_handshake() {
        let cfg = config();
        let mut est = RttEstimator::new(cfg.initial_rto_ms);
        est.seed(100, &cfg);

        assert_eq!(est.srtt(), 100);
        assert_eq!(est.rttvar(), 50);
        // 100 + max(200, 4 * 50)
        assert_eq!(est.rto(), 300);
    }

    #[test]
    fn test_update_smoothing() {
        let cfg = config();
        let mut est = RttEstimator::new(cfg.initial_rto_ms);
        est.seed(80, &cfg);
        est.update(160, &cfg);

        // rttvar = 40 - 10 + (80 >> 2) = 50
        assert_eq!(est.rttvar(), 50);
        // srtt = 80 - 10 + (160 >> 3) = 90
        assert_eq!(est.srtt(), 90);
        assert_eq!(est.rto(), 90 + 200);
    }

    #[test]
    fn test_rto_floor() {
        let cfg = config();
        let mut est = RttEstimator::new(cfg.initial_rto_ms);
        est.seed(0, &cfg);
        assert_eq!(est.rto(), cfg.rtt_floor_ms);
    }

    #[test]
    fn test_sample_completes_on_covering_ack() {
        let cfg = config();
        let mut est = RttEstimator::new(cfg.initial_rto_ms);
        est.seed(100, &cfg);

        est.arm(Wrap32::new(5000), 1000, &cfg);
        assert!(est.sample.is_some());

        // Partial ack leaves the sample in flight
        assert_eq!(est.on_ack(Wrap32::new(4000), 1050, &cfg), None);
        assert!(est.sample.is_some());

        assert_eq!(est.on_ack(Wrap32::new(5000), 1100, &cfg), Some(100));
        assert!(est.sample.is_none());
    }

    #[test]
    fn test_only_one_sample_in_flight() {
        let cfg = config();
        let mut est = RttEstimator::new(cfg.initial_rto_ms);
        est.arm(Wrap32::new(100), 10, &cfg);
        est.arm(Wrap32::new(200), 20, &cfg);

        // The second arm was ignored: acking 100 at t=60 measures 50 ms from t=10
        assert_eq!(est.on_ack(Wrap32::new(100), 60, &cfg), Some(50));
    }

    #[test]
    fn test_sampling_interval() {
        let cfg = config();
        let mut est = RttEstimator::new(cfg.initial_rto_ms);
        est.arm(Wrap32::new(100), 1000, &cfg);
        est.on_ack(Wrap32::new(100), 1010, &cfg);

        est.arm(Wrap32::new(200), 1020, &cfg);
        assert!(est.sample.is_none());

        est.arm(Wrap32::new(300), 1000 + cfg.rtt_sample_interval_ms, &cfg);
        assert!(est.sample.is_some());
    }

    #[test]
    fn test_cancel_discards_sample() {
        let cfg = config();
        let mut est = RttEstimator::new(cfg.initial_rto_ms);
        est.seed(100, &cfg);
        est.arm(Wrap32::new(5000), 1000, &cfg);
        est.cancel();

        assert_eq!(est.on_ack(Wrap32::new(5000), 9000, &cfg), None);
        assert_eq!(est.srtt(), 100);
    }

    #[test]
    fn test_timer_backoff_is_capped() {
        let cfg = config();
        let mut timer = RexmitTimer::new(0);
        assert_eq!(timer.timeout(1000, &cfg), 1000);

        timer.backoff(0);
        assert_eq!(timer.timeout(1000, &cfg), 2000);
        timer.backoff(0);
        assert_eq!(timer.timeout(1000, &cfg), 4000);

        for _ in 0..70 {
            timer.backoff(0);
        }
        assert_eq!(timer.timeout(1000, &cfg), cfg.max_segment_delay_ms);
    }

    #[test]
    fn test_timer_check() {
        let cfg = config();
        let mut timer = RexmitTimer::new(1000);

        assert_eq!(timer.check(1300, 300, &cfg), TimerCheck::Pending);
        assert_eq!(timer.check(1301, 300, &cfg), TimerCheck::Expired);

        timer.backoff(1301);
        assert_eq!(timer.check(1901, 300, &cfg), TimerCheck::Pending);
        assert_eq!(timer.check(1902, 300, &cfg), TimerCheck::Expired);

        let budget_end = 1000 + cfg.max_connection_delay_ms;
        assert_eq!(timer.check(budget_end + 1, 300, &cfg), TimerCheck::Exhausted);

        timer.restart(budget_end);
        assert_eq!(timer.retries(), 0);
        assert_eq!(timer.check(budget_end + 1, 300, &cfg), TimerCheck::Pending);
    }
}
