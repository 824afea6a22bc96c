//! Per-SSRC RTP audio substate: the audio-shaped counterpart to
//! [`crate::flow::rtp::RtpSubstate`] — codec/rate metadata and an RFC 3550
//! §6.4.1 jitter estimate, but no frame dimensions or keyframe accounting.

#[derive(Clone, Debug, Default)]
pub struct AudioSubstate {
    pub ssrc: u32,
    pub codec: Option<String>,
    pub sample_rate: u32,
    pub bitrate_kbps: u32,
    pub seq_loss: u32,
    pub jitter_us: u32,
    last_seq: Option<u16>,
    last_arrival_us: Option<i64>,
    last_rtp_ts: Option<u32>,
    first_seen_us: Option<i64>,
    bytes_since_first: u64,
}

impl AudioSubstate {
    #[must_use]
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            sample_rate: 8000, // most static-PT audio codecs run at 8 kHz
            ..Self::default()
        }
    }

    /// Folds in one received packet; `payload_len` feeds the running
    /// bitrate estimate.
    pub fn observe(&mut self, seq: u16, rtp_ts: u32, arrival_us: i64, payload_len: u32) {
        if let Some(prev) = self.last_seq {
            let expected = prev.wrapping_add(1);
            if seq != expected {
                self.seq_loss += seq.wrapping_sub(expected) as u32;
            }
        }
        self.last_seq = Some(seq);

        if let (Some(prev_arrival), Some(prev_ts)) = (self.last_arrival_us, self.last_rtp_ts) {
            let arrival_delta_units =
                (arrival_us - prev_arrival) * i64::from(self.sample_rate) / 1_000_000;
            let ts_delta = i64::from(rtp_ts.wrapping_sub(prev_ts));
            let d = (arrival_delta_units - ts_delta).unsigned_abs() as u32;
            self.jitter_us = self.jitter_us + (d.saturating_sub(self.jitter_us)) / 16;
        }
        self.last_arrival_us = Some(arrival_us);
        self.last_rtp_ts = Some(rtp_ts);

        let first = *self.first_seen_us.get_or_insert(arrival_us);
        self.bytes_since_first += u64::from(payload_len);
        let elapsed_us = (arrival_us - first).max(1) as u64;
        // bytes*8 bits over elapsed_us microseconds, scaled to kbit/s.
        self.bitrate_kbps = ((self.bytes_since_first * 8 * 1_000_000) / (elapsed_us * 1000)) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_sequence_has_no_loss() {
        let mut s = AudioSubstate::new(42);
        s.observe(1, 0, 0, 160);
        s.observe(2, 160, 20_000, 160);
        s.observe(3, 320, 40_000, 160);
        assert_eq!(s.seq_loss, 0);
    }

    #[test]
    fn gap_in_sequence_counts_as_loss() {
        let mut s = AudioSubstate::new(42);
        s.observe(1, 0, 0, 160);
        s.observe(5, 640, 80_000, 160);
        assert_eq!(s.seq_loss, 3);
    }

    #[test]
    fn bitrate_estimate_is_nonzero_after_a_few_packets() {
        let mut s = AudioSubstate::new(42);
        for i in 0..10u16 {
            s.observe(i, u32::from(i) * 160, i64::from(i) * 20_000, 160);
        }
        assert!(s.bitrate_kbps > 0);
    }
}
