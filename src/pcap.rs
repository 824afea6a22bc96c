//! Rolling memory-bounded packet-capture buffer with trigger-on-event
//! capture and pcap-file emission (C7).
//!
//! The binary layout written by [`PcapBuffer::write_file`] is the classic
//! libpcap global header + per-packet header format (magic `0xa1b2c3d4`,
//! version 2.4), hand-written the way the teacher hand-writes its own
//! small binary/telnet wire formats in `medea-coturn-telnet-client`
//! rather than pulling in a dedicated pcap-writing crate.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use derive_more::Display;

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;

/// One captured frame retained in the rolling buffer.
#[derive(Clone, Debug)]
pub struct PcapSlot {
    pub ts: Duration,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PcapState {
    Disabled,
    Enabled,
    Triggered,
    PostTriggerCollecting,
}

#[derive(Clone, Copy, Debug)]
pub struct PcapConfig {
    pub max_memory_bytes: u64,
    pub duration: Duration,
    pub pre_trigger: Duration,
    pub post_trigger: Duration,
    pub datalink_type: u32,
    pub snaplen: u32,
}

impl Default for PcapConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 16 * 1024 * 1024,
            duration: Duration::from_secs(10),
            pre_trigger: Duration::from_secs(3),
            post_trigger: Duration::from_secs(2),
            datalink_type: 1, // LINKTYPE_ETHERNET
            snaplen: 65535,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PcapStats {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub dropped_packets: u64,
    pub current_memory: u64,
}

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum PcapError {
    #[display(fmt = "pcap capture is disabled")]
    Disabled,
    #[display(fmt = "no trigger is pending")]
    NoTriggerPending,
    #[display(fmt = "post-trigger window has not elapsed yet")]
    PostTriggerIncomplete,
    #[display(fmt = "failed to write pcap file: {}", _0)]
    Write(String),
}

struct Inner {
    state: PcapState,
    config: PcapConfig,
    slots: VecDeque<PcapSlot>,
    stats: PcapStats,
    trigger_at: Option<Duration>,
}

/// Mutex-guarded rolling capture buffer; insertion never blocks capture.
pub struct PcapBuffer {
    inner: Mutex<Inner>,
    output_dir: PathBuf,
    file_suffix: AtomicU64,
}

impl PcapBuffer {
    #[must_use]
    pub fn new(output_dir: PathBuf, config: PcapConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: PcapState::Disabled,
                config,
                slots: VecDeque::new(),
                stats: PcapStats::default(),
                trigger_at: None,
            }),
            output_dir,
            file_suffix: AtomicU64::new(0),
        }
    }

    pub fn enable(&self) {
        let mut inner = self.inner.lock().expect("pcap buffer poisoned");
        inner.state = PcapState::Enabled;
    }

    pub fn disable(&self) {
        let mut inner = self.inner.lock().expect("pcap buffer poisoned");
        inner.state = PcapState::Disabled;
        inner.slots.clear();
        inner.stats.current_memory = 0;
    }

    pub fn set_config(&self, config: PcapConfig) {
        let mut inner = self.inner.lock().expect("pcap buffer poisoned");
        inner.config = config;
    }

    #[must_use]
    pub fn config(&self) -> PcapConfig {
        self.inner.lock().expect("pcap buffer poisoned").config
    }

    #[must_use]
    pub fn stats(&self) -> PcapStats {
        self.inner.lock().expect("pcap buffer poisoned").stats
    }

    #[must_use]
    pub fn state(&self) -> PcapState {
        self.inner.lock().expect("pcap buffer poisoned").state
    }

    /// Inserts one captured frame at timestamp `now`, evicting from the
    /// front under memory or duration pressure. Never blocks or errors;
    /// a disabled buffer silently ignores the insert.
    pub fn insert(&self, now: Duration, data: Vec<u8>) {
        let mut inner = self.inner.lock().expect("pcap buffer poisoned");
        if inner.state == PcapState::Disabled {
            return;
        }
        inner.stats.total_packets += 1;
        inner.stats.total_bytes += data.len() as u64;
        inner.stats.current_memory += data.len() as u64;
        inner.slots.push_back(PcapSlot { ts: now, data });

        let config = inner.config;
        while inner.stats.current_memory > config.max_memory_bytes
            || inner
                .slots
                .front()
                .map_or(false, |s| now.saturating_sub(s.ts) > config.duration)
        {
            if let Some(dropped) = inner.slots.pop_front() {
                inner.stats.current_memory -= dropped.data.len() as u64;
                inner.stats.dropped_packets += 1;
            } else {
                break;
            }
        }

    }

    /// Records a trigger at time `now`, transitioning to
    /// `PostTriggerCollecting`.
    ///
    /// # Errors
    ///
    /// Returns [`PcapError::Disabled`] if capture is not enabled.
    pub fn trigger(&self, now: Duration) -> Result<(), PcapError> {
        let mut inner = self.inner.lock().expect("pcap buffer poisoned");
        if inner.state == PcapState::Disabled {
            return Err(PcapError::Disabled);
        }
        inner.state = PcapState::PostTriggerCollecting;
        inner.trigger_at = Some(now);
        Ok(())
    }

    /// True once `now >= t0 + post_trigger_sec`.
    #[must_use]
    pub fn post_trigger_complete(&self, now: Duration) -> bool {
        let inner = self.inner.lock().expect("pcap buffer poisoned");
        match inner.trigger_at {
            Some(t0) => now >= t0 + inner.config.post_trigger,
            None => false,
        }
    }

    /// Emits a pcap file covering `[t0 - pre_trigger, t0 + post_trigger]`.
    ///
    /// # Errors
    ///
    /// Returns [`PcapError::NoTriggerPending`] if [`Self::trigger`] was
    /// never called, [`PcapError::PostTriggerIncomplete`] if called too
    /// early, or [`PcapError::Write`] on I/O failure (reported to the
    /// caller so it can surface `pcap_ready` with `file_size = 0`).
    pub fn write_file(&self, now: Duration) -> Result<(PathBuf, u64, u64, Duration), PcapError> {
        let (t0, config, matching): (Duration, PcapConfig, Vec<PcapSlot>) = {
            let inner = self.inner.lock().expect("pcap buffer poisoned");
            let t0 = inner.trigger_at.ok_or(PcapError::NoTriggerPending)?;
            if now < t0 + inner.config.post_trigger {
                return Err(PcapError::PostTriggerIncomplete);
            }
            let lo = t0.saturating_sub(inner.config.pre_trigger);
            let hi = t0 + inner.config.post_trigger;
            let matching: Vec<PcapSlot> = inner
                .slots
                .iter()
                .filter(|s| s.ts >= lo && s.ts <= hi)
                .cloned()
                .collect();
            (t0, inner.config, matching)
        };

        let suffix = self.file_suffix.fetch_add(1, Ordering::Relaxed);
        let filename = format!("capture-{}-{}.pcap", t0.as_nanos(), suffix);
        let filepath = self.output_dir.join(&filename);

        let mut buf = BytesMut::with_capacity(24 + matching.len() * 32);
        write_global_header(&mut buf, config.snaplen, config.datalink_type);
        let mut total_size = buf.len() as u64;
        for slot in &matching {
            total_size += write_packet(&mut buf, slot);
        }

        let write_result = File::create(&filepath).and_then(|mut f| f.write_all(&buf));
        let file_size = match write_result {
            Ok(()) => total_size,
            Err(e) => return Err(PcapError::Write(io_error_string(&e))),
        };

        {
            let mut inner = self.inner.lock().expect("pcap buffer poisoned");
            inner.state = PcapState::Enabled;
            inner.trigger_at = None;
        }

        Ok((filepath, file_size, matching.len() as u64, config.duration))
    }
}

fn io_error_string(e: &io::Error) -> String {
    e.to_string()
}

fn write_global_header(buf: &mut BytesMut, snaplen: u32, datalink_type: u32) {
    buf.put_u32_le(PCAP_MAGIC);
    buf.put_u16_le(PCAP_VERSION_MAJOR);
    buf.put_u16_le(PCAP_VERSION_MINOR);
    buf.put_i32_le(0); // thiszone
    buf.put_u32_le(0); // sigfigs
    buf.put_u32_le(snaplen);
    buf.put_u32_le(datalink_type);
}

fn write_packet(buf: &mut BytesMut, slot: &PcapSlot) -> u64 {
    let ts_sec = slot.ts.as_secs() as u32;
    let ts_usec = slot.ts.subsec_micros();
    let caplen = slot.data.len() as u32;
    buf.put_u32_le(ts_sec);
    buf.put_u32_le(ts_usec);
    buf.put_u32_le(caplen);
    buf.put_u32_le(caplen);
    buf.put_slice(&slot.data);
    16 + u64::from(caplen)
}

/// Returns the process's current monotonic-ish wall-clock offset, used by
/// callers driving [`PcapBuffer::insert`]/[`PcapBuffer::trigger`] with a
/// shared duration basis.
#[must_use]
pub fn wall_now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}
