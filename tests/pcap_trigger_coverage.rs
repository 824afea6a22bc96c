//! End-to-end trigger-coverage check (property 8): every packet whose
//! timestamp falls in `[t0 - pre_trigger, t0 + post_trigger]` ends up in the
//! emitted pcap file, and packets outside that window don't.

use std::time::Duration;

use jittertrap::pcap::{PcapBuffer, PcapConfig};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn emitted_file_covers_exactly_the_trigger_window() {
    let dir = tempfile::tempdir().unwrap();
    let config = PcapConfig {
        max_memory_bytes: 16 * 1024 * 1024,
        duration: secs(20),
        pre_trigger: secs(3),
        post_trigger: secs(2),
        datalink_type: 1,
        snaplen: 65535,
    };
    let buffer = PcapBuffer::new(dir.path().to_path_buf(), config);
    buffer.enable();

    // One packet per second from t=0 to t=9, trigger fires at t=7, so the
    // surviving window is [4, 9].
    for t in 0..=9u64 {
        buffer.insert(secs(t), vec![0xAB; 40]);
    }
    buffer.trigger(secs(7)).unwrap();

    // Packets inserted during the post-trigger collection window still
    // count, as long as their timestamp is still within [t0-pre, t0+post];
    // 8.5s qualifies, arriving after the trigger instant but before the
    // window's upper bound of 9s.
    buffer.insert(secs(8) + Duration::from_millis(500), vec![0xCD; 40]);

    let (path, file_size, packet_count, _duration) = buffer.write_file(secs(9)).unwrap();

    assert_eq!(packet_count, 7); // t=4..=9 inclusive (6 values) plus the 8.5s one
    assert!(file_size > 0);
    assert!(path.exists());

    let bytes = std::fs::read(&path).unwrap();
    // Global header (24 bytes) + one 16-byte record header per packet.
    assert_eq!(bytes.len() as u64, file_size);
    assert!(bytes.len() >= 24 + packet_count as usize * 16);
    assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0xa1b2_c3d4);
}

#[test]
fn packets_before_the_pre_trigger_window_are_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let config = PcapConfig {
        max_memory_bytes: 16 * 1024 * 1024,
        duration: secs(20),
        pre_trigger: secs(3),
        post_trigger: secs(2),
        datalink_type: 1,
        snaplen: 65535,
    };
    let buffer = PcapBuffer::new(dir.path().to_path_buf(), config);
    buffer.enable();

    buffer.insert(secs(0), vec![0x11; 40]); // well before [4,9]
    for t in 4..=9u64 {
        buffer.insert(secs(t), vec![0x22; 40]);
    }
    buffer.trigger(secs(7)).unwrap();

    let (_path, _file_size, packet_count, _duration) = buffer.write_file(secs(9)).unwrap();
    assert_eq!(packet_count, 6);
}
