//! Narrow trait boundary to the WebRTC/SRTP bridge that re-streams a
//! detected RTP video flow to a browser viewer.
//!
//! Per the cyclic-graph redesign note (`SPEC_FULL.md` §9): viewers
//! reference flows only by [`CanonicalFlowKey`], never by pointer, and
//! track handles are opaque ids returned by the bridge — this keeps flow
//! state and viewer state from needing to own each other.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::flow::key::CanonicalFlowKey;

/// An opaque handle to a bridged media track, meaningful only to the
/// [`ViewerBridge`] implementation that issued it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TrackHandle(pub u64);

/// Bridges a detected RTP flow to a WebRTC viewer session.
pub trait ViewerBridge: Send + Sync {
    /// Starts bridging `flow` to a new viewer, returning a handle to the
    /// resulting track.
    fn attach(&self, flow: CanonicalFlowKey) -> TrackHandle;

    /// Stops bridging the track identified by `handle`.
    fn detach(&self, handle: TrackHandle);
}

/// In-memory viewer registry; no real SRTP/ICE bridging, just the
/// bookkeeping the real bridge would also need. Mutex-protected per the
/// concurrency model's resource list.
#[derive(Default)]
pub struct NullViewerBridge {
    next_handle: Mutex<u64>,
    attached: Mutex<HashMap<TrackHandle, CanonicalFlowKey>>,
}

impl NullViewerBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewerBridge for NullViewerBridge {
    fn attach(&self, flow: CanonicalFlowKey) -> TrackHandle {
        let mut next = self.next_handle.lock().expect("viewer bridge poisoned");
        *next += 1;
        let handle = TrackHandle(*next);
        self.attached
            .lock()
            .expect("viewer bridge poisoned")
            .insert(handle, flow);
        handle
    }

    fn detach(&self, handle: TrackHandle) {
        self.attached.lock().expect("viewer bridge poisoned").remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::key::canonicalize;

    #[test]
    fn attach_then_detach_removes_registry_entry() {
        let bridge = NullViewerBridge::new();
        let (key, _) = canonicalize(
            0x0800,
            6,
            crate::flow::key::Endpoint {
                ip: "10.0.0.1".parse().unwrap(),
                port: 1,
            },
            crate::flow::key::Endpoint {
                ip: "10.0.0.2".parse().unwrap(),
                port: 2,
            },
        );
        let handle = bridge.attach(key);
        assert_eq!(bridge.attached.lock().unwrap().len(), 1);
        bridge.detach(handle);
        assert_eq!(bridge.attached.lock().unwrap().len(), 0);
    }

    #[test]
    fn handles_are_unique() {
        let bridge = NullViewerBridge::new();
        let key = canonicalize(
            0x0800,
            6,
            crate::flow::key::Endpoint {
                ip: "10.0.0.1".parse().unwrap(),
                port: 1,
            },
            crate::flow::key::Endpoint {
                ip: "10.0.0.2".parse().unwrap(),
                port: 2,
            },
        )
        .0;
        let a = bridge.attach(key);
        let b = bridge.attach(key);
        assert_ne!(a, b);
    }
}
