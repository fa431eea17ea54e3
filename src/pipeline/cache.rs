//! Single-slot frame cache, latest wins

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;

use crate::capture::Frame;

/// Holds the most recently published frame of one feed.
///
/// One writer (the capture loop), any number of readers. Publishing is a
/// pointer swap; readers never wait on the writer and get either the old
/// or the new frame, never a mix. Replaced frames are freed when the last
/// reader drops its `Arc`.
#[derive(Default)]
pub struct FrameCache {
    slot: ArcSwapOption<Frame>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        self.slot.store(Some(Arc::new(frame)));
    }

    /// Latest frame, or `None` until the first publish.
    pub fn read(&self) -> Option<Arc<Frame>> {
        self.slot.load_full()
    }

    pub fn last_published_at(&self) -> Option<Instant> {
        self.slot.load().as_ref().map(|frame| frame.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame_of(fill: u8, len: usize) -> Frame {
        Frame::new(Bytes::from(vec![fill; len]))
    }

    #[test]
    fn test_empty_until_published() {
        let cache = FrameCache::new();
        assert!(cache.read().is_none());
        assert!(cache.last_published_at().is_none());
    }

    #[test]
    fn test_read_returns_latest() {
        let cache = FrameCache::new();
        for n in 1..=5u8 {
            cache.publish(frame_of(n, 64));
        }
        let frame = cache.read().unwrap();
        assert_eq!(&frame.data[..], &[5u8; 64][..]);
        assert_eq!(cache.last_published_at(), Some(frame.timestamp));
    }

    #[test]
    fn test_reader_keeps_replaced_frame() {
        let cache = FrameCache::new();
        cache.publish(frame_of(1, 8));
        let held = cache.read().unwrap();
        cache.publish(frame_of(2, 8));

        assert_eq!(held.data[0], 1);
        assert_eq!(cache.read().unwrap().data[0], 2);
    }

    #[test]
    fn test_no_torn_reads_under_contention() {
        const READERS: usize = 8;
        const PUBLISHES: u32 = 2_000;

        let cache = Arc::new(FrameCache::new());
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for n in 0..PUBLISHES {
                    // Every byte of frame n is (n % 251), length varies too
                    let fill = (n % 251) as u8;
                    cache.publish(frame_of(fill, 256 + (n as usize % 64)));
                }
            })
        };

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let mut last_seen = None;
                    for _ in 0..PUBLISHES {
                        if let Some(frame) = cache.read() {
                            let first = frame.data[0];
                            assert!(frame.data.iter().all(|&b| b == first), "torn frame");
                            assert!(Some(frame.timestamp) >= last_seen, "cache went backwards");
                            last_seen = Some(frame.timestamp);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        let last = cache.read().unwrap();
        assert_eq!(last.data[0], ((PUBLISHES - 1) % 251) as u8);
    }
}
