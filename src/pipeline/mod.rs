//! Capture side of a feed: frame cache, rate governor and the capture loop

pub mod cache;
pub mod capture_loop;
pub mod feed;
pub mod governor;

pub use cache::FrameCache;
pub use capture_loop::CaptureLoop;
pub use feed::{ClientGuard, Feed, FeedState};
pub use governor::{Pace, RateGovernor};
