pub mod appcast;
pub mod fetcher;

pub use appcast::{parse_appcast, ReleaseCandidate};
pub use fetcher::{FeedError, FeedFetcher, HttpFeedFetcher, FEED_TIMEOUT};
