//! Client-side read path for the mirror: layers an in-memory cache, persisted
//! storage with its own expiry, and the network behind one polling interface.

pub mod feed;
pub mod storage;

pub use feed::{FeedConfig, FeedState, HttpPostsApi, PostsApi, PostsFeed, PostsPayload};
pub use storage::FeedStorage;
