//! Signal collection pipeline
//!
//! Two collectors (news headlines, social posts) produce normalized
//! [`Signal`](crate::types::Signal) records; the classifier assigns each a
//! credibility tier from the known-sources registry.

pub mod classifier;
pub mod news;
pub mod social;

pub use classifier::{SourceMeta, SourceRegistry};
pub use news::{load_feeds, FeedSpec, NewsCollector};
pub use social::SocialCollector;
