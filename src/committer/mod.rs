//! Ordered offset commits.
//!
//! Workers acknowledge batches in whatever order their writes finish. The
//! `OffsetCommitter` turns those acknowledgements back into broker commits in
//! the order batches were polled.

pub mod acknowledgements;
pub mod offset_committer;
pub mod state;

pub use acknowledgements::{Acknowledgements, Acknowledger, CommitterState};
pub use offset_committer::OffsetCommitter;
pub use state::OffsetState;
