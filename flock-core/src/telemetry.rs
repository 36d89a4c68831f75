//! Metric names emitted by the engine
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the binary installs a recorder.

use metrics::{describe_counter, describe_histogram, Unit};

pub const USERS_CREATED: &str = "flock.users.created";
pub const POSTS_PUBLISHED: &str = "flock.posts.published";
pub const FANOUT_DELIVERIES: &str = "flock.fanout.deliveries";
pub const FANOUT_PARTIAL: &str = "flock.fanout.partial";
pub const TIMELINE_READS: &str = "flock.timeline.reads";
pub const TIMELINE_TIMEOUTS: &str = "flock.timeline.timeouts";
pub const TIMELINE_ASSEMBLY_MS: &str = "flock.timeline.assembly_ms";

/// Register descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(USERS_CREATED, "Accounts registered");
    describe_counter!(POSTS_PUBLISHED, "Posts created and written to the author timeline");
    describe_counter!(FANOUT_DELIVERIES, "Follower timelines a post was pushed to");
    describe_counter!(FANOUT_PARTIAL, "Publishes whose follower fan-out stopped early");
    describe_counter!(TIMELINE_READS, "Timeline pages assembled");
    describe_counter!(TIMELINE_TIMEOUTS, "Timeline pages cut short by the fetch deadline");
    describe_histogram!(
        TIMELINE_ASSEMBLY_MS,
        Unit::Milliseconds,
        "Wall time to assemble one timeline page"
    );
}
