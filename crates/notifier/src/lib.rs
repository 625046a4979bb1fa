//! Queue-driven delivery: the request queue, the channel senders and the
//! batch worker that connects them to the fan-out processor.

pub mod channels;
pub mod janitor;
pub mod queue;
pub mod worker;
