//! Per-client delivery of buffer sets.
//!
//! One pipeline per connection, fed by the shared tick broadcaster and gated
//! by the client's acknowledgements.
//!
//! # Architecture
//!
//! ```text
//!                       control channel (WebSocket)
//!   +------------+  vbo_update   +--------+  received_buffers  +-------------+
//!   |  Pipeline  | ------------> | Client | -----------------> | ReadyLatch  |
//!   | (per user) |               |        |                    +-------------+
//!   +------------+               +--------+                           |
//!     |      ^                       |                                | gates next
//!     | put  | barrier fires         | GET /buffer?id=..&buffer=..    | notification
//!     v      |                       v                                |
//!   +-------------+  record  +------------------+                     |
//!   | BufferCache | <------- |  Data endpoint   |                     |
//!   +-------------+          |  (HTTP, bulk)    |                     |
//!                            +------------------+                     |
//!   Pipeline <--------------------------------------------------------+
//! ```
//!
//! # Cycle
//!
//! 1. Fetch - compute and compress the set for the current tick
//! 2. Await ready - take the latch (only an acknowledgement gives it back)
//! 3. Notify - cache the set, arm the barrier, send metadata
//! 4. Await barrier - every active buffer pulled once
//! 5. Await next tick - the newest one, older ones are skipped

pub mod barrier;
pub mod cache;
pub mod channel;
pub mod fetch;
pub mod latch;
pub mod pipeline;
pub mod protocol;
pub mod session;

pub use barrier::{BarrierWait, CompletionBarrier, RecordOutcome};
pub use cache::{BufferCache, CacheMiss, CachedBuffer};
pub use channel::{
    control_channel, BufferMeta, BufferSet, ControlReceiver, ControlSender, EncodedBuffer,
    Encoding, BUFFER_CONTENT_TYPE, CONTROL_QUEUE_CAPACITY, DEFAULT_STALL_TIMEOUT_SECS,
    DEFAULT_TICK_INTERVAL_MS,
};
pub use fetch::Fetcher;
pub use latch::ReadyLatch;
pub use pipeline::{ClientPipeline, PipelineExit, Stage};
pub use protocol::{ClientMessage, MessageType, ServerMessage, MAX_INBOUND_FRAME};
pub use session::{ClientId, ClientSession, RenderProfile, SessionRegistry, SessionStats, StatsSnapshot};
