mod cache;
mod deferred;
mod emitter;
mod epoch;
mod error;
pub mod memory;
mod point;
pub mod protocol;
mod traits;

pub use cache::{CacheConfig, CacheStats, EpochCache, SharedEpochCache};
pub use deferred::{deferred, Resolver, Waiter};
pub use emitter::{Event, EventEmitter, Subscription};
pub use epoch::{Epoch, EpochToken};
pub use error::{invariant, GatewayError, GatewayResult, ThreadError, ThreadResult};
pub use memory::{MemoryGateway, Recording, Step};
pub use point::{next_point, point_precedes, previous_point, ExecutionPoint};
pub use traits::{Gateway, ListenerId, Notification, NotificationHandler, NotificationKind};
