#![forbid(unsafe_code)]
//! Realtime room sync: one shared hub connection, per-room event fan-out and
//! cache reconciliation for message histories, follows and notifications.

pub mod api;
pub mod binding;
pub mod cache;
pub mod error;
pub mod keys;
pub mod manager;
pub mod mutations;
pub mod optimistic;
pub mod paging;
pub mod presence;
pub mod reconnect;
pub mod registry;
pub mod synchronizer;

pub use api::{ApiError, FollowApi, MessageApi, MessageSource, NotificationApi, StaticToken, TokenProvider};
pub use binding::ChatRoomBinding;
pub use cache::{FetchTicket, QueryCache};
pub use error::{ConnectionError, MutationError, RoomOperationError};
pub use keys::{FollowKey, MessagesKey, NotificationsKey};
pub use manager::{ConnectionEvent, ConnectionManager, ConnectionState, ManagerOptions};
pub use mutations::{Mutations, SyncCaches};
pub use optimistic::{ChannelNotifier, MutationFailure, MutationNotifier, OptimisticEngine, TracingNotifier};
pub use paging::{PageLoad, load_next_page, refresh_first_page};
pub use presence::PresenceBroadcaster;
pub use reconnect::ReconnectSchedule;
pub use registry::{MessageSubscription, RegistryConfig, RoomEventRegistry, RoomItem, RoomSubscription, TypingSubscription};
pub use synchronizer::{CacheSynchronizer, LiveOutcome, MessagePages};
