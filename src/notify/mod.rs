/*!
 * Notifications
 * Permission events, the bus that fans them out, and user-facing toasts
 */

mod batch;
mod bus;
mod events;
mod preferences;
mod toast;

pub use batch::{coalesce, BatchKey};
pub use bus::{
    BusStats, DebouncedEmit, EmitOutcome, Handler, ListenerPriority, NotificationBus, SubscribeOptions,
    Subscription,
};
pub use events::{BatchSummary, EventPayload, EventType, LogLevel, PermissionEvent};
pub use preferences::{FilterReason, NotificationPreferences};
pub use toast::{Toast, ToastKind};
