use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Apothek";

/// At most one outbound "typing start" per this window.
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(2);

/// Automatic "typing stop" after this much local input inactivity.
pub const TYPING_STOP_AFTER: Duration = Duration::from_secs(2);

/// Remote typing indicator lifetime without a fresh "start".
pub const TYPING_INDICATOR_TTL: Duration = Duration::from_secs(3);

/// Messages fetched per backward-pagination page.
pub const MESSAGE_PAGE_SIZE: u32 = 50;

/// First reconnect delay after the signaling channel drops.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the exponential reconnect backoff.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Capacity of the signaling command/notification channels.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 256;
