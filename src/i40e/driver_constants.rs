use std::time::Duration;

pub const AQ_RING_SIZE: u16 = 32;

pub const AQ_BUFFER_SIZE: u16 = 4096;

// Firmware answers within this bound or not at all
pub const AQ_COMMAND_TIMEOUT: Duration = Duration::from_millis(250);

pub const AQ_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub const RX_CTL_RETRIES: usize = 5;

pub const RX_CTL_RETRY_DELAY: Duration = Duration::from_millis(1);

// Only the first 4 MB of BAR0 hold registers this driver touches
pub const BAR0_MAP_SIZE: usize = 4 * 1024 * 1024;
