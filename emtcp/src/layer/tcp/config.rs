//! Tunables of the connection core.
use crate::time::Duration;
use crate::wire::tcp::HEADER_LEN;

pub use crate::wire::tcp::DEFAULT_MSS;

/// The number of option bytes that a segment built by us may carry.
pub const MAX_OPTIONS_LEN: usize = 8;

/// The capacity of the per-connection send buffer, in bytes.
pub const SEND_BUFFER_LEN: usize = 1280;

/// The maximum number of unacknowledged segments per connection.
pub const SENT_LIST_LEN: usize = 16;

/// The maximum segment lifetime assumed for the network.
pub const MAX_SEG_LIFETIME: Duration = Duration::from_secs(60);

/// Length of an IPv4 header without options.
const IPV4_HEADER_LEN: usize = 20;

/// The timing and sizing parameters of an endpoint.
///
/// All connections of an endpoint share one configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Time between receiving data and sending the delayed acknowledgment.
    pub ack_delay: Duration,

    /// The first retransmission timeout.
    pub initial_retry_timeout: Duration,

    /// The retransmission timeout never grows beyond this value.
    pub retry_timeout_ceiling: Duration,

    /// Retransmissions of a segment before the connection is given up.
    pub max_retries: u8,

    /// How long to wait in `FIN_WAIT_2` for the peer's FIN.
    pub fin_timeout: Duration,

    /// How long to linger in `TIME_WAIT`.
    pub time_wait_delay: Duration,

    /// The receive window that we advertise.
    pub recv_window: u16,

    /// The MTU of the interface, the receive MSS is derived from it.
    pub mtu: u16,
}

impl Config {
    /// Change the delayed acknowledgment timeout.
    pub fn with_ack_delay(self, ack_delay: Duration) -> Self {
        Config { ack_delay, ..self }
    }

    /// Change the initial retransmission timeout.
    pub fn with_initial_retry_timeout(self, initial_retry_timeout: Duration) -> Self {
        Config { initial_retry_timeout, ..self }
    }

    /// Change the ceiling of the retransmission backoff.
    pub fn with_retry_timeout_ceiling(self, retry_timeout_ceiling: Duration) -> Self {
        Config { retry_timeout_ceiling, ..self }
    }

    /// Change the number of retransmissions.
    pub fn with_max_retries(self, max_retries: u8) -> Self {
        Config { max_retries, ..self }
    }

    /// Change the `FIN_WAIT_2` timeout.
    pub fn with_fin_timeout(self, fin_timeout: Duration) -> Self {
        Config { fin_timeout, ..self }
    }

    /// Change the `TIME_WAIT` delay.
    pub fn with_time_wait_delay(self, time_wait_delay: Duration) -> Self {
        Config { time_wait_delay, ..self }
    }

    /// Change the advertised receive window.
    pub fn with_recv_window(self, recv_window: u16) -> Self {
        Config { recv_window, ..self }
    }

    /// Change the interface MTU.
    pub fn with_mtu(self, mtu: u16) -> Self {
        Config { mtu, ..self }
    }

    /// The MSS we announce, the MTU without IPv4 and TCP headers.
    pub fn recv_mss(&self) -> u16 {
        let overhead = (IPV4_HEADER_LEN + HEADER_LEN) as u16;
        self.mtu.saturating_sub(overhead).max(DEFAULT_MSS)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ack_delay: Duration::from_millis(100),
            initial_retry_timeout: Duration::from_millis(200),
            retry_timeout_ceiling: Duration::from_secs(60),
            max_retries: 9,
            fin_timeout: MAX_SEG_LIFETIME,
            time_wait_delay: Duration::from_millis(250),
            recv_window: 4096,
            mtu: 1500,
        }
    }
}
