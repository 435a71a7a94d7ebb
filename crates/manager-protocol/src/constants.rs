//! Protocol constants
//!
//! Single source of truth for ports, timeouts and wire tokens.

/// Network port configuration
pub mod ports {
    /// Default manager interface port
    pub const MANAGER: u16 = 5038;
}

/// Server host configuration
pub mod hosts {
    /// Default host of the switch
    pub const LOCAL: &str = "127.0.0.1";
}

/// Timeout configuration (in milliseconds)
pub mod timeouts {
    /// Connect, banner and login must complete within this window
    pub const CONNECT_MS: u64 = 10_000;
    /// Maximum wait for a correlated action response
    pub const ACTION_MS: u64 = 10_000;
}

/// Reconnection backoff defaults
pub mod reconnect {
    /// Connection attempts before giving up
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Delay before the first retry
    pub const INITIAL_DELAY_MS: u64 = 500;
    /// Upper bound for a single retry delay
    pub const MAX_DELAY_MS: u64 = 5_000;
}

/// Wire-format tokens
pub mod wire {
    /// Line terminator
    pub const CRLF: &str = "\r\n";
    /// Trailer of legacy `Response: Follows` command output
    pub const END_COMMAND: &str = "--END COMMAND--";
    /// Prefix of ActionIDs generated by this client
    pub const ACTION_ID_PREFIX: &str = "ivr";
}
