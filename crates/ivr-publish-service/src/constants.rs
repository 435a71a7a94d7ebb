//! Service-wide constants
//!
//! Single source of truth for deployment paths and defaults.

/// Filesystem locations
pub mod paths {
    /// Directory the switch includes generated IVR dialplans from
    pub const DIALPLAN_DIR: &str = "/etc/asterisk/ivr";
    /// Elevation helper used by the privileged publisher
    pub const SUDO: &str = "sudo";
}

/// Programs run behind the privilege boundary
pub mod programs {
    pub const INSTALL: &str = "install";
    pub const MOVE: &str = "mv";
    pub const REMOVE: &str = "rm";
}

/// Default values for deployment
pub mod defaults {
    /// Account the switch runs as
    pub const OWNER: &str = "asterisk";
    pub const GROUP: &str = "asterisk";
    /// Mode of deployed dialplan files (read-only for owner and group)
    pub const FILE_MODE: u32 = 0o440;
    /// Mode used by the unprivileged local publisher
    pub const LOCAL_FILE_MODE: u32 = 0o640;
    /// Suffix of the staging file placed beside the destination
    pub const STAGING_SUFFIX: &str = ".staging";
}

/// Timeout configuration (in seconds)
pub mod timeouts {
    /// Limit for each privileged command
    pub const COMMAND_SECS: u64 = 30;
}
