//! Package-level constants and well-known event names.

/// Current version of the Weft core (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "weft";

/// Actor name used for internal/system emissions. Always authorized for
/// routing mutations.
pub const SYSTEM_ACTOR: &str = "system";

/// Well-known event names used at the router boundary.
pub mod names {
    /// Universal error sink. Every handler/transformer failure is normalized
    /// into this shape and re-emitted here.
    pub const SYSTEM_ERROR: &str = "system:error";

    /// Delivered to an observer before a matched event's handlers run.
    pub const OBSERVE_BEGIN: &str = "observe:begin";

    /// Delivered to an observer after a matched event's handlers complete.
    pub const OBSERVE_END: &str = "observe:end";

    /// Delivered to observers when their subscription target terminates.
    pub const OBSERVE_TARGET_TERMINATED: &str = "observe:target_terminated";

    /// Delivered to an observer for each record during a history replay.
    pub const OBSERVE_REPLAY: &str = "observe:replay";

    /// Emitted by the agent-lifecycle collaborator when an actor terminates.
    pub const AGENT_TERMINATED: &str = "agent:terminated";
}

/// Capability identifiers checked against the capability collaborator.
pub mod capabilities {
    /// Required for every mutating routing-rule operation.
    pub const ROUTING_CONTROL: &str = "routing_control";
}
