//! ID prefixes for generated row identifiers.
//!
//! IDs are produced by `RippleDb::generate_id` as `{prefix}-{16 hex chars}`.

pub const PREFIX_HASH: &str = "hsh";
pub const PREFIX_LINK: &str = "dep";
pub const PREFIX_TASK: &str = "dlv";
pub const PREFIX_TARGET: &str = "tgt";
pub const PREFIX_LEASE_OWNER: &str = "own";

pub const ALL_PREFIXES: &[&str] = &[
    PREFIX_HASH,
    PREFIX_LINK,
    PREFIX_TASK,
    PREFIX_TARGET,
    PREFIX_LEASE_OWNER,
];
