pub mod slave;

/// Version of the builder rpc protocol spoken by this release.
pub const PROTOCOL_VERSION: &str = "1.0";
