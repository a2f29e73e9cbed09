// Device fingerprinting
// Cheap synchronous fingerprint at login, richer client-assisted fingerprint
// computed later and merged under a monotonic-confidence rule.

pub mod device;
pub mod engine;

pub use device::parse_user_agent;
pub use engine::{
    ClientFingerprintPayload, DeviceFingerprintEngine, FingerprintConfig, FingerprintError,
    ServerObservations,
};
