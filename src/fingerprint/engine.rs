// Fingerprint computation and merge policy

use crate::session::types::{ScoredFingerprint, SessionContext};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Fingerprint confidence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Confidence assigned to the login-time fingerprint
    pub fast_confidence: f64,
    /// Confidence of an enhanced fingerprint before counting client signals
    pub enhanced_base_confidence: f64,
    /// Added per client signal present in the payload
    pub per_signal_confidence: f64,
    /// Payloads with fewer signals are rejected
    pub min_client_signals: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            fast_confidence: 0.25,
            enhanced_base_confidence: 0.4,
            per_signal_confidence: 0.075,
            min_client_signals: 2,
        }
    }
}

/// Signals collected by the client-side script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientFingerprintPayload {
    pub canvas_hash: Option<String>,
    pub webgl_hash: Option<String>,
    pub fonts_hash: Option<String>,
    pub audio_hash: Option<String>,
    pub timezone: Option<String>,
    pub screen_resolution: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
}

impl ClientFingerprintPayload {
    /// Present, non-empty signals in a fixed order
    fn signals(&self) -> Vec<(&'static str, &str)> {
        [
            ("canvas", &self.canvas_hash),
            ("webgl", &self.webgl_hash),
            ("fonts", &self.fonts_hash),
            ("audio", &self.audio_hash),
            ("tz", &self.timezone),
            ("screen", &self.screen_resolution),
            ("lang", &self.language),
            ("platform", &self.platform),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        })
        .collect()
    }
}

/// What the server saw on the request carrying the payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerObservations {
    pub ip_address: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum FingerprintError {
    #[error("fingerprint payload has {found} usable signals, need {required}")]
    InsufficientSignals { found: usize, required: usize },
}

/// Computes and merges device fingerprints
#[derive(Debug, Clone, Default)]
pub struct DeviceFingerprintEngine {
    config: FingerprintConfig,
}

impl DeviceFingerprintEngine {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    /// Hash of user agent and IP. Cheap enough for the login path.
    pub fn compute_fast(&self, context: &SessionContext) -> ScoredFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"fast\0");
        hasher.update(context.user_agent.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(context.ip_address.as_bytes());

        ScoredFingerprint::new(hex::encode(hasher.finalize()), self.config.fast_confidence)
    }

    /// Hash over the client signals combined with the server's own
    /// observations. Confidence grows with the number of client signals.
    pub fn compute_enhanced(
        &self,
        payload: &ClientFingerprintPayload,
        observations: &ServerObservations,
    ) -> Result<ScoredFingerprint, FingerprintError> {
        let signals = payload.signals();
        if signals.len() < self.config.min_client_signals {
            return Err(FingerprintError::InsufficientSignals {
                found: signals.len(),
                required: self.config.min_client_signals,
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(b"enhanced\0");
        for (name, value) in &signals {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(observations.user_agent.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(observations.ip_address.as_bytes());

        let confidence = self.config.enhanced_base_confidence
            + self.config.per_signal_confidence * signals.len() as f64;

        Ok(ScoredFingerprint::new(
            hex::encode(hasher.finalize()),
            confidence,
        ))
    }

    /// Monotonic-confidence merge: the candidate replaces the stored value
    /// only when it is at least as confident.
    pub fn merge(
        &self,
        stored: Option<&ScoredFingerprint>,
        candidate: ScoredFingerprint,
    ) -> ScoredFingerprint {
        match stored {
            Some(current) if candidate.confidence < current.confidence => current.clone(),
            _ => candidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DeviceFingerprintEngine {
        DeviceFingerprintEngine::new(FingerprintConfig::default())
    }

    fn context(ip: &str) -> SessionContext {
        SessionContext {
            ip_address: ip.to_string(),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/126.0".to_string()),
            persistent: false,
        }
    }

    fn payload() -> ClientFingerprintPayload {
        ClientFingerprintPayload {
            canvas_hash: Some("c4nv4s".to_string()),
            webgl_hash: Some("w3bgl".to_string()),
            fonts_hash: Some("f0nts".to_string()),
            timezone: Some("Europe/Berlin".to_string()),
            ..Default::default()
        }
    }

    fn observations() -> ServerObservations {
        ServerObservations {
            ip_address: "203.0.113.9".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
        }
    }

    #[test]
    fn test_fast_fingerprint_is_deterministic() {
        let e = engine();
        let a = e.compute_fast(&context("203.0.113.9"));
        let b = e.compute_fast(&context("203.0.113.9"));
        let c = e.compute_fast(&context("203.0.113.10"));

        assert_eq!(a, b);
        assert_ne!(a.value, c.value);
        assert_eq!(a.value.len(), 64);
        assert_eq!(a.confidence, 0.25);
    }

    #[test]
    fn test_enhanced_confidence_scales_with_signals() {
        let e = engine();
        let four = e.compute_enhanced(&payload(), &observations()).unwrap();

        let mut more = payload();
        more.audio_hash = Some("aud10".to_string());
        more.language = Some("de-DE".to_string());
        let six = e.compute_enhanced(&more, &observations()).unwrap();

        assert!((four.confidence - 0.7).abs() < 1e-9);
        assert!(six.confidence > four.confidence);
        assert_ne!(four.value, six.value);
        assert!(four.confidence > e.compute_fast(&context("203.0.113.9")).confidence);
    }

    #[test]
    fn test_enhanced_rejects_thin_payload() {
        let e = engine();
        let thin = ClientFingerprintPayload {
            timezone: Some("UTC".to_string()),
            canvas_hash: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            e.compute_enhanced(&thin, &observations()),
            Err(FingerprintError::InsufficientSignals {
                found: 1,
                required: 2
            })
        );
    }

    #[test]
    fn test_merge_keeps_stronger_stored_value() {
        let e = engine();
        let stored = ScoredFingerprint::new("stored", 0.8);

        let weaker = e.merge(Some(&stored), ScoredFingerprint::new("candidate", 0.5));
        assert_eq!(weaker, stored);

        let equal = e.merge(Some(&stored), ScoredFingerprint::new("candidate", 0.8));
        assert_eq!(equal.value, "candidate");

        let stronger = e.merge(Some(&stored), ScoredFingerprint::new("candidate", 0.9));
        assert_eq!(stronger.value, "candidate");

        let first = e.merge(None, ScoredFingerprint::new("candidate", 0.1));
        assert_eq!(first.value, "candidate");
    }
}
