//! Device fingerprint headers attached to outbound upstream requests.
//!
//! No direct teacher grounding file exists for this component (the source
//! repo never fabricated device identifiers of its own), so the shape
//! follows spec §3 literally: an immutable tuple, generated fresh,
//! archived rather than mutated when replaced.

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub version_id: String,
    pub created_at: i64,
    pub machine_id: String,
    pub mac_machine_id: String,
    pub dev_device_id: String,
    pub sqm_id: String,
}

impl DeviceProfile {
    /// Generate a fresh, well-formed profile.
    pub fn generate() -> Self {
        Self {
            version_id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp(),
            machine_id: hex_id(64),
            mac_machine_id: hex_id(64),
            dev_device_id: uuid::Uuid::new_v4().to_string(),
            sqm_id: format!("{{{}}}", uuid::Uuid::new_v4().to_string().to_uppercase()),
        }
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        insert(headers, "x-machine-id", &self.machine_id);
        insert(headers, "x-mac-machine-id", &self.mac_machine_id);
        insert(headers, "x-dev-device-id", &self.dev_device_id);
        insert(headers, "x-sqm-id", &self.sqm_id);
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn hex_id(len: usize) -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Applies the device profile headers for an account onto an outbound
/// request, per §4.9 — no-op (send nothing, upstream uses defaults) when
/// the account carries no profile.
pub fn apply(headers: &mut HeaderMap, profile: Option<&DeviceProfile>) {
    if let Some(profile) = profile {
        profile.apply_headers(headers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_profile_has_well_formed_fields() {
        let profile = DeviceProfile::generate();
        assert_eq!(profile.machine_id.len(), 64);
        assert!(profile.sqm_id.starts_with('{') && profile.sqm_id.ends_with('}'));
    }

    #[test]
    fn apply_without_profile_sets_no_headers() {
        let mut headers = HeaderMap::new();
        apply(&mut headers, None);
        assert!(headers.is_empty());
    }

    #[test]
    fn apply_with_profile_sets_all_four_headers() {
        let mut headers = HeaderMap::new();
        let profile = DeviceProfile::generate();
        apply(&mut headers, Some(&profile));
        assert_eq!(headers.len(), 4);
        assert!(headers.contains_key("x-machine-id"));
        assert!(headers.contains_key("x-sqm-id"));
    }
}
