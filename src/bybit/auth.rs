use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

pub struct BybitAuth {
    api_key: String,
    api_secret: String,
}

impl BybitAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }

    pub fn get_api_key(&self) -> &str {
        &self.api_key
    }

    /// V5 REST signature: HMAC-SHA256 over
    /// `timestamp + api_key + recv_window + payload`, hex encoded.
    /// `payload` is the raw JSON body for POST or the query string for GET.
    pub fn generate_signature(&self, timestamp: u64, recv_window: u64, payload: &str) -> String {
        let sign_str = format!("{}{}{}{}", timestamp, &self.api_key, recv_window, payload);

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(sign_str.as_bytes());

        hex::encode(mac.finalize().into_bytes())
    }

    /// Current timestamp in milliseconds
    pub fn get_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for BybitAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitAuth")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}
