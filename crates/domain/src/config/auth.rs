use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiAuthConfig {
    /// Environment variable holding the HMAC secret used to sign and
    /// verify bearer tokens. If unset or empty the server runs in dev
    /// mode and trusts `dev_user_header`.
    #[serde(default = "d_secret_env")]
    pub secret_env: String,
    /// Lifetime of tokens issued by `lexchat token issue`.
    #[serde(default = "d_ttl")]
    pub token_ttl_secs: u64,
    /// Header naming the caller in dev mode.
    #[serde(default = "d_dev_header")]
    pub dev_user_header: String,
}

impl Default for ApiAuthConfig {
    fn default() -> Self {
        Self {
            secret_env: d_secret_env(),
            token_ttl_secs: d_ttl(),
            dev_user_header: d_dev_header(),
        }
    }
}

fn d_secret_env() -> String {
    "LX_AUTH_SECRET".into()
}
fn d_ttl() -> u64 {
    7 * 24 * 3600
}
fn d_dev_header() -> String {
    "x-user-id".into()
}
