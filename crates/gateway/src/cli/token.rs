use lx_domain::config::Config;

use crate::auth::TokenSigner;

/// Sign a token for `user` with the secret from `auth.secret_env` and
/// print it to stdout.
pub fn issue(config: &Config, user: &str, ttl_secs: Option<u64>) -> anyhow::Result<()> {
    let env = &config.auth.secret_env;
    let secret = std::env::var(env)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{env} is not set; cannot sign tokens in dev mode"))?;

    let ttl = ttl_secs.unwrap_or(config.auth.token_ttl_secs);
    let token = TokenSigner::new(secret).issue(user, ttl)?;
    println!("{token}");
    Ok(())
}
