use lx_domain::config::{Config, ConfigSeverity};

/// Parse and validate the config, printing any issues.
///
/// Returns false when errors are found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
/// Inline secrets are masked.
pub fn show(config: &Config) {
    match toml::to_string_pretty(&redacted(config)) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}

fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    if let Some(key) = config.llm.provider.auth.key.as_mut() {
        *key = mask(key);
    }
    if let Some(key) = config.retrieval.api_key.as_mut() {
        *key = mask(key);
    }
    config
}

fn mask(secret: &str) -> String {
    let shown: String = secret.chars().take(4).collect();
    format!("{shown}****")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_inline_keys() {
        let mut config = Config::default();
        config.llm.provider.auth.key = Some("sk-abcdef123456".into());
        config.retrieval.api_key = Some("rk-987654".into());

        let shown = redacted(&config);
        assert_eq!(shown.llm.provider.auth.key.as_deref(), Some("sk-a****"));
        assert_eq!(shown.retrieval.api_key.as_deref(), Some("rk-9****"));
        assert!(config.llm.provider.auth.key.as_deref() == Some("sk-abcdef123456"));
    }
}
