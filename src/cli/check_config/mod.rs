//! Check-config command - validates configuration and prints it

use crate::config::AppConfig;

/// Load, validate and print the effective configuration
pub fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    config.validate()?;

    println!("{}", serde_json::to_string_pretty(&redacted(config))?);
    Ok(())
}

/// Hide credentials embedded in the postgres URL
fn redacted(mut config: AppConfig) -> AppConfig {
    if let Some(url) = config.storage.postgres_url.as_mut() {
        if let Some((scheme, rest)) = url.split_once("://") {
            if let Some((_, host)) = rest.rsplit_once('@') {
                *url = format!("{}://***@{}", scheme, host);
            }
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_credentials() {
        let mut config = AppConfig::default();
        config.storage.postgres_url = Some("postgres://user:secret@db:5432/chat".to_string());

        let config = redacted(config);

        assert_eq!(
            config.storage.postgres_url.as_deref(),
            Some("postgres://***@db:5432/chat")
        );
    }

    #[test]
    fn test_url_without_credentials_untouched() {
        let mut config = AppConfig::default();
        config.storage.postgres_url = Some("postgres://db/chat".to_string());

        assert_eq!(
            redacted(config).storage.postgres_url.as_deref(),
            Some("postgres://db/chat")
        );
    }
}
