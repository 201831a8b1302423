use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "b24-sync-server")]
pub struct Config {
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Bitrix24 inbound-webhook REST base, e.g.
    /// `https://portal.bitrix24.ru/rest/1/<token>/`.
    #[arg(long, env = "B24_WEBHOOK_BASE")]
    pub b24_webhook_base: String,
}

impl Config {
    /// Webhook base with a guaranteed trailing slash, ready to have
    /// `<method>.json` appended.
    pub fn normalized_webhook_base(&self) -> String {
        let mut base = self.b24_webhook_base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        base
    }

    /// The last path segment of the webhook base is the access token.
    /// Only this masked form may appear in logs or diagnostics.
    pub fn masked_webhook_base(&self) -> String {
        mask_webhook_base(&self.normalized_webhook_base())
    }
}

fn mask_webhook_base(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((head, secret))
            if !secret.is_empty() && !head.is_empty() && !head.ends_with('/') =>
        {
            format!("{head}/***/")
        }
        _ => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> Config {
        Config {
            port: 3000,
            b24_webhook_base: base.to_string(),
        }
    }

    #[test]
    fn normalization_appends_trailing_slash() {
        assert_eq!(
            config("https://example.bitrix24.ru/rest/1/abc123").normalized_webhook_base(),
            "https://example.bitrix24.ru/rest/1/abc123/"
        );
        assert_eq!(
            config("https://example.bitrix24.ru/rest/1/abc123/").normalized_webhook_base(),
            "https://example.bitrix24.ru/rest/1/abc123/"
        );
    }

    #[test]
    fn masking_hides_the_token_segment() {
        assert_eq!(
            config("https://example.bitrix24.ru/rest/1/abc123/").masked_webhook_base(),
            "https://example.bitrix24.ru/rest/1/***/"
        );
        assert_eq!(
            config("https://example.bitrix24.ru/rest/1/abc123").masked_webhook_base(),
            "https://example.bitrix24.ru/rest/1/***/"
        );
    }

    #[test]
    fn masking_leaves_a_bare_host_alone() {
        // No path segment to hide; better to log as-is than mangle the host.
        assert_eq!(
            mask_webhook_base("https://example.bitrix24.ru/"),
            "https://example.bitrix24.ru/"
        );
    }
}
