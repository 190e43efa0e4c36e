//! Referrer spam and bot filtering.
//!
//! Both produce *soft drops*: the beacon is acknowledged so the client stops
//! retrying, but nothing is persisted or published.

use std::net::IpAddr;
use tracing::{debug, warn};

use super::collaborators::BotScorer;
use super::normalize::strip_www;

/// Known referrer-spam domains. Subdomains of these match too.
pub const SPAM_REFERRER_DOMAINS: &[&str] = &[
    "4webmasters.org",
    "best-seo-offer.com",
    "best-seo-solution.com",
    "buttons-for-website.com",
    "buttons-for-your-website.com",
    "buy-cheap-online.info",
    "darodar.com",
    "free-social-buttons.com",
    "get-free-traffic-now.com",
    "hulfingtonpost.com",
    "ilovevitaly.com",
    "o-o-6-o-o.com",
    "priceg.com",
    "semalt.com",
    "social-buttons.com",
    "trafficmonetize.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    SpamReferrer,
    Bot,
}

impl DropReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            DropReason::SpamReferrer => "spam_referrer",
            DropReason::Bot => "bot",
        }
    }
}

/// True when the referrer host is on the spam list
pub fn is_spam_referrer(referrer_host: &str) -> bool {
    let domain = strip_www(referrer_host);
    if domain.is_empty() {
        return false;
    }

    SPAM_REFERRER_DOMAINS.iter().any(|spam| {
        domain == *spam
            || domain
                .strip_suffix(spam)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Ask the bot scorer about a client. Scoring failures count as "not a bot".
pub async fn is_bot(scorer: &dyn BotScorer, ip: IpAddr, user_agent: &str) -> bool {
    match scorer.is_bot(ip, user_agent).await {
        Ok(is_bot) => {
            if is_bot {
                debug!(ip = %ip, "beacon classified as bot");
            }
            is_bot
        }
        Err(e) => {
            warn!(ip = %ip, error = %e, "bot scoring failed, treating client as human");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingScorer;

    #[async_trait]
    impl BotScorer for FailingScorer {
        async fn is_bot(&self, _ip: IpAddr, _user_agent: &str) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("ip metadata service unavailable"))
        }
    }

    struct AlwaysBot;

    #[async_trait]
    impl BotScorer for AlwaysBot {
        async fn is_bot(&self, _ip: IpAddr, _user_agent: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_spam_referrer_matches_domain_www_and_subdomains() {
        assert!(is_spam_referrer("semalt.com"));
        assert!(is_spam_referrer("www.semalt.com"));
        assert!(is_spam_referrer("WWW.Semalt.com"));
        assert!(is_spam_referrer("ru.semalt.com"));
    }

    #[test]
    fn test_spam_referrer_rejects_lookalikes() {
        assert!(!is_spam_referrer("notsemalt.com"));
        assert!(!is_spam_referrer("semalt.com.example.org"));
        assert!(!is_spam_referrer("example.com"));
        assert!(!is_spam_referrer(""));
    }

    #[tokio::test]
    async fn test_bot_scoring_fails_open() {
        let ip: IpAddr = "198.51.100.4".parse().unwrap();
        assert!(!is_bot(&FailingScorer, ip, "Mozilla/5.0").await);
        assert!(is_bot(&AlwaysBot, ip, "Mozilla/5.0").await);
    }
}
