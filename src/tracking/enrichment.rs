//! Browser, OS and device classification from the User-Agent.

use woothee::parser::Parser;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
}

/// Device class from the reported screen, e.g. `"1920x1080"`.
/// Used when the User-Agent does not settle it.
pub fn device_from_screen(screen: Option<&str>) -> Option<&'static str> {
    let width: u32 = screen?.split(['x', 'X']).next()?.trim().parse().ok()?;

    Some(if width < 415 {
        "mobile"
    } else if width < 1025 {
        "tablet"
    } else {
        "desktop"
    })
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}

pub struct UserAgentEnricher {
    parser: Parser,
}

impl UserAgentEnricher {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }

    pub fn enrich(&self, user_agent: &str, screen: Option<&str>) -> DeviceInfo {
        let mut info = DeviceInfo::default();

        if let Some(result) = self.parser.parse(user_agent) {
            info.browser = known(result.name);
            info.os = known(result.os);

            // woothee categories: pc, smartphone, mobilephone, crawler, appliance, misc
            info.device = match result.category {
                "pc" => Some("desktop".to_string()),
                "smartphone" | "mobilephone" => Some("mobile".to_string()),
                "crawler" => Some("bot".to_string()),
                _ => None,
            };
        }

        // Desktop Safari on an iPad reports as "pc"; trust the screen in that case
        let screen_device = device_from_screen(screen);
        match (info.device.as_deref(), screen_device) {
            (None, Some(d)) => info.device = Some(d.to_string()),
            (Some("desktop"), Some("tablet")) if info.os.as_deref() == Some("Mac OSX") => {
                info.device = Some("tablet".to_string())
            }
            _ => {}
        }

        info
    }
}

impl Default for UserAgentEnricher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_on_windows() {
        let info = UserAgentEnricher::new().enrich(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            Some("1920x1080"),
        );

        assert_eq!(info.browser.as_deref(), Some("Chrome"));
        assert!(info.os.as_deref().is_some_and(|os| os.starts_with("Windows")));
        assert_eq!(info.device.as_deref(), Some("desktop"));
    }

    #[test]
    fn test_iphone_is_mobile() {
        let info = UserAgentEnricher::new().enrich(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
            None,
        );

        assert_eq!(info.device.as_deref(), Some("mobile"));
    }

    #[test]
    fn test_unknown_agent_falls_back_to_screen() {
        let info = UserAgentEnricher::new().enrich("custom-sdk/1.0", Some("390x844"));
        assert_eq!(info.browser, None);
        assert_eq!(info.device.as_deref(), Some("mobile"));
    }

    #[test]
    fn test_device_from_screen_thresholds() {
        assert_eq!(device_from_screen(Some("414x896")), Some("mobile"));
        assert_eq!(device_from_screen(Some("415x896")), Some("tablet"));
        assert_eq!(device_from_screen(Some("1024x768")), Some("tablet"));
        assert_eq!(device_from_screen(Some("1025x768")), Some("desktop"));
        assert_eq!(device_from_screen(Some("wide")), None);
        assert_eq!(device_from_screen(None), None);
    }
}
