// User agent parsing for `device_info`

use crate::session::types::DeviceInfo;

/// Parse a user agent string into coarse device information.
/// Token matching only; good enough for "signed in from Firefox on Linux".
pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let ua_lower = user_agent.to_lowercase();

    let device_type = if ua_lower.contains("tablet") || ua_lower.contains("ipad") {
        "tablet"
    } else if ua_lower.contains("mobile") || ua_lower.contains("iphone") {
        "mobile"
    } else if ua_lower.contains("bot") || ua_lower.contains("spider") {
        "bot"
    } else {
        "desktop"
    };

    // Mobile OS first: their UAs also mention "like Mac OS X" / "Linux"
    let os = if ua_lower.contains("android") {
        "Android"
    } else if ua_lower.contains("iphone") || ua_lower.contains("ipad") || ua_lower.contains("ios")
    {
        "iOS"
    } else if ua_lower.contains("windows") {
        "Windows"
    } else if ua_lower.contains("mac os") || ua_lower.contains("macos") {
        "macOS"
    } else if ua_lower.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    };

    // Edge and Opera embed "Chrome"; Chrome embeds "Safari"
    let (browser, version_token) = if ua_lower.contains("edg/") {
        ("Edge", Some("edg/"))
    } else if ua_lower.contains("opr/") {
        ("Opera", Some("opr/"))
    } else if ua_lower.contains("firefox/") {
        ("Firefox", Some("firefox/"))
    } else if ua_lower.contains("chrome/") {
        ("Chrome", Some("chrome/"))
    } else if ua_lower.contains("safari/") {
        ("Safari", Some("version/"))
    } else {
        ("Unknown", None)
    };

    DeviceInfo {
        device_type: device_type.to_string(),
        os: os.to_string(),
        browser: browser.to_string(),
        browser_version: version_token.and_then(|token| version_after(&ua_lower, token)),
    }
}

fn version_after(ua_lower: &str, token: &str) -> Option<String> {
    let start = ua_lower.find(token)? + token.len();
    let version: String = ua_lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    (!version.is_empty()).then_some(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_chrome() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
        let device = parse_user_agent(ua);

        assert_eq!(device.device_type, "desktop");
        assert_eq!(device.os, "Windows");
        assert_eq!(device.browser, "Chrome");
        assert_eq!(device.browser_version.as_deref(), Some("91.0.4472.124"));
    }

    #[test]
    fn test_iphone_safari() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Mobile/15E148 Safari/604.1";
        let device = parse_user_agent(ua);

        assert_eq!(device.device_type, "mobile");
        assert_eq!(device.os, "iOS");
        assert_eq!(device.browser, "Safari");
        assert_eq!(device.browser_version.as_deref(), Some("14.1.1"));
    }

    #[test]
    fn test_edge_is_not_chrome() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
        let device = parse_user_agent(ua);
        assert_eq!(device.browser, "Edge");
        assert_eq!(device.browser_version.as_deref(), Some("120.0.2210.91"));
    }

    #[test]
    fn test_unknown_agent() {
        let device = parse_user_agent("curl/8.4.0");
        assert_eq!(device.os, "Unknown");
        assert_eq!(device.browser, "Unknown");
        assert!(device.browser_version.is_none());
    }
}
