/// Browser, platform and device class extracted from a User-Agent header.
/// The feature engine only compares these as categorical labels, so a small
/// token matcher is enough; unrecognized agents become "Unknown".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub browser: String,
    pub os: String,
    pub device_type: String,
}

pub fn parse_user_agent(user_agent: &str) -> AgentInfo {
    AgentInfo {
        browser: browser_family(user_agent).to_string(),
        os: os_family(user_agent).to_string(),
        device_type: device_type(user_agent).to_string(),
    }
}

fn browser_family(ua: &str) -> &'static str {
    // Order matters: Chrome-derived agents also advertise Chrome and Safari
    if ua.contains("Edg/") || ua.contains("Edge/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("Chrome/") {
        "Chrome"
    } else if ua.contains("Safari/") {
        "Safari"
    } else {
        "Unknown"
    }
}

fn os_family(ua: &str) -> &'static str {
    if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        "iOS"
    } else if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "Mac OS X"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

fn device_type(ua: &str) -> &'static str {
    if ua.contains("Mobile") || ua.contains("Android") || ua.contains("iPhone") {
        "mobile"
    } else {
        "desktop"
    }
}
