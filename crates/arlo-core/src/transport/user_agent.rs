use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Browser identities the service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAgent {
    /// Vendor iOS app
    Arlo,
    /// Mobile Safari on iPhone
    Iphone,
    /// Mobile Safari on iPad
    Ipad,
    /// Desktop Safari
    Mac,
    /// Firefox on Ubuntu
    Firefox,
    /// Chrome on Linux
    Linux,
    /// Chrome on Android
    Android,
}

impl UserAgent {
    /// Every profile, in declaration order
    pub const ALL: [UserAgent; 7] = [
        UserAgent::Arlo,
        UserAgent::Iphone,
        UserAgent::Ipad,
        UserAgent::Mac,
        UserAgent::Firefox,
        UserAgent::Linux,
        UserAgent::Android,
    ];

    /// `User-Agent` header value for this profile
    pub fn header_value(self) -> &'static str {
        match self {
            UserAgent::Arlo => concat!(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 11_1_2 like Mac OS X) ",
                "AppleWebKit/604.3.5 (KHTML, like Gecko) Mobile/15B202 NETGEAR/v1 ",
                "(iOS Vuezone)"
            ),
            UserAgent::Iphone => concat!(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 13_1_3 like Mac OS X) ",
                "AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.1 Mobile/15E148 Safari/604.1"
            ),
            UserAgent::Ipad => concat!(
                "Mozilla/5.0 (iPad; CPU OS 12_2 like Mac OS X) ",
                "AppleWebKit/605.1.15 (KHTML, like Gecko) Version/12.1 Mobile/15E148 Safari/604.1"
            ),
            UserAgent::Mac => concat!(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_11_6) ",
                "AppleWebKit/605.1.15 (KHTML, like Gecko) Version/11.1.2 Safari/605.1.15"
            ),
            UserAgent::Firefox => concat!(
                "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:85.0) ",
                "Gecko/20100101 Firefox/85.0"
            ),
            UserAgent::Linux => concat!(
                "Mozilla/5.0 (X11; Linux x86_64) ",
                "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/88.0.4324.96 Safari/537.36"
            ),
            UserAgent::Android => concat!(
                "Mozilla/5.0 (Linux; Android 9; SM-G950U) ",
                "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/3.0.4577.75 Safari/537.36"
            ),
        }
    }

    /// Pick a profile at random
    pub fn random() -> Self {
        *Self::ALL
            .choose(&mut rand::thread_rng())
            .unwrap_or(&UserAgent::Linux)
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserAgent::Arlo => "arlo",
            UserAgent::Iphone => "iphone",
            UserAgent::Ipad => "ipad",
            UserAgent::Mac => "mac",
            UserAgent::Firefox => "firefox",
            UserAgent::Linux => "linux",
            UserAgent::Android => "android",
        };
        f.write_str(name)
    }
}

impl FromStr for UserAgent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|agent| agent.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown user agent profile: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for agent in UserAgent::ALL {
            assert_eq!(agent.to_string().parse::<UserAgent>().unwrap(), agent);
        }
        assert!("netscape".parse::<UserAgent>().is_err());
    }
}
