//! Login session state: merged cookies, the per-session password hash,
//! and the rollover clock.

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

/// Whether the server is inside its nightly maintenance window. `Unknown`
/// until the first probe resolves either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceState {
    Unknown,
    Down,
    Up,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Mutable per-login state. Held under a lock by the client; cleared on
/// every failed login probe so stale cookies never leak into requests.
#[derive(Debug, Default)]
pub struct Session {
    cookies: BTreeMap<String, String>,
    pub pwd: Option<String>,
    pub player_id: Option<String>,
    pub player_name: Option<String>,
    /// Unix timestamp of the next maintenance window, from the status
    /// endpoint. Survives credential resets.
    pub rollover: Option<u64>,
}

impl Session {
    /// Drop credentials but keep the rollover clock.
    pub fn clear(&mut self) {
        self.cookies.clear();
        self.pwd = None;
        self.player_id = None;
        self.player_name = None;
    }

    pub fn has_cookies(&self) -> bool {
        !self.cookies.is_empty()
    }

    /// Fold `Set-Cookie` response headers into the jar. Only the leading
    /// `name=value` pair of each header matters; attributes are dropped.
    /// Later values for the same name win.
    pub fn merge_cookies<'a>(&mut self, set_cookie: impl IntoIterator<Item = &'a str>) {
        for header in set_cookie {
            let Some(pair) = header.split(';').next() else {
                continue;
            };
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            self.cookies.insert(name.to_string(), value.trim().to_string());
        }
    }

    /// The `Cookie` request header, or `None` when the jar is empty.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Seconds until the next known maintenance window. `None` when the
    /// clock has never been observed.
    pub fn seconds_to_rollover(&self) -> Option<i64> {
        self.rollover.map(|at| at as i64 - unix_now() as i64)
    }

    /// Requests are suppressed in the final second before maintenance so
    /// in-flight traffic does not race the shutdown.
    pub fn close_to_rollover(&self) -> bool {
        matches!(self.seconds_to_rollover(), Some(s) if s <= 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_merge_keeps_latest_value() {
        let mut session = Session::default();
        session.merge_cookies(["PHPSESSID=abc; path=/", "appserver=www1"]);
        session.merge_cookies(["PHPSESSID=def; HttpOnly"]);
        assert_eq!(
            session.cookie_header().as_deref(),
            Some("PHPSESSID=def; appserver=www1")
        );
    }

    #[test]
    fn malformed_set_cookie_ignored() {
        let mut session = Session::default();
        session.merge_cookies(["", "no-equals-sign", "=orphan"]);
        assert!(!session.has_cookies());
        assert!(session.cookie_header().is_none());
    }

    #[test]
    fn clear_preserves_rollover_clock() {
        let mut session = Session::default();
        session.merge_cookies(["PHPSESSID=abc"]);
        session.pwd = Some("hash".into());
        session.rollover = Some(42);
        session.clear();
        assert!(!session.has_cookies());
        assert!(session.pwd.is_none());
        assert_eq!(session.rollover, Some(42));
    }

    #[test]
    fn rollover_proximity() {
        let mut session = Session::default();
        assert!(!session.close_to_rollover());
        session.rollover = Some(unix_now() + 3600);
        assert!(!session.close_to_rollover());
        session.rollover = Some(unix_now());
        assert!(session.close_to_rollover());
    }
}
