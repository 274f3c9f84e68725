//! Anonymous visitor state carried in cookies.
//!
//! The cookies are parsed once per request into a [`VisitorState`]; the view
//! counter and vote ledger only ever see that value.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time::Duration},
};
use uuid::Uuid;

pub const VISITOR_COOKIE: &str = "ub_visitor_id";
pub const VIEWS_COOKIE: &str = "ub_post_views";
pub const VOTES_COOKIE: &str = "ub_post_votes";
pub const ARTICLE_VIEW_COOKIE_PREFIX: &str = "ub_post_view_";

/// Most recent post ids remembered in the views cookie.
pub const VIEWS_CAP: usize = 300;

const ONE_YEAR_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self { secure: true }
    }
}

/// Builds a one-year, script-readable cookie.
pub fn visitor_cookie(name: String, value: String, policy: CookiePolicy) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .same_site(SameSite::Lax)
        .secure(policy.secure)
        .http_only(false)
        .max_age(Duration::days(ONE_YEAR_DAYS))
        .build()
}

#[derive(Debug, Clone, Default)]
pub struct VisitorState {
    pub visitor_id: Option<String>,
    /// Post ids already counted as viewed, oldest first.
    pub viewed: Vec<String>,
    /// Post id to chosen option id.
    pub votes: BTreeMap<String, String>,
    /// Relational article ids with a per-article view cookie.
    pub viewed_articles: BTreeSet<i64>,
    pub policy: CookiePolicy,
}

impl VisitorState {
    pub fn from_cookies(cookies: &Cookies, policy: CookiePolicy) -> Self {
        let mut state = VisitorState {
            policy,
            ..Default::default()
        };

        for cookie in cookies.list() {
            let name = cookie.name();
            match name {
                VISITOR_COOKIE => {
                    let value = cookie.value().trim();
                    if !value.is_empty() {
                        state.visitor_id = Some(value.to_string());
                    }
                }
                VIEWS_COOKIE => state.viewed = parse_viewed(cookie.value()),
                VOTES_COOKIE => state.votes = parse_votes(cookie.value()),
                _ => {
                    if let Some(id) = name
                        .strip_prefix(ARTICLE_VIEW_COOKIE_PREFIX)
                        .and_then(|id| id.parse().ok())
                    {
                        state.viewed_articles.insert(id);
                    }
                }
            }
        }

        state
    }

    /// The visitor id, minting one when the browser has none yet. A freshly
    /// minted id comes with the cookie that persists it.
    pub fn visitor_id(&self) -> (String, Option<Cookie<'static>>) {
        match &self.visitor_id {
            Some(id) => (id.clone(), None),
            None => {
                let id = new_visitor_id();
                let cookie = visitor_cookie(VISITOR_COOKIE.to_string(), id.clone(), self.policy);
                (id, Some(cookie))
            }
        }
    }

    pub fn has_viewed(&self, post_id: &str) -> bool {
        self.viewed.iter().any(|id| id == post_id)
    }

    pub fn vote_for(&self, post_id: &str) -> Option<&str> {
        self.votes.get(post_id).map(String::as_str)
    }

    /// Views cookie with `post_id` appended, keeping the newest
    /// [`VIEWS_CAP`] entries.
    pub fn views_cookie_with(&self, post_id: &str) -> Cookie<'static> {
        let mut viewed = self.viewed.clone();
        viewed.push(post_id.to_string());
        if viewed.len() > VIEWS_CAP {
            viewed.drain(..viewed.len() - VIEWS_CAP);
        }
        visitor_cookie(VIEWS_COOKIE.to_string(), encode_json(&viewed), self.policy)
    }

    pub fn votes_cookie_with(&self, post_id: &str, option_id: &str) -> Cookie<'static> {
        let mut votes = self.votes.clone();
        votes.insert(post_id.to_string(), option_id.to_string());
        visitor_cookie(VOTES_COOKIE.to_string(), encode_json(&votes), self.policy)
    }
}

/// `v` + base36 millisecond timestamp + `-` + 16 random hex characters.
pub fn new_visitor_id() -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let random = Uuid::new_v4().simple().to_string();
    format!("v{}-{}", to_base36(millis), &random[..16])
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn encode_json<T: serde::Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).unwrap_or_default();
    urlencoding::encode(&json).into_owned()
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let decoded = urlencoding::decode(raw).ok()?;
    serde_json::from_str(&decoded)
        .ok()
        .or_else(|| serde_json::from_str(raw).ok())
}

/// Malformed or missing content reads as an empty list.
pub fn parse_viewed(raw: &str) -> Vec<String> {
    decode_json::<Vec<String>>(raw).unwrap_or_default()
}

pub fn parse_votes(raw: &str) -> BTreeMap<String, String> {
    decode_json::<BTreeMap<String, String>>(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_visitor_id_is_reused() {
        let state = VisitorState {
            visitor_id: Some("vabc-123".into()),
            ..Default::default()
        };
        let (id, cookie) = state.visitor_id();
        assert_eq!(id, "vabc-123");
        assert!(cookie.is_none());
    }

    #[test]
    fn missing_visitor_id_is_minted_with_cookie() {
        let state = VisitorState::default();
        let (id, cookie) = state.visitor_id();
        let cookie = cookie.expect("new visitor gets a cookie");

        assert!(id.starts_with('v'));
        assert_eq!(id.split('-').nth(1).map(str::len), Some(16));
        assert_eq!(cookie.name(), VISITOR_COOKIE);
        assert_eq!(cookie.value(), id);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.max_age(), Some(Duration::days(365)));
    }

    #[test]
    fn malformed_cookies_read_as_empty() {
        assert!(parse_viewed("not json").is_empty());
        assert!(parse_viewed("%7B%22a%22%3A1%7D").is_empty());
        assert!(parse_votes("[1,2]").is_empty());
        assert!(parse_votes("").is_empty());
    }

    #[test]
    fn cookie_values_survive_encoding() {
        let mut state = VisitorState::default();
        state.votes.insert("post-a".into(), "opt-1".into());

        let cookie = state.votes_cookie_with("안녕-abc123", "opt-2");
        assert!(!cookie.value().contains('"'));

        let votes = parse_votes(cookie.value());
        assert_eq!(votes.get("post-a").map(String::as_str), Some("opt-1"));
        assert_eq!(votes.get("안녕-abc123").map(String::as_str), Some("opt-2"));
    }

    #[test]
    fn plain_json_cookies_are_accepted() {
        assert_eq!(parse_viewed(r#"["a","b"]"#), ["a", "b"]);
    }

    #[test]
    fn views_cookie_keeps_newest_entries() {
        let state = VisitorState {
            viewed: (0..305).map(|i| format!("post-{i}")).collect(),
            ..Default::default()
        };

        let cookie = state.views_cookie_with("fresh");
        let viewed = parse_viewed(cookie.value());

        assert_eq!(viewed.len(), VIEWS_CAP);
        assert_eq!(viewed.first().map(String::as_str), Some("post-6"));
        assert_eq!(viewed.last().map(String::as_str), Some("fresh"));
        assert!(!viewed.contains(&"post-5".to_string()));
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
