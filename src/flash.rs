use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde::Serialize;

const FLASH_COOKIE: &str = "flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Danger,
}

impl FlashLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashLevel::Success => "success",
            FlashLevel::Info => "info",
            FlashLevel::Danger => "danger",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "info" => Some(Self::Info),
            "danger" => Some(Self::Danger),
            _ => None,
        }
    }
}

/// One-shot message shown on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    fn encode(&self) -> String {
        format!("{}|{}", self.level.as_str(), self.message)
    }

    fn decode(value: &str) -> Option<Self> {
        let (level, message) = value.split_once('|')?;
        Some(Self::new(FlashLevel::parse(level)?, message))
    }
}

pub fn set_flash(jar: SignedCookieJar, flash: Flash) -> SignedCookieJar {
    jar.add(
        Cookie::build((FLASH_COOKIE, flash.encode()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build(),
    )
}

/// Reads and clears the pending flash message, if any.
pub fn take_flash(jar: SignedCookieJar) -> (SignedCookieJar, Option<Flash>) {
    let Some(cookie) = jar.get(FLASH_COOKIE) else {
        return (jar, None);
    };
    let flash = Flash::decode(cookie.value());
    (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), flash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum_extra::extract::cookie::Key;

    #[test]
    fn test_flash_encoding() {
        let flash = Flash::new(FlashLevel::Danger, "Invalid | odd message");
        assert_eq!(Flash::decode(&flash.encode()), Some(flash));
        assert_eq!(Flash::decode("bogus|x"), None);
        assert_eq!(Flash::decode("no separator"), None);
    }

    #[test]
    fn test_take_flash_consumes_message() {
        let key = Key::generate();
        let jar = SignedCookieJar::from_headers(&HeaderMap::new(), key);
        let jar = set_flash(jar, Flash::new(FlashLevel::Success, "Account created."));

        let (jar, flash) = take_flash(jar);
        assert_eq!(flash.unwrap().message, "Account created.");
        let (_jar, flash) = take_flash(jar);
        assert!(flash.is_none());
    }
}
