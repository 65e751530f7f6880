//! Double-submit CSRF check against the token stored with the session.

use subtle::ConstantTimeEq;

use crate::db::SessionRecord;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// True only for a live session whose stored token equals the one echoed back.
pub fn validate_csrf(session: Option<&SessionRecord>, provided: Option<&str>) -> bool {
    let (Some(session), Some(provided)) = (session, provided) else {
        return false;
    };
    let expected = session.csrf_token.as_bytes();
    let provided = provided.as_bytes();
    !expected.is_empty()
        && expected.len() == provided.len()
        && expected.ct_eq(provided).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(csrf: &str) -> SessionRecord {
        SessionRecord {
            user_id: 1,
            username: "gail".to_string(),
            email: None,
            role: "sales".to_string(),
            must_change_password: false,
            csrf_token: csrf.to_string(),
            expires_at: "2099-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_matching_token_passes() {
        assert!(validate_csrf(Some(&session("abc123")), Some("abc123")));
    }

    #[test]
    fn test_missing_pieces_fail() {
        assert!(!validate_csrf(None, Some("abc123")));
        assert!(!validate_csrf(Some(&session("abc123")), None));
        assert!(!validate_csrf(Some(&session("")), Some("")));
    }

    #[test]
    fn test_other_sessions_token_fails() {
        let mine = session("token-of-session-a");
        assert!(!validate_csrf(Some(&mine), Some("token-of-session-b")));
        assert!(!validate_csrf(Some(&mine), Some("token-of-session-")));
    }
}
