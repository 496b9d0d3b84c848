//! Classification of operation failures into outcome kinds.
//!
//! The kind of a failure decides whether the retry loop stops, or rotates to
//! another route and tries again after a backoff.

use std::fmt;

use crate::error::OperationError;

/// Classified result of a failed attempt.
///
/// Variants are listed in priority order: when a message matches keywords of
/// several kinds, the earliest one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The supplied secret was rejected.
    InvalidCredential,
    /// The target identity does not exist.
    NotFound,
    /// An out-of-band step (e.g. a one-time code) is needed.
    VerificationRequired,
    /// The remote service demands interactive verification.
    Challenge,
    /// The remote service is rate limiting.
    Throttled,
    /// The session or route was rejected outright.
    Blocked,
    /// Connection-level failure: timeout, reset, resolution, proxy handshake.
    TransientNetwork,
    /// Anything else.
    Unknown,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 8] = [
        OutcomeKind::InvalidCredential,
        OutcomeKind::NotFound,
        OutcomeKind::VerificationRequired,
        OutcomeKind::Challenge,
        OutcomeKind::Throttled,
        OutcomeKind::Blocked,
        OutcomeKind::TransientNetwork,
        OutcomeKind::Unknown,
    ];

    /// Whether this kind stops the retry loop immediately.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OutcomeKind::InvalidCredential
                | OutcomeKind::NotFound
                | OutcomeKind::VerificationRequired
                | OutcomeKind::Unknown
        )
    }

    /// Whether the route that produced this kind should be marked failed.
    pub fn blames_route(self) -> bool {
        !self.is_terminal()
    }

    /// Stable snake-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::InvalidCredential => "invalid_credential",
            OutcomeKind::NotFound => "not_found",
            OutcomeKind::VerificationRequired => "verification_required",
            OutcomeKind::Challenge => "challenge",
            OutcomeKind::Throttled => "throttled",
            OutcomeKind::Blocked => "blocked",
            OutcomeKind::TransientNetwork => "transient_network",
            OutcomeKind::Unknown => "unknown",
        }
    }

    /// Default human-readable message for a final outcome of this kind.
    pub fn describe(self) -> &'static str {
        match self {
            OutcomeKind::InvalidCredential => "The supplied credential was rejected",
            OutcomeKind::NotFound => "The requested identity does not exist",
            OutcomeKind::VerificationRequired => "An additional verification code is required",
            OutcomeKind::Challenge => {
                "The service requires an interactive security challenge"
            }
            OutcomeKind::Throttled => "Too many attempts. Please wait a few minutes",
            OutcomeKind::Blocked => "The service rejected the session. Please try again later",
            OutcomeKind::TransientNetwork => "Network error while contacting the service",
            OutcomeKind::Unknown => "Unexpected error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword table, in priority order. Matching is case-insensitive.
pub const KEYWORDS: &[(OutcomeKind, &[&str])] = &[
    (
        OutcomeKind::InvalidCredential,
        &[
            "bad password",
            "badpassword",
            "incorrect password",
            "wrong password",
            "invalid password",
            "invalid credential",
            "password you entered is incorrect",
        ],
    ),
    (
        OutcomeKind::NotFound,
        &[
            "user not found",
            "usernotfound",
            "does not exist",
            "doesn't exist",
            "no such user",
            "can't find an account",
        ],
    ),
    (
        OutcomeKind::VerificationRequired,
        &[
            "two-factor",
            "two factor",
            "twofactorrequired",
            "2fa required",
            "2fa code",
            "verification code",
            "one-time code",
        ],
    ),
    (
        OutcomeKind::Challenge,
        &["challenge", "captcha", "checkpoint"],
    ),
    (
        OutcomeKind::Throttled,
        &[
            "please wait",
            "pleasewaitfewminutes",
            "rate limit",
            "ratelimit",
            "too many requests",
            "too many attempts",
        ],
    ),
    (
        OutcomeKind::Blocked,
        &[
            "login required",
            "loginrequired",
            "login_required",
            "forbidden",
            "blocked",
            "feedback required",
        ],
    ),
    (
        OutcomeKind::TransientNetwork,
        &[
            "timeout",
            "timed out",
            "connection",
            "connect error",
            "reset by peer",
            "broken pipe",
            "unexpected eof",
            "dns",
            "name resolution",
            "failed to resolve",
            "network is unreachable",
            "no route to host",
            "proxy",
            "socks",
            "tunnel",
            "handshake",
        ],
    ),
];

/// Match a free-text failure message against [`KEYWORDS`].
pub fn classify_message(message: &str) -> OutcomeKind {
    let lower = message.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(kind, _)| *kind)
        .unwrap_or(OutcomeKind::Unknown)
}

/// Classify an operation failure.
///
/// An explicit category tag wins; route setup failures are always network
/// failures; everything else goes through the keyword table.
pub fn classify(error: &OperationError) -> OutcomeKind {
    match error {
        OperationError::RouteSetup(_) => OutcomeKind::TransientNetwork,
        OperationError::Failed {
            kind: Some(kind), ..
        } => *kind,
        OperationError::Failed { kind: None, message } => classify_message(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_retryable_split() {
        let terminal: Vec<_> = OutcomeKind::ALL.iter().filter(|k| k.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                &OutcomeKind::InvalidCredential,
                &OutcomeKind::NotFound,
                &OutcomeKind::VerificationRequired,
                &OutcomeKind::Unknown
            ]
        );
    }

    #[test]
    fn keyword_table_follows_priority_order() {
        let order: Vec<_> = KEYWORDS.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, OutcomeKind::ALL[..7].to_vec());
    }

    #[test]
    fn credential_beats_network_keywords() {
        let err = OperationError::message("Connection timeout while reporting: Bad password");
        assert_eq!(classify(&err), OutcomeKind::InvalidCredential);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(classify_message("PleaseWaitFewMinutes"), OutcomeKind::Throttled);
        assert_eq!(classify_message("ChallengeRequired"), OutcomeKind::Challenge);
        assert_eq!(classify_message("TwoFactorRequired"), OutcomeKind::VerificationRequired);
        assert_eq!(classify_message("LoginRequired"), OutcomeKind::Blocked);
        assert_eq!(classify_message("UserNotFound"), OutcomeKind::NotFound);
    }

    #[test]
    fn hex_identifiers_do_not_look_like_verification() {
        assert_eq!(
            classify_message("rate limit exceeded (request id 9c2fa41b)"),
            OutcomeKind::Throttled
        );
        assert_eq!(classify_message("2FA required for this account"), OutcomeKind::VerificationRequired);
    }

    #[test]
    fn network_failures_are_recognised() {
        for msg in [
            "operation timed out",
            "Connection reset by peer",
            "dns error: failed to lookup address",
            "SOCKS handshake failed",
            "error trying to connect: tunnel error",
        ] {
            assert_eq!(classify_message(msg), OutcomeKind::TransientNetwork, "{msg}");
        }
    }

    #[test]
    fn unrecognised_failures_fail_closed() {
        assert_eq!(classify_message("json decode error at line 1"), OutcomeKind::Unknown);
        assert!(OutcomeKind::Unknown.is_terminal());
    }

    #[test]
    fn tag_and_route_setup_bypass_keywords() {
        let tagged = OperationError::tagged(OutcomeKind::Throttled, "bad password");
        assert_eq!(classify(&tagged), OutcomeKind::Throttled);
        let setup = OperationError::route_setup("invalid password in proxy url");
        assert_eq!(classify(&setup), OutcomeKind::TransientNetwork);
    }
}
