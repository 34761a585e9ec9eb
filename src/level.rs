//! Authorization and authentication levels.
//!
//! A [`Level`] is what a rule (or the default policy) demands from a request.
//! An [`AuthenticationLevel`] is what the caller currently holds. The two are
//! compared with [`is_auth_level_sufficient`].

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Policy name for [`Level::Bypass`].
pub const POLICY_BYPASS: &str = "bypass";
/// Policy name for [`Level::OneFactor`].
pub const POLICY_ONE_FACTOR: &str = "one_factor";
/// Policy name for [`Level::TwoFactor`].
pub const POLICY_TWO_FACTOR: &str = "two_factor";
/// Policy name for [`Level::Denied`].
pub const POLICY_DENY: &str = "deny";

/// Authorization level required to access an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Level {
    /// No authentication required.
    Bypass = 0,
    /// A single factor is required.
    OneFactor = 1,
    /// Two factors are required.
    TwoFactor = 2,
    /// Access is never granted.
    #[default]
    Denied = 3,
}

impl Level {
    /// All canonical levels, in order.
    pub const ALL: [Level; 4] = [Level::Bypass, Level::OneFactor, Level::TwoFactor, Level::Denied];

    /// Convert a policy name into a level.
    ///
    /// Unknown names map to [`Level::Denied`]. Use [`str::parse`] when an
    /// unknown name should be reported instead.
    ///
    /// ```
    /// use proxy_authz::Level;
    ///
    /// assert_eq!(Level::from_policy_name("two_factor"), Level::TwoFactor);
    /// assert_eq!(Level::from_policy_name("whatever"), Level::Denied);
    /// ```
    pub fn from_policy_name(name: &str) -> Self {
        name.parse().unwrap_or(Level::Denied)
    }

    /// The policy name of this level.
    pub fn policy_name(self) -> &'static str {
        match self {
            Level::Bypass => POLICY_BYPASS,
            Level::OneFactor => POLICY_ONE_FACTOR,
            Level::TwoFactor => POLICY_TWO_FACTOR,
            Level::Denied => POLICY_DENY,
        }
    }

    /// Check whether the caller's authentication level satisfies this level.
    pub fn is_satisfied_by(self, current: AuthenticationLevel) -> bool {
        is_auth_level_sufficient(current, self)
    }
}

/// Out-of-range raw values collapse to [`Level::Denied`].
impl From<u8> for Level {
    fn from(value: u8) -> Self {
        match value {
            0 => Level::Bypass,
            1 => Level::OneFactor,
            2 => Level::TwoFactor,
            _ => Level::Denied,
        }
    }
}

/// Error returned when parsing an unknown policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl FromStr for Level {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            POLICY_BYPASS => Ok(Level::Bypass),
            POLICY_ONE_FACTOR => Ok(Level::OneFactor),
            POLICY_TWO_FACTOR => Ok(Level::TwoFactor),
            POLICY_DENY => Ok(Level::Denied),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.policy_name())
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.policy_name())
    }
}

/// Authentication level currently held by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AuthenticationLevel {
    /// No factor presented.
    #[default]
    NotAuthenticated,
    /// First factor verified.
    OneFactor,
    /// Both factors verified.
    TwoFactor,
}

impl AuthenticationLevel {
    /// Parse the level names used by session headers.
    ///
    /// Accepts `one_factor`/`1` and `two_factor`/`2`; anything else is
    /// treated as not authenticated.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim() {
            "one_factor" | "1" => AuthenticationLevel::OneFactor,
            "two_factor" | "2" => AuthenticationLevel::TwoFactor,
            _ => AuthenticationLevel::NotAuthenticated,
        }
    }
}

impl fmt::Display for AuthenticationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthenticationLevel::NotAuthenticated => "not_authenticated",
            AuthenticationLevel::OneFactor => "one_factor",
            AuthenticationLevel::TwoFactor => "two_factor",
        })
    }
}

/// Check whether `current` satisfies the `required` authorization level.
///
/// `Denied` is never satisfied and `Bypass` always is.
pub fn is_auth_level_sufficient(current: AuthenticationLevel, required: Level) -> bool {
    match required {
        Level::Bypass => true,
        Level::OneFactor => current >= AuthenticationLevel::OneFactor,
        Level::TwoFactor => current >= AuthenticationLevel::TwoFactor,
        Level::Denied => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_names_round_trip() {
        for level in Level::ALL {
            assert_eq!(Level::from_policy_name(level.policy_name()), level);
        }
    }

    #[test]
    fn test_unknown_policy_is_denied() {
        assert_eq!(Level::from_policy_name("allow"), Level::Denied);
        assert_eq!(Level::from_policy_name(""), Level::Denied);
        assert!("allow".parse::<Level>().is_err());
    }

    #[test]
    fn test_out_of_range_value() {
        let level = Level::from(42u8);
        assert_eq!(level, Level::Denied);
        assert_eq!(level.policy_name(), "deny");
        assert_eq!(Level::from(1u8), Level::OneFactor);
    }

    #[test]
    fn test_sufficiency() {
        use AuthenticationLevel as A;

        assert!(!is_auth_level_sufficient(A::NotAuthenticated, Level::Denied));
        assert!(!is_auth_level_sufficient(A::TwoFactor, Level::Denied));
        assert!(!is_auth_level_sufficient(A::OneFactor, Level::TwoFactor));
        assert!(is_auth_level_sufficient(A::NotAuthenticated, Level::Bypass));
        assert!(is_auth_level_sufficient(A::TwoFactor, Level::Bypass));
        assert!(is_auth_level_sufficient(A::TwoFactor, Level::TwoFactor));
        assert!(is_auth_level_sufficient(A::OneFactor, Level::OneFactor));
        assert!(!is_auth_level_sufficient(A::NotAuthenticated, Level::OneFactor));
    }

    #[test]
    fn test_serialize_as_policy_name() {
        let json = serde_json::to_string(&Level::OneFactor).unwrap();
        assert_eq!(json, "\"one_factor\"");
    }

    #[test]
    fn test_parse_authentication_level() {
        assert_eq!(AuthenticationLevel::parse_lenient("two_factor"), AuthenticationLevel::TwoFactor);
        assert_eq!(AuthenticationLevel::parse_lenient(" 1 "), AuthenticationLevel::OneFactor);
        assert_eq!(AuthenticationLevel::parse_lenient("x"), AuthenticationLevel::NotAuthenticated);
    }
}
