use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is at fault for a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Problem in the project: code, dependencies, versions, configuration
    UserError,
    /// Problem in the platform: resources, network, runtime, LLM backend
    ServiceError,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::UserError => "USER_ERROR",
            ErrorClass::ServiceError => "SERVICE_ERROR",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infrastructure symptoms. Checked first: a full disk masquerades as all
/// kinds of project errors further down the log.
pub const SERVICE_ERROR_KEYWORDS: &[&str] = &[
    "no space left on device",
    "out of memory",
    "oomkilled",
    "cannot allocate memory",
    "killed signal",
    "cannot connect to the docker daemon",
    "docker daemon",
    "permission denied while trying to connect",
    "toomanyrequests",
    "rate limit",
    "pull access denied",
    "manifest unknown",
    "tls handshake timeout",
    "i/o timeout",
    "connection refused",
    "connection reset",
    "etimedout",
    "econnreset",
    "econnrefused",
    "eai_again",
    "getaddrinfo",
    "network is unreachable",
    "temporary failure in name resolution",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "internal server error",
    "too many requests",
    "status code 429",
    "status 429",
    "error 429",
    "[timeout]",
];

/// Project symptoms: modules, code, versions and configuration.
pub const USER_ERROR_KEYWORDS: &[&str] = &[
    "cannot find module",
    "module not found",
    "can't resolve",
    "missing script",
    "syntaxerror",
    "syntax error",
    "typeerror",
    "referenceerror",
    "unexpected token",
    "is not defined",
    "eresolve",
    "peer dep",
    "unsupported engine",
    "engine \"node\" is incompatible",
    "could not resolve dependency",
    "notarget",
    "no matching version",
    "404 not found",
    "enoent",
    "no such file or directory",
    "package.json",
    "lock file",
    "lockfile",
    "in sync",
    "does not satisfy",
    "failed to compile",
    "compilation failed",
    "error ts",
    "eslint",
    "invalid configuration",
    "config file",
    "exited with code",
];

/// Attributes a terminal failure report to the project or the platform.
///
/// Pure and deterministic. Messages matching no keyword are attributed to the
/// platform, so unknown failures get looked at by operators rather than
/// bounced back to users.
pub fn classify_failure(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if SERVICE_ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return ErrorClass::ServiceError;
    }
    if USER_ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return ErrorClass::UserError;
    }
    ErrorClass::ServiceError
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_module_is_user_error() {
        assert_eq!(
            classify_failure("Error: Cannot find module 'react-dom'"),
            ErrorClass::UserError
        );
    }

    #[test]
    fn test_disk_full_is_service_error() {
        assert_eq!(
            classify_failure("npm ERR! nospc ENOSPC: no space left on device, write"),
            ErrorClass::ServiceError
        );
    }

    #[test]
    fn test_service_keywords_win_over_user_keywords() {
        let message = "Cannot find module 'x'\nwrite /app/node_modules: no space left on device";
        assert_eq!(classify_failure(message), ErrorClass::ServiceError);
    }

    #[test]
    fn test_unmatched_defaults_to_service_error() {
        assert_eq!(classify_failure("something odd happened"), ErrorClass::ServiceError);
        assert_eq!(classify_failure(""), ErrorClass::ServiceError);
    }

    #[test]
    fn test_plain_nonzero_exit_is_user_error() {
        assert_eq!(
            classify_failure("build command exited with code 1\nError: build step returned 2"),
            ErrorClass::UserError
        );
    }

    #[test]
    fn test_nonzero_exit_on_full_disk_stays_service_error() {
        assert_eq!(
            classify_failure("build command exited with code 1\nENOSPC: no space left on device"),
            ErrorClass::ServiceError
        );
    }

    #[test]
    fn test_upstream_throttling_and_gateway_errors_are_service_errors() {
        for message in [
            "npm ERR! 429 Too Many Requests - GET https://registry.npmjs.org/react",
            "request failed with status code 429",
            "504 Gateway Timeout",
            "502 Bad Gateway",
        ] {
            assert_eq!(classify_failure(message), ErrorClass::ServiceError, "{}", message);
        }
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify_failure("SYNTAXERROR: Unexpected"), ErrorClass::UserError);
    }

    #[test]
    fn test_timeout_is_service_error() {
        let failure = crate::error::Failure::timeout(120, "");
        assert_eq!(classify_failure(&failure.message), ErrorClass::ServiceError);
    }

    #[test]
    fn test_keyword_tables_are_disjoint_and_lowercase() {
        for keyword in SERVICE_ERROR_KEYWORDS {
            assert_eq!(*keyword, keyword.to_lowercase());
            assert!(!USER_ERROR_KEYWORDS.contains(keyword), "{} in both", keyword);
        }
        for keyword in USER_ERROR_KEYWORDS {
            assert_eq!(*keyword, keyword.to_lowercase());
        }
    }

    #[test]
    fn test_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorClass::UserError).unwrap(),
            "\"USER_ERROR\""
        );
        assert_eq!(ErrorClass::ServiceError.to_string(), "SERVICE_ERROR");
    }
}
