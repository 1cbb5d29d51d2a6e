//! Build outcome and terminal error classification
//!
//! Both classifiers are driven by literal keyword tables so the match policy
//! can be audited and tested apart from the pipeline state machine.

pub mod error_class;
pub mod outcome;

pub use error_class::{classify_failure, ErrorClass, SERVICE_ERROR_KEYWORDS, USER_ERROR_KEYWORDS};
pub use outcome::{
    classify_build, Artifact, BuildObservation, BuildVerdict, FAILURE_PHRASES,
    FALLBACK_ARTIFACT_DIRS, SUCCESS_PHRASES,
};
