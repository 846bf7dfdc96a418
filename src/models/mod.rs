pub mod case;
pub mod enums;
pub mod identity;

pub use case::{parse_timestamp, Case, CaseAnalysis, CriterionResult};
pub use enums::{CaseStatus, Decision, ParseError, Role};
pub use identity::{Identity, SessionKey};
