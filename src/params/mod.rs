pub mod coerce;
pub mod extract;
pub mod intent;
pub mod negotiator;
pub mod visibility;

pub use coerce::{coerce_value, ClarificationNeeded, HeuristicCoercer, ValueCoercer};
pub use extract::{extract_edits, match_parameter, parse_reply, ChatEdit, NameMatch, ParsedReply};
pub use negotiator::{
    defaults, parameter_lines, parameter_summary, MergeOutcome, Negotiator, ParameterValue,
    Provenance, Unresolved,
};
pub use visibility::{has_conditional_parameters, is_visible, parse_rule, VisibilityRule};
