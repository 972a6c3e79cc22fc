use crate::catalog::ParameterDefinition;
use regex::Regex;
use std::sync::OnceLock;

const EDIT_PATTERNS: &[&str] = &[
    r"(?i)^(?:set|change|make|update|put)\s+(?:the\s+)?(?P<name>.+?)\s+(?:to|=|as|into)\s+(?P<value>.+)$",
    r"(?i)^(?:use|with)\s+(?P<value>.+?)\s+(?:for|as)\s+(?:the\s+)?(?P<name>.+)$",
    r"(?i)^(?:the\s+)?(?P<name>[a-z][a-z0-9_ ]*?)\s*[=:]\s*(?P<value>.+)$",
    r"(?i)^(?:the\s+)?(?P<name>[a-z][a-z0-9_ ]*?)\s+(?:should|must|needs to)\s+be\s+(?P<value>.+)$",
];
const LEADING_FILLER: &[&str] = &["please ", "also ", "and ", "then ", "now ", "just "];
const TRAILING_FILLER: &[&str] = &[" please", " instead", " thanks"];
/// Name tokens that qualify a parameter rather than identify it.
const GENERIC_NAME_TOKENS: &[&str] = &[
    "in", "of", "the", "a", "to", "for", "name", "value", "mm", "m", "cm", "ft", "feet", "foot",
    "meter", "meters", "millimeters", "inch", "inches", "count", "number", "num", "id", "type",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEdit {
    pub name_phrase: String,
    pub value_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    Unique(usize),
    Ambiguous(Vec<String>),
    NoMatch,
}

fn edit_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        EDIT_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

const CLAUSE_JOINERS: &[&str] = &[" and ", " then "];

/// Splits on `,` `;` newlines and the words `and`/`then`, outside quotes.
fn split_clauses(message: &str) -> Vec<String> {
    // ASCII lowercasing keeps byte offsets, so `lowered` can be sliced in step.
    let lowered = message.to_ascii_lowercase();
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut offset = 0;
    while let Some(ch) = message[offset..].chars().next() {
        let mut advance = ch.len_utf8();
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                }
                current.push(ch);
            }
            // an apostrophe only opens a quote at a word start
            None if ch == '"'
                || (ch == '\'' && (current.is_empty() || current.ends_with(' '))) =>
            {
                quote = Some(ch);
                current.push(ch);
            }
            None if matches!(ch, ',' | ';' | '\n') => {
                clauses.push(std::mem::take(&mut current));
            }
            None => match CLAUSE_JOINERS
                .iter()
                .find(|joiner| lowered[offset..].starts_with(*joiner))
            {
                Some(joiner) => {
                    clauses.push(std::mem::take(&mut current));
                    current.push(' ');
                    advance = joiner.len();
                }
                None => current.push(ch),
            },
        }
        offset += advance;
    }
    clauses.push(current);
    clauses
        .into_iter()
        .map(|clause| clause.trim().to_string())
        .filter(|clause| !clause.is_empty())
        .collect()
}

fn strip_filler(clause: &str) -> String {
    let mut text = clause.trim().to_string();
    loop {
        let lowered = text.to_ascii_lowercase();
        match LEADING_FILLER.iter().find(|filler| lowered.starts_with(*filler)) {
            Some(filler) => text = text[filler.len()..].trim_start().to_string(),
            None => break,
        }
    }
    text
}

fn clean_value(raw: &str) -> String {
    let mut value = raw
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .trim()
        .to_string();
    loop {
        let lowered = value.to_ascii_lowercase();
        match TRAILING_FILLER.iter().find(|filler| lowered.ends_with(*filler)) {
            Some(filler) => {
                value.truncate(value.len() - filler.len());
                value = value.trim_end().to_string();
            }
            None => break,
        }
    }
    value
}

fn edit_in(clause: &str) -> Option<ChatEdit> {
    let clause = strip_filler(clause);
    edit_patterns().iter().find_map(|pattern| {
        let captures = pattern.captures(&clause)?;
        let name = captures.name("name")?.as_str().trim().to_string();
        let value = clean_value(captures.name("value")?.as_str());
        (!name.is_empty() && !value.is_empty()).then_some(ChatEdit {
            name_phrase: name,
            value_text: value,
        })
    })
}

/// A chat reply split into parameter edits and the clauses that set nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReply {
    pub edits: Vec<ChatEdit>,
    /// Clauses left over once edits are taken out; commands such as "run it"
    /// are only ever read from these.
    pub remainder: Vec<String>,
}

impl ParsedReply {
    pub fn command_text(&self) -> String {
        self.remainder.join(", ")
    }
}

pub fn parse_reply(message: &str) -> ParsedReply {
    let mut parsed = ParsedReply::default();
    for clause in split_clauses(message) {
        match edit_in(&clause) {
            Some(edit) => parsed.edits.push(edit),
            None => parsed.remainder.push(clause),
        }
    }
    parsed
}

/// Deterministic `name -> value` edits found in a chat message.
pub fn extract_edits(message: &str) -> Vec<ChatEdit> {
    parse_reply(message).edits
}

/// `heightInMeters` -> `[height, in, meters]`, `level_name` -> `[level, name]`.
pub fn name_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && previous_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        previous_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        current.push(ch.to_ascii_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn significant_tokens(name: &str) -> Vec<String> {
    let tokens = name_tokens(name);
    let significant = tokens
        .iter()
        .filter(|token| !GENERIC_NAME_TOKENS.contains(&token.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    if significant.is_empty() {
        tokens
    } else {
        significant
    }
}

fn token_similar(left: &str, right: &str, threshold: f64) -> bool {
    left == right
        || left.trim_end_matches('s') == right.trim_end_matches('s')
        || strsim::jaro_winkler(left, right) >= threshold
}

fn joined(name: &str) -> String {
    name_tokens(name).concat()
}

/// Maps a chat phrase onto one parameter. Two parameters matching equally well
/// are reported as ambiguous, never picked between.
pub fn match_parameter(
    phrase: &str,
    definitions: &[ParameterDefinition],
    threshold: f64,
) -> NameMatch {
    let phrase_joined = joined(phrase);
    if phrase_joined.is_empty() {
        return NameMatch::NoMatch;
    }

    let exact = definitions
        .iter()
        .enumerate()
        .filter(|(_, definition)| joined(&definition.name) == phrase_joined)
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    if let Some(result) = decide(&exact, definitions) {
        return result;
    }

    let phrase_tokens = name_tokens(phrase);
    let mut best_width = 0;
    let mut covered = Vec::new();
    for (idx, definition) in definitions.iter().enumerate() {
        let wanted = significant_tokens(&definition.name);
        let all_present = wanted.iter().all(|token| {
            phrase_tokens
                .iter()
                .any(|candidate| token_similar(token, candidate, threshold))
        });
        if !all_present {
            continue;
        }
        match wanted.len().cmp(&best_width) {
            std::cmp::Ordering::Greater => {
                best_width = wanted.len();
                covered = vec![idx];
            }
            std::cmp::Ordering::Equal => covered.push(idx),
            std::cmp::Ordering::Less => {}
        }
    }
    if let Some(result) = decide(&covered, definitions) {
        return result;
    }

    let mut scored = definitions
        .iter()
        .enumerate()
        .map(|(idx, definition)| {
            (
                idx,
                strsim::jaro_winkler(&phrase_joined, &joined(&definition.name)),
            )
        })
        .filter(|(_, score)| *score >= threshold)
        .collect::<Vec<_>>();
    scored.sort_by(|left, right| {
        right
            .1
            .partial_cmp(&left.1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top = scored.first().map(|(_, score)| *score).unwrap_or_default();
    let close = scored
        .iter()
        .filter(|(_, score)| top - *score < 0.01)
        .map(|(idx, _)| *idx)
        .collect::<Vec<_>>();
    decide(&close, definitions).unwrap_or(NameMatch::NoMatch)
}

fn decide(indices: &[usize], definitions: &[ParameterDefinition]) -> Option<NameMatch> {
    match indices {
        [] => None,
        [only] => Some(NameMatch::Unique(*only)),
        many => Some(NameMatch::Ambiguous(
            many.iter()
                .map(|idx| definitions[*idx].name.clone())
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ParamType;
    use serde_json::Value;

    fn defs(names: &[&str]) -> Vec<ParameterDefinition> {
        names
            .iter()
            .map(|name| ParameterDefinition::new(name, ParamType::String, Value::Null))
            .collect()
    }

    fn edit(name: &str, value: &str) -> ChatEdit {
        ChatEdit {
            name_phrase: name.to_string(),
            value_text: value.to_string(),
        }
    }

    #[test]
    fn edits_are_extracted_from_common_phrasings() {
        assert_eq!(
            extract_edits("Set the wall height to 4.5, and level = Level 2"),
            vec![edit("wall height", "4.5"), edit("level", "Level 2")]
        );
        assert_eq!(
            extract_edits("please change mark to \"A, B\" then run it"),
            vec![edit("mark", "\"A, B\"")]
        );
        assert_eq!(
            extract_edits("offset should be 200 please."),
            vec![edit("offset", "200")]
        );
        assert_eq!(extract_edits("use 3 for the count"), vec![edit("count", "3")]);
        assert!(extract_edits("run it").is_empty());
    }

    #[test]
    fn edit_clauses_are_separated_from_commands() {
        let parsed = parse_reply("set flipped to no and run it");
        assert_eq!(parsed.edits, vec![edit("flipped", "no")]);
        assert_eq!(parsed.remainder, vec!["run it".to_string()]);

        let edit_only = parse_reply("set start level to Level 2");
        assert_eq!(edit_only.edits, vec![edit("start level", "Level 2")]);
        assert!(edit_only.remainder.is_empty());
        assert_eq!(edit_only.command_text(), "");

        assert_eq!(parse_reply("ok, continue").command_text(), "ok, continue");
    }

    #[test]
    fn clause_joiners_match_case_insensitively_around_non_ascii_text() {
        assert_eq!(
            split_clauses("niveau = Étage 2 AND run it THEN stop"),
            vec!["niveau = Étage 2", "run it", "stop"]
        );
        assert_eq!(split_clauses("mark = \"A and B\""), vec!["mark = \"A and B\""]);
        let long = "x".repeat(20_000);
        assert_eq!(split_clauses(&long), vec![long.clone()]);
    }

    #[test]
    fn name_tokens_split_camel_and_snake_case() {
        assert_eq!(name_tokens("heightInMeters"), vec!["height", "in", "meters"]);
        assert_eq!(name_tokens("level_name"), vec!["level", "name"]);
        assert_eq!(name_tokens("Wall Height"), vec!["wall", "height"]);
    }

    #[test]
    fn near_miss_names_map_onto_one_parameter() {
        let definitions = defs(&["heightInMeters", "levelName", "offset"]);
        assert_eq!(
            match_parameter("wall height", &definitions, 0.82),
            NameMatch::Unique(0)
        );
        assert_eq!(match_parameter("level", &definitions, 0.82), NameMatch::Unique(1));
        assert_eq!(match_parameter("ofset", &definitions, 0.82), NameMatch::Unique(2));
        assert_eq!(match_parameter("colour", &definitions, 0.82), NameMatch::NoMatch);
    }

    #[test]
    fn equally_good_matches_are_ambiguous() {
        let definitions = defs(&["heightInMeters", "heightInFeet"]);
        assert_eq!(
            match_parameter("height", &definitions, 0.82),
            NameMatch::Ambiguous(vec!["heightInMeters".to_string(), "heightInFeet".to_string()])
        );
        assert_eq!(
            match_parameter("height in feet", &definitions, 0.82),
            NameMatch::Unique(1)
        );
    }

    #[test]
    fn more_specific_parameters_win() {
        let definitions = defs(&["height", "heightOffset"]);
        assert_eq!(
            match_parameter("height offset", &definitions, 0.82),
            NameMatch::Unique(1)
        );
        assert_eq!(match_parameter("height", &definitions, 0.82), NameMatch::Unique(0));
    }
}
