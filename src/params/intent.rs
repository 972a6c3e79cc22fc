//! Fixed reply vocabulary. Deliberately narrow: these decide whether anything
//! runs, so they never guess from free-form language.

const AFFIRM_WORDS: &[&str] = &[
    "yes", "y", "yeah", "yep", "yup", "sure", "ok", "okay", "correct", "confirm", "confirmed",
    "affirmative", "absolutely", "definitely",
];
const AFFIRM_PHRASES: &[&[&str]] = &[
    &["go", "ahead"],
    &["do", "it"],
    &["sounds", "good"],
    &["looks", "good"],
    &["that", "one"],
    &["lets", "go"],
];
const DECLINE_WORDS: &[&str] = &["no", "nope", "cancel", "abort", "stop", "nevermind"];
const DECLINE_PHRASES: &[&[&str]] = &[&["never", "mind"], &["not", "now"]];
const RUN_WORDS: &[&str] = &["run", "execute", "launch", "start", "proceed"];
const RUN_PHRASES: &[&[&str]] = &[&["go", "ahead"], &["do", "it"], &["lets", "go"]];
const NEGATIONS: &[&str] = &["dont", "not", "never"];
const PROCEED_WORDS: &[&str] = &["proceed", "continue", "next", "ready", "done"];
const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "which", "who", "when", "where", "can", "could", "does", "is", "are",
    "will", "would", "should", "shall",
];

pub(crate) fn words(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .replace(['\'', '\u{2019}'], "")
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &[&str]) -> bool {
    words
        .windows(phrase.len())
        .any(|window| window.iter().zip(phrase).all(|(word, want)| word == want))
}

fn hits(words: &[String], singles: &[&str], phrases: &[&[&str]]) -> bool {
    words.iter().any(|word| singles.contains(&word.as_str()))
        || phrases.iter().any(|phrase| contains_phrase(words, phrase))
}

/// A run word preceded (within two words) by a negation.
fn negated_run(words: &[String]) -> bool {
    words.iter().enumerate().any(|(idx, word)| {
        RUN_WORDS.contains(&word.as_str())
            && words[idx.saturating_sub(2)..idx]
                .iter()
                .any(|prior| NEGATIONS.contains(&prior.as_str()))
    })
}

pub fn is_affirmation(text: &str) -> bool {
    let words = words(text);
    !is_decline_words(&words) && hits(&words, AFFIRM_WORDS, AFFIRM_PHRASES)
}

fn is_decline_words(words: &[String]) -> bool {
    hits(words, DECLINE_WORDS, DECLINE_PHRASES) || negated_run(words)
}

pub fn is_decline(text: &str) -> bool {
    is_decline_words(&words(text))
}

/// Explicit request to execute now.
pub fn has_run_intent(text: &str) -> bool {
    let words = words(text);
    !is_decline_words(&words) && hits(&words, RUN_WORDS, RUN_PHRASES)
}

/// Short "proceed"-style reply used to advance past mode selection.
pub fn is_proceed(text: &str) -> bool {
    let words = words(text);
    words.len() <= 3 && words.iter().any(|word| PROCEED_WORDS.contains(&word.as_str()))
}

pub fn is_question(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.ends_with('?')
        || words(trimmed)
            .first()
            .is_some_and(|word| QUESTION_WORDS.contains(&word.as_str()))
}

/// Replies that steer the conversation rather than carry a parameter value.
pub fn is_control_phrase(text: &str) -> bool {
    let words = words(text);
    is_decline_words(&words)
        || hits(&words, AFFIRM_WORDS, AFFIRM_PHRASES)
        || hits(&words, RUN_WORDS, RUN_PHRASES)
        || (words.len() <= 3 && words.iter().any(|word| PROCEED_WORDS.contains(&word.as_str())))
}
