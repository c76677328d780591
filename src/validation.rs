//! User input validation
//!
//! Cleaning and validation rules for the two search inputs (Arabic student
//! names and 15-digit exam numbers) plus the spam heuristic that guards the
//! name search. Regex patterns are compile-time validated via `lazy_regex!`.

#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::utils::collapse_whitespace;

/// Exam numbers are always exactly this many digits
pub const EXAM_NUMBER_LEN: usize = 15;

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 50;
const SPAM_MAX_LEN: usize = 100;
const SPAM_REPEAT_RUN: usize = 6;
const SPAM_DIGIT_RATIO: f64 = 0.7;

/// Arabic script (base, supplement, extended-A blocks) plus whitespace,
/// matched against the whole string.
static RE_ARABIC_NAME: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^[\u{0600}-\u{06FF}\u{0750}-\u{077F}\u{08A0}-\u{08FF}\s]+$");

/// Strip everything but digits and validate the result as an exam number.
///
/// Accepts any punctuation/whitespace decoration (`"272-591-110-430-082"`),
/// returns the bare digits only when exactly 15 remain.
#[must_use]
pub fn clean_exam_number(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(char::is_ascii_digit).collect();
    if cleaned.len() == EXAM_NUMBER_LEN {
        Some(cleaned)
    } else {
        None
    }
}

/// Normalize an Arabic name for searching.
///
/// Trims, collapses internal whitespace, then requires 2..=50 characters of
/// Arabic script. Names with any non-Arabic character are rejected outright.
#[must_use]
pub fn clean_arabic_name(raw: &str) -> Option<String> {
    let cleaned = collapse_whitespace(raw);
    if cleaned.is_empty() {
        return None;
    }

    let char_count = cleaned.graphemes(true).count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&char_count) {
        return None;
    }

    if !RE_ARABIC_NAME.is_match(&cleaned) {
        return None;
    }

    Some(cleaned)
}

/// Heuristic spam check, run only on input that already passed validation.
///
/// Flags: a run of 6+ identical characters, more than 100 characters total,
/// or digits making up more than 70% of the string.
#[must_use]
pub fn is_spam_input(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() > SPAM_MAX_LEN {
        return true;
    }

    // Longest run of one character (the regex crate has no backreferences)
    let mut run = 1usize;
    for pair in chars.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            if run >= SPAM_REPEAT_RUN {
                return true;
            }
        } else {
            run = 1;
        }
    }

    // Digit-heavy mixed input is spam; an all-digit string is an exam number
    // typed into the wrong field and gets its own validation error instead.
    let digits = chars.iter().filter(|c| c.is_ascii_digit()).count();
    digits < chars.len() && (digits as f64) > (chars.len() as f64) * SPAM_DIGIT_RATIO
}

/// Check a governorate against the currently known list.
#[must_use]
pub fn validate_governorate(name: &str, valid: &[String]) -> bool {
    let name = name.trim();
    !name.is_empty() && valid.iter().any(|g| g == name)
}
