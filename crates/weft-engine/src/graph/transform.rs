use serde::{Deserialize, Serialize};

/// Local string operations available to `transform` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOp {
    Uppercase,
    Lowercase,
    Trim,
    /// Uppercase the first letter of every word.
    Capitalize,
    Reverse,
    WordCount,
    Identity,
}

impl TransformOp {
    pub fn apply(&self, input: &str) -> String {
        match self {
            Self::Uppercase => input.to_uppercase(),
            Self::Lowercase => input.to_lowercase(),
            Self::Trim => input.trim().to_string(),
            Self::Capitalize => capitalize_words(input),
            Self::Reverse => input.chars().rev().collect(),
            Self::WordCount => input.split_whitespace().count().to_string(),
            Self::Identity => input.to_string(),
        }
    }
}

fn capitalize_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for c in input.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.push(c);
        }
    }
    out
}
