use std::fmt;

const POSITIVE_KEYWORDS: &[&str] = &[
    "better", "improved", "improving", "good", "well", "healing", "resolved",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "worse", "worsening", "bad", "pain", "painful", "not improving", "serious",
];

/// Direction of a patient's self-reported progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Worsening,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "Improving",
            Trend::Worsening => "Worsening",
            Trend::Stable => "Stable",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword heuristic over an update's text
///
/// Each keyword counts once if it occurs anywhere in the lowercased text, so
/// overlapping phrases ("not improving") score on both sides.
pub fn assess_trend(update: &str) -> Trend {
    let text = update.to_lowercase();
    let score = |keywords: &[&str]| keywords.iter().filter(|k| text.contains(*k)).count();

    let positive = score(POSITIVE_KEYWORDS);
    let negative = score(NEGATIVE_KEYWORDS);

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Trend::Improving,
        std::cmp::Ordering::Less => Trend::Worsening,
        std::cmp::Ordering::Equal => Trend::Stable,
    }
}
