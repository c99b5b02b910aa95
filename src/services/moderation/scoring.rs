//! Heuristic content signals, each scored independently.

use regex::Regex;
use std::sync::OnceLock;

/// One moderation signal over a piece of text.
pub trait ContentScorer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

const PROFANITY_WORDS: [&str; 6] = ["spam", "scam", "fake", "fraud", "cheat", "steal"];

const TOXIC_WORDS: [&str; 10] = [
    "hate", "stupid", "idiot", "kill", "die", "threat", "violence", "attack", "hurt", "destroy",
];

const POSITIVE_WORDS: [&str; 10] = [
    "good",
    "great",
    "excellent",
    "amazing",
    "wonderful",
    "fantastic",
    "awesome",
    "perfect",
    "love",
    "like",
];

const NEGATIVE_WORDS: [&str; 10] = [
    "bad",
    "terrible",
    "awful",
    "horrible",
    "hate",
    "dislike",
    "worst",
    "poor",
    "disappointing",
    "sad",
];

const SPAM_PHRASES: [&str; 4] = [
    r"(?i)\b(buy now|click here|limited time|act fast)\b",
    r"(?i)\b(100% guaranteed|risk free|no obligation)\b",
    r"(?i)\b(make money fast|work from home|easy money)\b",
    r"(?i)\b(free trial|special offer|exclusive deal)\b",
];

fn lowercase_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn hits(words: &[String], list: &[&str]) -> usize {
    words.iter().filter(|w| list.contains(&w.as_str())).count()
}

/// Listed words per word, ×5, capped at 1.
pub struct ProfanityScorer;

impl ContentScorer for ProfanityScorer {
    fn score(&self, text: &str) -> f64 {
        let words = lowercase_words(text);
        if words.is_empty() {
            return 0.0;
        }
        (hits(&words, &PROFANITY_WORDS) as f64 / words.len() as f64 * 5.0).min(1.0)
    }
}

/// Fraction of five spam indicators present.
pub struct SpamScorer {
    phrases: Vec<Regex>,
}

impl SpamScorer {
    pub fn new() -> Self {
        let phrases = SPAM_PHRASES
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!(pattern = p, error = %e, "Invalid spam pattern");
                    None
                }
            })
            .collect();
        Self { phrases }
    }
}

impl Default for SpamScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Some character repeated four or more times in a row.
fn has_char_run(text: &str, run: usize) -> bool {
    let mut previous = None;
    let mut count = 0;
    for c in text.chars() {
        if Some(c) == previous {
            count += 1;
        } else {
            previous = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }
    false
}

impl ContentScorer for SpamScorer {
    fn score(&self, text: &str) -> f64 {
        if text.is_empty() {
            return 0.0;
        }

        let mut indicators = self.phrases.iter().filter(|re| re.is_match(text)).count();

        let len = text.chars().count();
        if len > 10 {
            let caps = text.chars().filter(|c| c.is_uppercase()).count();
            if caps as f64 / len as f64 > 0.5 {
                indicators += 1;
            }
        }

        let punctuation = text.chars().filter(|c| matches!(c, '!' | '?')).count();
        if punctuation as f64 / len.max(1) as f64 > 0.1 {
            indicators += 1;
        }

        if has_char_run(text, 4) {
            indicators += 1;
        }

        (indicators as f64 / 5.0).min(1.0)
    }
}

/// Toxic words per word, ×10, capped at 1.
pub struct ToxicityScorer;

impl ContentScorer for ToxicityScorer {
    fn score(&self, text: &str) -> f64 {
        let words = lowercase_words(text);
        if words.is_empty() {
            return 0.0;
        }
        (hits(&words, &TOXIC_WORDS) as f64 / words.len() as f64 * 10.0).min(1.0)
    }
}

/// (positive − negative) per word, ×5, within [-1, 1].
pub struct SentimentScorer;

impl ContentScorer for SentimentScorer {
    fn score(&self, text: &str) -> f64 {
        let words = lowercase_words(text);
        if words.is_empty() {
            return 0.0;
        }
        let positive = hits(&words, &POSITIVE_WORDS) as f64;
        let negative = hits(&words, &NEGATIVE_WORDS) as f64;
        ((positive - negative) / words.len() as f64 * 5.0).clamp(-1.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContentScores {
    pub profanity: f64,
    pub spam: f64,
    pub toxicity: f64,
    pub sentiment: f64,
}

impl ContentScores {
    /// The highest of the signals that feed the risk level.
    pub fn max_risk_signal(&self) -> f64 {
        self.profanity.max(self.spam).max(self.toxicity)
    }
}

pub struct ScoringPipeline {
    profanity: Box<dyn ContentScorer>,
    spam: Box<dyn ContentScorer>,
    toxicity: Box<dyn ContentScorer>,
    sentiment: Box<dyn ContentScorer>,
}

impl Default for ScoringPipeline {
    fn default() -> Self {
        Self {
            profanity: Box::new(ProfanityScorer),
            spam: Box::new(SpamScorer::new()),
            toxicity: Box::new(ToxicityScorer),
            sentiment: Box::new(SentimentScorer),
        }
    }
}

impl ScoringPipeline {
    pub fn score(&self, text: &str) -> ContentScores {
        ContentScores {
            profanity: self.profanity.score(text),
            spam: self.spam.score(text),
            toxicity: self.toxicity.score(text),
            sentiment: self.sentiment.score(text),
        }
    }
}

/// Process-wide pipeline; spam patterns compile once.
pub fn pipeline() -> &'static ScoringPipeline {
    static PIPELINE: OnceLock<ScoringPipeline> = OnceLock::new();
    PIPELINE.get_or_init(ScoringPipeline::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn profanity_scales_by_five() {
        assert_eq!(ProfanityScorer.score(""), 0.0);
        // 1 hit in 10 words -> 0.5
        let text = "this is a scam and i want my money back";
        assert!(approx(ProfanityScorer.score(text), 0.5));
        assert_eq!(ProfanityScorer.score("fraud fraud"), 1.0);
    }

    #[test]
    fn profanity_matches_whole_words_only() {
        assert_eq!(ProfanityScorer.score("scam!"), 0.0);
        assert_eq!(ProfanityScorer.score("SCAM"), 1.0);
    }

    #[test]
    fn spam_indicators() {
        let scorer = SpamScorer::new();
        assert_eq!(scorer.phrases.len(), 4);
        assert_eq!(scorer.score("Nice kitchen remodel, thanks"), 0.0);
        // phrase only
        assert!(approx(scorer.score("Please click here to see it"), 0.2));
        // two phrases, caps, punctuation, repeated chars
        let text = "BUY NOW!!!! FREE TRIAL!!!!";
        assert!(approx(scorer.score(text), 1.0));
    }

    #[test]
    fn char_runs() {
        assert!(has_char_run("heyyyy", 4));
        assert!(!has_char_run("heyyy", 4));
        assert!(!has_char_run("", 4));
    }

    #[test]
    fn toxicity_scales_by_ten() {
        assert!(approx(ToxicityScorer.score("you are an idiot and nothing else ok fine"), 1.0));
        let ten_words = "one two three four five six seven eight nine ten";
        assert_eq!(ToxicityScorer.score(ten_words), 0.0);
        let text = "one two three four five six seven eight nine stupid";
        assert!(approx(ToxicityScorer.score(text), 1.0));
        let twenty = format!("{} {}", ten_words, text);
        assert!(approx(ToxicityScorer.score(&twenty), 0.5));
    }

    #[test]
    fn sentiment_is_clamped() {
        assert_eq!(SentimentScorer.score("great"), 1.0);
        assert_eq!(SentimentScorer.score("awful"), -1.0);
        assert_eq!(SentimentScorer.score("good bad"), 0.0);
        let text = "the work was good overall but slow and late on most days";
        assert!(approx(SentimentScorer.score(text), 5.0 / 12.0));
    }

    #[test]
    fn pipeline_combines_signals() {
        let scores = pipeline().score("scam scam");
        assert_eq!(scores.profanity, 1.0);
        assert_eq!(scores.max_risk_signal(), 1.0);
        assert_eq!(pipeline().score("").max_risk_signal(), 0.0);
    }
}
