// Keyword-lexicon sentiment scoring with a persistent score cache.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::db::Database;

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "amazing", "wonderful", "fantastic", "love", "like", "best",
    "awesome", "perfect", "happy", "glad", "thanks", "thank", "appreciate", "beautiful",
    "brilliant", "nice",
];

const NEGATIVE: &[&str] = &[
    "bad", "terrible", "awful", "horrible", "worst", "hate", "dislike", "poor", "disappointing",
    "sad", "angry", "annoying", "frustrating", "useless", "broken", "fail", "failed", "wrong",
    "problem",
];

/// Compound score at or beyond which text is labelled positive/negative.
pub const LABEL_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScores {
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
    /// `positive - negative`, in [-1, 1].
    pub compound: f64,
}

impl SentimentScores {
    pub const NEUTRAL: SentimentScores = SentimentScores {
        negative: 0.0,
        neutral: 1.0,
        positive: 0.0,
        compound: 0.0,
    };

    pub fn label(&self) -> SentimentLabel {
        SentimentLabel::from_compound(self.compound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn from_compound(compound: f64) -> Self {
        if compound >= LABEL_THRESHOLD {
            SentimentLabel::Positive
        } else if compound <= -LABEL_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Negative => "Negative",
        }
    }
}

/// Score `text` by the share of distinct positive vs negative keywords it
/// contains. Keywords match whole words only, case-insensitively.
pub fn analyze_text(text: &str) -> SentimentScores {
    if text.trim().is_empty() {
        return SentimentScores::NEUTRAL;
    }

    let lower = text.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let pos = POSITIVE.iter().filter(|k| words.contains(*k)).count();
    let neg = NEGATIVE.iter().filter(|k| words.contains(*k)).count();
    let total = pos + neg;
    if total == 0 {
        return SentimentScores::NEUTRAL;
    }

    let positive = pos as f64 / total as f64;
    let negative = neg as f64 / total as f64;
    SentimentScores {
        negative,
        neutral: (1.0 - (positive + negative)).max(0.0),
        positive,
        compound: positive - negative,
    }
}

pub fn analyze_batch<S: AsRef<str>>(texts: &[S]) -> Vec<SentimentScores> {
    texts.iter().map(|t| analyze_text(t.as_ref())).collect()
}

/// SHA-256 hex digest used as the cache key.
pub fn hash_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Analyzer that consults and fills the `sentiment_cache` table. Cache
/// failures are logged and scoring proceeds uncached.
#[derive(Clone)]
pub struct CachedSentimentAnalyzer {
    db: Arc<Database>,
}

impl CachedSentimentAnalyzer {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn analyze(&self, text: &str) -> SentimentScores {
        let key = hash_text(text);
        match self.db.cached_sentiment(&key) {
            Ok(Some(hit)) => return hit,
            Ok(None) => {}
            Err(e) => warn!("sentiment cache lookup failed: {e:#}"),
        }

        let scores = analyze_text(text);
        if let Err(e) = self.db.store_sentiment(&key, &scores) {
            warn!("sentiment cache write failed: {e:#}");
        }
        scores
    }

    pub fn analyze_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<SentimentScores> {
        texts.iter().map(|t| self.analyze(t.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CredentialCipher;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn blank_text_is_neutral() {
        assert_eq!(analyze_text(""), SentimentScores::NEUTRAL);
        assert_eq!(analyze_text("   \n"), SentimentScores::NEUTRAL);
    }

    #[test]
    fn no_keywords_is_neutral() {
        assert_eq!(analyze_text("the train leaves at noon"), SentimentScores::NEUTRAL);
    }

    #[test]
    fn mixed_keywords_split_the_score() {
        let s = analyze_text("Great stream, awesome game, but the audio was terrible");
        assert!(approx(s.positive, 2.0 / 3.0));
        assert!(approx(s.negative, 1.0 / 3.0));
        assert!(approx(s.neutral, 0.0));
        assert!(approx(s.compound, 1.0 / 3.0));
        assert_eq!(s.label(), SentimentLabel::Positive);
    }

    #[test]
    fn keywords_are_counted_once() {
        let s = analyze_text("bad bad bad, good");
        assert!(approx(s.compound, 0.0));
        assert_eq!(s.label(), SentimentLabel::Neutral);
    }

    #[test]
    fn matches_whole_words_only() {
        // "dislike" must not also count as "like".
        let s = analyze_text("I dislike this");
        assert!(approx(s.compound, -1.0));
        // "goodness" is not "good".
        assert_eq!(analyze_text("goodness me"), SentimentScores::NEUTRAL);
    }

    #[test]
    fn case_insensitive() {
        assert!(approx(analyze_text("AMAZING!!!").compound, 1.0));
    }

    #[test]
    fn label_thresholds() {
        assert_eq!(SentimentLabel::from_compound(0.05), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_compound(0.049), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_compound(-0.05), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::from_compound(-0.049), SentimentLabel::Neutral);
    }

    #[test]
    fn batch_preserves_order() {
        let out = analyze_batch(&["love it", "", "hate it"]);
        assert_eq!(out.len(), 3);
        assert!(out[0].compound > 0.0);
        assert_eq!(out[1], SentimentScores::NEUTRAL);
        assert!(out[2].compound < 0.0);
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_text(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn cached_analyzer_fills_and_reads_cache() {
        let db = Arc::new(Database::open(":memory:", CredentialCipher::random()).unwrap());
        let analyzer = CachedSentimentAnalyzer::new(db.clone());

        let text = "what a wonderful day";
        assert!(db.cached_sentiment(&hash_text(text)).unwrap().is_none());

        let first = analyzer.analyze(text);
        let cached = db.cached_sentiment(&hash_text(text)).unwrap().unwrap();
        assert_eq!(first, cached);

        // A planted cache entry is returned verbatim.
        let planted = SentimentScores {
            negative: 0.5,
            neutral: 0.0,
            positive: 0.5,
            compound: 0.0,
        };
        db.store_sentiment(&hash_text("planted"), &planted).unwrap();
        assert_eq!(analyzer.analyze("planted"), planted);
    }
}
