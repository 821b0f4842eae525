pub mod dictionary;
pub mod engine;
pub mod patterns;

pub use dictionary::{DictionaryEntry, DictionaryError, SentimentDictionary};
pub use engine::{
    FrequencyTable, MatchSource, SectionSentiment, SentenceHighlight, SentimentAnalysis,
    SentimentConfig, SentimentEngine, SentimentLabel, TermContribution,
};
pub use patterns::{ContextMatch, ContextPatterns, PatternFamily};
