//! Per-topic word weights and the word/topic rankings built on them.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::topk::{top_k, Order, Strategy};
use crate::error::EngineError;

/// Loader payload: `{ "alpha": [...], "tw": [{ "words": [...], "weights": [...] }] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicWordsPayload {
    #[serde(default)]
    pub alpha: Vec<f64>,
    pub tw: Vec<TopicWordList>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicWordList {
    pub words: Vec<String>,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordWeight {
    pub word: String,
    pub weight: f64,
}

/// A topic containing a word; `rank` is the zero-based position of the word
/// within the topic (how many of the topic's words weigh strictly more).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTopic {
    pub topic: usize,
    pub rank: usize,
}

struct TopicEntry {
    list: TopicWordList,
    position: HashMap<String, usize>,
}

pub struct TopicWords {
    alpha: Vec<f64>,
    topics: Vec<TopicEntry>,
}

impl TopicWords {
    pub fn from_payload(payload: TopicWordsPayload) -> Result<Self, EngineError> {
        if !payload.alpha.is_empty() && payload.alpha.len() != payload.tw.len() {
            return Err(EngineError::MalformedTopicWords(format!(
                "alpha has {} entries for {} topics",
                payload.alpha.len(),
                payload.tw.len()
            )));
        }

        let mut topics = Vec::with_capacity(payload.tw.len());
        for (t, list) in payload.tw.into_iter().enumerate() {
            if list.words.len() != list.weights.len() {
                return Err(EngineError::MalformedTopicWords(format!(
                    "topic {t} has {} words but {} weights",
                    list.words.len(),
                    list.weights.len()
                )));
            }
            let position = list
                .words
                .iter()
                .enumerate()
                .map(|(i, w)| (w.clone(), i))
                .collect();
            topics.push(TopicEntry { list, position });
        }

        Ok(Self {
            alpha: payload.alpha,
            topics,
        })
    }

    pub fn n_topics(&self) -> usize {
        self.topics.len()
    }

    fn entry(&self, topic: usize) -> Result<&TopicEntry, EngineError> {
        self.topics.get(topic).ok_or(EngineError::TopicOutOfRange {
            topic,
            n_topics: self.topics.len(),
        })
    }

    /// Dirichlet hyperparameter of `topic`, if the payload carried one.
    pub fn alpha(&self, topic: usize) -> Result<Option<f64>, EngineError> {
        self.entry(topic)?;
        Ok(self.alpha.get(topic).copied())
    }

    /// Top `n` words of `topic` by weight; equal weights sort alphabetically.
    pub fn topic_words(&self, topic: usize, n: usize) -> Result<Vec<WordWeight>, EngineError> {
        let list = &self.entry(topic)?.list;
        let words: Vec<WordWeight> = list
            .words
            .iter()
            .zip(&list.weights)
            .map(|(word, &weight)| WordWeight {
                word: word.clone(),
                weight,
            })
            .collect();
        Ok(top_k(
            words,
            n,
            |w| w.weight,
            |w| w.word.clone(),
            Order::Descending,
            Strategy::FullSort,
        ))
    }

    pub fn all_topic_words(&self, n: usize) -> Vec<Vec<WordWeight>> {
        (0..self.topics.len())
            .into_par_iter()
            .map(|t| self.topic_words(t, n).unwrap_or_default())
            .collect()
    }

    /// Topics in which `word` ranks highest, best rank first (ties by topic).
    pub fn word_topics(&self, word: &str, n: usize) -> Vec<WordTopic> {
        let hits: Vec<WordTopic> = self
            .topics
            .par_iter()
            .enumerate()
            .filter_map(|(topic, entry)| {
                let &i = entry.position.get(word)?;
                let weight = entry.list.weights[i];
                let rank = entry.list.weights.iter().filter(|&&w| w > weight).count();
                Some(WordTopic { topic, rank })
            })
            .collect();
        top_k(
            hits,
            n,
            |h| h.rank as f64,
            |h| h.topic,
            Order::Ascending,
            Strategy::FullSort,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> TopicWords {
        let payload: TopicWordsPayload = serde_json::from_str(
            r#"{
                "alpha": [0.1, 0.2, 0.3],
                "tw": [
                    {"words": ["war", "army", "peace", "treaty"], "weights": [50, 30, 30, 5]},
                    {"words": ["poem", "peace", "verse"], "weights": [40, 35, 10]},
                    {"words": ["market", "trade", "war"], "weights": [20, 20, 20]}
                ]
            }"#,
        )
        .unwrap();
        TopicWords::from_payload(payload).unwrap()
    }

    #[test]
    fn topic_words_ranked_with_alphabetical_ties() {
        let tw = model();
        let words: Vec<String> = tw.topic_words(0, 2).unwrap().into_iter().map(|w| w.word).collect();
        // "army" and "peace" tie at the cutoff; both are kept.
        assert_eq!(words, vec!["war", "army", "peace"]);
    }

    #[test]
    fn topic_words_out_of_range() {
        let tw = model();
        assert!(matches!(
            tw.topic_words(3, 5),
            Err(EngineError::TopicOutOfRange { topic: 3, n_topics: 3 })
        ));
    }

    #[test]
    fn all_topic_words_covers_every_topic() {
        let tw = model();
        let all = tw.all_topic_words(1);
        assert_eq!(all.len(), 3);
        assert_eq!(all[1][0].word, "poem");
        // Three-way tie in topic 2.
        assert_eq!(all[2].len(), 3);
        assert_eq!(all[2][0].word, "market");
    }

    #[test]
    fn word_topics_by_rank() {
        let tw = model();
        let hits = tw.word_topics("war", 5);
        assert_eq!(
            hits,
            vec![WordTopic { topic: 0, rank: 0 }, WordTopic { topic: 2, rank: 0 }]
        );
        let peace = tw.word_topics("peace", 1);
        // Rank 1 in both topics: the tie at the cutoff keeps both.
        assert_eq!(
            peace,
            vec![WordTopic { topic: 0, rank: 1 }, WordTopic { topic: 1, rank: 1 }]
        );
        assert!(tw.word_topics("absent", 3).is_empty());
    }

    #[test]
    fn alpha_lookup() {
        let tw = model();
        assert_eq!(tw.alpha(2).unwrap(), Some(0.3));
        assert!(tw.alpha(9).is_err());
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let payload = TopicWordsPayload {
            alpha: vec![],
            tw: vec![TopicWordList {
                words: vec!["a".into()],
                weights: vec![],
            }],
        };
        assert!(matches!(
            TopicWords::from_payload(payload),
            Err(EngineError::MalformedTopicWords(_))
        ));
    }
}
