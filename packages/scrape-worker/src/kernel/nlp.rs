//! Lightweight keyword and summary heuristics.
//!
//! Term frequency over non-stopwords for keywords; summaries pick the
//! highest-scoring sentences and re-emit them in document order.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\p{L}[\p{L}\p{N}'’]*").unwrap();
    static ref STOPWORDS: HashSet<&'static str> = [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
        "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "down",
        "during", "each", "even", "few", "for", "from", "further", "had", "has", "have",
        "having", "he", "her", "here", "hers", "herself", "him", "himself", "his", "how",
        "however", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "like",
        "many", "may", "me", "might", "more", "most", "much", "must", "my", "myself", "new",
        "no", "nor", "not", "now", "of", "off", "on", "once", "one", "only", "or", "other",
        "our", "ours", "ourselves", "out", "over", "own", "said", "same", "says", "she",
        "should", "since", "so", "some", "such", "than", "that", "the", "their", "theirs",
        "them", "themselves", "then", "there", "these", "they", "this", "those", "through",
        "to", "too", "two", "under", "until", "up", "us", "very", "was", "we", "were", "what",
        "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
        "year", "years", "yet", "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect();
}

/// Lowercased word tokens.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['\'', '’']).to_lowercase())
}

fn is_candidate(word: &str) -> bool {
    word.chars().count() >= 3 && !STOPWORDS.contains(word)
}

/// Most frequent non-stopword terms, ties broken by first occurrence.
pub fn top_keywords(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }

    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, word) in tokens(text).enumerate() {
        if !is_candidate(&word) {
            continue;
        }
        counts
            .entry(word)
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, position));
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(word, _, _)| word)
        .collect()
}

/// Split text into sentences on terminal punctuation followed by whitespace
/// and on paragraph breaks.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();

    for paragraph in text.split("\n\n") {
        let mut start = 0;
        let mut chars = paragraph.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            if matches!(ch, '.' | '!' | '?') {
                let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
                if at_boundary {
                    let end = idx + ch.len_utf8();
                    let sentence = paragraph[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
        }
        let rest = paragraph[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }

    sentences
}

/// Pick up to `max_sentences` representative sentences.
///
/// A sentence scores by the frequency of the article's keywords it contains
/// (normalised by length), boosted by overlap with the title and by being
/// early in the text.
pub fn summarize(
    title: Option<&str>,
    text: &str,
    keywords: &[String],
    max_sentences: usize,
) -> Option<String> {
    if max_sentences == 0 {
        return None;
    }

    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return None;
    }

    let mut frequency: HashMap<String, usize> = HashMap::new();
    for word in tokens(text).filter(|w| is_candidate(w)) {
        *frequency.entry(word).or_default() += 1;
    }
    let keyword_set: HashSet<&str> = keywords.iter().map(String::as_str).collect();
    let title_words: HashSet<String> = title
        .map(|t| tokens(t).filter(|w| is_candidate(w)).collect())
        .unwrap_or_default();

    let total = sentences.len() as f64;
    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(index, sentence)| {
            let words: Vec<String> = tokens(sentence).collect();
            if words.is_empty() {
                return (index, 0.0);
            }

            let keyword_score: usize = words
                .iter()
                .filter(|w| keyword_set.contains(w.as_str()))
                .map(|w| frequency.get(w).copied().unwrap_or(0))
                .sum();
            let title_overlap = if title_words.is_empty() {
                0.0
            } else {
                let hits = words.iter().filter(|w| title_words.contains(*w)).count();
                hits as f64 / title_words.len() as f64
            };
            let position = 1.0 + 0.2 * (1.0 - index as f64 / total);

            let score =
                (keyword_score as f64 / words.len() as f64) * (1.0 + title_overlap) * position;
            (index, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut chosen: Vec<usize> = scored
        .into_iter()
        .take(max_sentences)
        .map(|(index, _)| index)
        .collect();
    chosen.sort_unstable();

    let summary = chosen
        .into_iter()
        .map(|index| sentences[index])
        .collect::<Vec<_>>()
        .join(" ");

    Some(summary)
}
