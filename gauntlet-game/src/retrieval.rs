//! Lexical retrieval over an uploaded founder document.
//!
//! Documents are packed into overlapping word-bounded chunks and ranked
//! against a query by term overlap. Results feed the persona prompts as
//! labelled excerpts.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::constants::{
    CHUNK_CACHE_CAPACITY, CHUNK_OVERLAP_WORDS, CHUNK_TARGET_WORDS, COVERAGE_WEIGHT,
    DEFAULT_TOP_K, DIGIT_BONUS, MAX_CHUNK_CHARS, MAX_CHUNKS, MAX_DOCUMENT_CHARS, MIN_TERM_LEN,
    OCCURRENCE_WEIGHT,
};
use crate::numbers::i64_to_f64;

static PARAGRAPH_BREAK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\n[ \t\r]*\n").ok());
static TERM: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[a-z0-9]+").ok());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "his", "him", "was", "one", "our", "out", "has", "have", "with", "this", "that", "from",
        "they", "will", "would", "there", "their", "what", "about", "which", "when", "make",
        "like", "into", "than", "them", "then", "some", "could", "also", "your", "just", "been",
        "were", "these", "those", "its", "how", "who", "why", "more", "most", "other", "such",
        "only", "over", "very", "does", "did", "each", "may", "should", "because", "while",
        "where", "here", "being", "yours", "ours", "she", "get", "got", "let", "use",
    ]
    .into_iter()
    .collect()
});

/// Chunking and ranking knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_target_words")]
    pub target_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

const fn default_target_words() -> usize {
    CHUNK_TARGET_WORDS
}
const fn default_overlap_words() -> usize {
    CHUNK_OVERLAP_WORDS
}
const fn default_max_chunks() -> usize {
    MAX_CHUNKS
}
const fn default_max_chunk_chars() -> usize {
    MAX_CHUNK_CHARS
}
const fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            target_words: CHUNK_TARGET_WORDS,
            overlap_words: CHUNK_OVERLAP_WORDS,
            max_chunks: MAX_CHUNKS,
            max_chunk_chars: MAX_CHUNK_CHARS,
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalChunk {
    pub index: usize,
    pub text: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedExcerpt {
    pub chunk_index: usize,
    pub text: String,
    pub score: f64,
}

/// Cap raw document text before indexing.
#[must_use]
pub fn cap_document(text: &str) -> &str {
    truncate_chars(text, MAX_DOCUMENT_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn paragraphs(document: &str) -> Vec<String> {
    let normalized = document.replace("\r\n", "\n");
    let pieces: Vec<&str> = match PARAGRAPH_BREAK.as_ref() {
        Some(re) => re.split(&normalized).collect(),
        None => vec![normalized.as_str()],
    };
    pieces
        .into_iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split a document into chunks using the default configuration.
#[must_use]
pub fn index(document: &str) -> Vec<RetrievalChunk> {
    index_with(document, &RetrievalConfig::default())
}

/// Greedily pack paragraphs into word-budgeted chunks.
///
/// A paragraph is never split. When adding the next paragraph would overflow
/// the budget, the current chunk is closed and the next one starts with the
/// closed chunk's trailing overlap words.
#[must_use]
pub fn index_with(document: &str, config: &RetrievalConfig) -> Vec<RetrievalChunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut has_fresh = false;

    let close = |words: &[String], chunks: &mut Vec<RetrievalChunk>| {
        let joined = words.join(" ");
        let text = truncate_chars(&joined, config.max_chunk_chars).trim_end().to_string();
        let word_count = text.split_whitespace().count();
        chunks.push(RetrievalChunk {
            index: chunks.len(),
            text,
            word_count,
        });
    };

    for paragraph in paragraphs(document) {
        if chunks.len() >= config.max_chunks {
            break;
        }
        let words: Vec<String> = paragraph.split_whitespace().map(str::to_string).collect();
        if has_fresh && current.len() + words.len() > config.target_words {
            close(&current, &mut chunks);
            current = chunks
                .last()
                .map(|chunk| overlap_tail(&chunk.text, config.overlap_words))
                .unwrap_or_default();
            has_fresh = false;
            if chunks.len() >= config.max_chunks {
                break;
            }
        }
        current.extend(words);
        has_fresh = true;
    }

    if has_fresh && chunks.len() < config.max_chunks {
        close(&current, &mut chunks);
    }
    chunks
}

/// Trailing words of a stored chunk, which may have been cut at the char cap.
fn overlap_tail(text: &str, overlap_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let keep_from = words.len().saturating_sub(overlap_words);
    words[keep_from..].iter().map(|w| (*w).to_string()).collect()
}

/// Lower-cased alphanumeric terms of at least three characters, minus stopwords.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let Some(re) = TERM.as_ref() else {
        return Vec::new();
    };
    let lowered = text.to_ascii_lowercase();
    re.find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= MIN_TERM_LEN && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

struct Scored {
    position: usize,
    overlap: usize,
    score: f64,
}

fn score_chunk(chunk: &RetrievalChunk, query_terms: &HashSet<String>) -> (usize, f64) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for term in tokenize(&chunk.text) {
        *counts.entry(term).or_insert(0) += 1;
    }

    let mut overlap = 0usize;
    let mut occurrences = 0usize;
    for term in query_terms {
        if let Some(count) = counts.get(term) {
            overlap += 1;
            occurrences += count;
        }
    }

    let overlap_f = i64_to_f64(i64::try_from(overlap).unwrap_or(i64::MAX));
    let occurrences_f = i64_to_f64(i64::try_from(occurrences).unwrap_or(i64::MAX));
    let coverage = if query_terms.is_empty() {
        0.0
    } else {
        overlap_f / i64_to_f64(i64::try_from(query_terms.len()).unwrap_or(i64::MAX))
    };
    let digit_bonus = if chunk.text.chars().any(|c| c.is_ascii_digit()) {
        DIGIT_BONUS
    } else {
        0.0
    };

    (
        overlap,
        overlap_f + OCCURRENCE_WEIGHT * occurrences_f + COVERAGE_WEIGHT * coverage + digit_bonus,
    )
}

/// Rank chunks against `query` and return the best `k`.
///
/// A blank query or an empty chunk list yields nothing. When no chunk shares
/// a term with the query, the first `k` chunks are returned in document order.
#[must_use]
pub fn retrieve(chunks: &[RetrievalChunk], query: &str, k: usize) -> Vec<RankedExcerpt> {
    if chunks.is_empty() || query.trim().is_empty() || k == 0 {
        return Vec::new();
    }

    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    let mut scored: Vec<Scored> = chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            let (overlap, score) = score_chunk(chunk, &query_terms);
            Scored {
                position,
                overlap,
                score,
            }
        })
        .filter(|s| s.overlap > 0 && s.score > 0.0)
        .collect();

    if scored.is_empty() {
        return chunks
            .iter()
            .take(k)
            .map(|chunk| RankedExcerpt {
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                score: 0.0,
            })
            .collect();
    }

    // Stable sort keeps document order among equal scores.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
        .into_iter()
        .take(k)
        .map(|s| RankedExcerpt {
            chunk_index: chunks[s.position].index,
            text: chunks[s.position].text.clone(),
            score: s.score,
        })
        .collect()
}

/// Render excerpts as labelled blocks for prompt injection.
#[must_use]
pub fn build_context(excerpts: &[RankedExcerpt]) -> String {
    if excerpts.is_empty() {
        return String::new();
    }
    let mut out = String::from("Relevant excerpts from the founder's uploaded document:\n");
    for (i, excerpt) in excerpts.iter().enumerate() {
        out.push_str(&format!(
            "\n[Excerpt {} | section {}]\n{}\n",
            i + 1,
            excerpt.chunk_index + 1,
            excerpt.text
        ));
    }
    out
}

/// Content identity used as the cache key.
#[must_use]
pub fn content_key(document: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(document.as_bytes());
    hasher.finish()
}

#[derive(Debug)]
struct CacheEntry {
    key: u64,
    chunks: Vec<RetrievalChunk>,
}

/// Bounded chunk cache keyed by document content hash, evicting least recently used.
#[derive(Debug)]
pub struct ChunkCache {
    capacity: usize,
    config: RetrievalConfig,
    entries: VecDeque<CacheEntry>,
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(CHUNK_CACHE_CAPACITY, RetrievalConfig::default())
    }
}

impl ChunkCache {
    #[must_use]
    pub fn new(capacity: usize, config: RetrievalConfig) -> Self {
        Self {
            capacity: capacity.max(1),
            config,
            entries: VecDeque::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, document: &str) -> bool {
        let key = content_key(document);
        self.entries.iter().any(|e| e.key == key)
    }

    /// Index `document` ahead of its first query.
    pub fn warm(&mut self, document: &str) {
        self.chunks_for(cap_document(document));
    }

    /// Chunks for `document`, indexing it on a miss.
    pub fn chunks_for(&mut self, document: &str) -> &[RetrievalChunk] {
        let key = content_key(document);
        if let Some(pos) = self.entries.iter().position(|e| e.key == key) {
            if let Some(entry) = self.entries.remove(pos) {
                self.entries.push_back(entry);
            }
        } else {
            log::debug!("Indexing document {key:016x}");
            let chunks = index_with(document, &self.config);
            if self.entries.len() >= self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(CacheEntry { key, chunks });
        }
        self.entries
            .back()
            .map(|entry| entry.chunks.as_slice())
            .unwrap_or_default()
    }

    /// Rendered context block for `query`, or an empty string when there is
    /// no document or nothing to ask about.
    pub fn context_for(&mut self, document: &str, query: &str) -> String {
        if document.trim().is_empty() {
            return String::new();
        }
        let top_k = self.config.top_k;
        let chunks = self.chunks_for(cap_document(document));
        build_context(&retrieve(chunks, query, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{prefix}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn single_paragraph_yields_one_chunk() {
        let doc = words("alpha", 500);
        let chunks = index(&doc);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.chars().count() <= MAX_CHUNK_CHARS);
    }

    #[test]
    fn constant_patterns_compile() {
        assert!(PARAGRAPH_BREAK.is_some());
        assert!(TERM.is_some());
        assert_eq!(paragraphs("one\n \ntwo").len(), 2);
        assert_eq!(tokenize("Revenue 2024 grew"), vec!["revenue", "2024", "grew"]);
    }

    #[test]
    fn overlap_comes_from_the_truncated_chunk() {
        let config = RetrievalConfig {
            target_words: 5,
            overlap_words: 2,
            max_chunk_chars: 20,
            ..RetrievalConfig::default()
        };
        let doc = "alpha bravo charlie delta echo foxtrot golf hotel\n\nindia juliet";
        let chunks = index_with(doc, &config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "alpha bravo charlie");
        assert_eq!(chunks[1].text, "bravo charlie india juliet");
    }

    #[test]
    fn empty_document_has_no_chunks() {
        assert!(index("").is_empty());
        assert!(index("   \n\n  \n").is_empty());
    }

    #[test]
    fn packing_seeds_next_chunk_with_overlap() {
        let doc = format!(
            "{}\n\n{}\n\n{}",
            words("a", 100),
            words("b", 100),
            words("c", 50)
        );
        let chunks = index(&doc);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].word_count, 100);
        assert!(chunks[1].text.starts_with("a60 "));
        assert!(chunks[1].text.contains("b0"));
        assert_eq!(chunks[1].word_count, 40 + 100);
        assert!(chunks[2].text.starts_with("b60 "));
        assert_eq!(chunks[2].word_count, 40 + 50);
    }

    #[test]
    fn chunk_count_is_capped() {
        let config = RetrievalConfig {
            target_words: 5,
            overlap_words: 1,
            max_chunks: 3,
            ..RetrievalConfig::default()
        };
        let doc = (0..10)
            .map(|i| words(&format!("p{i}w"), 5))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = index_with(&doc, &config);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn whitespace_inside_paragraphs_collapses() {
        let chunks = index("revenue   grew\n  fast\r\n\r\nsecond   para");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "revenue grew fast second para");
    }

    #[test]
    fn tokenizer_drops_short_terms_and_stopwords() {
        let terms = tokenize("The ARR is $1.2M and churn fell to 3% with our CAC");
        assert_eq!(terms, vec!["arr", "churn", "fell", "cac"]);
    }

    #[test]
    fn ranking_prefers_overlap_and_keeps_order_on_ties() {
        let chunks = vec![
            RetrievalChunk {
                index: 0,
                text: "Team bios and hiring plan".into(),
                word_count: 5,
            },
            RetrievalChunk {
                index: 1,
                text: "Pricing model with margin targets and margin history".into(),
                word_count: 8,
            },
            RetrievalChunk {
                index: 2,
                text: "Pricing overview for enterprise".into(),
                word_count: 4,
            },
            RetrievalChunk {
                index: 3,
                text: "Pricing overview for startups".into(),
                word_count: 4,
            },
        ];
        let ranked = retrieve(&chunks, "What is your pricing and margin?", 3);
        let order: Vec<_> = ranked.iter().map(|r| r.chunk_index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn digits_add_a_bonus() {
        let chunks = vec![
            RetrievalChunk {
                index: 0,
                text: "churn is low".into(),
                word_count: 3,
            },
            RetrievalChunk {
                index: 1,
                text: "churn is 2 percent".into(),
                word_count: 4,
            },
        ];
        let ranked = retrieve(&chunks, "churn", 2);
        assert_eq!(ranked[0].chunk_index, 1);
        assert!((ranked[0].score - ranked[1].score - DIGIT_BONUS).abs() < 1e-9);
    }

    #[test]
    fn unrelated_query_falls_back_to_document_order() {
        let chunks = index(&format!(
            "{}\n\n{}\n\n{}",
            words("x", 150),
            words("y", 150),
            words("z", 150)
        ));
        let ranked = retrieve(&chunks, "blockchain tokenomics", 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk_index, 0);
        assert_eq!(ranked[1].chunk_index, 1);
    }

    #[test]
    fn blank_query_yields_nothing() {
        let chunks = index("some document text here");
        assert!(retrieve(&chunks, "   ", 3).is_empty());
        assert!(retrieve(&[], "pricing", 3).is_empty());
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let mut cache = ChunkCache::new(2, RetrievalConfig::default());
        cache.chunks_for("doc one");
        cache.chunks_for("doc two");
        cache.chunks_for("doc one");
        cache.chunks_for("doc three");
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("doc one"));
        assert!(!cache.contains("doc two"));
        assert!(cache.contains("doc three"));
    }

    #[test]
    fn warming_indexes_once_for_later_queries() {
        let mut cache = ChunkCache::default();
        let doc = "Churn fell to 2 percent after onboarding changes.";
        cache.warm(doc);
        assert!(cache.contains(doc));
        assert_eq!(cache.len(), 1);
        assert!(cache.context_for(doc, "churn").contains("Churn fell"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn context_block_labels_excerpts() {
        let mut cache = ChunkCache::default();
        let ctx = cache.context_for("Our gross margin is 72 percent.", "margin");
        assert!(ctx.contains("[Excerpt 1 | section 1]"));
        assert!(ctx.contains("gross margin"));
        assert!(cache.context_for("", "margin").is_empty());
    }

    #[test]
    fn document_cap_respects_char_boundaries() {
        let doc = "é".repeat(MAX_DOCUMENT_CHARS + 10);
        assert_eq!(cap_document(&doc).chars().count(), MAX_DOCUMENT_CHARS);
    }
}
