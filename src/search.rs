use crate::model::Word;
use fst::automaton::Str;
use fst::{Automaton, IntoStreamer, Map, Streamer};
use rapidfuzz::fuzz;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Tuning knobs for word search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub name_weight: f32,
    pub remark_weight: f32,
    /// Weight of the whole-query vs name similarity added to every token hit.
    pub similarity_weight: f32,
    /// Minimum name similarity (0..=1) for the fallback scan used when no token matches.
    pub fuzzy_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            name_weight: 2.0,
            remark_weight: 1.0,
            similarity_weight: 0.5,
            fuzzy_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Remark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Posting {
    position: u32,
    field: Field,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Position of the word in the indexed slice.
    pub position: usize,
    pub score: f32,
}

/// Token index over word names and remarks.
///
/// Terms live in an fst map whose values point into a postings table, so a
/// query token expands to every indexed term it prefixes in one stream.
pub struct WordIndex {
    terms: Map<Vec<u8>>,
    postings: Vec<Vec<Posting>>,
    names: Vec<String>,
    config: SearchConfig,
}

impl WordIndex {
    pub fn build(words: &[Word]) -> Self {
        Self::with_config(words, SearchConfig::default())
    }

    pub fn with_config(words: &[Word], config: SearchConfig) -> Self {
        let mut table: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        for (position, word) in words.iter().enumerate() {
            for (field, text) in [(Field::Name, &word.name), (Field::Remark, &word.remark)] {
                for token in tokenize(text) {
                    let posting = Posting {
                        position: position as u32,
                        field,
                    };
                    let list = table.entry(token).or_default();
                    if !list.contains(&posting) {
                        list.push(posting);
                    }
                }
            }
        }

        let terms = Map::from_iter(
            table
                .keys()
                .enumerate()
                .map(|(ordinal, term)| (term.as_bytes(), ordinal as u64)),
        )
        .expect("btree keys are sorted and unique");
        let postings = table.into_values().collect();
        let names = words.iter().map(|word| word.name.to_lowercase()).collect();

        Self {
            terms,
            postings,
            names,
            config,
        }
    }

    /// Number of distinct indexed terms.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Returns up to `limit` hits, best first. Ties keep list order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let mut tokens = tokenize(query);
        tokens.sort_unstable();
        tokens.dedup();
        if tokens.is_empty() || limit == 0 {
            return Vec::new();
        }
        let query_lower = query.trim().to_lowercase();

        let mut scores: HashMap<u32, f32> = HashMap::new();
        for token in &tokens {
            let mut best: HashMap<u32, f32> = HashMap::new();
            let automaton = Str::new(token.as_str()).starts_with();
            let mut stream = self.terms.search(automaton).into_stream();
            while let Some((term, ordinal)) = stream.next() {
                let closeness = token.len() as f32 / term.len().max(1) as f32;
                for posting in &self.postings[ordinal as usize] {
                    let weight = match posting.field {
                        Field::Name => self.config.name_weight,
                        Field::Remark => self.config.remark_weight,
                    };
                    let slot = best.entry(posting.position).or_insert(0.0);
                    *slot = slot.max(weight * closeness);
                }
            }
            for (position, score) in best {
                *scores.entry(position).or_insert(0.0) += score;
            }
        }

        let mut hits: Vec<SearchHit> = if scores.is_empty() {
            self.fuzzy_fallback(&query_lower)
        } else {
            scores
                .into_iter()
                .map(|(position, score)| {
                    let position = position as usize;
                    let similarity = name_similarity(&query_lower, &self.names[position]);
                    SearchHit {
                        position,
                        score: score + self.config.similarity_weight * similarity as f32,
                    }
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.truncate(limit);
        hits
    }

    fn fuzzy_fallback(&self, query: &str) -> Vec<SearchHit> {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(position, name)| {
                let similarity = name_similarity(query, name);
                (similarity >= self.config.fuzzy_threshold).then(|| SearchHit {
                    position,
                    score: similarity as f32,
                })
            })
            .collect()
    }
}

/// Builds a throwaway index over `words` and returns the matching words.
pub fn search_words<'a>(words: &'a [Word], query: &str, limit: usize) -> Vec<&'a Word> {
    WordIndex::build(words)
        .search(query, limit)
        .into_iter()
        .map(|hit| &words[hit.position])
        .collect()
}

fn name_similarity(query: &str, name: &str) -> f64 {
    fuzz::ratio(query.chars(), name.chars())
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
