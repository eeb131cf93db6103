//! Plain-Rust term helpers used where no Tantivy analyzer is at hand
//! (query expansion, routing, local reranking, hashed embeddings).

/// English stop words shared with the sparse index analyzer.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
    "should", "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having", "i", "my", "me",
    "we", "our", "you", "your", "many", "much", "about", "any", "get",
];

pub fn is_stop_word(term: &str) -> bool { STOP_WORDS.contains(&term) }

/// Lowercased alphanumeric runs, in order.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `terms` without stop words.
pub fn keywords(text: &str) -> Vec<String> {
    terms(text).into_iter().filter(|t| !is_stop_word(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_drop_stop_words_and_punctuation() {
        assert_eq!(keywords("How many vacation days do I get?"), vec!["vacation", "days"]);
        assert_eq!(terms("Re-ingest THE doc"), vec!["re", "ingest", "the", "doc"]);
    }
}
