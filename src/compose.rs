//! Grounded answer composition.
//!
//! Turns retrieved chunks into an [`Answer`]:
//!
//! 1. No retrieved chunks means no model call at all: the answer is
//!    [`AnswerKind::NoRelevantContext`].
//! 2. At most `max_context_chunks` chunks, lowest distance first, are
//!    tagged `[Source N]`, truncated to `max_chunk_chars`, and placed in a
//!    prompt that restricts the model to those sources.
//! 3. The raw completion is cleaned of chat tokens, question echoes,
//!    boilerplate prefixes, duplicate lines and runaway repetition.
//! 4. `[Source N]` references in the completion select the citations; an
//!    answer that cites nothing cites every supplied source.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use crate::config::Config;
use crate::error::{DocletError, Result};
use crate::generation::{GenerationParams, LanguageModel};
use crate::models::{Answer, AnswerKind, Citation, ScoredChunk};

pub const NO_CONTEXT_MESSAGE: &str =
    "I don't have relevant information about that in the provided documents.";
pub const NO_DOCUMENTS_MESSAGE: &str =
    "No documents have been indexed yet. Run `doclet ingest` first.";
pub const MODEL_NOT_READY_MESSAGE: &str =
    "The language model is not loaded. Configure [llm] and load the model before asking questions.";
pub const INCONCLUSIVE_MESSAGE: &str =
    "I found relevant information but couldn't generate a clear answer. \
     Please try rephrasing your question.";

/// Cleaned answers shorter than this are treated as no answer.
const MIN_ANSWER_CHARS: usize = 15;
/// A question echo is only stripped when it appears this early.
const ECHO_WINDOW_CHARS: usize = 150;

static SPECIAL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[a-z_]+\|>").expect("special token pattern"));
static ROLE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:answer|response|assistant|ai):\s*").expect("role prefix pattern")
});
static SOURCE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:according to|based on) (?:the )?(?:documents?|context|information)[,:]?\s*")
        .expect("source prefix pattern")
});
static SOURCE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[source\s+(\d+)\]").expect("source ref pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// Plain-text instructions; works with any completion endpoint.
    Plain,
    /// Llama 3 instruct chat tokens.
    Llama3,
}

impl PromptTemplate {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "llama3" => Some(Self::Llama3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub max_context_chunks: usize,
    pub max_chunk_chars: usize,
    pub max_answer_chars: usize,
    pub template: PromptTemplate,
    pub params: GenerationParams,
}

impl ComposeOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let template = PromptTemplate::parse(&config.llm.template).ok_or_else(|| {
            DocletError::Config(format!("unknown prompt template: {}", config.llm.template))
        })?;
        Ok(Self {
            max_context_chunks: config.retrieval.max_context_chunks,
            max_chunk_chars: config.retrieval.max_chunk_chars,
            max_answer_chars: config.llm.max_answer_chars,
            template,
            params: GenerationParams::from_config(&config.llm),
        })
    }
}

/// Compose an answer to `question` from `results`.
///
/// `model` is only consulted when there is context to ground on. A missing
/// or unreachable model yields [`AnswerKind::ModelNotReady`]; any other
/// generation failure is returned as an error.
pub async fn compose(
    question: &str,
    results: &[ScoredChunk],
    model: Option<&dyn LanguageModel>,
    options: &ComposeOptions,
) -> Result<Answer> {
    if results.is_empty() {
        return Ok(Answer::without_context(
            AnswerKind::NoRelevantContext,
            NO_CONTEXT_MESSAGE,
        ));
    }

    let Some(model) = model else {
        return Ok(Answer::without_context(
            AnswerKind::ModelNotReady,
            MODEL_NOT_READY_MESSAGE,
        ));
    };

    let sources = select_sources(results, options.max_context_chunks, options.max_chunk_chars);
    let prompt = build_prompt(options.template, question, &sources);
    tracing::debug!(
        sources = sources.len(),
        prompt_chars = prompt.chars().count(),
        model = model.model_name(),
        "generating answer"
    );

    let raw = match model.generate(&prompt, &options.params).await {
        Ok(raw) => raw,
        Err(DocletError::ModelUnavailable(reason)) => {
            tracing::warn!(%reason, "language model unavailable");
            return Ok(Answer::without_context(
                AnswerKind::ModelNotReady,
                MODEL_NOT_READY_MESSAGE,
            ));
        }
        Err(e) => return Err(e),
    };

    let citations = cite(&raw, sources);
    match clean_response(&raw, question, options.max_answer_chars) {
        Some(text) => Ok(Answer {
            kind: AnswerKind::Grounded,
            text,
            citations,
        }),
        None => Ok(Answer {
            kind: AnswerKind::Inconclusive,
            text: INCONCLUSIVE_MESSAGE.to_string(),
            citations,
        }),
    }
}

/// Pick the closest `max` chunks and number them from 1.
pub fn select_sources(results: &[ScoredChunk], max: usize, max_chunk_chars: usize) -> Vec<Citation> {
    let mut ordered: Vec<&ScoredChunk> = results.iter().collect();
    ordered.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ordered
        .into_iter()
        .take(max)
        .enumerate()
        .map(|(i, r)| Citation {
            source_number: i + 1,
            document_id: r.chunk.document_id.clone(),
            ordinal: r.chunk.ordinal,
            score: r.distance,
            excerpt: excerpt(&r.chunk.text, max_chunk_chars),
        })
        .collect()
}

/// Trim `text` and cut it to `max_chars` characters, marking the cut with `...`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

pub fn build_prompt(template: PromptTemplate, question: &str, sources: &[Citation]) -> String {
    let context = sources
        .iter()
        .map(|s| format!("[Source {}]\n{}", s.source_number, s.excerpt))
        .collect::<Vec<_>>()
        .join("\n\n");
    let question = question.trim();

    match template {
        PromptTemplate::Plain => format!(
            "You are a helpful assistant. Answer the question using only the documents below.\n\n\
             Documents:\n{context}\n\n\
             Rules:\n\
             - Answer directly based on the documents\n\
             - Keep answers concise\n\
             - Don't repeat the question\n\
             - Cite the sources you use as [Source N]\n\
             - If information is not in documents, say \"I don't have that information\"\n\n\
             Question: {question}\n\n\
             Answer:"
        ),
        PromptTemplate::Llama3 => format!(
            "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n\
             You are a helpful assistant. Answer questions using only the provided documents.\n\n\
             Documents:\n{context}\n\n\
             Rules:\n\
             - Answer directly based on the documents\n\
             - Keep answers concise\n\
             - Don't repeat the question\n\
             - Cite the sources you use as [Source N]\n\
             - If information is not in documents, say \"I don't have that information\"\n\
             <|eot_id|><|start_header_id|>user<|end_header_id|>\n\n\
             {question}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
        ),
    }
}

/// Source numbers referenced as `[Source N]` in `text`, ascending.
pub fn source_refs(text: &str) -> BTreeSet<usize> {
    SOURCE_REF
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

fn cite(raw: &str, sources: Vec<Citation>) -> Vec<Citation> {
    let refs = source_refs(raw);
    let valid: HashSet<usize> = sources.iter().map(|s| s.source_number).collect();
    if !refs.iter().any(|n| valid.contains(n)) {
        return sources;
    }
    sources
        .into_iter()
        .filter(|s| refs.contains(&s.source_number))
        .collect()
}

/// Clean a raw completion. Returns `None` when nothing usable remains.
pub fn clean_response(raw: &str, question: &str, max_answer_chars: usize) -> Option<String> {
    let question = question.trim();
    let mut answer = SPECIAL_TOKEN.replace_all(raw, "").trim().to_string();

    if let Some(end) = find_echo(&answer, question) {
        answer = answer[end..].trim().to_string();
    }

    answer = ROLE_PREFIX.replace_all(&answer, "").to_string();
    answer = SOURCE_PREFIX.replace_all(&answer, "").to_string();

    let mut seen = HashSet::new();
    let lines: Vec<String> = answer
        .lines()
        .map(|line| collapse_repeated_sentences(line.trim()))
        .filter(|line| {
            let key = line.to_lowercase();
            key.chars().count() > 3 && seen.insert(key)
        })
        .collect();
    let answer = truncate_at_sentence(lines.join("\n").trim(), max_answer_chars);

    if answer.chars().count() < MIN_ANSWER_CHARS || answer.to_lowercase() == question.to_lowercase() {
        return None;
    }
    Some(answer)
}

/// Byte offset just past a case-insensitive occurrence of `question` that
/// lies entirely within the first [`ECHO_WINDOW_CHARS`] characters.
fn find_echo(answer: &str, question: &str) -> Option<usize> {
    let needle: Vec<char> = question.chars().collect();
    if needle.is_empty() {
        return None;
    }
    let hay: Vec<(usize, char)> = answer.char_indices().take(ECHO_WINDOW_CHARS).collect();
    if needle.len() > hay.len() {
        return None;
    }
    for start in 0..=hay.len() - needle.len() {
        let matched = needle
            .iter()
            .zip(&hay[start..])
            .all(|(q, (_, a))| q.to_lowercase().eq(a.to_lowercase()));
        if matched {
            let last = hay[start + needle.len() - 1];
            return Some(last.0 + last.1.len_utf8());
        }
    }
    None
}

/// Split `line` after sentence terminators followed by whitespace.
fn split_sentences(line: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut begin = 0;
    let mut prev_terminal = false;
    for (i, c) in line.char_indices() {
        if prev_terminal && c.is_whitespace() {
            sentences.push(line[begin..i].trim());
            begin = i;
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    sentences.push(line[begin..].trim());
    sentences.retain(|s| !s.is_empty());
    sentences
}

/// Keep only the first of consecutive identical sentences.
fn collapse_repeated_sentences(line: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for sentence in split_sentences(line) {
        if kept
            .last()
            .is_some_and(|prev| prev.eq_ignore_ascii_case(sentence))
        {
            continue;
        }
        kept.push(sentence);
    }
    kept.join(" ")
}

/// Cut `text` to at most `max_chars`, preferring the last sentence end.
fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    let sentence_end = prefix
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|end| {
            text[*end..]
                .chars()
                .next()
                .map_or(true, char::is_whitespace)
        })
        .last();
    match sentence_end {
        Some(end) => prefix[..end].to_string(),
        None => {
            let cut = prefix.rfind(char::is_whitespace).unwrap_or(prefix.len());
            format!("{}...", prefix[..cut].trim_end())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingModel {
        reply: String,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn scored(doc: &str, ordinal: i64, text: &str, distance: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("{}#{}", doc, ordinal),
                document_id: doc.to_string(),
                ordinal,
                text: text.to_string(),
                start: 0,
                end: text.chars().count(),
            },
            distance,
        }
    }

    fn options() -> ComposeOptions {
        ComposeOptions::from_config(&Config::with_db_path("unused.sqlite")).unwrap()
    }

    #[tokio::test]
    async fn empty_context_never_calls_the_model() {
        let model = RecordingModel::replying("anything");
        let answer = compose("What is the refund policy?", &[], Some(&model), &options())
            .await
            .unwrap();
        assert_eq!(answer.kind, AnswerKind::NoRelevantContext);
        assert_eq!(answer.text, NO_CONTEXT_MESSAGE);
        assert!(answer.citations.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_model_is_not_ready() {
        let results = vec![scored("a.md", 0, "Refunds take 14 days.", 0.5)];
        let answer = compose("Refunds?", &results, None, &options()).await.unwrap();
        assert_eq!(answer.kind, AnswerKind::ModelNotReady);
    }

    #[tokio::test]
    async fn prompt_is_bounded_and_citations_follow_refs() {
        let long = "x".repeat(1000);
        let results = vec![
            scored("d.md", 0, "fourth", 1.2),
            scored("a.md", 0, &long, 0.3),
            scored("b.md", 2, "Refunds are issued within 14 days.", 0.4),
            scored("c.md", 1, "third", 0.9),
        ];
        let model = RecordingModel::replying("Refunds are issued within 14 days [Source 2].");
        let answer = compose("How long do refunds take?", &results, Some(&model), &options())
            .await
            .unwrap();

        assert_eq!(answer.kind, AnswerKind::Grounded);
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].document_id, "b.md");
        assert_eq!(answer.citations[0].source_number, 2);

        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("[Source 1]"));
        assert!(prompt.contains("[Source 3]\nthird"));
        assert!(!prompt.contains("[Source 4]"));
        assert!(!prompt.contains("fourth"));
        assert!(prompt.contains(&format!("{}...", "x".repeat(400))));
        assert!(!prompt.contains(&"x".repeat(401)));
        assert!(prompt.contains("I don't have that information"));
    }

    #[tokio::test]
    async fn uncited_answer_cites_all_sources() {
        let results = vec![
            scored("a.md", 0, "alpha", 0.2),
            scored("b.md", 0, "beta", 0.1),
        ];
        let model = RecordingModel::replying("The answer is in the manual, chapter two.");
        let answer = compose("Where?", &results, Some(&model), &options()).await.unwrap();
        let docs: Vec<_> = answer.citations.iter().map(|c| c.document_id.as_str()).collect();
        assert_eq!(docs, vec!["b.md", "a.md"]);
    }

    #[tokio::test]
    async fn unusable_output_is_inconclusive_with_citations() {
        let results = vec![scored("a.md", 0, "alpha", 0.2)];
        let model = RecordingModel::replying("<|eot_id|>Answer: ok");
        let answer = compose("What?", &results, Some(&model), &options()).await.unwrap();
        assert_eq!(answer.kind, AnswerKind::Inconclusive);
        assert_eq!(answer.text, INCONCLUSIVE_MESSAGE);
        assert_eq!(answer.citations.len(), 1);
    }

    #[test]
    fn clean_strips_echo_prefixes_and_tokens() {
        let raw = "How long do refunds take?\nAnswer: Based on the documents, refunds take 14 days.<|eot_id|>";
        assert_eq!(
            clean_response(raw, "How long do refunds take?", 1200).as_deref(),
            Some("refunds take 14 days.")
        );
    }

    #[test]
    fn clean_drops_duplicate_and_tiny_lines() {
        let raw = "The office opens at nine.\nok\nthe office opens at nine.\nIt closes at five.";
        assert_eq!(
            clean_response(raw, "When?", 1200).as_deref(),
            Some("The office opens at nine.\nIt closes at five.")
        );
    }

    #[test]
    fn clean_collapses_runaway_repetition() {
        let raw = "Backups run nightly. Backups run nightly. Backups run nightly. They keep 30 days.";
        assert_eq!(
            clean_response(raw, "Backups?", 1200).as_deref(),
            Some("Backups run nightly. They keep 30 days.")
        );
    }

    #[test]
    fn clean_truncates_at_sentence_boundary() {
        let raw = "First sentence is here. Second sentence is somewhat longer than that.";
        assert_eq!(
            clean_response(raw, "q", 40).as_deref(),
            Some("First sentence is here.")
        );
    }

    #[test]
    fn clean_rejects_short_or_echoed_output() {
        assert_eq!(clean_response("Yes.", "Is it?", 1200), None);
        assert_eq!(
            clean_response("What is the warranty period?", "What is the warranty period?", 1200),
            None
        );
    }

    #[test]
    fn source_refs_are_parsed() {
        let refs = source_refs("See [Source 3] and [source 1], not [Source x].");
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn excerpt_counts_characters() {
        assert_eq!(excerpt("  héllo  ", 10), "héllo");
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn llama3_template_uses_chat_tokens() {
        let sources = vec![Citation {
            source_number: 1,
            document_id: "a.md".into(),
            ordinal: 0,
            score: 0.1,
            excerpt: "alpha".into(),
        }];
        let prompt = build_prompt(PromptTemplate::Llama3, "Why?", &sources);
        assert!(prompt.starts_with("<|begin_of_text|>"));
        assert!(prompt.contains("[Source 1]\nalpha"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }
}
