//! Text segmentation pipeline.
//!
//! A document is consumed chunk by chunk. Each chunk takes three completion
//! calls: analyze (find a semantic boundary near ~1000 tokens), title, and
//! format (emit a `{instruction, input, output}` object).

use crate::ai::{CompletionRequest, CompletionService};
use crate::error::PipelineStage;
use crate::models::TextRecord;
use crate::{prompts, Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Anchors shorter than this match too easily to be trusted.
const MIN_ANCHOR_CHARS: usize = 8;
const MAX_ANCHOR_CHARS: usize = 80;
const MAX_ANCHOR_WORDS: usize = 8;

/// System prompts for the three agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPrompts {
    pub analysis: String,
    pub title: String,
    pub format: String,
}

impl Default for TextPrompts {
    fn default() -> Self {
        Self {
            analysis: prompts::TEXT_ANALYSIS.to_string(),
            title: prompts::TITLE_GENERATION.to_string(),
            format: prompts::FORMAT.to_string(),
        }
    }
}

/// How the analyze step's output was mapped back onto the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentBoundary {
    /// The model returned a literal prefix of the remaining text.
    Exact,
    /// The model rewrote the passage; its closing words were found in the source.
    Anchored,
    /// Nothing matched; as many characters as the model returned were consumed.
    LengthFallback,
}

/// Result of the format step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatOutcome {
    /// The model's JSON parsed, possibly after brace repair.
    Parsed(TextRecord),
    /// The JSON was irreparable; the record was built from title and chunk.
    Synthesized(TextRecord),
}

impl FormatOutcome {
    pub fn into_record(self) -> TextRecord {
        match self {
            FormatOutcome::Parsed(record) | FormatOutcome::Synthesized(record) => record,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, FormatOutcome::Synthesized(_))
    }
}

pub struct TextProcessor {
    completion: Arc<dyn CompletionService>,
    prompts: TextPrompts,
}

impl TextProcessor {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            prompts: TextPrompts::default(),
        }
    }

    pub fn with_prompts(mut self, prompts: TextPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn set_prompts(&mut self, prompts: TextPrompts) {
        self.prompts = prompts;
    }

    /// Segment `text` and return one record per chunk, in document order.
    pub async fn process_text(&self, text: &str) -> Result<Vec<TextRecord>> {
        Ok(self
            .process_text_outcomes(text)
            .await?
            .into_iter()
            .map(FormatOutcome::into_record)
            .collect())
    }

    /// Like [`process_text`](Self::process_text) but keeps whether each
    /// record was parsed or synthesized.
    pub async fn process_text_outcomes(&self, text: &str) -> Result<Vec<FormatOutcome>> {
        let mut remaining = text.trim();
        let mut outcomes = Vec::new();

        while !remaining.is_empty() {
            info!(
                "Processing segment {} ({} chars remaining)",
                outcomes.len() + 1,
                remaining.chars().count()
            );

            let analyzed = self
                .completion
                .complete(CompletionRequest::with_system(&self.prompts.analysis, remaining))
                .await
                .map_err(|e| e.in_stage(PipelineStage::Analyze))?;
            if analyzed.is_empty() {
                return Err(Error::MalformedResponse("model returned an empty segment".to_string())
                    .in_stage(PipelineStage::Analyze));
            }

            let (end, boundary) = resolve_boundary(remaining, &analyzed);
            match boundary {
                SegmentBoundary::Exact => debug!("Segment boundary matched source exactly"),
                SegmentBoundary::Anchored => {
                    warn!("Analysis output differs from source; split at anchored boundary")
                }
                SegmentBoundary::LengthFallback => {
                    warn!("Analysis output not found in source; split by character count")
                }
            }

            let (chunk, rest) = match (remaining.get(..end), remaining.get(end..)) {
                (Some(chunk), Some(rest)) => (chunk.trim(), rest.trim_start()),
                _ => {
                    return Err(Error::Invariant(format!(
                        "segment boundary {} is not a char boundary",
                        end
                    )))
                }
            };
            remaining = rest;

            let title = self
                .completion
                .complete(CompletionRequest::with_system(&self.prompts.title, chunk))
                .await
                .map_err(|e| e.in_stage(PipelineStage::Title))?;
            debug!("Generated title: {}", title);

            let formatted = self
                .completion
                .complete(CompletionRequest::with_system(
                    &self.prompts.format,
                    prompts::render(prompts::FORMAT_USER, &[("title", &title), ("text", chunk)]),
                ))
                .await
                .map_err(|e| e.in_stage(PipelineStage::Format))?;

            let outcome = interpret_format_response(&formatted, &title, chunk);
            if outcome.is_synthesized() {
                warn!(
                    "Format output was not valid JSON, built record from title. Raw: {}",
                    formatted
                );
            }
            outcomes.push(outcome);
        }

        info!("Text processing produced {} records", outcomes.len());
        Ok(outcomes)
    }
}

/// Map the analyze output onto `remaining`, returning the byte offset where
/// the chunk ends. The offset is always a char boundary and greater than zero
/// when both inputs are non-empty.
pub fn resolve_boundary(remaining: &str, analyzed: &str) -> (usize, SegmentBoundary) {
    if remaining.starts_with(analyzed) {
        return (analyzed.len(), SegmentBoundary::Exact);
    }

    if let Some(end) = anchored_end(remaining, analyzed) {
        return (end, SegmentBoundary::Anchored);
    }

    let chars = analyzed.chars().count();
    let end = remaining
        .char_indices()
        .nth(chars)
        .map_or(remaining.len(), |(idx, _)| idx);
    (end, SegmentBoundary::LengthFallback)
}

fn anchored_end(remaining: &str, analyzed: &str) -> Option<usize> {
    let last_line = analyzed.lines().rev().map(str::trim).find(|line| !line.is_empty())?;

    let word_starts: Vec<usize> = last_line
        .char_indices()
        .filter(|&(idx, ch)| {
            !ch.is_whitespace()
                && last_line[..idx]
                    .chars()
                    .next_back()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(idx, _)| idx)
        .collect();

    // Longest word suffix first; the model usually keeps a passage's closing words.
    for &start in word_starts.iter().rev().take(MAX_ANCHOR_WORDS).rev() {
        let anchor = &last_line[start..];
        let anchor_chars = anchor.chars().count();
        if anchor_chars > MAX_ANCHOR_CHARS {
            continue;
        }
        if anchor_chars < MIN_ANCHOR_CHARS {
            break;
        }

        // Prefer the occurrence ending closest to where the model thought the chunk ended.
        let best = remaining
            .match_indices(anchor)
            .map(|(idx, matched)| idx + matched.len())
            .min_by_key(|end| end.abs_diff(analyzed.len()));
        if best.is_some() {
            return best;
        }
    }
    None
}

/// Trim a model reply down to its outermost `{ ... }` object.
pub fn repair_json_object(raw: &str) -> &str {
    let mut text = raw.trim();
    if !text.starts_with('{') {
        if let Some(start) = text.find('{') {
            text = &text[start..];
        }
    }
    if !text.ends_with('}') {
        text = match text.rfind('}') {
            Some(end) => &text[..=end],
            None => "",
        };
    }
    text
}

/// Parse the format step's reply, falling back to a record built from the
/// title and chunk when the JSON cannot be repaired.
pub fn interpret_format_response(raw: &str, title: &str, chunk: &str) -> FormatOutcome {
    match serde_json::from_str::<TextRecord>(repair_json_object(raw)) {
        Ok(record) => FormatOutcome::Parsed(record),
        Err(e) => {
            debug!("Format output rejected: {}", e);
            FormatOutcome::Synthesized(TextRecord::new(title, chunk))
        }
    }
}
