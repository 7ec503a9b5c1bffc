//! File summarizer agent.
//!
//! A staged pipeline: ingest -> extract -> chunk -> map-summarize ->
//! reduce -> insights -> optional Q&A -> format. The first stage error
//! terminates the run and is reported in `errors`; later stages are
//! skipped. Before running the full pipeline, a cached-answer fast path
//! checks whether a prior substantive summary in the conversation can
//! answer the request directly.

pub mod chunk;
pub mod extract;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::agents::{Agent, AgentContext};
use crate::llm::{ChatTurn, CompletionRequest, LlmError, LlmGateway};
use crate::store::SessionStore;
use crate::types::{AgentKind, AgentResult};

use chunk::{chunk_text, Chunk};
use extract::{extract_text, DocumentStructure, ExtractError, FileType, MAX_FILE_BYTES};

/// Concurrency cap for the per-chunk map stage.
const MAP_CONCURRENCY: usize = 4;

/// History lines folded into the reduce prompt.
const REDUCE_HISTORY_LINES: usize = 5;

/// Q&A context: top chunks and per-chunk character budget.
const QUERY_TOP_CHUNKS: usize = 3;
const QUERY_CHUNK_CHARS: usize = 500;

/// Minimum length for a prior answer to count as a cached summary.
const CACHED_SUMMARY_MIN_CHARS: usize = 500;

/// Terms a cached summary message must mention.
const CACHED_SUMMARY_TERMS: &[&str] =
    &["summary", "document", "analysis", "key insights", "extracted"];

/// Summary rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    Brief,
    Detailed,
    Executive,
    Technical,
}

impl SummaryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Detailed => "detailed",
            Self::Executive => "executive",
            Self::Technical => "technical",
        }
    }

    /// Infer the mode from request wording; detailed is the default.
    pub fn infer(request: &str) -> Self {
        let lower = request.to_lowercase();
        if lower.contains("brief") {
            Self::Brief
        } else if lower.contains("executive") {
            Self::Executive
        } else if lower.contains("technical") {
            Self::Technical
        } else {
            Self::Detailed
        }
    }

    fn chunk_prompt(self) -> &'static str {
        match self {
            Self::Brief => "Summarize this text in 1-2 sentences:",
            Self::Detailed => "Provide a detailed summary of this text:",
            Self::Executive => {
                "Provide an executive summary highlighting key business implications:"
            }
            Self::Technical => "Provide a technical summary with key details and specifications:",
        }
    }

    fn document_instruction(self) -> &'static str {
        match self {
            Self::Brief => "Create a brief 2-3 sentence summary of the entire document.",
            Self::Detailed => "Create a comprehensive summary covering all main points and details.",
            Self::Executive => {
                "Create an executive summary focusing on key decisions, outcomes, and business impact."
            }
            Self::Technical => {
                "Create a technical summary with specifications, methodologies, and detailed findings."
            }
        }
    }
}

/// Pipeline progress markers, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    FileIngested,
    TextExtracted,
    TextChunked,
    SummariesGenerated,
    QueryProcessed,
    OutputFormatted,
    Complete,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileIngested => "file_ingested",
            Self::TextExtracted => "text_extracted",
            Self::TextChunked => "text_chunked",
            Self::SummariesGenerated => "summaries_generated",
            Self::QueryProcessed => "query_processed",
            Self::OutputFormatted => "output_formatted",
            Self::Complete => "complete",
        }
    }
}

/// Working state for one file invocation.
struct FileSummaryState {
    file_name: String,
    file_type: FileType,
    extracted_text: String,
    structure: DocumentStructure,
    chunks: Vec<Chunk>,
    chunk_summaries: Vec<String>,
    final_summary: String,
    key_insights: Vec<String>,
    query_response: Option<String>,
    current_step: PipelineStep,
}

/// File summarizer agent over the gateway and session store.
pub struct FileAgent {
    gateway: Arc<LlmGateway>,
    store: Arc<SessionStore>,
}

impl FileAgent {
    pub fn new(gateway: Arc<LlmGateway>, store: Arc<SessionStore>) -> Self {
        Self { gateway, store }
    }

    /// The uploaded blob from the scratchpad, or the session's stored file
    /// that the request most plausibly refers to.
    async fn resolve_blob(&self, ctx: &AgentContext<'_>) -> Option<(Vec<u8>, String)> {
        if let Some(blob) = &ctx.scratchpad.file_blob {
            let name = ctx
                .scratchpad
                .file_name
                .clone()
                .unwrap_or_else(|| "uploaded_file.txt".to_owned());
            return Some((blob.clone(), name));
        }

        let files = self.store.list_files(ctx.session_id()).await.ok()?;
        let request_lower = ctx.user_request().to_lowercase();
        let chosen = files
            .iter()
            .find(|f| request_lower.contains(&f.name.to_lowercase()))
            .or_else(|| files.first())?;
        let bytes = self
            .store
            .load_file(ctx.session_id(), &chosen.name)
            .await
            .ok()?;
        Some((bytes, chosen.name.clone()))
    }

    /// Fast path: answer from a prior substantive summary in the
    /// conversation instead of re-processing the document.
    async fn cached_answer(&self, ctx: &AgentContext<'_>, file_name: &str) -> Option<AgentResult> {
        let cached: Vec<&str> = ctx
            .scratchpad
            .history
            .iter()
            .filter(|entry| entry.role.eq_ignore_ascii_case("assistant"))
            .map(|entry| entry.body.as_str())
            .filter(|body| {
                body.len() >= CACHED_SUMMARY_MIN_CHARS && {
                    let lower = body.to_lowercase();
                    CACHED_SUMMARY_TERMS.iter().any(|term| lower.contains(term))
                }
            })
            .collect();
        let summary = cached.last()?;

        if is_question(ctx.user_request()) {
            let answer = self
                .answer_from_cached(ctx.user_request(), summary, file_name, ctx)
                .await?;
            info!(file = file_name, "answered question from cached summary");
            Some(
                AgentResult::success(
                    answer.clone(),
                    serde_json::json!({
                        "query_response": answer,
                        "summary": summary,
                        "key_insights": [],
                        "metadata": {"file_name": file_name, "cached": true},
                        "file_type": "cached",
                        "processing_steps": "cached_response",
                    }),
                ),
            )
        } else {
            info!(file = file_name, "returning cached summary");
            Some(AgentResult::success(
                (*summary).to_owned(),
                serde_json::json!({
                    "summary": summary,
                    "key_insights": [],
                    "metadata": {"file_name": file_name, "cached": true},
                    "file_type": "cached",
                    "processing_steps": "cached_summary",
                }),
            ))
        }
    }

    async fn answer_from_cached(
        &self,
        question: &str,
        cached_summary: &str,
        file_name: &str,
        ctx: &AgentContext<'_>,
    ) -> Option<String> {
        let prompt = format!(
            "Answer this question about the document \"{file_name}\" using the provided summary.\n\
             If the summary doesn't contain enough information to answer the question, say so clearly.\n\n\
             Question: {question}\n\n\
             Document Summary:\n{cached_summary}\n\n\
             Provide a direct, factual answer based on the summary. Keep your response concise."
        );
        let request = CompletionRequest::text(vec![ChatTurn::user(prompt)], 0.1);
        let answer = match self.gateway.complete(&request, ctx.cancel).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "cached-summary answer failed, falling through");
                return None;
            }
        };

        // The model must explicitly signal insufficiency to force the
        // full pipeline.
        let lower = answer.to_lowercase();
        let insufficient = [
            "doesn't contain",
            "does not contain",
            "not enough information",
            "cannot answer",
            "insufficient",
        ];
        if insufficient.iter().any(|needle| lower.contains(needle)) {
            return None;
        }
        Some(answer.trim().to_owned())
    }

    async fn run_pipeline(
        &self,
        ctx: &AgentContext<'_>,
        blob: Vec<u8>,
        file_name: String,
    ) -> Result<FileSummaryState, PipelineFailure> {
        // ── Ingest ──
        if blob.is_empty() {
            return Err(PipelineFailure::at(
                PipelineStep::FileIngested,
                "No file content provided",
            ));
        }
        if blob.len() > MAX_FILE_BYTES {
            return Err(PipelineFailure::at(
                PipelineStep::FileIngested,
                "File too large (max 50MB)",
            ));
        }
        let file_type = FileType::from_name(&file_name).ok_or_else(|| {
            let ext = file_name.rsplit('.').next().unwrap_or_default();
            PipelineFailure::at(
                PipelineStep::FileIngested,
                format!("Unsupported file type: .{ext}"),
            )
        })?;
        info!(file = %file_name, file_type = %file_type, bytes = blob.len(), "file ingested");

        // ── Extract (CPU-bound, off the async executor) ──
        let (extracted_text, structure) =
            tokio::task::spawn_blocking(move || extract_text(file_type, &blob))
                .await
                .map_err(|e| {
                    PipelineFailure::at(
                        PipelineStep::TextExtracted,
                        format!("Text extraction error: {e}"),
                    )
                })?
                .map_err(|e: ExtractError| {
                    PipelineFailure::at(
                        PipelineStep::TextExtracted,
                        format!("Text extraction error: {e}"),
                    )
                })?;
        info!(chars = extracted_text.len(), "text extracted");

        // ── Chunk ──
        let chunks = chunk_text(&extracted_text, structure.total_pages());
        if chunks.is_empty() {
            return Err(PipelineFailure::at(
                PipelineStep::TextChunked,
                "No text to chunk",
            ));
        }
        info!(chunks = chunks.len(), "text chunked");

        let mode = ctx
            .param_str("summary_mode")
            .map(SummaryMode::infer)
            .unwrap_or_else(|| SummaryMode::infer(ctx.user_request()));

        // ── Map: per-chunk summaries, bounded fan-out, order preserved ──
        let chunk_summaries = self.summarize_chunks(ctx, &chunks, mode).await.map_err(|e| {
            PipelineFailure::at(
                PipelineStep::SummariesGenerated,
                format!("Summarization error: {e}"),
            )
        })?;

        // ── Reduce ──
        let final_summary = self
            .summarize_document(ctx, &chunk_summaries, mode)
            .await
            .map_err(|e| {
                PipelineFailure::at(
                    PipelineStep::SummariesGenerated,
                    format!("Summarization error: {e}"),
                )
            })?;
        // The reduction must reduce: never report a summary longer than the
        // source text.
        let final_summary = if final_summary.len() > extracted_text.len() {
            final_summary
                .chars()
                .take(extracted_text.chars().count())
                .collect()
        } else {
            final_summary
        };

        let key_insights = self.extract_key_insights(ctx, &final_summary).await;
        info!(insights = key_insights.len(), "summaries generated");

        let mut state = FileSummaryState {
            file_name,
            file_type,
            extracted_text,
            structure,
            chunks,
            chunk_summaries,
            final_summary,
            key_insights,
            query_response: None,
            current_step: PipelineStep::SummariesGenerated,
        };

        // ── Optional Q&A ──
        if let Some(query) = ctx.param_str("query") {
            state.query_response = self.answer_query(ctx, &state, query).await;
            state.current_step = PipelineStep::QueryProcessed;
        }

        state.current_step = PipelineStep::Complete;
        Ok(state)
    }

    async fn summarize_chunks(
        &self,
        ctx: &AgentContext<'_>,
        chunks: &[Chunk],
        mode: SummaryMode,
    ) -> Result<Vec<String>, LlmError> {
        let mut futures: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, LlmError>> + Send + '_>>,
        > = Vec::with_capacity(chunks.len());
        for chunk in chunks.iter() {
            futures.push(Box::pin(self.summarize_chunk(ctx, chunk, mode)));
        }
        let results: Vec<Result<String, LlmError>> =
            stream::iter(futures).buffered(MAP_CONCURRENCY).collect().await;

        let mut summaries = Vec::with_capacity(results.len());
        for result in results {
            summaries.push(result?.trim().to_owned());
        }
        Ok(summaries)
    }

    async fn summarize_chunk(
        &self,
        ctx: &AgentContext<'_>,
        chunk: &Chunk,
        mode: SummaryMode,
    ) -> Result<String, LlmError> {
        let gateway = Arc::clone(&self.gateway);
        let cancel = ctx.cancel.clone();
        let prompt = format!(
            "{}\n\nText: {}\n\nFocus on the most important information and maintain factual accuracy.",
            mode.chunk_prompt(),
            chunk.text
        );
        let request = CompletionRequest::text(vec![ChatTurn::user(prompt)], 0.1);
        gateway.complete(&request, &cancel).await
    }

    async fn summarize_document(
        &self,
        ctx: &AgentContext<'_>,
        chunk_summaries: &[String],
        mode: SummaryMode,
    ) -> Result<String, LlmError> {
        let combined = chunk_summaries.join("\n\n");
        let prompt = format!(
            "You are creating a {mode} summary of a document based on chunk summaries.\n\n\
             User context: {request}\n\n\
             Recent conversation history (for additional context):\n{history}\n\n\
             {instruction}\n\n\
             Chunk summaries:\n{combined}\n\n\
             Generate a cohesive {mode} summary that captures the essence of the entire document.\n\
             Consider the conversation history to provide contextually relevant information.",
            mode = mode.as_str(),
            request = ctx.user_request(),
            history = ctx.history_lines(REDUCE_HISTORY_LINES),
            instruction = mode.document_instruction(),
        );
        let request = CompletionRequest::text(vec![ChatTurn::user(prompt)], 0.1)
            .with_max_tokens(4096);
        let summary = self.gateway.complete(&request, ctx.cancel).await?;
        Ok(summary.trim().to_owned())
    }

    /// 3-5 key insights as a JSON list; on parse failure, the first five
    /// non-empty lines of the raw response.
    async fn extract_key_insights(&self, ctx: &AgentContext<'_>, summary: &str) -> Vec<String> {
        let prompt = format!(
            "Extract 3-5 key insights from this document summary. Each insight should be:\n\
             - Concise (1 sentence)\n\
             - Actionable or informative\n\
             - Factual\n\n\
             Summary: {summary}\n\n\
             Return as a JSON array of strings."
        );
        let request = CompletionRequest::text(vec![ChatTurn::user(prompt)], 0.1);
        let raw = match self.gateway.complete(&request, ctx.cancel).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "insight extraction failed");
                return Vec::new();
            }
        };

        match crate::llm::json::parse_json_lenient(&raw) {
            Ok(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(ToOwned::to_owned)
                .take(5)
                .collect(),
            _ => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToOwned::to_owned)
                .take(5)
                .collect(),
        }
    }

    /// Token-overlap chunk selection plus a direct-answer call.
    async fn answer_query(
        &self,
        ctx: &AgentContext<'_>,
        state: &FileSummaryState,
        query: &str,
    ) -> Option<String> {
        let query_lower = query.to_lowercase();
        let tokens: Vec<&str> = query_lower.split_whitespace().collect();

        let relevant: Vec<&Chunk> = state
            .chunks
            .iter()
            .filter(|chunk| {
                let text_lower = chunk.text.to_lowercase();
                tokens.iter().any(|token| text_lower.contains(token))
            })
            .take(QUERY_TOP_CHUNKS)
            .collect();

        let context: String = relevant
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let section = i.saturating_add(1);
                let text: String = chunk.text.chars().take(QUERY_CHUNK_CHARS).collect();
                format!("Section {section}: {text}...")
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "Answer this query about the document using the provided context:\n\n\
             Query: {query}\n\n\
             Context from relevant sections:\n{context}\n\n\
             Provide a direct, factual answer based on the context. If the context doesn't \
             contain enough information, say so."
        );
        let request = CompletionRequest::text(vec![ChatTurn::user(prompt)], 0.1);
        match self.gateway.complete(&request, ctx.cancel).await {
            Ok(answer) => Some(answer.trim().to_owned()),
            Err(e) => {
                warn!(error = %e, "query processing failed");
                Some(format!("Query processing error: {e}"))
            }
        }
    }

    fn format_output(state: &FileSummaryState, mode: SummaryMode) -> AgentResult {
        let original_length = state.extracted_text.len();
        let summary_length = state.final_summary.len();
        let reduction_percentage = if original_length > 0 {
            let reduced = original_length.saturating_sub(summary_length);
            let scaled = u128::try_from(reduced)
                .unwrap_or(0)
                .saturating_mul(1000)
                .checked_div(u128::try_from(original_length).unwrap_or(1))
                .unwrap_or(0);
            // One decimal place.
            let whole = scaled.checked_div(10).unwrap_or(0);
            let tenth = scaled.checked_rem(10).unwrap_or(0);
            format!("{whole}.{tenth}")
        } else {
            "0.0".to_owned()
        };

        let metadata = serde_json::json!({
            "file_name": state.file_name,
            "summary_mode": mode.as_str(),
            "original_length": original_length,
            "summary_length": summary_length,
            "reduction_percentage": reduction_percentage,
            "num_chunks": state.chunks.len(),
            "num_insights": state.key_insights.len(),
            "structure": state.structure,
        });

        let preview: String = state.final_summary.chars().take(200).collect();
        let message = format!(
            "**Document Analysis Complete**\n\n**Summary:** {preview}...\n\n\
             **Key Insights:** {} insights extracted",
            state.key_insights.len()
        );

        let mut result = serde_json::json!({
            "summary": state.final_summary,
            "key_insights": state.key_insights,
            "metadata": metadata,
            "file_type": state.file_type.as_str(),
            "num_chunk_summaries": state.chunk_summaries.len(),
            "processing_steps": state.current_step.as_str(),
        });
        if let Some(answer) = &state.query_response {
            result["query_response"] = serde_json::Value::String(answer.clone());
        }

        AgentResult::success(message, result).with_collaboration(serde_json::json!({
            "summary": state.final_summary,
            "next_actions": state.key_insights,
        }))
    }
}

/// A stage failure: the step it happened in plus the error list.
struct PipelineFailure {
    step: PipelineStep,
    errors: Vec<String>,
}

impl PipelineFailure {
    fn at(step: PipelineStep, message: impl Into<String>) -> Self {
        Self {
            step,
            errors: vec![message.into()],
        }
    }
}

/// Interrogative heuristic for the cached fast path.
fn is_question(request: &str) -> bool {
    if request.contains('?') {
        return true;
    }
    let lower = request.to_lowercase();
    [
        "what", "how", "why", "when", "where", "who", "which", "can you", "tell me", "explain",
    ]
    .iter()
    .any(|kw| lower.starts_with(kw) || lower.contains(&format!(" {kw} ")))
}

#[async_trait]
impl Agent for FileAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::File
    }

    async fn process(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let Some((blob, file_name)) = self.resolve_blob(ctx).await else {
            return AgentResult::error("No file content provided for analysis");
        };

        if let Some(cached) = self.cached_answer(ctx, &file_name).await {
            return cached;
        }

        let mode = ctx
            .param_str("summary_mode")
            .map(SummaryMode::infer)
            .unwrap_or_else(|| SummaryMode::infer(ctx.user_request()));

        match self.run_pipeline(ctx, blob, file_name).await {
            Ok(state) => Self::format_output(&state, mode),
            Err(failure) => {
                let joined = failure.errors.join("; ");
                AgentResult {
                    status: crate::types::AgentStatus::Error,
                    message: format!("Processing failed: {joined}"),
                    result: serde_json::json!({
                        "errors": failure.errors,
                        "current_step": failure.step.as_str(),
                    }),
                    collaboration_data: serde_json::Value::Null,
                }
            }
        }
    }
}
