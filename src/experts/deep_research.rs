use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use futures::{ stream, StreamExt };
use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::json;
use std::sync::Arc;

use super::{ ConversationMemory, Expert, ExpertInfo, ExpertReply, ExpertType, ReplyStream };
use crate::brain::{ Brain, ThinkContext };
use crate::config::prompt::{ PromptConfig, RESEARCH_ANSWER, RESEARCH_QUERY_WRITER, RESEARCH_REFLECTION };
use crate::error::{ BrainError, ExpertError, ExpertFailure, ToolError };
use crate::history::format_history_for_prompt;
use crate::llm::chat::TextStream;
use crate::models::chat::{ ChatMessage, Conversation };
use crate::tools::web_search::SearchHit;
use crate::tools::Tool;

pub const DEFAULT_MAX_RESEARCH_LOOPS: usize = 2;
pub const DEFAULT_INITIAL_QUERIES: usize = 3;
pub const DEFAULT_RESULTS_PER_QUERY: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct ResearchSettings {
    /// Upper bound on search rounds per turn.
    pub max_loops: usize,
    /// Upper bound on queries issued per round.
    pub max_queries: usize,
    pub results_per_query: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_loops: DEFAULT_MAX_RESEARCH_LOOPS,
            max_queries: DEFAULT_INITIAL_QUERIES,
            results_per_query: DEFAULT_RESULTS_PER_QUERY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResearchPlan {
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub query: Vec<String>,
    #[serde(default)]
    pub do_research: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Reflection {
    #[serde(default)]
    pub is_sufficient: bool,
    #[serde(default)]
    pub knowledge_gap: String,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub index: usize,
    pub title: String,
    pub url: String,
}

/// Everything gathered before the final answer is written.
#[derive(Debug, Default)]
struct Findings {
    topic: String,
    queries: Vec<String>,
    failed_queries: Vec<String>,
    sources: Vec<Source>,
    summaries: Vec<String>,
    loops: usize,
}

impl Findings {
    fn add_round(&mut self, query: &str, outcome: Result<Vec<SearchHit>, ToolError>) {
        self.queries.push(query.to_string());
        let hits = match outcome {
            Ok(hits) => hits,
            Err(e) => {
                self.failed_queries.push(query.to_string());
                self.summaries.push(format!("Query: {}\n\nError: web search failed ({})", query, e));
                return;
            }
        };
        let mut lines = Vec::new();
        for hit in hits {
            if hit.title.trim().is_empty() || hit.url.trim().is_empty() {
                continue;
            }
            let index = match self.sources.iter().find(|s| s.url == hit.url) {
                Some(existing) => existing.index,
                None => {
                    let index = self.sources.len() + 1;
                    self.sources.push(Source { index, title: hit.title.clone(), url: hit.url.clone() });
                    index
                }
            };
            lines.push(format!("[{}] {}: {}", index, hit.title.trim(), hit.snippet.trim()));
        }
        if lines.is_empty() {
            lines.push("No useful results.".to_string());
        }
        self.summaries.push(format!("Query: {}\n\nSearch Results:\n{}", query, lines.join("\n")));
    }

    fn summaries_text(&self) -> String {
        self.summaries.join("\n\n---\n\n")
    }

    fn sources_footer(&self) -> String {
        if self.sources.is_empty() {
            return String::new();
        }
        let list: Vec<String> = self.sources
            .iter()
            .map(|s| format!("[{}] {} - {}", s.index, s.title, s.url))
            .collect();
        format!("\n\nSources:\n{}", list.join("\n"))
    }
}

/// Multi-step web research: plan queries, search, reflect, repeat, then write a cited answer.
pub struct DeepResearchExpert {
    brain: Arc<dyn Brain>,
    memory: ConversationMemory,
    search: Arc<dyn Tool>,
    prompts: Arc<PromptConfig>,
    settings: ResearchSettings,
}

impl DeepResearchExpert {
    pub fn new(
        brain: Arc<dyn Brain>,
        memory: ConversationMemory,
        search: Arc<dyn Tool>,
        prompts: Arc<PromptConfig>,
        settings: ResearchSettings
    ) -> Self {
        info!(
            "DEEPRESEARCH expert initialized (search tool: {}, max loops: {})",
            search.schema().name,
            settings.max_loops
        );
        Self { brain, memory, search, prompts, settings }
    }

    fn fail(e: BrainError, conversation_id: &str) -> ExpertError {
        ExpertFailure::from(e).during(ExpertType::DeepResearch, conversation_id)
    }

    async fn ask(&self, prompt: String) -> Result<String, BrainError> {
        Ok(self.brain.think(&prompt, &ThinkContext::default()).await?.content)
    }

    /// One outcome per query; a failed search is kept as an error, not as an empty result.
    async fn search_all(&self, queries: &[String]) -> Vec<(String, Result<Vec<SearchHit>, ToolError>)> {
        let tool = self.search.schema().name.clone();
        let calls = queries.iter().map(|q| {
            let args = json!({ "query": q, "max_results": self.settings.results_per_query });
            let tool = tool.clone();
            async move {
                let outcome = self.search
                    .invoke(args).await
                    .and_then(|output| {
                        serde_json::from_str::<Vec<SearchHit>>(&output).map_err(|e| {
                            ToolError::execution_failed(tool, format!("unreadable search output: {}", e))
                        })
                    });
                if let Err(e) = &outcome {
                    warn!("Search for '{}' failed: {}", q, e);
                }
                (q.clone(), outcome)
            }
        });
        join_all(calls).await
    }

    async fn research(&self, message: &str, history: &[ChatMessage]) -> Result<Findings, BrainError> {
        let current_date = Utc::now().format("%B %d, %Y").to_string();
        let mut findings = Findings {
            topic: research_topic(message, history),
            ..Default::default()
        };

        let plan_prompt = self.prompts.render_or_default(
            RESEARCH_QUERY_WRITER,
            &[
                ("current_date", current_date.as_str()),
                ("number_queries", self.settings.max_queries.to_string().as_str()),
                ("research_topic", findings.topic.as_str()),
            ]
        );
        let plan = match parse_plan(&self.ask(plan_prompt).await?) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Query planning output ignored: {}", e);
                ResearchPlan { rationale: String::new(), query: Vec::new(), do_research: false }
            }
        };

        let mut pending = if plan.do_research { cap_queries(plan.query, self.settings.max_queries) } else { Vec::new() };
        if pending.is_empty() {
            info!("No web research needed for this turn");
        }

        while !pending.is_empty() && findings.loops < self.settings.max_loops {
            findings.loops += 1;
            info!("Research loop {}: {} search queries", findings.loops, pending.len());
            for (query, outcome) in self.search_all(&pending).await {
                findings.add_round(&query, outcome);
            }
            pending.clear();

            if findings.loops >= self.settings.max_loops {
                info!("Research loop limit ({}) reached", self.settings.max_loops);
                break;
            }

            let reflection_prompt = self.prompts.render_or_default(
                RESEARCH_REFLECTION,
                &[
                    ("current_date", current_date.as_str()),
                    ("research_topic", findings.topic.as_str()),
                    ("summaries", findings.summaries_text().as_str()),
                ]
            );
            match parse_reflection(&self.ask(reflection_prompt).await?) {
                Ok(r) if !r.is_sufficient => {
                    info!("Knowledge gap: {}", r.knowledge_gap);
                    pending = cap_queries(
                        r.follow_up_queries
                            .into_iter()
                            .filter(|q| !findings.queries.contains(q))
                            .collect(),
                        self.settings.max_queries
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Reflection output ignored, finishing research: {}", e),
            }
        }
        Ok(findings)
    }

    fn answer_prompt(&self, findings: &Findings) -> String {
        let current_date = Utc::now().format("%B %d, %Y").to_string();
        self.prompts.render_or_default(
            RESEARCH_ANSWER,
            &[
                ("current_date", current_date.as_str()),
                ("research_topic", findings.topic.as_str()),
                ("summaries", findings.summaries_text().as_str()),
            ]
        )
    }
}

fn cap_queries(queries: Vec<String>, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for q in queries.into_iter().map(|q| q.trim().to_string()) {
        if !q.is_empty() && !out.contains(&q) {
            out.push(q);
        }
    }
    out.truncate(max);
    out
}

fn research_topic(message: &str, history: &[ChatMessage]) -> String {
    if history.is_empty() {
        return message.to_string();
    }
    format!("{}User: {}", format_history_for_prompt(history), message)
}

#[async_trait]
impl Expert for DeepResearchExpert {
    fn expert_type(&self) -> ExpertType {
        ExpertType::DeepResearch
    }

    async fn process(&self, message: &str, conversation_id: &str) -> Result<ExpertReply, ExpertError> {
        let history = self.memory.load(conversation_id).await?;
        let findings = self.research(message, &history).await.map_err(|e| Self::fail(e, conversation_id))?;
        let answer = self.ask(self.answer_prompt(&findings)).await.map_err(|e| Self::fail(e, conversation_id))?;
        let content = format!("{}{}", answer.trim_end(), findings.sources_footer());

        self.memory.record_turn(conversation_id, message, &content).await?;
        Ok(ExpertReply {
            content,
            conversation_id: conversation_id.to_string(),
            metadata: json!({
                "sources": findings.sources,
                "queries": findings.queries,
                "failed_queries": findings.failed_queries,
                "research_loops": findings.loops,
            }),
        })
    }

    async fn stream(&self, message: &str, conversation_id: &str) -> Result<ReplyStream, ExpertError> {
        let history = self.memory.load(conversation_id).await?;
        let findings = self.research(message, &history).await.map_err(|e| Self::fail(e, conversation_id))?;
        let answer = self.brain
            .think_stream(&self.answer_prompt(&findings), &ThinkContext::default()).await
            .map_err(|e| Self::fail(e, conversation_id))?;

        let footer = findings.sources_footer();
        let fragments: TextStream = if footer.is_empty() {
            answer
        } else {
            Box::pin(answer.chain(stream::iter(vec![Ok(footer)])))
        };
        Ok(self.memory.persist_after_stream(conversation_id, message, fragments))
    }

    async fn clear_history(&self, conversation_id: &str) -> Result<(), ExpertError> {
        self.brain.reset();
        self.memory.clear(conversation_id).await
    }

    async fn history(&self, conversation_id: &str) -> Result<Conversation, ExpertError> {
        self.memory.conversation(conversation_id).await
    }

    async fn conversation_ids(&self) -> Result<Vec<String>, ExpertError> {
        self.memory.conversation_ids().await
    }

    fn info(&self) -> ExpertInfo {
        ExpertInfo {
            name: "Deep Research Expert".into(),
            description: "Researches a question on the web over several rounds and answers with citations.".into(),
            capabilities: vec![
                "web_research".into(),
                "query_planning".into(),
                "reflection".into(),
                "citations".into(),
                "conversation_memory".into()
            ],
        }
    }
}

/// The JSON object inside a ```json fence, or the outermost braces when there is no fence.
fn extract_json_block(content: &str) -> Option<&str> {
    for fence in ["```json", "```"] {
        if let Some(start) = content.find(fence) {
            let body = &content[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return Some(body[..end].trim());
            }
        }
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}

fn next_significant(chars: &[char], mut i: usize) -> Option<char> {
    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => {
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            c => {
                return Some(c);
            }
        }
    }
    None
}

/// Accepts the JSON dialect models tend to produce: `True`/`False`/`None`,
/// `//` comments and trailing commas.
fn relax_json(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            c if c.is_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_alphanumeric() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let mapped = match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                };
                out.push_str(mapped);
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

fn parse_model_json<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T, BrainError> {
    let block = extract_json_block(content).ok_or_else(||
        BrainError::MalformedOutput("no JSON object in model output".into())
    )?;
    serde_json::from_str(&relax_json(block)).map_err(|e| BrainError::MalformedOutput(e.to_string()))
}

pub fn parse_plan(content: &str) -> Result<ResearchPlan, BrainError> {
    parse_model_json(content)
}

pub fn parse_reflection(content: &str) -> Result<Reflection, BrainError> {
    parse_model_json(content)
}
