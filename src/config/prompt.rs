use log::{ info, warn };
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub const QNA_SYSTEM: &str = "qna_system";
pub const RAG_SYSTEM: &str = "rag_system";
pub const RESEARCH_QUERY_WRITER: &str = "research_query_writer";
pub const RESEARCH_REFLECTION: &str = "research_reflection";
pub const RESEARCH_ANSWER: &str = "research_answer";

const REQUIRED_TEMPLATES: [&str; 5] = [
    QNA_SYSTEM,
    RAG_SYSTEM,
    RESEARCH_QUERY_WRITER,
    RESEARCH_REFLECTION,
    RESEARCH_ANSWER,
];

#[derive(Debug)]
pub enum PromptError {
    TemplateNotFound(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::TemplateNotFound(key) => write!(f, "Prompt template '{}' not found", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Prompt templates with `{name}` placeholders.
#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let templates = [
            (QNA_SYSTEM, DEFAULT_QNA_SYSTEM),
            (RAG_SYSTEM, DEFAULT_RAG_SYSTEM),
            (RESEARCH_QUERY_WRITER, DEFAULT_RESEARCH_QUERY_WRITER),
            (RESEARCH_REFLECTION, DEFAULT_RESEARCH_REFLECTION),
            (RESEARCH_ANSWER, DEFAULT_RESEARCH_ANSWER),
        ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { templates }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        for key in REQUIRED_TEMPLATES {
            if !self.templates.contains_key(key) {
                return Err(PromptError::TemplateNotFound(key.to_string()));
            }
        }
        Ok(())
    }

    pub fn template(&self, key: &str) -> Result<&str, PromptError> {
        self.templates
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| PromptError::TemplateNotFound(key.to_string()))
    }

    /// Substitutes every `{name}` in the template. Unknown placeholders are left as-is.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let mut text = self.template(key)?.to_string();
        for (name, value) in vars {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        Ok(text)
    }

    /// Same as `render`, falling back to the built-in template if the key is missing.
    pub fn render_or_default(&self, key: &str, vars: &[(&str, &str)]) -> String {
        self.render(key, vars).unwrap_or_else(|_| {
            let defaults = PromptConfig::default();
            defaults.render(key, vars).unwrap_or_default()
        })
    }
}

/// Built-in templates, overlaid by the JSON file at `path` when it exists.
pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, PromptError> {
    let mut config = PromptConfig::default();
    if !Path::new(path).exists() {
        warn!("Prompts file '{}' not found, using built-in prompts", path);
        return Ok(Arc::new(config));
    }

    let file_content = fs::read_to_string(path)?;
    let overrides: PromptConfig = serde_json::from_str(&file_content)?;
    info!("Loaded {} prompt override(s) from {}", overrides.templates.len(), path);
    config.templates.extend(overrides.templates);
    config.validate()?;
    Ok(Arc::new(config))
}

const DEFAULT_QNA_SYSTEM: &str =
    "You are a helpful assistant. Answer the user's questions accurately and concisely. \
Use the available tools when the question needs current or external information, and say so when you do not know.";

const DEFAULT_RAG_SYSTEM: &str =
    "You are an assistant that answers questions using the provided documents.

Instructions:
- Answer only from the documents below. If they do not contain the answer, say that you could not find it.
- Mention the source of each fact you use.

{context}";

const DEFAULT_RESEARCH_QUERY_WRITER: &str =
    "Your goal is to generate sophisticated and diverse web search queries based on the user query. \
These queries are intended for an automated web research tool.

Instructions:
- The current date is {current_date}.
- Prefer a single search query. Only add another query if the question asks about several aspects.
- Each query should focus on one specific aspect of the original question.
- Don't produce more than {number_queries} queries.
- Don't generate multiple similar queries.
- Follow the user query and don't invent topics. If the user doesn't ask about any topic, set do_research to false.

Output Format:
- Your response MUST be a JSON object inside a ```json block with these exact keys:
   - \"rationale\": brief explanation of why these queries are relevant
   - \"query\": a list of search queries
   - \"do_research\": whether a search is needed at all

Example:
```json
{
    \"rationale\": \"We need Apple's revenue growth and iPhone unit sales for the same period.\",
    \"query\": [\"Apple total revenue growth fiscal year 2024\", \"iPhone unit sales growth fiscal year 2024\"],
    \"do_research\": true
}
```

User query: {research_topic}";

const DEFAULT_RESEARCH_REFLECTION: &str =
    "You are an expert research assistant analyzing summaries about \"{research_topic}\".

Instructions:
- The current date is {current_date}.
- Identify knowledge gaps or areas that need deeper exploration and generate follow-up queries.
- If the summaries are sufficient to answer the user's question, don't generate follow-up queries.
- Each follow-up query must be self-contained and suitable for a web search.

Output Format:
- Your response MUST be a JSON object inside a ```json block with these exact keys:
   - \"is_sufficient\": true or false
   - \"knowledge_gap\": what information is missing (\"\" if sufficient)
   - \"follow_up_queries\": list of queries ([] if sufficient)

Summaries:
{summaries}";

const DEFAULT_RESEARCH_ANSWER: &str =
    "Generate a high-quality answer to the user's question based on the provided summaries.

Instructions:
- The current date is {current_date}.
- Cite the summaries with their numbers in square brackets, e.g. [2]. Only cite numbers that appear in the summaries.
- If the summaries are empty and the user is only greeting or chatting, just reply naturally.

User question:
{research_topic}

Summaries:
{summaries}";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("expert-agent-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn defaults_cover_every_required_template() {
        let config = PromptConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn render_substitutes_named_placeholders() {
        let config = PromptConfig::default();
        let text = config.render(RAG_SYSTEM, &[("context", "[1] Source: a.md")]).unwrap();
        assert!(text.ends_with("[1] Source: a.md"));
        assert!(!text.contains("{context}"));

        let text = config.render(RESEARCH_QUERY_WRITER, &[("number_queries", "3")]).unwrap();
        assert!(text.contains("more than 3 queries"));
        assert!(text.contains("\"do_research\": true"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = PromptConfig::default().render("nope", &[]).unwrap_err();
        assert!(matches!(err, PromptError::TemplateNotFound(k) if k == "nope"));
    }

    #[test]
    fn missing_file_falls_back_to_builtins() {
        let config = load_prompts("/definitely/not/here.json").unwrap();
        assert_eq!(config.templates.len(), REQUIRED_TEMPLATES.len());
    }

    #[test]
    fn file_overrides_single_template() {
        let path = temp_path("override");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{"templates": {{"qna_system": "Be brief."}}}}"#).unwrap();

        let config = load_prompts(path.to_str().unwrap()).unwrap();
        assert_eq!(config.template(QNA_SYSTEM).unwrap(), "Be brief.");
        assert!(config.template(RESEARCH_ANSWER).unwrap().contains("{summaries}"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn malformed_file_is_rejected() {
        let path = temp_path("broken");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_prompts(path.to_str().unwrap()), Err(PromptError::JsonError(_))));
        fs::remove_file(path).ok();
    }
}
