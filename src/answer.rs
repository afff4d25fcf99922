//! Retrieval-augmented answers and file-oriented chat requests.
//!
//! [`answer`] ranks every live chunk against the question, packs the best
//! ones into a context prefix bounded by half of `max_chunk_size`, and
//! asks the chat model with that context in front of the question. The
//! other half of the budget is left for the reply.
//!
//! [`send_with_files`] and [`extract_files`] cover the code-generation
//! round trip: input files go out as fenced blocks and output files come
//! back as `File: <path>` headers followed by fenced blocks.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::chat::ChatClient;
use crate::models::{ChatMessage, ChatResponse};
use crate::store::Store;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Prefix of the user message carrying retrieved context.
pub const CONTEXT_TEMPLATE: &str = "Use the following context when answering.\n\nContext:\n";

/// Synthetic assistant turn acknowledging the context.
pub const ACK: &str = "Great! I've read the context.";

/// Context text picked from ranked chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSelection {
    pub text: String,
    /// How many chunks made it into `text`.
    pub included: usize,
}

/// Pack ranked chunk texts into a context string.
///
/// The budget is `max_chunk_size / 2` bytes, counted together with
/// [`CONTEXT_TEMPLATE`]. Each chunk contributes its text plus a blank
/// line. Packing stops at the first chunk that would overflow; that chunk
/// and everything after it is left out.
///
/// ```
/// use docgrok::answer::assemble_context;
///
/// let texts = vec!["a".repeat(4000), "b".repeat(4000), "c".repeat(4000)];
/// let selection = assemble_context(texts.iter().map(String::as_str), 16384);
/// assert_eq!(selection.included, 2);
/// ```
pub fn assemble_context<'a, I>(texts: I, max_chunk_size: usize) -> ContextSelection
where
    I: IntoIterator<Item = &'a str>,
{
    let budget = max_chunk_size / 2;
    let mut selection = ContextSelection::default();
    for text in texts {
        let piece_len = text.len() + 2;
        if selection.text.len() + piece_len + CONTEXT_TEMPLATE.len() > budget {
            break;
        }
        selection.text.push_str(text);
        selection.text.push_str("\n\n");
        selection.included += 1;
    }
    selection
}

/// A chat answer with the exact message list that produced it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub response: ChatResponse,
    pub messages: Vec<ChatMessage>,
}

/// Answer `question` from the indexed documents.
///
/// With `global` set, the model is first asked the bare question and its
/// reply is kept in the conversation, so the final answer can draw on
/// general knowledge as well as the local context.
///
/// # Errors
///
/// Embedding, ranking or chat failures; there is no fallback answer.
pub async fn answer(
    store: &Store,
    chat: &dyn ChatClient,
    question: &str,
    global: bool,
) -> Result<Answer> {
    let ranked = store.find_chunks(question, 0).await?;
    let selection = assemble_context(
        ranked.iter().map(|s| s.chunk.text.as_str()),
        store.max_chunk_size(),
    );
    tracing::debug!(
        "using {} of {} chunks as context ({} bytes)",
        selection.included,
        ranked.len(),
        selection.text.len()
    );

    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

    if global {
        messages.push(ChatMessage::user(question));
        let first = chat.complete(store.model(), &messages).await?;
        messages.push(ChatMessage::assistant(first.message.content));
    }

    messages.push(ChatMessage::user(format!("{}{}", CONTEXT_TEMPLATE, selection.text)));
    messages.push(ChatMessage::assistant(ACK));
    messages.push(ChatMessage::user(question));

    let response = chat.complete(store.model(), &messages).await?;
    Ok(Answer { response, messages })
}

/// A file the model is asked to produce, with its fence language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub language: String,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let language = ext_to_lang(&path).to_string();
        Self { path, language }
    }
}

/// Fence language for a file extension; `text` when unknown.
pub fn ext_to_lang(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" | "cxx" => "cpp",
        "java" => "java",
        "rb" => "ruby",
        "sh" | "bash" => "bash",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "html" | "htm" => "html",
        "css" => "css",
        "sql" => "sql",
        "lua" => "lua",
        _ => "text",
    }
}

fn fenced(path: &Path, language: &str, content: &str) -> String {
    let mut out = format!("File: {}\n```{}\n{}", path.display(), language, content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```");
    out
}

/// Send `msgs` with the contents of `in_files` and ask for `out_files` back.
///
/// Message order: system, one user message per input file, the caller's
/// messages, and a closing instruction describing the reply format.
pub async fn send_with_files(
    store: &Store,
    chat: &dyn ChatClient,
    sysmsg: &str,
    msgs: &[ChatMessage],
    in_files: &[PathBuf],
    out_files: &[OutputFile],
) -> Result<ChatResponse> {
    let messages = build_file_messages(sysmsg, msgs, in_files, out_files)?;
    chat.complete(store.model(), &messages).await
}

/// Message list for [`send_with_files`], without sending it.
pub fn build_file_messages(
    sysmsg: &str,
    msgs: &[ChatMessage],
    in_files: &[PathBuf],
    out_files: &[OutputFile],
) -> Result<Vec<ChatMessage>> {
    let mut messages = vec![ChatMessage::system(sysmsg)];

    for path in in_files {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        messages.push(ChatMessage::user(fenced(path, ext_to_lang(path), &content)));
    }

    messages.extend(msgs.iter().cloned());

    if !out_files.is_empty() {
        let names: Vec<String> = out_files
            .iter()
            .map(|f| format!("'{}'", f.path.display()))
            .collect();
        let mut instruction = format!(
            "Your response must include the following complete files: {}.\n\
             Return each file verbatim in this format:\n",
            names.join(", ")
        );
        for file in out_files {
            instruction.push('\n');
            instruction.push_str(&fenced(&file.path, &file.language, "<content>"));
            instruction.push('\n');
        }
        messages.push(ChatMessage::user(instruction));
    }

    Ok(messages)
}

/// A file found in a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub content: String,
    pub written: bool,
}

/// Pull `File: <path>` blocks out of `response` and write the declared ones.
///
/// Blocks naming a path not in `out_files` are skipped with a warning. With
/// `dry_run` nothing is written.
pub fn extract_files(
    out_files: &[OutputFile],
    response: &str,
    dry_run: bool,
) -> Result<Vec<ExtractedFile>> {
    let mut extracted = Vec::new();
    for (path, content) in parse_file_blocks(response) {
        if !out_files.iter().any(|f| f.path == path) {
            tracing::warn!("ignoring undeclared file in response: {}", path.display());
            continue;
        }
        if !dry_run {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::write(&path, &content)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
        }
        extracted.push(ExtractedFile {
            path,
            content,
            written: !dry_run,
        });
    }
    Ok(extracted)
}

fn parse_file_blocks(response: &str) -> Vec<(PathBuf, String)> {
    let mut blocks = Vec::new();
    let mut lines = response.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(name) = line.trim().strip_prefix("File:") else {
            continue;
        };
        let name = name.trim().trim_matches('`');
        if name.is_empty() {
            continue;
        }
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }
        if !lines.peek().is_some_and(|l| l.trim_start().starts_with("```")) {
            continue;
        }
        lines.next();

        let mut content = String::new();
        let mut closed = false;
        for body in lines.by_ref() {
            if body.trim_end() == "```" {
                closed = true;
                break;
            }
            content.push_str(body);
            content.push('\n');
        }
        if !closed {
            tracing::warn!("unterminated block for {}", name);
        }
        blocks.push((PathBuf::from(name), content));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_stops_at_first_overflow() {
        let texts = ["a".repeat(4000), "b".repeat(4000), "c".repeat(4000)];
        let selection = assemble_context(texts.iter().map(String::as_str), 16384);
        assert_eq!(selection.included, 2);
        assert_eq!(selection.text.len(), 8004);
        assert!(selection.text.ends_with("b\n\n"));
    }

    #[test]
    fn test_oversized_first_chunk_gives_empty_context() {
        let texts = ["x".repeat(100), "y".to_string()];
        let selection = assemble_context(texts.iter().map(String::as_str), 64);
        assert_eq!(selection, ContextSelection::default());
    }

    #[test]
    fn test_languages_from_extensions() {
        assert_eq!(OutputFile::new("src/main.rs").language, "rust");
        assert_eq!(OutputFile::new("README.MD").language, "markdown");
        assert_eq!(OutputFile::new("Makefile").language, "text");
    }

    #[test]
    fn test_parses_blocks_with_blank_line_before_fence() {
        let reply = "Here you go.\n\nFile: a.txt\n\n```text\nline one\nline two\n```\nDone.";
        let blocks = parse_file_blocks(reply);
        assert_eq!(blocks, vec![(PathBuf::from("a.txt"), "line one\nline two\n".to_string())]);
    }

    #[test]
    fn test_extract_writes_only_declared_files() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("out/keep.rs");
        let unwanted = dir.path().join("drop.rs");
        let reply = format!(
            "File: {}\n```rust\nfn main() {{}}\n```\nFile: {}\n```rust\nbad\n```\n",
            wanted.display(),
            unwanted.display()
        );

        let files = extract_files(&[OutputFile::new(&wanted)], &reply, false).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].written);
        assert_eq!(fs::read_to_string(&wanted).unwrap(), "fn main() {}\n");
        assert!(!unwanted.exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("keep.md");
        let reply = format!("File: {}\n```markdown\n# hi\n```\n", wanted.display());
        let files = extract_files(&[OutputFile::new(&wanted)], &reply, true).unwrap();
        assert_eq!(files[0].content, "# hi\n");
        assert!(!files[0].written);
        assert!(!wanted.exists());
    }

    #[test]
    fn test_file_messages_are_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.py");
        fs::write(&input, "print(1)\n").unwrap();
        let messages = build_file_messages(
            "sys",
            &[ChatMessage::user("do it")],
            &[input.clone()],
            &[OutputFile::new("out.py")],
        )
        .unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::system("sys"));
        assert!(messages[1].content.contains("```python\nprint(1)\n```"));
        assert_eq!(messages[2].content, "do it");
        assert!(messages[3].content.contains("'out.py'"));
    }
}
