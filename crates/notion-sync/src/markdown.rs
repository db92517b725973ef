//! Markdown to Notion blocks.

use std::path::Path;

use notion_sync_core::{Block, DocumentConverter, LinkMap, SyncError};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde_json::{json, Value};
use tracing::debug;

/// Longest `text.content` Notion accepts in one rich text segment.
const MAX_TEXT_LENGTH: usize = 2000;

/// Code languages Notion knows under a different name.
const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("py", "python"),
    ("sh", "shell"),
    ("zsh", "shell"),
    ("console", "shell"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("cpp", "c++"),
    ("cs", "c#"),
    ("csharp", "c#"),
    ("golang", "go"),
    ("kt", "kotlin"),
    ("rb", "ruby"),
    ("text", "plain text"),
    ("txt", "plain text"),
];

const LANGUAGES: &[&str] = &[
    "bash", "c", "c#", "c++", "clojure", "css", "dart", "diff", "docker", "elixir", "erlang",
    "go", "graphql", "haskell", "html", "java", "javascript", "json", "kotlin", "lua",
    "makefile", "markdown", "mermaid", "nix", "objective-c", "ocaml", "perl", "php",
    "plain text", "powershell", "protobuf", "python", "r", "ruby", "rust", "scala", "scss",
    "shell", "sql", "swift", "toml", "typescript", "xml", "yaml",
];

/// Converts Markdown (CommonMark plus strikethrough and task lists).
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownConverter;

impl DocumentConverter for MarkdownConverter {
    fn produce_blocks(
        &self,
        raw: &str,
        links: &LinkMap,
        source_dir: &str,
        source_path: &Path,
    ) -> Result<Vec<Block>, SyncError> {
        let blocks = BlockBuilder::new(links, source_dir).build(raw);
        debug!("Converted {} into {} blocks", source_path.display(), blocks.len());
        Ok(blocks)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Marks {
    bold: bool,
    italic: bool,
    strikethrough: bool,
    code: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Span {
    text: String,
    marks: Marks,
    link: Option<String>,
}

/// Blocks being collected at one nesting level. List items carry their own
/// block, whose text is the item's first paragraph.
#[derive(Debug, Default)]
struct Container {
    item: Option<Block>,
    has_text: bool,
    children: Vec<Block>,
}

struct CodeBuffer {
    language: String,
    text: String,
}

struct BlockBuilder<'a> {
    links: &'a LinkMap,
    source_dir: &'a str,
    containers: Vec<Container>,
    spans: Vec<Span>,
    bold: u32,
    italic: u32,
    strikethrough: u32,
    link: Option<String>,
    /// One entry per open list: ordered or not.
    lists: Vec<bool>,
    quote_depth: u32,
    heading: Option<u8>,
    code: Option<CodeBuffer>,
    /// One entry per open image: whether its alt text is being dropped.
    images: Vec<bool>,
}

impl<'a> BlockBuilder<'a> {
    fn new(links: &'a LinkMap, source_dir: &'a str) -> Self {
        Self {
            links,
            source_dir,
            containers: vec![Container::default()],
            spans: Vec::new(),
            bold: 0,
            italic: 0,
            strikethrough: 0,
            link: None,
            lists: Vec::new(),
            quote_depth: 0,
            heading: None,
            code: None,
            images: Vec::new(),
        }
    }

    fn build(mut self, markdown: &str) -> Vec<Block> {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        for event in Parser::new_ext(markdown, options) {
            self.handle(event);
        }
        self.flush_text();

        // Close anything left open by unbalanced input.
        while self.containers.len() > 1 {
            self.close_item();
        }
        self.containers
            .pop()
            .map(|root| root.children)
            .unwrap_or_default()
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                self.flush_text();
                self.heading = Some(heading_level(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                self.flush_text();
                self.heading = None;
            }
            Event::End(TagEnd::Paragraph) => self.flush_text(),
            Event::Start(Tag::BlockQuote) => {
                self.flush_text();
                self.quote_depth += 1;
            }
            Event::End(TagEnd::BlockQuote) => {
                self.flush_text();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                self.flush_text();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or_default().to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some(CodeBuffer {
                    language,
                    text: String::new(),
                });
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(code) = self.code.take() {
                    let text = code.text.trim_end_matches('\n');
                    self.emit(Block::new(
                        "code",
                        json!({
                            "rich_text": plain_rich_text(text),
                            "language": notion_language(&code.language),
                        }),
                    ));
                }
            }
            Event::Start(Tag::List(start)) => {
                self.flush_text();
                self.lists.push(start.is_some());
            }
            Event::End(TagEnd::List(_)) => {
                self.lists.pop();
            }
            Event::Start(Tag::Item) => {
                self.flush_text();
                let kind = match self.lists.last() {
                    Some(true) => "numbered_list_item",
                    _ => "bulleted_list_item",
                };
                self.containers.push(Container {
                    item: Some(Block::new(kind, json!({ "rich_text": [] }))),
                    ..Container::default()
                });
            }
            Event::End(TagEnd::Item) => {
                self.flush_text();
                self.close_item();
            }
            Event::TaskListMarker(checked) => {
                if let Some(item) = self.containers.last_mut().and_then(|c| c.item.as_mut()) {
                    item.kind = "to_do".to_string();
                    item.content["checked"] = Value::Bool(checked);
                }
            }
            Event::Start(Tag::Emphasis) => self.italic += 1,
            Event::End(TagEnd::Emphasis) => self.italic = self.italic.saturating_sub(1),
            Event::Start(Tag::Strong) => self.bold += 1,
            Event::End(TagEnd::Strong) => self.bold = self.bold.saturating_sub(1),
            Event::Start(Tag::Strikethrough) => self.strikethrough += 1,
            Event::End(TagEnd::Strikethrough) => {
                self.strikethrough = self.strikethrough.saturating_sub(1)
            }
            Event::Start(Tag::Link { dest_url, .. }) => {
                self.link = self.link_target(&dest_url);
            }
            Event::End(TagEnd::Link) => self.link = None,
            Event::Start(Tag::Image { dest_url, .. }) => {
                let external = is_external(&dest_url);
                if external {
                    self.flush_text();
                    self.emit(Block::new(
                        "image",
                        json!({ "type": "external", "external": { "url": dest_url.to_string() } }),
                    ));
                }
                self.images.push(external);
            }
            Event::End(TagEnd::Image) => {
                self.images.pop();
            }
            Event::Rule => {
                self.flush_text();
                self.emit(Block::new("divider", json!({})));
            }
            Event::Text(text) => {
                if let Some(code) = self.code.as_mut() {
                    code.text.push_str(&text);
                } else if !self.images.iter().any(|dropped| *dropped) {
                    self.push_text(&text, false);
                }
            }
            Event::Code(text) => self.push_text(&text, true),
            Event::SoftBreak => self.push_text(" ", false),
            Event::HardBreak => self.push_text("\n", false),
            _ => {}
        }
    }

    fn link_target(&self, href: &str) -> Option<String> {
        if let Some(url) = self.links.resolve(self.source_dir, href) {
            return Some(url.to_string());
        }
        // Notion rejects relative URLs; unresolved links keep only their text.
        is_external(href).then(|| href.to_string())
    }

    fn push_text(&mut self, text: &str, code: bool) {
        let marks = Marks {
            bold: self.bold > 0,
            italic: self.italic > 0,
            strikethrough: self.strikethrough > 0,
            code,
        };
        match self.spans.last_mut() {
            Some(last) if last.marks == marks && last.link == self.link => last.text.push_str(text),
            _ => self.spans.push(Span {
                text: text.to_string(),
                marks,
                link: self.link.clone(),
            }),
        }
    }

    /// Turn the collected spans into a block (or the open list item's text).
    fn flush_text(&mut self) {
        let spans = std::mem::take(&mut self.spans);
        if spans.iter().all(|s| s.text.trim().is_empty()) {
            return;
        }
        let rich_text = rich_text(&spans);

        let kind = match self.heading {
            Some(level) => format!("heading_{}", level),
            None if self.quote_depth > 0 => "quote".to_string(),
            None => "paragraph".to_string(),
        };

        if kind == "paragraph" {
            if let Some(container) = self.containers.last_mut() {
                if let (Some(item), false) = (container.item.as_mut(), container.has_text) {
                    item.content["rich_text"] = rich_text;
                    container.has_text = true;
                    return;
                }
            }
        }
        self.emit(Block::new(kind, json!({ "rich_text": rich_text })));
    }

    fn emit(&mut self, block: Block) {
        if let Some(container) = self.containers.last_mut() {
            container.children.push(block);
        }
    }

    fn close_item(&mut self) {
        if self.containers.len() < 2 {
            return;
        }
        if let Some(container) = self.containers.pop() {
            if let Some(item) = container.item {
                self.emit(item.with_children(container.children));
            }
        }
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        _ => 3,
    }
}

fn is_external(href: &str) -> bool {
    href.starts_with("https://") || href.starts_with("http://") || href.starts_with("mailto:")
}

fn notion_language(language: &str) -> &'static str {
    let language = language.to_lowercase();
    if let Some((_, alias)) = LANGUAGE_ALIASES.iter().find(|(from, _)| *from == language) {
        return *alias;
    }
    LANGUAGES
        .iter()
        .find(|known| **known == language)
        .copied()
        .unwrap_or("plain text")
}

/// Split `text` into chunks Notion accepts.
fn split_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(MAX_TEXT_LENGTH)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn plain_rich_text(text: &str) -> Value {
    Value::Array(
        split_text(text)
            .into_iter()
            .map(|chunk| json!({ "type": "text", "text": { "content": chunk } }))
            .collect(),
    )
}

fn rich_text(spans: &[Span]) -> Value {
    let mut segments = Vec::new();
    for span in spans {
        for chunk in split_text(&span.text) {
            let mut text = json!({ "content": chunk });
            if let Some(url) = &span.link {
                text["link"] = json!({ "url": url });
            }
            let mut segment = json!({ "type": "text", "text": text });
            if span.marks != Marks::default() {
                segment["annotations"] = json!({
                    "bold": span.marks.bold,
                    "italic": span.marks.italic,
                    "strikethrough": span.marks.strikethrough,
                    "code": span.marks.code,
                });
            }
            segments.push(segment);
        }
    }
    Value::Array(segments)
}
