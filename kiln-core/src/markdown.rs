use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::error::DocumentError;

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

/// Turns markdown into HTML.
pub trait Converter: Send + Sync {
    fn render(&self, markdown: &str) -> Result<String, DocumentError>;
}

/// CommonMark with every pulldown-cmark extension, plus syntect highlighting
/// of fenced code blocks.
#[derive(Debug, Clone)]
pub struct MarkdownConverter {
    syntax_theme: String,
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        Self::new("base16-ocean.dark")
    }
}

impl MarkdownConverter {
    pub fn new<S: Into<String>>(syntax_theme: S) -> Self {
        Self {
            syntax_theme: syntax_theme.into(),
        }
    }
}

impl Converter for MarkdownConverter {
    fn render(&self, markdown: &str) -> Result<String, DocumentError> {
        let theme = THEME_SET.themes.get(&self.syntax_theme).ok_or_else(|| {
            DocumentError::Conversion(format!("unknown syntax theme `{}`", self.syntax_theme))
        })?;

        let events: Vec<Event> = Parser::new_ext(markdown, Options::all()).collect();
        let mut processed_events = Vec::with_capacity(events.len());
        let mut i = 0;

        while i < events.len() {
            match &events[i] {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                    // Collect all text events until the end of the code block
                    let mut code_content = String::new();
                    i += 1;

                    while i < events.len() {
                        match &events[i] {
                            Event::End(TagEnd::CodeBlock) => break,
                            Event::Text(text) => code_content.push_str(text),
                            _ => {}
                        }
                        i += 1;
                    }

                    let syntax = SYNTAX_SET.find_syntax_by_token(lang).or_else(|| {
                        // Fallback mappings for unsupported languages
                        match lang.as_ref() {
                            "nix" => SYNTAX_SET.find_syntax_by_name("JavaScript"),
                            "toml" => SYNTAX_SET.find_syntax_by_name("YAML"),
                            _ => None,
                        }
                    });

                    let plain = || {
                        format!(
                            "<pre><code>{}</code></pre>",
                            html_escape::encode_text(&code_content)
                        )
                    };
                    let highlighted_html = match syntax {
                        Some(syntax) => {
                            highlighted_html_for_string(&code_content, &SYNTAX_SET, syntax, theme)
                                .unwrap_or_else(|_| plain())
                        }
                        None => plain(),
                    };

                    processed_events.push(Event::Html(highlighted_html.into()));
                }
                event => processed_events.push(event.clone()),
            }
            i += 1;
        }

        let mut out = String::new();
        html::push_html(&mut out, processed_events.into_iter());

        Ok(out)
    }
}

/// Plain text of the first paragraph, used for summaries.
pub fn first_paragraph_text(markdown: &str) -> Option<String> {
    let mut in_paragraph = false;
    let mut text = String::new();

    for event in Parser::new_ext(markdown, Options::all()) {
        match event {
            Event::Start(Tag::Paragraph) => in_paragraph = true,
            Event::End(TagEnd::Paragraph) if in_paragraph => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
                in_paragraph = false;
                text.clear();
            }
            Event::Text(t) | Event::Code(t) if in_paragraph => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak if in_paragraph => text.push(' '),
            _ => {}
        }
    }

    None
}
