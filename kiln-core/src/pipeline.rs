//! Staged document transformation with prioritized hooks.
//!
//! ```text
//! RawDocument ─▶ before_parse ─▶ Document::from_raw ─▶ after_parse ─▶ convert
//!                                                                       │
//!              after_render ◀─ templates ◀─ before_render ◀─ collections┘
//! ```
//!
//! Hooks for one stage run in ascending priority; equal priorities run in
//! registration order. The first failing hook stops the document, never the
//! build.

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::content_type::ContentTypeDescriptor;
use crate::document::{Document, RawDocument};
use crate::error::{BoxError, DocumentError, DocumentFailure, FailureStage};
use crate::markdown::{Converter, first_paragraph_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    BeforeParse,
    AfterParse,
    BeforeRender,
    AfterRender,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BeforeParse => "before_parse",
            Stage::AfterParse => "after_parse",
            Stage::BeforeRender => "before_render",
            Stage::AfterRender => "after_render",
        };
        f.write_str(name)
    }
}

pub type RawHook = Arc<dyn Fn(RawDocument) -> Result<RawDocument, BoxError> + Send + Sync>;
pub type DocumentHook = Arc<dyn Fn(Document) -> Result<Document, BoxError> + Send + Sync>;
pub type HtmlHook = Arc<dyn Fn(&Document, String) -> Result<String, BoxError> + Send + Sync>;

/// A hook together with the stage it is registered for.
#[derive(Clone)]
pub enum Hook {
    BeforeParse(RawHook),
    AfterParse(DocumentHook),
    BeforeRender(DocumentHook),
    AfterRender(HtmlHook),
}

impl Hook {
    pub fn before_parse<F>(f: F) -> Self
    where
        F: Fn(RawDocument) -> Result<RawDocument, BoxError> + Send + Sync + 'static,
    {
        Hook::BeforeParse(Arc::new(f))
    }

    pub fn after_parse<F>(f: F) -> Self
    where
        F: Fn(Document) -> Result<Document, BoxError> + Send + Sync + 'static,
    {
        Hook::AfterParse(Arc::new(f))
    }

    pub fn before_render<F>(f: F) -> Self
    where
        F: Fn(Document) -> Result<Document, BoxError> + Send + Sync + 'static,
    {
        Hook::BeforeRender(Arc::new(f))
    }

    pub fn after_render<F>(f: F) -> Self
    where
        F: Fn(&Document, String) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        Hook::AfterRender(Arc::new(f))
    }

    pub fn stage(&self) -> Stage {
        match self {
            Hook::BeforeParse(_) => Stage::BeforeParse,
            Hook::AfterParse(_) => Stage::AfterParse,
            Hook::BeforeRender(_) => Stage::BeforeRender,
            Hook::AfterRender(_) => Stage::AfterRender,
        }
    }
}

struct Registered<F> {
    name: String,
    priority: i32,
    hook: F,
}

fn insert_ordered<F>(hooks: &mut Vec<Registered<F>>, entry: Registered<F>) {
    // Insert after every hook with priority <= the new one, keeping registration order on ties.
    let at = hooks.partition_point(|h| h.priority <= entry.priority);
    hooks.insert(at, entry);
}

#[derive(Default)]
pub struct Pipeline {
    before_parse: Vec<Registered<RawHook>>,
    after_parse: Vec<Registered<DocumentHook>>,
    before_render: Vec<Registered<DocumentHook>>,
    after_render: Vec<Registered<HtmlHook>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, priority: i32, hook: Hook) {
        let name = name.to_string();
        match hook {
            Hook::BeforeParse(hook) => insert_ordered(
                &mut self.before_parse,
                Registered { name, priority, hook },
            ),
            Hook::AfterParse(hook) => insert_ordered(
                &mut self.after_parse,
                Registered { name, priority, hook },
            ),
            Hook::BeforeRender(hook) => insert_ordered(
                &mut self.before_render,
                Registered { name, priority, hook },
            ),
            Hook::AfterRender(hook) => insert_ordered(
                &mut self.after_render,
                Registered { name, priority, hook },
            ),
        }
    }

    /// Hook names for a stage in execution order.
    pub fn hook_names(&self, stage: Stage) -> Vec<&str> {
        match stage {
            Stage::BeforeParse => self.before_parse.iter().map(|h| h.name.as_str()).collect(),
            Stage::AfterParse => self.after_parse.iter().map(|h| h.name.as_str()).collect(),
            Stage::BeforeRender => self.before_render.iter().map(|h| h.name.as_str()).collect(),
            Stage::AfterRender => self.after_render.iter().map(|h| h.name.as_str()).collect(),
        }
    }

    /// Run the parse half of the pipeline: hooks, field extraction and
    /// markdown conversion.
    pub fn parse(
        &self,
        raw: RawDocument,
        descriptor: &ContentTypeDescriptor,
        config: &Config,
        converter: &dyn Converter,
    ) -> Result<Document, DocumentFailure> {
        let source = raw.source.clone();
        let fail = |stage, error| DocumentFailure::new(source.clone(), stage, error);

        let raw = run_stage(&self.before_parse, Stage::BeforeParse, raw, |hook, value| hook(value))
            .map_err(|e| fail(FailureStage::Hook(Stage::BeforeParse), e))?;

        let document = Document::from_raw(raw, descriptor, config)
            .map_err(|e| fail(FailureStage::Parse, e))?;

        let document = run_stage(&self.after_parse, Stage::AfterParse, document, |hook, value| {
            hook(value)
        })
        .map_err(|e| fail(FailureStage::Hook(Stage::AfterParse), e))?;

        let html = converter
            .render(&document.body)
            .map_err(|e| fail(FailureStage::Parse, e))?;

        Ok(document.with_body(html))
    }

    pub fn before_render(&self, document: Document) -> Result<Document, DocumentFailure> {
        let source = document.source.clone();
        run_stage(&self.before_render, Stage::BeforeRender, document, |hook, value| {
            hook(value)
        })
        .map_err(|e| DocumentFailure::new(source, FailureStage::Hook(Stage::BeforeRender), e))
    }

    pub fn after_render(&self, document: &Document, html: String) -> Result<String, DocumentFailure> {
        run_stage(&self.after_render, Stage::AfterRender, html, |hook, value| {
            hook(document, value)
        })
        .map_err(|e| {
            DocumentFailure::new(
                document.source.clone(),
                FailureStage::Hook(Stage::AfterRender),
                e,
            )
        })
    }
}

fn run_stage<F, T>(
    hooks: &[Registered<F>],
    stage: Stage,
    input: T,
    call: impl Fn(&F, T) -> Result<T, BoxError>,
) -> Result<T, DocumentError> {
    hooks.iter().try_fold(input, |value, registered| {
        call(&registered.hook, value).map_err(|cause| DocumentError::Hook {
            stage,
            hook: registered.name.clone(),
            cause: cause.to_string(),
        })
    })
}

/// Fills `summary` metadata from the first paragraph when the front matter
/// does not set one. Runs after parsing, while the body is still markdown.
pub fn summary_hook() -> Hook {
    Hook::after_parse(|document: Document| {
        if document.summary().is_some() {
            return Ok(document);
        }
        let Some(summary) = first_paragraph_text(&document.body) else {
            return Ok(document);
        };
        let mut metadata = document.metadata.clone();
        metadata.insert("summary".into(), summary.into());
        Ok(Document {
            metadata,
            ..document
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::MarkdownConverter;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn raw(title: &str) -> RawDocument {
        RawDocument {
            source: PathBuf::from(format!("content/posts/{title}.md")),
            front_matter: json!({ "title": title }).as_object().cloned().unwrap(),
            body: "First paragraph.\n\nSecond.".into(),
            filename: title.into(),
            content_type: "posts".into(),
            dir_lang: None,
        }
    }

    fn parse(pipeline: &Pipeline, raw: RawDocument) -> Result<Document, DocumentFailure> {
        pipeline.parse(
            raw,
            &ContentTypeDescriptor::posts(),
            &Config::default(),
            &MarkdownConverter::default(),
        )
    }

    #[test]
    fn test_priority_then_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        for (name, priority) in [("late", 10), ("first", -5), ("tie-a", 0), ("tie-b", 0)] {
            let order = Arc::clone(&order);
            let label = name.to_string();
            pipeline.register(
                name,
                priority,
                Hook::after_parse(move |doc| {
                    order.lock().unwrap().push(label.clone());
                    Ok(doc)
                }),
            );
        }

        parse(&pipeline, raw("hello")).unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "tie-a", "tie-b", "late"]);
        assert_eq!(
            pipeline.hook_names(Stage::AfterParse),
            vec!["first", "tie-a", "tie-b", "late"]
        );
    }

    #[test]
    fn test_hooks_replace_values() {
        let mut pipeline = Pipeline::new();
        pipeline.register(
            "retitle",
            0,
            Hook::before_parse(|mut raw| {
                raw.front_matter.insert("title".into(), json!("Renamed"));
                Ok(raw)
            }),
        );
        pipeline.register(
            "shout",
            0,
            Hook::after_parse(|doc| {
                let body = doc.body.to_uppercase();
                Ok(doc.with_body(body))
            }),
        );

        let doc = parse(&pipeline, raw("hello")).unwrap();
        assert_eq!(doc.title, "Renamed");
        assert!(doc.body.contains("<p>FIRST PARAGRAPH.</p>"));
    }

    #[test]
    fn test_failure_stops_later_hooks() {
        let ran = Arc::new(Mutex::new(false));
        let mut pipeline = Pipeline::new();
        pipeline.register("broken", 0, Hook::after_parse(|_| Err("boom".into())));
        let flag = Arc::clone(&ran);
        pipeline.register(
            "after",
            1,
            Hook::after_parse(move |doc| {
                *flag.lock().unwrap() = true;
                Ok(doc)
            }),
        );

        let failure = parse(&pipeline, raw("hello")).unwrap_err();
        assert_eq!(failure.stage, FailureStage::Hook(Stage::AfterParse));
        assert!(matches!(
            failure.error,
            DocumentError::Hook { stage: Stage::AfterParse, ref hook, ref cause }
                if hook == "broken" && cause == "boom"
        ));
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_render_stages() {
        let mut pipeline = Pipeline::new();
        pipeline.register(
            "tag",
            0,
            Hook::before_render(|doc| {
                let mut metadata = doc.metadata.clone();
                metadata.insert("seen".into(), json!(true));
                Ok(Document { metadata, ..doc })
            }),
        );
        pipeline.register(
            "footer",
            0,
            Hook::after_render(|doc, html| Ok(format!("{html}<!-- {} -->", doc.slug))),
        );

        let doc = parse(&pipeline, raw("hello")).unwrap();
        let doc = pipeline.before_render(doc).unwrap();
        assert_eq!(doc.metadata["seen"], json!(true));
        let html = pipeline.after_render(&doc, "<p>x</p>".into()).unwrap();
        assert_eq!(html, "<p>x</p><!-- hello -->");
    }

    #[test]
    fn test_missing_title_fails_at_parse() {
        let mut source = raw("hello");
        source.front_matter.clear();
        let failure = parse(&Pipeline::new(), source).unwrap_err();
        assert_eq!(failure.stage, FailureStage::Parse);
        assert!(matches!(failure.error, DocumentError::MissingRequiredField { .. }));
    }

    #[test]
    fn test_summary_hook() {
        let mut pipeline = Pipeline::new();
        pipeline.register("summary", 0, summary_hook());
        let doc = parse(&pipeline, raw("hello")).unwrap();
        assert_eq!(doc.summary(), Some("First paragraph."));

        let mut explicit = raw("other");
        explicit.front_matter.insert("summary".into(), json!("Given"));
        let doc = parse(&pipeline, explicit).unwrap();
        assert_eq!(doc.summary(), Some("Given"));
    }
}
