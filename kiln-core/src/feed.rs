//! RSS 2.0 feed of the newest dated documents.

use rss::{ChannelBuilder, GuidBuilder, Item, ItemBuilder};

use crate::config::Config;
use crate::document::Document;
use crate::output::absolute_url;

pub const FEED_URL: &str = "/feed.xml";

/// Feed XML for `documents`, which must already be sorted newest first.
///
/// Undated documents and documents outside the default language are left out.
pub fn render_feed<'a>(config: &Config, documents: impl IntoIterator<Item = &'a Document>) -> String {
    let items: Vec<Item> = documents
        .into_iter()
        .filter(|d| d.date.is_some() && config.is_default_language(&d.lang))
        .take(config.build.feed_limit)
        .map(|d| feed_item(config, d))
        .collect();

    let channel = ChannelBuilder::default()
        .title(config.site.title.clone())
        .link(absolute_url(&config.site.base_url, "/"))
        .description(config.site.description.clone())
        .language(Some(config.site.default_language.clone()))
        .generator(Some("kiln".to_string()))
        .items(items)
        .build();
    channel.to_string()
}

fn feed_item(config: &Config, document: &Document) -> Item {
    let link = absolute_url(&config.site.base_url, &document.url);
    ItemBuilder::default()
        .title(Some(document.title.clone()))
        .link(Some(link.clone()))
        .guid(Some(GuidBuilder::default().permalink(true).value(link).build()))
        .description(document.summary().map(str::to_string))
        .pub_date(document.date.map(|d| d.and_utc().to_rfc2822()))
        .author(config.site.author.clone())
        .categories(
            document
                .tags
                .iter()
                .map(|t| rss::CategoryBuilder::default().name(t.clone()).build())
                .collect::<Vec<_>>(),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn doc(slug: &str, day: Option<u32>, lang: &str) -> Document {
        Document {
            source: PathBuf::from(format!("content/posts/{slug}.md")),
            content_type: "posts".into(),
            title: format!("Post {slug}"),
            body: String::new(),
            date: day.and_then(|d| NaiveDate::from_ymd_opt(2024, 3, d)?.and_hms_opt(8, 0, 0)),
            slug: slug.into(),
            lang: lang.into(),
            tags: vec!["rust".into()],
            categories: vec![],
            draft: false,
            metadata: Default::default(),
            url: format!("/posts/{slug}/"),
        }
    }

    #[test]
    fn test_feed_contains_dated_default_language_items() {
        let mut config = Config::default();
        config.site.base_url = "https://example.com".into();
        config.site.languages = vec!["en".into(), "fr".into()];
        let docs = [doc("new", Some(9), "en"), doc("fr", Some(8), "fr"), doc("undated", None, "en")];

        let xml = render_feed(&config, &docs);

        assert!(xml.contains("<link>https://example.com/posts/new/</link>"));
        assert!(xml.contains("Sat, 09 Mar 2024 08:00:00 +0000"));
        assert!(!xml.contains("Post fr"));
        assert!(!xml.contains("Post undated"));
    }

    #[test]
    fn test_feed_honours_limit() {
        let mut config = Config::default();
        config.build.feed_limit = 1;
        let docs = [doc("a", Some(2), "en"), doc("b", Some(1), "en")];

        let xml = render_feed(&config, &docs);
        assert_eq!(xml.matches("<item>").count(), 1);
        assert!(xml.contains("Post a"));
    }
}
