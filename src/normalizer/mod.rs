use std::borrow::Cow;
use std::io::Read;

use chrono::Utc;
use encoding_rs::{Encoding, UTF_8};
use feed_rs::parser;
use html_escape::decode_html_entities;
use tracing::debug;
use url::Url;

use crate::app::ParseError;
use crate::domain::{Channel, Item, Link, LinkKind};

/// Turns downloaded feed bytes into a [`Channel`].
pub trait FeedParser: Send + Sync {
    /// `encoding` is a charset label; `None` lets the parser sniff it.
    fn parse(
        &self,
        feed_url: &Url,
        reader: &mut dyn Read,
        encoding: Option<&str>,
    ) -> Result<Channel, ParseError>;
}

/// RSS, Atom and JSON Feed support through `feed-rs`.
#[derive(Debug, Default, Clone)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, feed_url: &Url, body: &[u8]) -> Result<Channel, ParseError> {
        let feed = parser::parse(body).map_err(|e| ParseError::Syntax(e.to_string()))?;

        let links = feed
            .links
            .iter()
            .filter_map(|link| convert_link(feed_url, link))
            .collect();

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                let link = entry
                    .links
                    .iter()
                    .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                    .or(entry.links.first())
                    .map(|l| l.href.clone());

                Item {
                    id: Some(entry.id).filter(|id| !id.is_empty()),
                    title: entry
                        .title
                        .map(|t| decode_html_entities(&t.content).to_string()),
                    link,
                    summary: entry
                        .summary
                        .map(|s| decode_html_entities(&s.content).to_string()),
                    content: entry
                        .content
                        .and_then(|c| c.body)
                        .map(|b| decode_html_entities(&b).to_string()),
                    author: entry.authors.first().map(|a| a.name.clone()),
                    published: entry
                        .published
                        .or(entry.updated)
                        .map(|dt| dt.with_timezone(&Utc)),
                }
            })
            .collect();

        Ok(Channel {
            title: feed
                .title
                .map(|t| decode_html_entities(&t.content).to_string()),
            description: feed
                .description
                .map(|d| decode_html_entities(&d.content).to_string()),
            links,
            items,
        })
    }
}

impl FeedParser for Normalizer {
    fn parse(
        &self,
        feed_url: &Url,
        reader: &mut dyn Read,
        encoding: Option<&str>,
    ) -> Result<Channel, ParseError> {
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;

        let Some(label) = encoding else {
            return self.normalize(feed_url, &body);
        };

        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ParseError::UnknownEncoding(label.to_string()))?;
        if encoding == UTF_8 {
            return self.normalize(feed_url, &body);
        }

        let (text, _, had_errors) = encoding.decode(&body);
        if had_errors {
            debug!(feed = %feed_url, encoding = encoding.name(), "Replaced undecodable bytes");
        }
        let text = rewrite_xml_declaration(&text);
        self.normalize(feed_url, text.as_bytes())
    }
}

fn convert_link(feed_url: &Url, link: &feed_rs::model::Link) -> Option<Link> {
    let url = Url::parse(link.href.trim())
        .or_else(|_| feed_url.join(link.href.trim()))
        .ok()?;

    let kind = match link.rel.as_deref() {
        Some("self") => LinkKind::SelfLink,
        None | Some("alternate") => LinkKind::Alternate,
        Some(_) => LinkKind::Other,
    };

    Some(Link {
        url,
        mime_type: link.media_type.clone(),
        kind,
    })
}

/// Point the XML declaration at UTF-8 once the text has been transcoded.
pub fn rewrite_xml_declaration(text: &str) -> Cow<'_, str> {
    match declared_encoding_span(text) {
        Some((start, end)) => Cow::Owned(format!("{}UTF-8{}", &text[..start], &text[end..])),
        None => Cow::Borrowed(text),
    }
}

/// Byte range of the encoding value inside a leading `<?xml ...?>`.
fn declared_encoding_span(text: &str) -> Option<(usize, usize)> {
    let offset = text.len()
        - text
            .trim_start_matches(['\u{feff}', ' ', '\t', '\r', '\n'])
            .len();
    let rest = &text[offset..];
    if !rest.starts_with("<?xml") {
        return None;
    }

    let declaration = &rest[..rest.find("?>")?];
    let key_end = offset + declaration.find("encoding")? + "encoding".len();

    let after_key = &text[key_end..offset + declaration.len()];
    let eq = after_key.find('=')?;
    let after_eq = &after_key[eq + 1..];
    let space = after_eq.len() - after_eq.trim_start().len();

    let quoted = &after_eq[space..];
    let quote = quoted.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let close = quoted[1..].find(quote)?;

    let start = key_end + eq + 1 + space + 1;
    Some((start, start + close))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com/</link>
    <description>A test feed</description>
    <item>
      <title>Test Item 1</title>
      <link>https://example.com/item1</link>
      <guid>item-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
      <description>This is item 1</description>
    </item>
    <item>
      <title>Fish &amp;amp; Chips</title>
      <link>https://example.com/item2</link>
      <guid>item-2</guid>
      <description>This is item 2</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Test Feed</title>
  <subtitle>An Atom test feed</subtitle>
  <link rel="self" href="https://example.com/feed.atom"/>
  <id>urn:example:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Atom Entry 1</title>
    <link href="https://example.com/atom1"/>
    <id>atom-entry-1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>This is Atom entry 1</summary>
  </entry>
</feed>"#;

    fn feed_url() -> Url {
        Url::parse("https://example.com/feed.xml").unwrap()
    }

    #[test]
    fn test_parse_rss() {
        let channel = Normalizer::new()
            .normalize(&feed_url(), RSS_SAMPLE.as_bytes())
            .unwrap();

        assert_eq!(channel.title, Some("Test Feed".into()));
        assert_eq!(channel.description, Some("A test feed".into()));
        assert!(channel.self_link().is_none());
        assert_eq!(channel.items.len(), 2);
        assert_eq!(channel.items[0].title, Some("Test Item 1".into()));
        assert_eq!(channel.items[0].link, Some("https://example.com/item1".into()));
        assert!(channel.items[0].published.is_some());
        assert!(channel.items[1].published.is_none());
        assert_eq!(channel.items[1].title, Some("Fish & Chips".into()));
    }

    #[test]
    fn test_parse_atom() {
        let channel = Normalizer::new()
            .normalize(&feed_url(), ATOM_SAMPLE.as_bytes())
            .unwrap();

        assert_eq!(channel.title, Some("Atom Test Feed".into()));
        assert_eq!(
            channel.self_link().map(|l| l.url.as_str()),
            Some("https://example.com/feed.atom")
        );
        assert_eq!(channel.items.len(), 1);
        assert_eq!(channel.items[0].id.as_deref(), Some("atom-entry-1"));
        assert_eq!(channel.items[0].link, Some("https://example.com/atom1".into()));
        assert!(channel.items[0].published.is_some());
    }

    #[test]
    fn test_parse_transcodes_latin1() {
        let mut body = br#"<?xml version="1.0" encoding="ISO-8859-1"?>
<rss version="2.0"><channel><title>Caf"#
            .to_vec();
        body.push(0xE9);
        body.extend_from_slice(b"</title><link>https://example.com/</link><description>d</description></channel></rss>");

        let channel = Normalizer::new()
            .parse(&feed_url(), &mut body.as_slice(), Some("iso-8859-1"))
            .unwrap();

        assert_eq!(channel.title.as_deref(), Some("Caf\u{e9}"));
    }

    #[test]
    fn test_parse_unknown_encoding() {
        let err = Normalizer::new()
            .parse(&feed_url(), &mut RSS_SAMPLE.as_bytes(), Some("klingon"))
            .unwrap_err();
        assert!(matches!(err, ParseError::UnknownEncoding(label) if label == "klingon"));
    }

    #[test]
    fn test_parse_garbage() {
        let err = Normalizer::new()
            .parse(&feed_url(), &mut "this is not a feed".as_bytes(), None)
            .unwrap_err();
        assert!(matches!(err, ParseError::Syntax(_)));
    }

    #[test]
    fn test_rewrite_xml_declaration() {
        assert_eq!(
            rewrite_xml_declaration(r#"<?xml version="1.0" encoding="ISO-8859-1"?><rss/>"#),
            r#"<?xml version="1.0" encoding="UTF-8"?><rss/>"#
        );
        assert_eq!(
            rewrite_xml_declaration("\u{feff}<?xml version='1.0' encoding = 'koi8-r' ?><a/>"),
            "\u{feff}<?xml version='1.0' encoding = 'UTF-8' ?><a/>"
        );
        assert_eq!(rewrite_xml_declaration("<rss/>"), "<rss/>");
        assert_eq!(
            rewrite_xml_declaration(r#"<?xml version="1.0"?><rss/>"#),
            r#"<?xml version="1.0"?><rss/>"#
        );
    }
}
