use chrono::{DateTime, Utc};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Points at the feed document itself.
    SelfLink,
    Alternate,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub url: Url,
    pub mime_type: Option<String>,
    pub kind: LinkKind,
}

/// One parsed entry of a feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub id: Option<String>,
    pub title: Option<String>,
    /// Raw link as found in the feed; normalized once the item passes
    /// through the pipeline.
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

impl Item {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }

    /// Get the best available content for display
    pub fn display_content(&self) -> &str {
        self.content
            .as_deref()
            .or(self.summary.as_deref())
            .unwrap_or("")
    }
}

/// A parsed feed: channel-level data plus its items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    pub title: Option<String>,
    pub description: Option<String>,
    pub links: Vec<Link>,
    pub items: Vec<Item>,
}

impl Channel {
    pub fn display_title<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.title.as_deref().unwrap_or(fallback)
    }

    pub fn self_link(&self) -> Option<&Link> {
        self.links.iter().find(|l| l.kind == LinkKind::SelfLink)
    }

    /// Make sure the channel carries at least one link, synthesizing a
    /// self link from the feed URL when the parser found none. Returns
    /// whether a link was added.
    pub fn ensure_link(&mut self, feed_url: &Url) -> bool {
        if !self.links.is_empty() {
            return false;
        }

        self.links.push(Link {
            url: feed_url.clone(),
            mime_type: Some("text/xml".into()),
            kind: LinkKind::SelfLink,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_without_title() {
        let item = Item::default();
        assert_eq!(item.display_title(), "(Untitled)");
    }

    #[test]
    fn test_display_content_prefers_content() {
        let item = Item {
            content: Some("Full content".into()),
            summary: Some("Short summary".into()),
            ..Default::default()
        };
        assert_eq!(item.display_content(), "Full content");
    }

    #[test]
    fn test_display_content_falls_back_to_summary() {
        let item = Item {
            summary: Some("Short summary".into()),
            ..Default::default()
        };
        assert_eq!(item.display_content(), "Short summary");
    }

    #[test]
    fn test_ensure_link_synthesizes_self_link() {
        let feed_url = Url::parse("https://example.com/feed.xml").unwrap();
        let mut channel = Channel::default();

        assert!(channel.ensure_link(&feed_url));
        let link = channel.self_link().unwrap();
        assert_eq!(link.url, feed_url);
        assert_eq!(link.mime_type.as_deref(), Some("text/xml"));
    }

    #[test]
    fn test_ensure_link_keeps_existing_links() {
        let feed_url = Url::parse("https://example.com/feed.xml").unwrap();
        let mut channel = Channel {
            links: vec![Link {
                url: Url::parse("https://example.com/").unwrap(),
                mime_type: None,
                kind: LinkKind::Alternate,
            }],
            ..Default::default()
        };

        assert!(!channel.ensure_link(&feed_url));
        assert_eq!(channel.links.len(), 1);
        assert!(channel.self_link().is_none());
    }
}
