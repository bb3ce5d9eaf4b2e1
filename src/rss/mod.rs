//! RSS ingestion pipeline.
//!
//! A recurring task fetches every rss channel's feed, parses RSS 2.0 /
//! Atom, and publishes unseen items as synthetic messages from the RSS Bot
//! identity. Deduplication is a reserve-then-publish protocol: the
//! `INSERT OR IGNORE` row is the reservation, patched with the message id
//! on success and released on failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{Channel, MessageDto};
use crate::state::AppState;
use crate::ws::broadcast_event;
use crate::ws::events::EVENT_NEW_MESSAGE;

/// Feed items considered per channel per poll, chronologically oldest
/// first, to bound catch-up after downtime.
const MAX_ITEMS_PER_POLL: usize = 5;

const USER_AGENT: &str = concat!("bastion-server/", env!("CARGO_PKG_VERSION"), " (rss-poller)");

const ACCEPT_XML: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.1";

/// One parsed feed entry, reduced to the fields the dedupe key covers.
#[derive(Debug, Clone)]
struct ParsedItem {
    guid: String,
    title: Option<String>,
    link: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl ParsedItem {
    /// Stable dedupe key over `(guid, link, title, timestamp)`.
    fn item_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.guid.as_bytes());
        hasher.update(b"|");
        hasher.update(self.link.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.title.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(
            self.timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
                .as_bytes(),
        );
        hex::encode(hasher.finalize())
    }

    /// Content-level fingerprint catching re-announced items whose guid
    /// changed but whose visible content did not.
    fn content_fingerprint(&self) -> Option<String> {
        let title = self.title.as_deref()?;
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.link.as_deref().unwrap_or("").as_bytes());
        Some(hex::encode(hasher.finalize()))
    }

    fn message_content(&self) -> String {
        let title = self.title.as_deref().unwrap_or("(untitled)");
        match self.link.as_deref() {
            Some(link) => format!("{title}\n{link}"),
            None => title.to_string(),
        }
    }
}

/// Spawn the recurring poller.
pub fn spawn(state: AppState) {
    let interval = Duration::from_millis(state.config.rss_poll_ms);
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to build RSS HTTP client; poller disabled");
                return;
            }
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            poll_all(&state, &client).await;
        }
    });
    tracing::info!(interval_ms = interval.as_millis() as u64, "RSS poller started");
}

/// One full poll cycle. Channels are processed sequentially; a failing
/// feed is logged and never blocks the others.
async fn poll_all(state: &AppState, client: &reqwest::Client) {
    let channels = match db::channels::rss_channels(&state.pool).await {
        Ok(channels) => channels,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list RSS channels; skipping poll cycle");
            return;
        }
    };

    for channel in channels {
        if let Err(e) = poll_channel(state, client, &channel).await {
            tracing::warn!(
                channel_id = %channel.id,
                feed_url = ?channel.feed_url,
                error = %e,
                "RSS poll failed for channel"
            );
        }
    }
}

async fn poll_channel(
    state: &AppState,
    client: &reqwest::Client,
    channel: &Channel,
) -> AppResult<()> {
    let feed_url = channel
        .feed_url
        .as_deref()
        .ok_or_else(|| AppError::Validation("RSS channel has no feed URL".into()))?;

    let response = client
        .get(feed_url)
        .header(reqwest::header::ACCEPT, ACCEPT_XML)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AppError::Validation(format!("Feed fetch failed: {e}")))?;

    let body = response
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("Feed read failed: {e}")))?;

    // feed-rs detects RSS 2.0 (`<rss>`, `<rdf:RDF>`) and Atom (`<feed>`)
    // from the document itself.
    let feed = feed_rs::parser::parse(&body[..])
        .map_err(|e| AppError::Validation(format!("Feed parse failed: {e}")))?;

    let mut items: Vec<ParsedItem> = feed
        .entries
        .into_iter()
        .map(|entry| ParsedItem {
            guid: entry.id,
            title: entry.title.map(|t| t.content),
            link: entry.links.first().map(|l| l.href.clone()),
            timestamp: entry.published.or(entry.updated),
        })
        .collect();

    // Oldest first; undated items keep their feed position at the end.
    items.sort_by_key(|item| item.timestamp.unwrap_or(DateTime::<Utc>::MAX_UTC));
    items.truncate(MAX_ITEMS_PER_POLL);

    for item in items {
        publish_item(state, channel, &item).await?;
    }
    Ok(())
}

/// Reserve, publish, patch — or release on failure.
async fn publish_item(state: &AppState, channel: &Channel, item: &ParsedItem) -> AppResult<()> {
    let item_key = item.item_key();
    let fingerprint = item.content_fingerprint();

    let reserved =
        db::rss_items::reserve(&state.pool, channel.id, &item_key, fingerprint.as_deref()).await?;
    if !reserved {
        return Ok(());
    }

    let bot = match db::users::get_by_public_key(&state.pool, db::RSS_BOT_PUBLIC_KEY).await? {
        Some(bot) => bot,
        None => {
            db::rss_items::release(&state.pool, channel.id, &item_key).await?;
            tracing::error!("RSS Bot identity missing; releasing reservation");
            return Err(AppError::Internal);
        }
    };

    let content = item.message_content();
    match db::messages::insert(&state.pool, channel.id, bot.id, &content).await {
        Ok(message) => {
            db::rss_items::attach_message(&state.pool, channel.id, &item_key, message.id).await?;
            broadcast_event(state, EVENT_NEW_MESSAGE, MessageDto::from(message)).await;
            Ok(())
        }
        Err(e) => {
            // Release so a later poll can retry the item.
            if let Err(release_err) =
                db::rss_items::release(&state.pool, channel.id, &item_key).await
            {
                tracing::error!(
                    channel_id = %channel.id,
                    error = %release_err,
                    "Failed to release RSS reservation after publish failure"
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(guid: &str, title: Option<&str>, link: Option<&str>) -> ParsedItem {
        ParsedItem {
            guid: guid.into(),
            title: title.map(Into::into),
            link: link.map(Into::into),
            timestamp: None,
        }
    }

    #[test]
    fn item_key_covers_every_field() {
        let base = item("g1", Some("title"), Some("https://a.example/p"));
        assert_eq!(base.item_key(), base.item_key());

        assert_ne!(base.item_key(), item("g2", Some("title"), Some("https://a.example/p")).item_key());
        assert_ne!(base.item_key(), item("g1", Some("other"), Some("https://a.example/p")).item_key());
        assert_ne!(base.item_key(), item("g1", Some("title"), None).item_key());

        let mut dated = base.clone();
        dated.timestamp = Some(Utc::now());
        assert_ne!(base.item_key(), dated.item_key());
    }

    #[test]
    fn fingerprint_ignores_guid() {
        let a = item("g1", Some("title"), Some("https://a.example/p"));
        let b = item("g2", Some("title"), Some("https://a.example/p"));
        assert_eq!(a.content_fingerprint(), b.content_fingerprint());
        assert!(item("g1", None, Some("https://a.example/p"))
            .content_fingerprint()
            .is_none());
    }

    #[test]
    fn message_content_joins_title_and_link() {
        assert_eq!(
            item("g", Some("Big news"), Some("https://a.example/p")).message_content(),
            "Big news\nhttps://a.example/p"
        );
        assert_eq!(item("g", Some("Big news"), None).message_content(), "Big news");
        assert_eq!(item("g", None, None).message_content(), "(untitled)");
    }
}
