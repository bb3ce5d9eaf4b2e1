use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

/// Most embeds a single message may carry.
const MAX_EMBEDS_PER_MESSAGE: usize = 4;

/// Longest path shown on a generic link card.
const MAX_CARD_PATH_CHARS: usize = 96;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"]+"#).expect("valid URL regex"));

static YOUTUBE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid YouTube id regex"));

/// One rich embed derived from a URL found in message content.
///
/// Twitch embed URLs carry a literal `{parent}` placeholder the client
/// substitutes with its own hostname, as the player requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Embed {
    #[serde(rename_all = "camelCase")]
    Youtube {
        url: String,
        video_id: String,
        thumbnail_url: String,
        embed_url: String,
    },
    #[serde(rename_all = "camelCase")]
    Twitch { url: String, embed_url: String },
    #[serde(rename_all = "camelCase")]
    Link {
        url: String,
        host: String,
        path: String,
    },
}

/// Scan message content for up to four http(s) URLs and classify each.
/// Pure over `content`; no network access.
pub fn extract_embeds(content: &str) -> Vec<Embed> {
    URL_RE
        .find_iter(content)
        .map(|m| m.as_str().trim_end_matches([')', '.', ',', ';', '\'', '"']))
        .filter_map(classify_url)
        .take(MAX_EMBEDS_PER_MESSAGE)
        .collect()
}

fn classify_url(raw: &str) -> Option<Embed> {
    let url = Url::parse(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if let Some(embed) = youtube_embed(raw, &host, &url) {
        return Some(embed);
    }
    if let Some(embed) = twitch_embed(raw, &host, &url) {
        return Some(embed);
    }
    Some(link_card(raw, &host, &url))
}

fn youtube_embed(raw: &str, host: &str, url: &Url) -> Option<Embed> {
    let video_id = match host {
        "youtube.com" | "m.youtube.com" | "youtube-nocookie.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("shorts") | Some("embed") | Some("live") => {
                    segments.next().map(|s| s.to_string())
                }
                _ => None,
            }
        }
        "youtu.be" => url.path_segments()?.next().map(|s| s.to_string()),
        _ => None,
    }?;

    if !YOUTUBE_ID_RE.is_match(&video_id) {
        return None;
    }

    Some(Embed::Youtube {
        url: raw.to_string(),
        thumbnail_url: format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg"),
        embed_url: format!("https://www.youtube.com/embed/{video_id}"),
        video_id,
    })
}

fn twitch_embed(raw: &str, host: &str, url: &Url) -> Option<Embed> {
    let embed_url = match host {
        "clips.twitch.tv" => {
            let slug = url.path_segments()?.next().filter(|s| !s.is_empty())?;
            format!("https://clips.twitch.tv/embed?clip={slug}&parent={{parent}}")
        }
        "twitch.tv" | "m.twitch.tv" => {
            let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
            match segments.as_slice() {
                ["videos", video_id] => {
                    format!("https://player.twitch.tv/?video={video_id}&parent={{parent}}")
                }
                [_channel, "clip", slug] => {
                    format!("https://clips.twitch.tv/embed?clip={slug}&parent={{parent}}")
                }
                [channel] => {
                    format!("https://player.twitch.tv/?channel={channel}&parent={{parent}}")
                }
                _ => return None,
            }
        }
        _ => return None,
    };

    Some(Embed::Twitch {
        url: raw.to_string(),
        embed_url,
    })
}

fn link_card(raw: &str, host: &str, url: &Url) -> Embed {
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    let path: String = path.chars().take(MAX_CARD_PATH_CHARS).collect();

    Embed::Link {
        url: raw.to_string(),
        host: host.to_string(),
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(content: &str) -> Embed {
        extract_embeds(content).into_iter().next().expect("embed")
    }

    #[test]
    fn youtube_watch_url_is_classified() {
        let embed = first("check this https://www.youtube.com/watch?v=dQw4w9WgXcQ out");
        match embed {
            Embed::Youtube {
                video_id,
                thumbnail_url,
                embed_url,
                ..
            } => {
                assert_eq!(video_id, "dQw4w9WgXcQ");
                assert_eq!(
                    thumbnail_url,
                    "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg"
                );
                assert_eq!(embed_url, "https://www.youtube.com/embed/dQw4w9WgXcQ");
            }
            other => panic!("expected youtube embed, got {other:?}"),
        }
    }

    #[test]
    fn youtube_short_forms_are_classified() {
        for content in [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ",
        ] {
            assert!(
                matches!(first(content), Embed::Youtube { .. }),
                "not youtube: {content}"
            );
        }
    }

    #[test]
    fn youtube_with_bad_id_falls_back_to_link() {
        // 10 characters, one short of a valid video id.
        let embed = first("https://www.youtube.com/watch?v=dQw4w9WgXc");
        assert!(matches!(embed, Embed::Link { .. }));
    }

    #[test]
    fn twitch_channel_video_and_clip() {
        match first("https://twitch.tv/somechannel") {
            Embed::Twitch { embed_url, .. } => {
                assert_eq!(
                    embed_url,
                    "https://player.twitch.tv/?channel=somechannel&parent={parent}"
                );
            }
            other => panic!("expected twitch, got {other:?}"),
        }
        match first("https://www.twitch.tv/videos/123456789") {
            Embed::Twitch { embed_url, .. } => {
                assert_eq!(
                    embed_url,
                    "https://player.twitch.tv/?video=123456789&parent={parent}"
                );
            }
            other => panic!("expected twitch, got {other:?}"),
        }
        match first("https://clips.twitch.tv/FunnyClipSlug") {
            Embed::Twitch { embed_url, .. } => {
                assert_eq!(
                    embed_url,
                    "https://clips.twitch.tv/embed?clip=FunnyClipSlug&parent={parent}"
                );
            }
            other => panic!("expected twitch, got {other:?}"),
        }
    }

    #[test]
    fn generic_link_card_truncates_path() {
        let long_path = "a".repeat(200);
        let embed = first(&format!("https://example.com/{long_path}"));
        match embed {
            Embed::Link { host, path, .. } => {
                assert_eq!(host, "example.com");
                assert_eq!(path.chars().count(), 96);
            }
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[test]
    fn at_most_four_embeds() {
        let content = (0..6)
            .map(|i| format!("https://example.com/page{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(extract_embeds(&content).len(), 4);
    }

    #[test]
    fn non_http_schemes_are_ignored() {
        assert!(extract_embeds("ftp://example.com/file ssh://host").is_empty());
        assert!(extract_embeds("no links here").is_empty());
    }

    #[test]
    fn trailing_punctuation_is_stripped() {
        match first("(see https://example.com/docs).") {
            Embed::Link { url, .. } => assert_eq!(url, "https://example.com/docs"),
            other => panic!("expected link, got {other:?}"),
        }
    }
}
