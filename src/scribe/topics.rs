// Copyright (c) 2026 Ember
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Topic extraction from post text: hashtag tokens plus a small set of
//! keyword-derived tags, always including `#general`.

/// Maximum topics extracted from a single post.
pub const MAX_TOPICS: usize = 10;
/// Maximum characters in a hashtag body (after the leading `#`), per
/// `#[a-z0-9_]{1,50}`.
pub const MAX_TOPIC_LEN: usize = 50;
/// Maximum keyword-derived tags added on top of explicit hashtags.
pub const MAX_KEYWORD_TAGS: usize = 5;
/// The topic every post is anchored to when room remains.
pub const GENERAL_TOPIC: &str = "#general";

/// Fixed keyword → topic mapping used to derive extra tags from post body
/// text that doesn't carry an explicit hashtag for the same subject.
const KEYWORD_TAGS: &[(&str, &str)] = &[
    ("breaking", "#news"),
    ("urgent", "#news"),
    ("music", "#music"),
    ("song", "#music"),
    ("game", "#gaming"),
    ("gaming", "#gaming"),
    ("photo", "#photography"),
    ("recipe", "#food"),
    ("meme", "#humor"),
    ("lol", "#humor"),
];

fn is_valid_hashtag_body(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_TOPIC_LEN
        && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Extract explicit `#tag` tokens from `text`, lowercased and deduplicated,
/// in first-seen order.
fn explicit_hashtags(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for token in text.split(|c: char| c.is_whitespace()) {
        let Some(body) = token.strip_prefix('#') else {
            continue;
        };
        let lower = body.to_lowercase();
        let trimmed: String = lower
            .chars()
            .take_while(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
            .collect();
        if is_valid_hashtag_body(&trimmed) {
            let tag = format!("#{trimmed}");
            if !out.contains(&tag) {
                out.push(tag);
            }
        }
    }
    out
}

fn keyword_tags(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut out = Vec::new();
    for (keyword, tag) in KEYWORD_TAGS {
        if out.len() >= MAX_KEYWORD_TAGS {
            break;
        }
        if lower.contains(keyword) && !out.iter().any(|t| t == tag) {
            out.push((*tag).to_string());
        }
    }
    out
}

/// Extract the full topic set for a post: explicit hashtags first, then
/// keyword-derived tags, then `#general` if room remains, all capped at
/// [`MAX_TOPICS`].
pub fn extract_topics(text: &str) -> Vec<String> {
    let mut topics = explicit_hashtags(text);

    for tag in keyword_tags(text) {
        if topics.len() >= MAX_TOPICS {
            break;
        }
        if !topics.contains(&tag) {
            topics.push(tag);
        }
    }

    if topics.len() < MAX_TOPICS && !topics.iter().any(|t| t == GENERAL_TOPIC) {
        topics.push(GENERAL_TOPIC.to_string());
    }

    topics.truncate(MAX_TOPICS);
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_lowercased_hashtags_and_general() {
        let topics = extract_topics("Hello #Rust and #web3 friends");
        assert!(topics.contains(&"#rust".to_string()));
        assert!(topics.contains(&"#web3".to_string()));
        assert!(topics.contains(&GENERAL_TOPIC.to_string()));
    }

    #[test]
    fn caps_at_max_topics() {
        let text: String = (0..20).map(|i| format!("#tag{i} ")).collect();
        let topics = extract_topics(&text);
        assert!(topics.len() <= MAX_TOPICS);
    }

    #[test]
    fn rejects_overlong_and_invalid_tokens() {
        let long = "#".to_string() + &"a".repeat(60);
        let topics = extract_topics(&long);
        assert!(!topics.iter().any(|t| t.len() > MAX_TOPIC_LEN + 1));
    }

    #[test]
    fn derives_keyword_tags_when_no_explicit_hashtag() {
        let topics = extract_topics("breaking news from the city");
        assert!(topics.contains(&"#news".to_string()));
    }
}
