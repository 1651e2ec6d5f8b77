/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CHATVAULT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use sha2::{Digest, Sha256};

use crate::message_db::MessageDraft;

/// How many preceding drafts of the same batch feed the context window.
const HISTORY_WINDOW: usize = 5;
/// History text is truncated to this many characters.
const HISTORY_TEXT_MAX: usize = 50;

/// Derive the stable identity hash for the draft at `index`.
///
/// The hash covers the thread id, the draft's own sender and normalized
/// text, up to [`HISTORY_WINDOW`] preceding drafts (closest first), the
/// draft's image ids, and its zero-based position in the batch. Re-scraping
/// the same visible window therefore reproduces the same hash, while two
/// drafts with identical text are still told apart by their surrounding
/// context and position.
///
/// The window is relative to the batch passed by the caller, not to the
/// thread's persisted history: two scrapes that slice the conversation at
/// different offsets can assign a message different hashes. Callers that
/// need cross-scrape stability must feed overlapping batches from the same
/// starting boundary.
///
/// `index` must be a valid position in `drafts` and must be the draft's
/// actual position in the scraped batch, never a store-assigned id.
pub fn fingerprint(thread_id: i64, drafts: &[MessageDraft], index: usize) -> String {
    let current = &drafts[index];
    let mut parts: Vec<String> = Vec::with_capacity(HISTORY_WINDOW + 4);

    parts.push(format!("thread:{thread_id}"));
    parts.push(format!(
        "current:{}:{}",
        current.sender.as_str(),
        normalize(current.text.as_deref())
    ));

    let look_back = HISTORY_WINDOW.min(index);
    for offset in 0..look_back {
        let history = &drafts[index - 1 - offset];
        let text: String = normalize(history.text.as_deref())
            .chars()
            .take(HISTORY_TEXT_MAX)
            .collect();
        parts.push(format!("h{offset}:{}:{}", history.sender.as_str(), text));
    }

    if !current.images.is_empty() {
        parts.push(format!("img:{}", current.images.join("|")));
    }

    parts.push(format!("pos:{index}"));

    let digest = Sha256::digest(parts.join("::").as_bytes());
    hex::encode(digest)
}

/// Trim and collapse internal whitespace runs to a single space. Absent
/// text normalizes to the empty string.
fn normalize(text: Option<&str>) -> String {
    text.unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_db::SenderRole;

    fn draft(sender: SenderRole, text: &str) -> MessageDraft {
        MessageDraft {
            sender,
            remote_message_id: None,
            text: Some(text.to_string()),
            images: Vec::new(),
            source_timestamp_ms: 1_755_600_000_000,
        }
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let batch = vec![
            draft(SenderRole::User, "你的电话"),
            draft(SenderRole::Me, "好"),
        ];
        assert_eq!(fingerprint(1, &batch, 1), fingerprint(1, &batch, 1));
        assert_eq!(fingerprint(1, &batch, 1).len(), 64);
    }

    #[test]
    fn identical_text_distinct_context() {
        let a = vec![
            draft(SenderRole::User, "好"),
            draft(SenderRole::Me, "好"),
        ];
        let b = vec![
            draft(SenderRole::Me, "测试"),
            draft(SenderRole::User, "好"),
        ];
        assert_ne!(fingerprint(1, &a, 1), fingerprint(1, &b, 1));
    }

    #[test]
    fn position_is_part_of_the_hash() {
        let batch = vec![
            draft(SenderRole::User, "好"),
            draft(SenderRole::User, "好"),
        ];
        assert_ne!(fingerprint(1, &batch, 0), fingerprint(1, &batch, 1));
    }

    #[test]
    fn thread_id_is_part_of_the_hash() {
        let batch = vec![draft(SenderRole::User, "好")];
        assert_ne!(fingerprint(1, &batch, 0), fingerprint(2, &batch, 0));
    }

    #[test]
    fn whitespace_normalizes() {
        let spaced = vec![draft(SenderRole::User, "  你的   电话\t\n")];
        let tight = vec![draft(SenderRole::User, "你的 电话")];
        assert_eq!(fingerprint(1, &spaced, 0), fingerprint(1, &tight, 0));
    }

    #[test]
    fn absent_text_hashes_like_empty() {
        let mut none = draft(SenderRole::User, "");
        none.text = None;
        let empty = draft(SenderRole::User, "");
        assert_eq!(
            fingerprint(1, &[none], 0),
            fingerprint(1, &[empty], 0)
        );
    }

    #[test]
    fn history_window_caps_at_five() {
        // Drafts beyond the five-message window must not affect the hash.
        let mut seven: Vec<MessageDraft> =
            (0..7).map(|i| draft(SenderRole::User, &format!("m{i}"))).collect();
        let with_changed_oldest = {
            seven[0].text = Some("changed".to_string());
            seven.clone()
        };
        let original: Vec<MessageDraft> =
            (0..7).map(|i| draft(SenderRole::User, &format!("m{i}"))).collect();
        assert_eq!(
            fingerprint(1, &original, 6),
            fingerprint(1, &with_changed_oldest, 6)
        );
        // But a draft inside the window does.
        let mut inside = original.clone();
        inside[2].text = Some("changed".to_string());
        assert_ne!(fingerprint(1, &original, 6), fingerprint(1, &inside, 6));
    }

    #[test]
    fn history_truncates_at_fifty_chars_multibyte_safe() {
        let long: String = "病".repeat(80);
        let mut a = vec![draft(SenderRole::User, &long), draft(SenderRole::Me, "好")];
        // Changing characters past the 50-char cut must not change the hash.
        let base = fingerprint(1, &a, 1);
        a[0].text = Some(format!("{}尾", "病".repeat(79)));
        assert_eq!(base, fingerprint(1, &a, 1));
        // Changing a character inside the cut must.
        a[0].text = Some(format!("早{}", "病".repeat(79)));
        assert_ne!(base, fingerprint(1, &a, 1));
    }

    #[test]
    fn images_are_part_of_the_hash() {
        let plain = vec![draft(SenderRole::User, "好")];
        let mut with_img = plain.clone();
        with_img[0].images = vec!["img-a".to_string(), "img-b".to_string()];
        assert_ne!(fingerprint(1, &plain, 0), fingerprint(1, &with_img, 0));
        // Image order matters.
        let mut reordered = with_img.clone();
        reordered[0].images = vec!["img-b".to_string(), "img-a".to_string()];
        assert_ne!(
            fingerprint(1, &with_img, 0),
            fingerprint(1, &reordered, 0)
        );
    }
}
