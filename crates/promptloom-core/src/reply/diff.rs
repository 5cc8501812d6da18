//! Incremental preview diffs.
//!
//! A client keeps the last rendered text and file list; each batch of
//! [`DiffSlice`]s transforms that state into the newest preview.

use super::result::ReplyPreview;
use crate::prompt::FileRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Text appended by an [`DiffSlice::Append`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Appended {
    pub content: String,
}

/// One instruction for updating rendered output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiffSlice {
    /// Add text after everything already rendered.
    Append { add: Appended },
    /// Keep the first `index` characters, replace the rest with `content`.
    /// `index` counts Unicode scalar values, not bytes.
    RewriteTail { index: usize, content: String },
    /// Replace the whole file list.
    SetFiles { files: Vec<FileRef> },
}

/// Diff two texts. Empty when equal, one slice otherwise.
pub fn text_diff(old: &str, new: &str) -> Vec<DiffSlice> {
    if old == new {
        return Vec::new();
    }
    // streaming appends dominate, check them before scanning for a prefix
    if let Some(suffix) = new.strip_prefix(old) {
        return vec![DiffSlice::Append {
            add: Appended {
                content: suffix.to_string(),
            },
        }];
    }

    let mut index = 0;
    let mut byte_offset = 0;
    for (a, b) in old.chars().zip(new.chars()) {
        if a != b {
            break;
        }
        index += 1;
        byte_offset += b.len_utf8();
    }
    vec![DiffSlice::RewriteTail {
        index,
        content: new[byte_offset..].to_string(),
    }]
}

/// Diff two previews: text first (display text when present), then the file
/// list whenever its length or any name changed.
pub fn reply_diff(old: &ReplyPreview, new: &ReplyPreview) -> Vec<DiffSlice> {
    let mut slices = text_diff(old.shown(), new.shown());
    let files_changed = old.files.len() != new.files.len()
        || old
            .files
            .iter()
            .zip(&new.files)
            .any(|(a, b)| a.name != b.name);
    if files_changed {
        slices.push(DiffSlice::SetFiles {
            files: new.files.clone(),
        });
    }
    slices
}

/// Apply slices to rendered state, as a client would.
pub fn apply_slices(text: &mut String, files: &mut Vec<FileRef>, slices: &[DiffSlice]) {
    for slice in slices {
        match slice {
            DiffSlice::Append { add } => text.push_str(&add.content),
            DiffSlice::RewriteTail { index, content } => {
                let cut = text
                    .char_indices()
                    .nth(*index)
                    .map(|(offset, _)| offset)
                    .unwrap_or(text.len());
                text.truncate(cut);
                text.push_str(content);
            }
            DiffSlice::SetFiles { files: new_files } => *files = new_files.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(old: &str, slices: &[DiffSlice]) -> String {
        let mut text = old.to_string();
        apply_slices(&mut text, &mut Vec::new(), slices);
        text
    }

    #[test]
    fn test_equal_texts_produce_nothing() {
        assert!(text_diff("same", "same").is_empty());
        assert!(text_diff("", "").is_empty());
    }

    #[test]
    fn test_extension_is_single_append() {
        let slices = text_diff("Hel", "Hello");
        assert_eq!(
            slices,
            vec![DiffSlice::Append {
                add: Appended {
                    content: "lo".to_string()
                }
            }]
        );
    }

    #[test]
    fn test_rewrite_keeps_common_prefix() {
        let slices = text_diff("Thinking...", "The answer");
        assert_eq!(
            slices,
            vec![DiffSlice::RewriteTail {
                index: 2,
                content: "e answer".to_string()
            }]
        );
    }

    #[test]
    fn test_shrink_rewrites_tail_to_empty() {
        let slices = text_diff("hello world", "hello");
        assert_eq!(
            slices,
            vec![DiffSlice::RewriteTail {
                index: 5,
                content: String::new()
            }]
        );
    }

    #[test]
    fn test_rewrite_index_counts_characters() {
        let slices = text_diff("héllo wörld", "héllo wind");
        assert_eq!(
            slices,
            vec![DiffSlice::RewriteTail {
                index: 7,
                content: "ind".to_string()
            }]
        );
    }

    #[test]
    fn test_applying_diff_reproduces_new_text() {
        let pairs = [
            ("", "abc"),
            ("abc", ""),
            ("abc", "abd"),
            ("abc", "xyz"),
            ("你好世界", "你好朋友"),
            ("tool: <run>x</run>", "tool: [result]"),
            ("a\nb\nc", "a\nb"),
            ("😀x", "😀y😀"),
        ];
        for (old, new) in pairs {
            assert_eq!(apply(old, &text_diff(old, new)), new, "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn test_file_changes_emit_set_files() {
        let old = ReplyPreview::new("x");
        let mut new = ReplyPreview::new("x");
        new.files.push(FileRef::new("a.png", vec![1, 2]));
        let slices = reply_diff(&old, &new);
        assert_eq!(slices.len(), 1);
        assert!(matches!(&slices[0], DiffSlice::SetFiles { files } if files[0].name == "a.png"));

        // same names, new bytes: not re-sent
        let mut newer = new.clone();
        newer.files[0].buffer = vec![9];
        assert!(reply_diff(&new, &newer).is_empty());

        let mut renamed = new.clone();
        renamed.files[0].name = "b.png".to_string();
        assert_eq!(reply_diff(&new, &renamed).len(), 1);
    }

    #[test]
    fn test_reply_diff_uses_display_text() {
        let old = ReplyPreview::new("raw");
        let mut new = ReplyPreview::new("raw");
        new.content_for_show = Some("raw shown".to_string());
        let slices = reply_diff(&old, &new);
        assert_eq!(
            slices,
            vec![DiffSlice::Append {
                add: Appended {
                    content: " shown".to_string()
                }
            }]
        );
    }

    #[test]
    fn test_wire_format() {
        let append = serde_json::to_value(&text_diff("a", "ab")[0]).unwrap();
        assert_eq!(append, serde_json::json!({"type": "append", "add": {"content": "b"}}));
        let rewrite = serde_json::to_value(&text_diff("ab", "ac")[0]).unwrap();
        assert_eq!(
            rewrite,
            serde_json::json!({"type": "rewrite_tail", "index": 1, "content": "c"})
        );
    }
}
