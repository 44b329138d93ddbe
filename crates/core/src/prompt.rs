//! Prompts and the immutable prompt pool they are allocated from.
//!
//! A [`PromptPool`] is created once per plan by the external prompt loader
//! and never appended to afterwards. Queue entries reference contiguous
//! half-open ranges of it by index.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
    pub style: String,
}

impl Prompt {
    pub fn new(style: impl Into<String>) -> Self {
        Self {
            title: None,
            lyrics: None,
            style: style.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_lyrics(mut self, lyrics: impl Into<String>) -> Self {
        self.lyrics = Some(lyrics.into());
        self
    }

    /// Title for logs and history records; untitled prompts show as `"untitled"`.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("untitled")
    }
}

/// Ordered, immutable sequence of prompts with stable 0-based indices.
///
/// Cloning is cheap: the prompts are shared behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptPool {
    prompts: Arc<[Prompt]>,
}

impl PromptPool {
    pub fn new(prompts: Vec<Prompt>) -> Self {
        Self {
            prompts: prompts.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Prompt> {
        self.prompts.get(index)
    }

    /// Contiguous slice of the pool, or `None` if the range falls outside it.
    pub fn slice(&self, range: Range<usize>) -> Option<&[Prompt]> {
        self.prompts.get(range)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.iter()
    }

    pub fn to_vec(&self) -> Vec<Prompt> {
        self.prompts.to_vec()
    }
}

impl From<Vec<Prompt>> for PromptPool {
    fn from(prompts: Vec<Prompt>) -> Self {
        Self::new(prompts)
    }
}

impl FromIterator<Prompt> for PromptPool {
    fn from_iter<I: IntoIterator<Item = Prompt>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> PromptPool {
        (0..n)
            .map(|i| Prompt::new(format!("style-{i}")).with_title(format!("Song {i}")))
            .collect()
    }

    #[test]
    fn slice_within_bounds() {
        let p = pool(5);
        let s = p.slice(1..3).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].style, "style-1");
    }

    #[test]
    fn slice_out_of_bounds_is_none() {
        assert!(pool(3).slice(2..4).is_none());
    }

    #[test]
    fn display_title_falls_back_for_blank_titles() {
        assert_eq!(Prompt::new("rock").display_title(), "untitled");
        assert_eq!(Prompt::new("rock").with_title("  ").display_title(), "untitled");
        assert_eq!(Prompt::new("rock").with_title("Anthem").display_title(), "Anthem");
    }

    #[test]
    fn clones_compare_equal() {
        let p = pool(4);
        assert_eq!(p.clone(), p);
        assert_ne!(p, pool(3));
    }

    #[test]
    fn prompt_deserializes_without_optional_fields() {
        let p: Prompt = serde_json::from_str(r#"{"style":"lofi"}"#).unwrap();
        assert_eq!(p, Prompt::new("lofi"));
    }
}
