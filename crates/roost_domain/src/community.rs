//! Community feed records.

use roost_core::{Entity, ValidationError};
use serde::{Deserialize, Serialize};

/// Longest post or comment body accepted, in characters.
const MAX_BODY_CHARS: usize = 5_000;

fn check_body(field: &'static str, body: &str) -> Result<(), ValidationError> {
    ValidationError::require(field, body)?;
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ValidationError::new(
            field,
            format!("is longer than {MAX_BODY_CHARS} characters"),
        ));
    }
    Ok(())
}

/// A post in the community feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Author.
    pub author_user_id: String,
    /// Body text.
    pub content: String,
    /// Attached images.
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Hashtags without the leading `#`.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Like counter as last seen.
    #[serde(default)]
    pub like_count: u32,
}

impl Post {
    /// Creates a text post.
    pub fn new(author_user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author_user_id: author_user_id.into(),
            content: content.into(),
            image_urls: Vec::new(),
            tags: Vec::new(),
            like_count: 0,
        }
    }
}

impl Entity for Post {
    const ENTITY_TYPE: &'static str = "post";

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("author_user_id", &self.author_user_id)?;
        check_body("content", &self.content)?;
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ValidationError::new("tags", "contains a blank tag"));
        }
        Ok(())
    }
}

/// A reply to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Post replied to.
    pub post_id: String,
    /// Author.
    pub author_user_id: String,
    /// Body text.
    pub content: String,
}

impl Comment {
    /// Creates a comment on `post_id`.
    pub fn new(
        post_id: impl Into<String>,
        author_user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            post_id: post_id.into(),
            author_user_id: author_user_id.into(),
            content: content.into(),
        }
    }
}

impl Entity for Comment {
    const ENTITY_TYPE: &'static str = "comment";

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("post_id", &self.post_id)?;
        ValidationError::require("author_user_id", &self.author_user_id)?;
        check_body("content", &self.content)
    }
}

/// A member's public profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Account id.
    pub user_id: String,
    /// Name shown in the feed.
    pub display_name: String,
    /// About text.
    #[serde(default)]
    pub bio: Option<String>,
    /// Avatar image.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Village or district.
    #[serde(default)]
    pub location: Option<String>,
}

impl UserProfile {
    /// Creates a profile with only a display name.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            bio: None,
            avatar_url: None,
            location: None,
        }
    }
}

impl Entity for UserProfile {
    const ENTITY_TYPE: &'static str = "user_profile";

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("user_id", &self.user_id)?;
        ValidationError::require("display_name", &self.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_needs_author_and_content() {
        assert!(Post::new("u1", "First eggs of the season").validate().is_ok());
        assert_eq!(
            Post::new("", "hello").validate().unwrap_err().field,
            "author_user_id"
        );
        assert_eq!(Post::new("u1", "\n").validate().unwrap_err().field, "content");
    }

    #[test]
    fn overlong_body_is_rejected() {
        let post = Post::new("u1", "a".repeat(MAX_BODY_CHARS + 1));
        let err = post.validate().unwrap_err();
        assert_eq!(err.field, "content");
        assert!(err.reason.contains("longer"));
    }

    #[test]
    fn blank_tags_are_rejected() {
        let mut post = Post::new("u1", "Vaccination day");
        post.tags = vec!["health".into(), " ".into()];
        assert_eq!(post.validate().unwrap_err().field, "tags");
    }

    #[test]
    fn comment_and_profile_rules() {
        assert!(Comment::new("p1", "u2", "Congrats!").validate().is_ok());
        assert_eq!(
            Comment::new("", "u2", "Congrats!").validate().unwrap_err().field,
            "post_id"
        );

        assert!(UserProfile::new("u2", "Ravi").validate().is_ok());
        assert_eq!(
            UserProfile::new("u2", "").validate().unwrap_err().field,
            "display_name"
        );
    }
}
