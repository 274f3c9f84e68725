use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub slug: String,
    pub lang: String,
    pub section: String,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub cover_key: Option<String>,
    pub status: String,
    pub view_count: i64,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Ko,
}

impl Lang {
    pub fn as_str(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Ko => "ko",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en" => Some(Lang::En),
            "ko" => Some(Lang::Ko),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Blog,
    Tools,
    Games,
    Pages,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Blog => "blog",
            Section::Tools => "tools",
            Section::Games => "games",
            Section::Pages => "pages",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blog" => Some(Section::Blog),
            "tools" => Some(Section::Tools),
            "games" => Some(Section::Games),
            "pages" => Some(Section::Pages),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    #[default]
    Draft,
    Published,
}

impl ArticleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
        }
    }
}

/// Fields of a new article row.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub slug: String,
    pub lang: Lang,
    pub section: Section,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub cover_key: Option<String>,
    pub status: ArticleStatus,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ArticleChanges {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub cover_key: Option<String>,
    pub status: Option<ArticleStatus>,
}

/// Tag identity is the lowercase slug of its display name.
pub fn tag_slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
