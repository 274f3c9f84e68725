use crate::db::connection::DbPool;
use crate::db::models::{Tag, tag_slug};
use sqlx::{Error, PgConnection};

pub async fn list_tags(pool: &DbPool) -> Result<Vec<Tag>, Error> {
    sqlx::query_as::<_, Tag>("SELECT slug, name FROM tags ORDER BY slug")
        .fetch_all(pool)
        .await
}

pub async fn tags_for_article(pool: &DbPool, article_id: i64) -> Result<Vec<Tag>, Error> {
    sqlx::query_as::<_, Tag>(
        "SELECT t.slug, t.name FROM tags t
         JOIN article_tags link ON link.tag_slug = t.slug
         WHERE link.article_id = $1
         ORDER BY t.slug",
    )
    .bind(article_id)
    .fetch_all(pool)
    .await
}

/// Replaces the article's tags. Tags are upserted by slug, so a new display
/// name for an existing slug renames the tag everywhere.
pub async fn replace_article_tags(
    conn: &mut PgConnection,
    article_id: i64,
    names: &[String],
) -> Result<(), Error> {
    sqlx::query("DELETE FROM article_tags WHERE article_id = $1")
        .bind(article_id)
        .execute(&mut *conn)
        .await?;

    for name in names {
        let slug = tag_slug(name);
        if slug.is_empty() {
            continue;
        }

        sqlx::query(
            "INSERT INTO tags (slug, name) VALUES ($1, $2)
             ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(&slug)
        .bind(name.trim())
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO article_tags (article_id, tag_slug) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(article_id)
        .bind(&slug)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
