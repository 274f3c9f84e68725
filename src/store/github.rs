use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};

use super::{Document, DocumentStore, Revision, StoreError};

const GITHUB_API: &str = "https://api.github.com";

/// Documents committed to a GitHub repository through the Contents API.
///
/// The blob `sha` is the revision. Without a token the store is read-only.
pub struct GithubDocumentStore {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    branch: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Deserialize)]
struct WrittenContent {
    sha: String,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

impl GithubDocumentStore {
    pub fn new(repo: String, branch: String, token: Option<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ub_site/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: GITHUB_API.to_string(),
            repo,
            branch,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        let encoded: Vec<_> = path
            .trim_start_matches('/')
            .split('/')
            .map(urlencoding::encode)
            .collect();
        format!(
            "{}/repos/{}/contents/{}",
            self.api_base,
            self.repo,
            encoded.join("/")
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, self.url(path))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn token(&self) -> Result<(), StoreError> {
        if self.token.is_some() {
            Ok(())
        } else {
            Err(StoreError::ReadOnly)
        }
    }
}

fn decode_content(path: &str, encoded: &str) -> Result<String, StoreError> {
    // GitHub wraps the base64 payload at 60 columns.
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Backend(format!("{path}: invalid base64 content: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| StoreError::Backend(format!("{path}: content is not UTF-8: {e}")))
}

#[async_trait]
impl DocumentStore for GithubDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: ContentsResponse = response.error_for_status()?.json().await?;
        Ok(Some(Document {
            content: decode_content(path, &body.content)?,
            revision: Revision(body.sha),
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        revision: Option<&Revision>,
        message: &str,
    ) -> Result<Revision, StoreError> {
        self.token()?;

        let request = PutRequest {
            message,
            content: STANDARD.encode(content),
            branch: &self.branch,
            sha: revision.map(Revision::as_str),
        };

        let response = self
            .request(reqwest::Method::PUT, path)
            .json(&request)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(StoreError::RevisionMismatch(path.to_string()))
            }
            _ => {
                let body: WriteResponse = response.error_for_status()?.json().await?;
                Ok(Revision(body.content.sha))
            }
        }
    }

    async fn delete(
        &self,
        path: &str,
        revision: &Revision,
        message: &str,
    ) -> Result<(), StoreError> {
        self.token()?;

        let request = DeleteRequest {
            message,
            sha: revision.as_str(),
            branch: &self.branch,
        };

        let response = self
            .request(reqwest::Method::DELETE, path)
            .json(&request)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(StoreError::RevisionMismatch(path.to_string()))
            }
            _ => {
                response.error_for_status()?;
                Ok(())
            }
        }
    }

    fn can_write(&self) -> bool {
        self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wrapped_base64() {
        let encoded = "eyJwb3N0cyI6\nW119\n";
        assert_eq!(decode_content("index.json", encoded).unwrap(), r#"{"posts":[]}"#);
    }

    #[test]
    fn builds_contents_url() {
        let store =
            GithubDocumentStore::new("owner/site".into(), "main".into(), None).unwrap();
        assert_eq!(
            store.url("/data/posts/index.json"),
            "https://api.github.com/repos/owner/site/contents/data/posts/index.json"
        );
        assert!(!store.can_write());
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        let store =
            GithubDocumentStore::new("owner/site".into(), "main".into(), None).unwrap();
        assert_eq!(
            store.url("data/posts/a?ref=x#y.json"),
            "https://api.github.com/repos/owner/site/contents/data/posts/a%3Fref%3Dx%23y.json"
        );
        assert_eq!(
            store.url("data/posts/안녕.json"),
            "https://api.github.com/repos/owner/site/contents/data/posts/%EC%95%88%EB%85%95.json"
        );
    }
}
