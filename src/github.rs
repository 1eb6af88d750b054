//! `ObjectStore` backed by the GitHub repository contents API.
//!
//! Objects are files in the repository, revisions are the file blob shas and
//! every write is a commit on the default branch.
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::StoreError;
use crate::store::{ObjectStore, Revision, StoredObject};

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github.v3+json";
const GITHUB_RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

pub struct GitHubStore {
    client: reqwest::Client,
    /// `{api_base}/repos/{owner}/{name}/contents`
    contents_base: Url,
    token: String,
}

#[derive(Deserialize)]
struct ContentsEntry {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    size: u64,
}

impl ContentsEntry {
    /// Files over 1 MB come back with `"encoding": "none"` and no content.
    fn is_truncated(&self) -> bool {
        self.encoding.as_deref() == Some("none") || (self.content.is_empty() && self.size > 0)
    }
}

#[derive(Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: ContentsEntry,
}

impl GitHubStore {
    pub fn new(config: &RemoteConfig) -> Result<GitHubStore, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("camdrop/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(GitHubStore {
            client,
            contents_base: contents_base(&config.api_base, &config.owner, &config.name)?,
            token: config.token.clone(),
        })
    }

    fn contents_url(&self, path: &str) -> Url {
        contents_url(&self.contents_base, path)
    }

    /// Raw bytes of the blob `sha`, so content and revision always match.
    async fn fetch_blob(&self, path: &str, sha: &str) -> Result<Vec<u8>, StoreError> {
        let url = blob_url(&self.contents_base, sha);
        debug!("GET {} (blob of {})", url, path);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_RAW_MEDIA_TYPE)
            .send()
            .await?;
        if !response.status().is_success() {
            // the file exists, so a missing blob must not read as "no manifest"
            return Err(match failure(path, response).await {
                StoreError::NotFound { .. } => StoreError::Remote {
                    status: 404,
                    detail: format!("blob {} of {} not found", sha, path),
                },
                other => other,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn contents_base(api_base: &str, owner: &str, name: &str) -> Result<Url, StoreError> {
    let mut url = Url::parse(api_base).map_err(|e| StoreError::Decode {
        message: format!("bad api base {:?}: {}", api_base, e),
    })?;
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments
                .pop_if_empty()
                .extend(&["repos", owner, name, "contents"]);
        }
        Err(()) => {
            return Err(StoreError::Decode {
                message: format!("api base {:?} cannot carry a path", api_base),
            })
        }
    }
    Ok(url)
}

/// appends each `/`-separated part of `path` as its own escaped segment
fn contents_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
    }
    url
}

/// `{api_base}/repos/{owner}/{name}/git/blobs/{sha}`
fn blob_url(contents_base: &Url, sha: &str) -> Url {
    let mut url = contents_base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop().extend(&["git", "blobs", sha]);
    }
    url
}

/// GitHub wraps the base64 payload at 60 columns.
fn decode_content(content: &str) -> Result<Vec<u8>, StoreError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Decode {
            message: e.to_string(),
        })
}

async fn failure(path: &str, response: reqwest::Response) -> StoreError {
    let status = response.status();
    let detail = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound {
            path: path.to_string(),
        },
        // 409: sha no longer matches, 422: sha missing for an existing file
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => StoreError::Conflict {
            path: path.to_string(),
            status: status.as_u16(),
            detail,
        },
        _ => StoreError::Remote {
            status: status.as_u16(),
            detail,
        },
    }
}

#[async_trait]
impl ObjectStore for GitHubStore {
    async fn fetch(&self, path: &str) -> Result<StoredObject, StoreError> {
        let url = self.contents_url(path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .send()
            .await?;
        debug!("GET {} -> {}", path, response.status());
        if !response.status().is_success() {
            return Err(failure(path, response).await);
        }

        let entry: ContentsEntry = response.json().await.map_err(|e| StoreError::Decode {
            message: e.to_string(),
        })?;
        let content = if entry.is_truncated() {
            self.fetch_blob(path, &entry.sha).await?
        } else {
            decode_content(&entry.content)?
        };
        Ok(StoredObject {
            content,
            revision: Revision(entry.sha),
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&Revision>,
        message: &str,
    ) -> Result<Revision, StoreError> {
        let url = self.contents_url(path);
        debug!("PUT {} ({} bytes, sha {:?})", url, content.len(), revision);
        let body = PutContents {
            message,
            content: base64::engine::general_purpose::STANDARD.encode(content),
            sha: revision.map(|r| r.0.as_str()),
        };
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .json(&body)
            .send()
            .await?;
        debug!("PUT {} -> {}", path, response.status());
        // 200 for updates, 201 for creates
        if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
            return Err(failure(path, response).await);
        }

        let created: PutResponse = response.json().await.map_err(|e| StoreError::Decode {
            message: e.to_string(),
        })?;
        Ok(Revision(created.content.sha))
    }
}
