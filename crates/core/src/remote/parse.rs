//! Parse Server REST client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::address::AddressKey;
use crate::config::ApiConfig;
use crate::errors::StoreError;
use crate::models::{ContentRef, FileRecord, Study, StudyPkg, Version};
use crate::remote::RemoteStore;

/// Rows per `File` query; Parse caps `limit` at 1000.
const FILE_PAGE_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ParseList<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParseTeam {
    object_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParseStudy {
    object_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParseVersion {
    object_id: String,
    sha: String,
    #[serde(default)]
    file_map: BTreeMap<String, String>,
    #[serde(default)]
    pkg: StudyPkg,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ParseFile {
    name: String,
    sha: String,
    file: Option<ParseFileRef>,
}

#[derive(Debug, Deserialize)]
struct ParseFileRef {
    name: String,
    url: String,
}

fn pointer(class: &str, id: &str) -> serde_json::Value {
    json!({ "__type": "Pointer", "className": class, "objectId": id })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Asynchronous Parse Server REST client.
#[derive(Clone)]
pub struct ParseClient {
    http: reqwest::Client,
    api_url: String,
}

impl ParseClient {
    /// Build a client from the API configuration. The session token, when
    /// present, is sent on every request.
    pub fn new(config: &ApiConfig) -> Result<Self, StoreError> {
        let api_url = config.url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("kyso-cli/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            "x-parse-application-id",
            HeaderValue::from_str(&config.app_id)
                .map_err(|e| StoreError::ParseError(format!("invalid app id: {}", e)))?,
        );
        if let Some(ref token) = config.token {
            headers.insert(
                "x-parse-session-token",
                HeaderValue::from_str(token)
                    .map_err(|e| StoreError::ParseError(format!("invalid session token: {}", e)))?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        info!(api_url = %api_url, "created ParseClient");
        Ok(Self { http, api_url })
    }

    async fn query<T: DeserializeOwned>(
        &self,
        class: &str,
        filter: serde_json::Value,
        extra: &[(&str, &str)],
    ) -> Result<Vec<T>, StoreError> {
        let url = format!("{}/classes/{}", self.api_url, class);
        let resp = self
            .http
            .get(&url)
            .query(&[("where", filter.to_string())])
            .query(extra)
            .send()
            .await?;
        let list: ParseList<T> = decode(resp).await?;
        debug!(class, count = list.results.len(), "query returned");
        Ok(list.results)
    }

    async fn find_study(&self, team: &str, study: &str) -> Result<Study, StoreError> {
        let teams: Vec<ParseTeam> = self
            .query("Team", json!({ "name": team }), &[("limit", "1")])
            .await?;
        let team_obj = teams
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("team", team))?;

        let studies: Vec<ParseStudy> = self
            .query(
                "Study",
                json!({ "name": study, "team": pointer("Team", &team_obj.object_id) }),
                &[("limit", "1")],
            )
            .await?;
        let study_obj = studies
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("study", format!("{}/{}", team, study)))?;

        Ok(Study {
            id: study_obj.object_id,
            name: study_obj.name,
            team: team.to_string(),
        })
    }
}

#[async_trait]
impl RemoteStore for ParseClient {
    #[instrument(skip(self))]
    async fn resolve_version(
        &self,
        team: &str,
        study: &str,
        version_sha: Option<&str>,
    ) -> Result<(Study, Version), StoreError> {
        let study = self.find_study(team, study).await?;

        let mut filter = json!({ "study": pointer("Study", &study.id) });
        if let Some(sha) = version_sha {
            filter["sha"] = json!({ "$regex": format!("^{}", sha) });
        }
        // Two results are enough to detect an ambiguous prefix.
        let versions: Vec<ParseVersion> = self
            .query("Version", filter, &[("order", "-createdAt"), ("limit", "2")])
            .await?;

        let version = match (version_sha, versions.len()) {
            (_, 0) => {
                let name = match version_sha {
                    Some(sha) => format!("{}/{}#{}", team, study.name, sha),
                    None => format!("{}/{}", team, study.name),
                };
                return Err(StoreError::not_found("version", name));
            }
            (Some(sha), n) if n > 1 => {
                return Err(StoreError::Ambiguous {
                    sha: sha.to_string(),
                    count: n,
                })
            }
            _ => versions.into_iter().next(),
        };
        let v = version.ok_or_else(|| StoreError::not_found("version", study.name.clone()))?;

        info!(study = %study.name, version = %v.sha, "resolved version");
        let resolved = Version {
            id: v.object_id,
            sha: v.sha,
            file_map: v
                .file_map
                .into_iter()
                .map(|(k, path)| (AddressKey::from_hex(k), path))
                .collect(),
            pkg: v.pkg,
            created_at: v.created_at,
        };
        Ok((study, resolved))
    }

    #[instrument(skip(self, version), fields(version = %version.sha))]
    async fn list_files(&self, version: &Version) -> Result<Vec<FileRecord>, StoreError> {
        let filter = json!({
            "$relatedTo": { "object": pointer("Version", &version.id), "key": "files" }
        });
        let limit = FILE_PAGE_SIZE.to_string();
        let mut files: Vec<ParseFile> = Vec::new();
        loop {
            let skip = files.len().to_string();
            let page: Vec<ParseFile> = self
                .query(
                    "File",
                    filter.clone(),
                    &[("order", "name"), ("limit", &limit), ("skip", &skip)],
                )
                .await?;
            let short = page.len() < FILE_PAGE_SIZE;
            files.extend(page);
            if short {
                break;
            }
        }
        debug!(version = %version.sha, files = files.len(), "listed version files");

        let records: Vec<FileRecord> = files
            .into_iter()
            .map(|f| FileRecord {
                name: f.name,
                sha: f.sha,
                content: f.file.map(|r| ContentRef {
                    name: r.name,
                    url: r.url,
                }),
            })
            .collect();
        version.validate(&records)?;
        Ok(records)
    }

    #[instrument(skip(self, content), fields(name = %content.name))]
    async fn fetch_content(&self, content: &ContentRef) -> Result<Vec<u8>, StoreError> {
        let resp = self.http.get(&content.url).send().await?;
        let resp = check_response(resp).await?;
        let bytes = resp.bytes().await?;
        debug!(len = bytes.len(), "downloaded file");
        Ok(bytes.to_vec())
    }
}

/// Map non-success responses to [`StoreError`]s.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(StoreError::AuthenticationFailed(format!("HTTP {}: {}", status, body)));
    }
    Err(StoreError::ApiError {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, StoreError> {
    let resp = check_response(resp).await?;
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| StoreError::ParseError(e.to_string()))
}
