// Copyright 2022 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::auth;
use crate::auth::Session;
use crate::config::DriveConfig;
use crate::remotes::remote;
use crate::remotes::remote::{Child, Page, RemoteId};

use std::path::Path;
use std::sync::Arc;

use reqwest::header::{CONTENT_LENGTH, LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use async_trait::async_trait;

use log::debug;

use std::fmt;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: &str = "1000";

#[derive(Debug)]
pub enum Error {
    Auth(auth::Error),
    Http(reqwest::Error),
    Api { status: StatusCode, body: String },
    MissingUploadLocation,
}

impl From<auth::Error> for Error {
    fn from(error: auth::Error) -> Self {
        Error::Auth(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Http(error)
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Auth(error) => write!(f, "Drive authorization error: {}", error),
            Error::Http(error) => write!(f, "Drive request error: {}", error),
            Error::Api { status, body } => write!(f, "Drive API error {}: {}", status, body),
            Error::MissingUploadLocation => {
                write!(f, "Drive did not return a resumable upload location")
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Deserialize)]
struct FileResource {
    id: String,
}

#[derive(Deserialize)]
struct ListedFile {
    id: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<ListedFile>,
    next_page_token: Option<String>,
}

impl From<FileList> for Page {
    fn from(list: FileList) -> Self {
        Page {
            children: list
                .files
                .into_iter()
                .map(|file| Child {
                    id: RemoteId::new(file.id),
                    name: file.name,
                })
                .collect(),
            next_page_token: list.next_page_token,
        }
    }
}

fn children_query(parent: &RemoteId) -> String {
    format!("'{}' in parents and trashed = false", parent)
}

fn endpoint(base: &url::Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

async fn check(response: Response) -> Result<Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api { status, body })
}

#[derive(Clone)]
pub struct Drive {
    name: String,
    client: Client,
    session: Arc<Session>,
    files_url: String,
    upload_url: String,
}

impl Drive {
    pub fn new(config: &DriveConfig, session: Session) -> Drive {
        Drive::with_client(config, session, Client::new())
    }

    fn with_client(config: &DriveConfig, session: Session, client: Client) -> Drive {
        Drive {
            name: String::from("drive"),
            client,
            session: Arc::new(session),
            files_url: endpoint(&config.api_url, "files"),
            upload_url: endpoint(&config.upload_url, "files"),
        }
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, Error> {
        let token = self.session.bearer().await?;
        Ok(request.bearer_auth(token))
    }

    async fn list(&self, parent: &RemoteId, page_token: Option<&str>) -> Result<FileList, Error> {
        let mut query = vec![
            ("q", children_query(parent)),
            ("fields", String::from("nextPageToken,files(id,name)")),
            ("pageSize", String::from(PAGE_SIZE)),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", String::from(token)));
        }
        let request = self.authorized(self.client.get(&self.files_url)).await?;
        let response = check(request.query(&query).send().await?).await?;
        Ok(response.json::<FileList>().await?)
    }

    async fn insert_folder(&self, metadata: &FileMetadata<'_>) -> Result<RemoteId, Error> {
        let request = self
            .authorized(self.client.post(&self.files_url))
            .await?
            .query(&[("fields", "id")])
            .json(metadata);
        let response = check(request.send().await?).await?;
        Ok(RemoteId::new(response.json::<FileResource>().await?.id))
    }

    /// Resumable upload: the metadata request opens a session, the content is
    /// then streamed to the session URI in a single PUT.
    async fn insert_file(
        &self,
        metadata: &FileMetadata<'_>,
        content: tokio::fs::File,
        length: u64,
    ) -> Result<RemoteId, Error> {
        let request = self
            .authorized(self.client.post(&self.upload_url))
            .await?
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .header("X-Upload-Content-Length", length)
            .json(metadata);
        let response = check(request.send().await?).await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
            .ok_or(Error::MissingUploadLocation)?;
        debug!("Resumable session for {} opened", metadata.name);

        let request = self
            .authorized(self.client.put(&location))
            .await?
            .header(CONTENT_LENGTH, length)
            .body(content);
        let response = check(request.send().await?).await?;
        Ok(RemoteId::new(response.json::<FileResource>().await?.id))
    }
}

#[async_trait]
impl remote::Remote for Drive {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn list_page(
        &self,
        parent: &RemoteId,
        page_token: Option<&str>,
    ) -> Result<Page, remote::Error> {
        Ok(self.list(parent, page_token).await?.into())
    }

    async fn create_container(
        &self,
        name: &str,
        parent: Option<&RemoteId>,
    ) -> Result<RemoteId, remote::Error> {
        let metadata = FileMetadata {
            name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: parent.iter().map(|id| id.as_str()).collect(),
            description: None,
        };
        Ok(self.insert_folder(&metadata).await?)
    }

    async fn create_object(
        &self,
        path: &Path,
        name: &str,
        parent: Option<&RemoteId>,
        description: Option<&str>,
    ) -> Result<RemoteId, remote::Error> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let metadata = FileMetadata {
            name,
            mime_type: None,
            parents: parent.iter().map(|id| id.as_str()).collect(),
            description,
        };
        Ok(self.insert_file(&metadata, file, length).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remotes::remote::Remote;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, Method, Uri};
    use axum::response::{IntoResponse, Response as HttpResponse};
    use axum::Router;

    struct Request {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    }

    impl Request {
        fn query(&self, key: &str) -> Option<String> {
            let url = url::Url::parse(&format!("http://stub{}", self.uri)).unwrap();
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).and_then(|value| value.to_str().ok())
        }
    }

    struct Reply {
        status: StatusCode,
        location: Option<String>,
        body: String,
    }

    fn reply(status: u16, body: &str) -> Reply {
        Reply {
            status: StatusCode::from_u16(status).unwrap(),
            location: None,
            body: String::from(body),
        }
    }

    /// Drive lookalike answering with scripted replies, in order, and
    /// recording every request it gets.
    #[derive(Clone, Default)]
    struct Stub {
        requests: Arc<Mutex<Vec<Request>>>,
        replies: Arc<Mutex<VecDeque<Reply>>>,
    }

    impl Stub {
        fn push(&self, reply: Reply) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn requests(&self) -> Vec<Request> {
            std::mem::take(&mut *self.requests.lock().unwrap())
        }
    }

    async fn answer(
        State(stub): State<Stub>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> HttpResponse {
        stub.requests.lock().unwrap().push(Request {
            method,
            uri,
            headers,
            body,
        });
        let next = stub.replies.lock().unwrap().pop_front();
        let reply = next.unwrap_or_else(|| reply(404, "no reply scripted"));
        let mut response = (reply.status, reply.body).into_response();
        if let Some(location) = reply.location {
            response
                .headers_mut()
                .insert(LOCATION, location.parse().unwrap());
        }
        response
    }

    /// Serves the stub on a free port and returns a `Drive` pointed at it,
    /// along with the stub base URL.
    async fn drive(stub: &Stub) -> (Drive, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().fallback(answer).with_state(stub.clone());
        tokio::spawn(async move { axum::serve(listener, app.into_make_service()).await });

        let mut config = DriveConfig::default();
        config.api_url = url::Url::parse(&format!("{}/drive/v3/", base)).unwrap();
        config.upload_url = url::Url::parse(&format!("{}/upload/drive/v3/", base)).unwrap();
        let client = Client::builder().no_proxy().build().unwrap();
        let drive = Drive::with_client(&config, Session::fixed("token"), client);
        (drive, base)
    }

    #[test]
    fn test_file_list_into_page() {
        let list: FileList = serde_json::from_str(
            r#"{
                "nextPageToken": "token-2",
                "files": [
                    {"id": "1a", "name": "readme.txt"},
                    {"id": "1b", "name": "photos"}
                ]
            }"#,
        )
        .unwrap();
        let page: Page = list.into();
        assert_eq!(page.next_page_token.as_deref(), Some("token-2"));
        assert_eq!(page.children.len(), 2);
        assert_eq!(page.children[1].id, RemoteId::from("1b"));
        assert_eq!(page.children[1].name, "photos");

        let last: FileList = serde_json::from_str(r#"{"kind": "drive#fileList"}"#).unwrap();
        let page: Page = last.into();
        assert!(page.children.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_metadata_serialization() {
        let folder = FileMetadata {
            name: "archive",
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: vec![],
            description: None,
        };
        assert_eq!(
            serde_json::to_value(&folder).unwrap(),
            serde_json::json!({
                "name": "archive",
                "mimeType": "application/vnd.google-apps.folder"
            })
        );

        let file = FileMetadata {
            name: "img1.jpg",
            mime_type: None,
            parents: vec!["parent-id"],
            description: Some("Date: x"),
        };
        assert_eq!(
            serde_json::to_value(&file).unwrap(),
            serde_json::json!({
                "name": "img1.jpg",
                "parents": ["parent-id"],
                "description": "Date: x"
            })
        );
    }

    #[test]
    fn test_endpoints() {
        let mut config = DriveConfig::default();
        config.api_url = url::Url::parse("http://127.0.0.1:9000/drive/v3").unwrap();
        let drive = Drive::new(&config, Session::fixed("token"));
        assert_eq!(drive.files_url, "http://127.0.0.1:9000/drive/v3/files");
        assert_eq!(
            drive.upload_url,
            "https://www.googleapis.com/upload/drive/v3/files"
        );
        assert_eq!(
            children_query(&RemoteId::from("abc")),
            "'abc' in parents and trashed = false"
        );
    }

    #[tokio::test]
    async fn test_listing_follows_page_token() {
        let stub = Stub::default();
        let (drive, _) = drive(&stub).await;
        stub.push(reply(
            200,
            r#"{"nextPageToken": "token-2", "files": [{"id": "1a", "name": "readme.txt"}]}"#,
        ));
        stub.push(reply(200, r#"{"files": [{"id": "1b", "name": "photos"}]}"#));

        let found = drive
            .find_child_by_name(&RemoteId::from("root-id"), "photos")
            .await
            .unwrap();
        assert_eq!(found, Some(RemoteId::from("1b")));

        let requests = stub.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert_eq!(request.method, Method::GET);
            assert_eq!(request.uri.path(), "/drive/v3/files");
            assert_eq!(request.header("authorization"), Some("Bearer token"));
            assert_eq!(
                request.query("q").as_deref(),
                Some("'root-id' in parents and trashed = false")
            );
        }
        assert_eq!(requests[0].query("pageToken"), None);
        assert_eq!(requests[1].query("pageToken").as_deref(), Some("token-2"));
    }

    #[tokio::test]
    async fn test_create_container() {
        let stub = Stub::default();
        let (drive, _) = drive(&stub).await;
        stub.push(reply(200, r#"{"id": "folder-1"}"#));

        let id = drive
            .create_container("photos", Some(&RemoteId::from("root-id")))
            .await
            .unwrap();
        assert_eq!(id, RemoteId::from("folder-1"));

        let requests = stub.requests();
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].uri.path(), "/drive/v3/files");
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "photos",
                "mimeType": FOLDER_MIME_TYPE,
                "parents": ["root-id"]
            })
        );
    }

    #[tokio::test]
    async fn test_api_error() {
        let stub = Stub::default();
        let (drive, _) = drive(&stub).await;
        stub.push(reply(403, r#"{"error": "rateLimitExceeded"}"#));

        match drive.create_container("photos", None).await {
            Err(remote::Error::RemoteError(Error::Api { status, body })) => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert!(body.contains("rateLimitExceeded"));
            }
            other => panic!("expected an API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resumable_upload() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("img1.jpg");
        std::fs::write(&path, "jpeg bytes").unwrap();

        let stub = Stub::default();
        let (drive, base) = drive(&stub).await;
        stub.push(Reply {
            status: StatusCode::OK,
            location: Some(format!("{}/upload/session?upload_id=xyz", base)),
            body: String::new(),
        });
        stub.push(reply(200, r#"{"id": "file-1"}"#));

        let id = drive
            .create_object(
                &path,
                "img1.jpg",
                Some(&RemoteId::from("photos-id")),
                Some("Date: today"),
            )
            .await
            .unwrap();
        assert_eq!(id, RemoteId::from("file-1"));

        let requests = stub.requests();
        assert_eq!(requests.len(), 2);

        let start = &requests[0];
        assert_eq!(start.method, Method::POST);
        assert_eq!(start.uri.path(), "/upload/drive/v3/files");
        assert_eq!(start.query("uploadType").as_deref(), Some("resumable"));
        assert_eq!(start.header("x-upload-content-length"), Some("10"));
        let metadata: serde_json::Value = serde_json::from_slice(&start.body).unwrap();
        assert_eq!(
            metadata,
            serde_json::json!({
                "name": "img1.jpg",
                "parents": ["photos-id"],
                "description": "Date: today"
            })
        );

        let content = &requests[1];
        assert_eq!(content.method, Method::PUT);
        assert_eq!(content.uri.path(), "/upload/session");
        assert_eq!(content.query("upload_id").as_deref(), Some("xyz"));
        assert_eq!(content.header("authorization"), Some("Bearer token"));
        assert_eq!(&content.body[..], b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_missing_upload_location() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("img1.jpg");
        std::fs::write(&path, "jpeg bytes").unwrap();

        let stub = Stub::default();
        let (drive, _) = drive(&stub).await;
        stub.push(reply(200, ""));

        let result = drive.create_object(&path, "img1.jpg", None, None).await;
        assert!(matches!(
            result,
            Err(remote::Error::RemoteError(Error::MissingUploadLocation))
        ));
        assert_eq!(stub.requests().len(), 1);
    }
}
