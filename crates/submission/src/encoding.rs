// Request body encoding.
//
// Bodies are built in two passes: `FormBody::encode` lays the body out as a
// list of segments and measures it (file sizes come from metadata, nothing is
// read), then `into_stream` produces the exact bytes that were measured. The
// measured length goes out as Content-Length, so the request is never chunked.

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use common::{SubmitError, SubmitterConfig};
use contracts::Form;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::HeaderValue;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const URL_ENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const BOUNDARY_PREFIX: &str = "MIME_boundary_";

#[derive(Debug)]
pub enum Segment {
    Bytes(Bytes),
    File { path: PathBuf, len: u64 },
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Segment::Bytes(bytes) => bytes.len() as u64,
            Segment::File { len, .. } => *len,
        }
    }

    fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        match self {
            Segment::Bytes(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Segment::File { path, len } => file_stream(path, len),
        }
    }
}

#[derive(Debug)]
pub enum FormBody {
    Json(Bytes),
    UrlEncoded(Bytes),
    Multipart { boundary: String, segments: Vec<Segment> },
}

impl FormBody {
    /// Picks the encoding for `form` (JSON, then multipart when files are
    /// attached, otherwise URL-encoded) and lays out its body.
    ///
    /// Attachments must exist and be regular files; relative paths are
    /// resolved through `config`.
    pub async fn encode(form: &Form, config: &SubmitterConfig) -> Result<Self, SubmitError> {
        if let Some(json) = form.json.as_ref().filter(|_| form.is_json()) {
            return Ok(FormBody::Json(Bytes::from(json.clone())));
        }

        if !form.has_files() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(form.fields.iter())
                .finish();
            return Ok(FormBody::UrlEncoded(Bytes::from(encoded)));
        }

        let boundary = format!("{BOUNDARY_PREFIX}{}", uuid::Uuid::new_v4().simple());
        let mut segments = Vec::with_capacity(form.fields.len() + form.files.len() * 3 + 1);

        for (name, value) in &form.fields {
            segments.push(Segment::Bytes(Bytes::from(format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
                escape_quoted(name)
            ))));
        }

        for (name, file) in &form.files {
            // Goes into the part header verbatim, so it must be a valid header value
            HeaderValue::from_str(&file.content_type).map_err(|e| SubmitError::InvalidHeader {
                name: format!("Content-Type of attachment {name:?}"),
                reason: e.to_string(),
            })?;

            let path = config.resolve_path(&file.path);
            let len = file_len(&path).await?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            segments.push(Segment::Bytes(Bytes::from(format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                escape_quoted(name),
                escape_quoted(&filename),
                file.content_type
            ))));
            segments.push(Segment::File { path, len });
            segments.push(Segment::Bytes(Bytes::from_static(b"\r\n")));
        }

        segments.push(Segment::Bytes(Bytes::from(format!("--{boundary}--\r\n"))));

        Ok(FormBody::Multipart { boundary, segments })
    }

    pub fn content_type(&self) -> String {
        match self {
            FormBody::Json(_) => JSON_CONTENT_TYPE.to_string(),
            FormBody::UrlEncoded(_) => URL_ENCODED_CONTENT_TYPE.to_string(),
            FormBody::Multipart { boundary, .. } => format!("multipart/form-data; boundary={boundary}"),
        }
    }

    pub fn content_length(&self) -> u64 {
        match self {
            FormBody::Json(bytes) | FormBody::UrlEncoded(bytes) => bytes.len() as u64,
            FormBody::Multipart { segments, .. } => segments.iter().map(Segment::len).sum(),
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        match self {
            FormBody::Json(bytes) | FormBody::UrlEncoded(bytes) => Segment::Bytes(bytes).into_stream(),
            FormBody::Multipart { segments, .. } => stream::iter(segments)
                .flat_map(Segment::into_stream)
                .boxed(),
        }
    }
}

async fn file_len(path: &std::path::Path) -> Result<u64, SubmitError> {
    let not_found = |source| SubmitError::FileNotFound {
        path: path.to_path_buf(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(not_found)?;
    if !metadata.is_file() {
        return Err(not_found(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    Ok(metadata.len())
}

enum FileState {
    Closed(PathBuf),
    Open {
        reader: ReaderStream<tokio::io::Take<File>>,
        sent: u64,
    },
}

// Never yields more than `len` bytes; a file that shrank since it was measured is an error
fn file_stream(path: PathBuf, len: u64) -> BoxStream<'static, io::Result<Bytes>> {
    stream::try_unfold(FileState::Closed(path), move |state| next_chunk(state, len)).boxed()
}

async fn next_chunk(state: FileState, len: u64) -> io::Result<Option<(Bytes, FileState)>> {
    let (mut reader, sent) = match state {
        FileState::Closed(path) => {
            let file = File::open(&path).await?;
            (ReaderStream::new(file.take(len)), 0)
        }
        FileState::Open { reader, sent } => (reader, sent),
    };

    match reader.next().await {
        Some(chunk) => {
            let chunk = chunk?;
            let sent = sent + chunk.len() as u64;
            Ok(Some((chunk, FileState::Open { reader, sent })))
        }
        None if sent < len => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("attachment shrank while sending: {sent} of {len} bytes"),
        )),
        None => Ok(None),
    }
}

fn escape_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("%22"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use std::io::Write;

    async fn collect(body: FormBody) -> io::Result<Vec<u8>> {
        body.into_stream().map_ok(|chunk| chunk.to_vec()).try_concat().await
    }

    #[tokio::test]
    async fn test_url_encoded_fields() {
        let mut form = Form::new("http://localhost/");
        form.add_field("name", "two words").add_field("sym", "a&b=c");

        let body = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap();
        assert_eq!(body.content_type(), URL_ENCODED_CONTENT_TYPE);
        assert_eq!(body.content_length(), 28);
        assert_eq!(collect(body).await.unwrap(), b"name=two+words&sym=a%26b%3Dc");
    }

    #[tokio::test]
    async fn test_json_wins_over_fields_and_files() {
        let mut form = Form::new("http://localhost/");
        form.add_field("ignored", "1")
            .add_text_file("also_ignored", "/does/not/exist")
            .set_json(r#"{"a":1}"#);

        let body = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap();
        assert_eq!(body.content_type(), JSON_CONTENT_TYPE);
        assert_eq!(body.content_length(), 7);
        assert_eq!(collect(body).await.unwrap(), br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_multipart_layout_matches_measured_length() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello attachment").unwrap();

        let mut form = Form::new("http://localhost/upload");
        form.add_field("title", "report")
            .add_file("doc", file.path(), "application/octet-stream");

        let body = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap();
        let boundary = match &body {
            FormBody::Multipart { boundary, .. } => boundary.clone(),
            other => panic!("expected multipart body, got {other:?}"),
        };
        assert!(boundary.starts_with(BOUNDARY_PREFIX));
        assert_eq!(
            body.content_type(),
            format!("multipart/form-data; boundary={boundary}")
        );

        let measured = body.content_length();
        let bytes = collect(body).await.unwrap();
        assert_eq!(bytes.len() as u64, measured);

        let filename = file.path().file_name().unwrap().to_string_lossy().into_owned();
        let expected = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nreport\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"doc\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\nhello attachment\r\n\
             --{boundary}--\r\n"
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_missing_file_fails_encoding() {
        let mut form = Form::new("http://localhost/");
        form.add_text_file("doc", "/definitely/not/here.txt");

        let err = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap_err();
        assert!(matches!(err, SubmitError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_not_an_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let mut form = Form::new("http://localhost/");
        form.add_text_file("doc", dir.path());

        let err = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap_err();
        assert!(matches!(err, SubmitError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_relative_path_resolved_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"abc").unwrap();

        let mut form = Form::new("http://localhost/");
        form.add_text_file("notes", "notes.txt");
        let config = SubmitterConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..SubmitterConfig::default()
        };

        let body = FormBody::encode(&form, &config).await.unwrap();
        let measured = body.content_length();
        let bytes = collect(body).await.unwrap();
        assert_eq!(bytes.len() as u64, measured);
        assert!(String::from_utf8(bytes).unwrap().contains("\r\n\r\nabc\r\n"));
    }

    #[tokio::test]
    async fn test_shrunk_file_fails_stream() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let mut form = Form::new("http://localhost/");
        form.add_text_file("doc", file.path());
        let body = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap();

        file.as_file().set_len(4).unwrap();
        let err = collect(body).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_grown_file_is_truncated_to_measured_length() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"1234").unwrap();

        let mut form = Form::new("http://localhost/");
        form.add_text_file("doc", file.path());
        let body = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap();
        let measured = body.content_length();

        file.write_all(b"5678").unwrap();
        file.flush().unwrap();
        let bytes = collect(body).await.unwrap();
        assert_eq!(bytes.len() as u64, measured);
    }

    #[tokio::test]
    async fn test_content_type_with_line_break_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();

        let mut form = Form::new("http://localhost/");
        form.add_file("doc", file.path(), "text/plain\r\nX-Injected: 1");

        let err = FormBody::encode(&form, &SubmitterConfig::default()).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidHeader { .. }));
    }

    #[test]
    fn test_escape_quoted() {
        assert_eq!(escape_quoted("plain"), "plain");
        assert_eq!(escape_quoted("a\"b\r\nc"), "a%22b%0D%0Ac");
    }
}
