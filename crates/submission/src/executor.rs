use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use common::{time, SubmitError, SubmitterConfig};
use contracts::{Form, FormResponse, SubmissionId, STATUS_SEND_FAILED};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, DATE,
    USER_AGENT,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cookies::CookieJar;
use crate::encoding::FormBody;
use crate::transport::{OutgoingRequest, RawResponse, Transport, TransportError};

const CSRF_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");

// Turns one submission into a POST and records the outcome.
// Settings and the cookie jar are shared by queued and direct submissions.
pub(crate) struct Executor<T> {
    transport: T,
    settings: RwLock<SubmitterConfig>,
    cookies: Mutex<CookieJar>,
}

impl<T: Transport> Executor<T> {
    pub fn new(transport: T, config: SubmitterConfig) -> Self {
        Self {
            transport,
            settings: RwLock::new(config),
            cookies: Mutex::new(CookieJar::new()),
        }
    }

    pub fn settings(&self) -> SubmitterConfig {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut SubmitterConfig)) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut settings);
    }

    pub fn cookies(&self) -> CookieJar {
        self.lock_cookies().clone()
    }

    fn lock_cookies(&self) -> MutexGuard<'_, CookieJar> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn execute(
        &self,
        id: SubmissionId,
        form: Form,
        ignore_reply: bool,
        cancel: &CancellationToken,
    ) -> FormResponse {
        let mut response = FormResponse::pending(id, form, ignore_reply);
        let settings = self.settings();

        let url = match parse_url(&response.form.url) {
            Ok(url) => url,
            Err(e) => {
                error!(id, error = %e, "rejecting submission");
                response.fail(0, e.to_string());
                return response;
            }
        };
        response.action = action_of(&url);

        let body = match FormBody::encode(&response.form, &settings).await {
            Ok(body) => body,
            Err(e) => {
                error!(id, action = %response.action, error = %e, "failed to build form body");
                response.fail(0, e.to_string());
                return response;
            }
        };

        let cookie_header = self.lock_cookies().header_value();
        let headers = match build_headers(&settings, cookie_header, &body) {
            Ok(headers) => headers,
            Err(e) => {
                error!(id, action = %response.action, error = %e, "failed to build request headers");
                response.fail(0, e.to_string());
                return response;
            }
        };

        if settings.verbose {
            info!(
                "POST {} HTTP/1.1\n{}",
                response.action,
                render_headers(&headers)
            );
        }

        let request = OutgoingRequest {
            url,
            headers,
            body,
            timeout: settings.timeout,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.transport.post(request) => Some(result),
        };

        let result = match result {
            Some(result) if !cancel.is_cancelled() => result,
            _ => {
                info!(id, action = %response.action, "form submission canceled");
                response.canceled = true;
                response.error = Some("canceled".to_string());
                return response;
            }
        };

        match result {
            Ok(raw) => self.record(&mut response, raw),
            Err(TransportError::Send(message)) => {
                error!(id, action = %response.action, error = %message, "exception while sending form");
                response.fail(STATUS_SEND_FAILED, message);
            }
            Err(e @ TransportError::Timeout(_)) => {
                error!(id, action = %response.action, error = %e, "form submission timed out");
                response.fail(0, e.to_string());
            }
            Err(TransportError::Receive { status, message }) => {
                error!(id, action = %response.action, error = %message, "failed to read response body");
                let status = status.map(|s| s.as_u16()).unwrap_or(0);
                response.reason = reason_for(status);
                response.fail(status, message);
            }
        }

        response
    }

    fn record(&self, response: &mut FormResponse, raw: RawResponse) {
        response.status = raw.status.as_u16();
        response.reason = reason_for(response.status);
        response.content_type = header_str(&raw.headers, &CONTENT_TYPE).unwrap_or_default();
        response.timestamp = header_str(&raw.headers, &DATE)
            .as_deref()
            .and_then(time::parse_http_date);

        let accepted = self.lock_cookies().absorb(&raw.headers);
        if accepted > 0 {
            debug!(id = response.id, accepted, "stored response cookies");
        }

        response.body = String::from_utf8_lossy(&raw.body).into_owned();
        response.ok = true;

        debug!(
            id = response.id,
            status = response.status,
            reason = %response.reason,
            "server reported request status"
        );
    }
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, SubmitError> {
    let invalid = |reason: String| SubmitError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

// Path plus query string, as it appears on the request line
pub(crate) fn action_of(url: &Url) -> String {
    let mut action = url.path().to_string();
    if action.is_empty() {
        action.push('/');
    }
    if let Some(query) = url.query() {
        action.push('?');
        action.push_str(query);
    }
    action
}

fn build_headers(
    settings: &SubmitterConfig,
    cookies: Option<String>,
    body: &FormBody,
) -> Result<HeaderMap, SubmitError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, header_value(&USER_AGENT, &settings.user_agent)?);

    if !settings.accept.is_empty() {
        headers.insert(ACCEPT, header_value(&ACCEPT, &settings.accept)?);
    }
    if !settings.csrf_token.is_empty() {
        headers.insert(CSRF_HEADER, header_value(&CSRF_HEADER, &settings.csrf_token)?);
    }
    if let Some(cookies) = cookies {
        headers.insert(COOKIE, header_value(&COOKIE, &cookies)?);
    }

    headers.insert(CONTENT_TYPE, header_value(&CONTENT_TYPE, &body.content_type())?);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.content_length()));

    Ok(headers)
}

fn header_value(name: &HeaderName, value: &str) -> Result<HeaderValue, SubmitError> {
    HeaderValue::from_str(value).map_err(|e| SubmitError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let value = headers.get(name)?;
    match value.to_str() {
        Ok(value) => Some(value.to_string()),
        Err(_) => {
            warn!(header = %name, "ignoring non-ASCII response header");
            None
        }
    }
}

fn reason_for(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

fn render_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {}", value.to_str().unwrap_or("<binary>")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_keeps_path_and_query() {
        let url = parse_url("http://example.com:8080/forms/submit?draft=1&x=y").unwrap();
        assert_eq!(action_of(&url), "/forms/submit?draft=1&x=y");
    }

    #[test]
    fn test_action_defaults_to_root() {
        let url = parse_url("http://example.com").unwrap();
        assert_eq!(action_of(&url), "/");
    }

    #[test]
    fn test_parse_url_rejects_other_schemes() {
        assert!(matches!(
            parse_url("ftp://example.com/file"),
            Err(SubmitError::InvalidUrl { .. })
        ));
        assert!(matches!(parse_url("not a url"), Err(SubmitError::InvalidUrl { .. })));
    }

    #[test]
    fn test_reason_for_known_and_unknown_status() {
        assert_eq!(reason_for(200), "OK");
        assert_eq!(reason_for(404), "Not Found");
        assert_eq!(reason_for(0), "");
        assert_eq!(reason_for(599), "");
    }

    #[test]
    fn test_render_headers_one_per_line() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("agent/1"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(3u64));

        assert_eq!(render_headers(&headers), "user-agent: agent/1\ncontent-length: 3");
    }

    #[tokio::test]
    async fn test_headers_skip_empty_settings() {
        let settings = SubmitterConfig::default();
        let body = FormBody::encode(&Form::new("http://localhost/"), &settings)
            .await
            .unwrap();
        let headers = build_headers(&settings, None, &body).unwrap();

        assert!(headers.contains_key(USER_AGENT));
        assert!(!headers.contains_key(ACCEPT));
        assert!(!headers.contains_key(CSRF_HEADER));
        assert!(!headers.contains_key(COOKIE));
        assert_eq!(headers[CONTENT_LENGTH], "0");
    }

    #[tokio::test]
    async fn test_headers_reject_control_characters() {
        let settings = SubmitterConfig {
            user_agent: "bad\nagent".to_string(),
            ..SubmitterConfig::default()
        };
        let body = FormBody::encode(&Form::new("http://localhost/"), &settings)
            .await
            .unwrap();

        assert!(matches!(
            build_headers(&settings, None, &body),
            Err(SubmitError::InvalidHeader { .. })
        ));
    }
}
