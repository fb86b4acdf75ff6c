//! HTTP client for the ERP identity endpoints
//!
//! Credential checks use the ERP's cookie session login. Each call to
//! [`HttpErpClient::authenticate`] opens its own [`ErpSession`], threads it
//! through the follow-up request and closes it, so concurrent logins never
//! share session state. Account administration uses the static API key.

use async_trait::async_trait;
use reqwest::{
    Client, Response, StatusCode, Url,
    header::{AUTHORIZATION, COOKIE},
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ErpConfig, ErpError, ErpIdentity, ErpIdentityClient, ErpProfile};

const SESSION_COOKIE: &str = "sid";

/// Session established by one login call; never stored on the client
#[derive(Debug)]
struct ErpSession {
    sid: String,
}

impl ErpSession {
    fn cookie(&self) -> String {
        format!("{}={}", SESSION_COOKIE, self.sid)
    }

    /// Pull the session id out of the login response cookies
    fn from_response(response: &Response) -> Option<Self> {
        response
            .cookies()
            .find(|cookie| {
                cookie.name() == SESSION_COOKIE
                    && !cookie.value().is_empty()
                    && cookie.value() != "Guest"
            })
            .map(|cookie| Self {
                sid: cookie.value().to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct UserDoc {
    name: String,
    email: Option<String>,
    full_name: Option<String>,
}

/// ERP identity client speaking JSON over HTTP
#[derive(Clone)]
pub struct HttpErpClient {
    http: Client,
    base_url: Url,
    api_token: String,
}

impl HttpErpClient {
    pub fn new(config: &ErpConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid ERP_BASE_URL {}: {}", config.base_url, e))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("ERP_BASE_URL {} cannot be used as a base URL", config.base_url);
        }

        let http = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            http,
            base_url,
            api_token: format!("token {}:{}", config.api_key, config.api_secret),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn check(response: Response) -> Result<Response, ErpError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ErpError::Status(status.as_u16()))
        }
    }

    async fn open_session(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<(ErpSession, LoginResponse)>, ErpError> {
        let response = self
            .http
            .post(self.url(&["api", "method", "login"]))
            .json(&json!({ "usr": email, "pwd": password }))
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }
        let response = Self::check(response)?;

        let session = ErpSession::from_response(&response)
            .ok_or_else(|| ErpError::Protocol("login response carried no session".into()))?;
        let body: LoginResponse = response.json().await?;
        Ok(Some((session, body)))
    }

    async fn logged_user(&self, session: &ErpSession) -> Result<String, ErpError> {
        let response = self
            .http
            .get(self.url(&["api", "method", "frappe.auth.get_logged_user"]))
            .header(COOKIE, session.cookie())
            .send()
            .await?;
        let body: MessageResponse = Self::check(response)?.json().await?;
        Ok(body.message)
    }

    async fn close_session(&self, session: ErpSession) {
        let result = self
            .http
            .get(self.url(&["api", "method", "logout"]))
            .header(COOKIE, session.cookie())
            .send()
            .await;
        if let Err(e) = result {
            debug!("Failed to close ERP session: {}", e);
        }
    }
}

#[async_trait]
impl ErpIdentityClient for HttpErpClient {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<ErpIdentity>, ErpError> {
        let Some((session, login)) = self.open_session(email, password).await? else {
            return Ok(None);
        };

        let result = self.logged_user(&session).await;
        self.close_session(session).await;
        let remote_user = result?;

        Ok(Some(ErpIdentity {
            remote_id: remote_user.clone(),
            email: remote_user,
            full_name: login.full_name,
        }))
    }

    async fn find_user(&self, email: &str) -> Result<Option<ErpIdentity>, ErpError> {
        let response = self
            .http
            .get(self.url(&["api", "resource", "User", email]))
            .header(AUTHORIZATION, &self.api_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: DataResponse<UserDoc> = Self::check(response)?.json().await?;

        Ok(Some(ErpIdentity {
            email: body.data.email.unwrap_or_else(|| email.to_string()),
            remote_id: body.data.name,
            full_name: body.data.full_name,
        }))
    }

    async fn create_user(&self, profile: &ErpProfile) -> Result<String, ErpError> {
        let response = self
            .http
            .post(self.url(&["api", "resource", "User"]))
            .header(AUTHORIZATION, &self.api_token)
            .json(&json!({
                "email": profile.email,
                "first_name": profile.name,
                "new_password": profile.password,
                "send_welcome_email": 0,
                "enabled": 1,
            }))
            .send()
            .await?;

        let body: DataResponse<UserDoc> = Self::check(response)?.json().await?;
        Ok(body.data.name)
    }

    async fn update_password(&self, remote_id: &str, new_password: &str) -> Result<(), ErpError> {
        let response = self
            .http
            .put(self.url(&["api", "resource", "User", remote_id]))
            .header(AUTHORIZATION, &self.api_token)
            .json(&json!({ "new_password": new_password }))
            .send()
            .await?;

        Self::check(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpErpClient {
        HttpErpClient::new(&ErpConfig {
            base_url: base_url.to_string(),
            api_key: "key".into(),
            api_secret: "secret".into(),
            timeout_seconds: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_segments_and_escapes() {
        let erp = client("http://erp.local/");
        assert_eq!(
            erp.url(&["api", "resource", "User", "a b@example.com"]).as_str(),
            "http://erp.local/api/resource/User/a%20b@example.com"
        );

        let nested = client("http://erp.local/erp");
        assert_eq!(
            nested.url(&["api", "method", "login"]).as_str(),
            "http://erp.local/erp/api/method/login"
        );
    }

    #[test]
    fn test_rejects_non_base_url() {
        let result = HttpErpClient::new(&ErpConfig {
            base_url: "mailto:erp@example.com".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
            timeout_seconds: 1,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_api_token_header_format() {
        assert_eq!(client("http://erp.local").api_token, "token key:secret");
    }

    fn login_response(set_cookies: &[&str]) -> Response {
        let mut builder = axum::http::Response::builder();
        for cookie in set_cookies {
            builder = builder.header(axum::http::header::SET_COOKIE, *cookie);
        }
        Response::from(builder.body("{}").unwrap())
    }

    #[test]
    fn test_session_from_login_cookies() {
        let response = login_response(&[
            "system_user=yes; Path=/",
            "sid=abc123; Path=/; HttpOnly",
        ]);
        assert_eq!(ErpSession::from_response(&response).unwrap().sid, "abc123");

        let rejected: [&[&str]; 4] = [&["sid=Guest; Path=/"], &["sid=; Path=/"], &["user_id=x"], &[]];
        for rejected in rejected {
            assert!(ErpSession::from_response(&login_response(rejected)).is_none());
        }
    }
}
