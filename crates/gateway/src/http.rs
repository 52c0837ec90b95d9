use super::{
    types::{schema_messages, GatewayReceipt, PollReply, SubmitReply},
    GatewayClient, GatewayError, Result,
};
use async_trait::async_trait;
use do_ecf_core::{PayloadBody, ServiceEnv};
use reqwest::{header, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// HTTP client for the e-CF signing service that relays documents to DGII.
///
/// Submissions go to `{api_url}?env={service_env}`; status queries to
/// `{result_api_url}?env={service_env}`.
#[derive(Clone)]
pub struct HttpGatewayClient {
    pub api_url: String,
    pub result_api_url: String,
    pub service_env: ServiceEnv,
    access_token: Option<String>,
    http_client: reqwest::Client,
}

#[derive(Debug, Clone, Default)]
pub struct HttpGatewaySettings {
    pub api_url: Option<String>,
    pub result_api_url: Option<String>,
    pub service_env: ServiceEnv,
    pub access_token: Option<String>,
    /// Without it requests wait as long as reqwest's defaults allow.
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct StatusRequest<'a> {
    #[serde(rename = "trackId")]
    track_id: &'a str,
}

impl HttpGatewayClient {
    pub fn new(settings: HttpGatewaySettings) -> Result<Arc<Self>> {
        let api_url = settings
            .api_url
            .filter(|u| !u.trim().is_empty())
            .ok_or(GatewayError::MissingConfiguration("api_url"))?;
        let result_api_url = settings
            .result_api_url
            .filter(|u| !u.trim().is_empty())
            .ok_or(GatewayError::MissingConfiguration("result_api_url"))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        Ok(Arc::new(Self {
            api_url,
            result_api_url,
            service_env: settings.service_env,
            access_token: settings.access_token,
            http_client,
        }))
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .http_client
            .post(url)
            .query(&[("env", self.service_env.as_str())]);
        match &self.access_token {
            Some(token) => request.header(ACCESS_TOKEN_HEADER, token),
            None => request,
        }
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn submit(&self, payload: &PayloadBody) -> Result<SubmitReply> {
        let sent = self
            .post(&self.api_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload.json.clone())
            .send()
            .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(err) if err.is_connect() || err.is_timeout() => {
                tracing::warn!(error = %err, "e-CF gateway unreachable");
                return Ok(SubmitReply::ConnectionFailed(err.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let status = resp.status();
        let body = resp.text().await?;
        tracing::debug!(status = %status, digest = %payload.digest, "e-CF gateway replied");

        let reply = match status {
            StatusCode::OK => match serde_json::from_str::<GatewayReceipt>(&body) {
                Ok(receipt) => SubmitReply::Received(receipt),
                Err(err) => {
                    tracing::warn!(error = %err, "unreadable e-CF gateway receipt");
                    SubmitReply::Unexpected {
                        status: status.as_u16(),
                        body,
                    }
                }
            },
            StatusCode::REQUEST_TIMEOUT => SubmitReply::AuthorityTimeout,
            StatusCode::BAD_REQUEST => SubmitReply::SchemaRejected(schema_messages(&body)),
            other => SubmitReply::Unexpected {
                status: other.as_u16(),
                body,
            },
        };
        Ok(reply)
    }

    async fn status(&self, track_id: &str) -> Result<PollReply> {
        let resp = self
            .post(&self.result_api_url)
            .json(&StatusRequest { track_id })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Malformed(format!(
                "status query answered {status}: {body}"
            )));
        }

        serde_json::from_str::<PollReply>(&body)
            .map_err(|err| GatewayError::Malformed(format!("{err}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> Arc<HttpGatewayClient> {
        HttpGatewayClient::new(HttpGatewaySettings {
            api_url: Some(server.url("/ecf")),
            result_api_url: Some(server.url("/ecf/result")),
            service_env: ServiceEnv::Certification,
            access_token: Some("secret".into()),
            request_timeout: Some(Duration::from_secs(5)),
        })
        .unwrap()
    }

    fn payload() -> PayloadBody {
        PayloadBody::from_serializable(&json!({"ECF": {"Encabezado": {"Version": "1.0"}}})).unwrap()
    }

    #[test]
    fn missing_urls_are_a_configuration_error() {
        let err = HttpGatewayClient::new(HttpGatewaySettings {
            result_api_url: Some("http://localhost/result".into()),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, GatewayError::MissingConfiguration("api_url")));
    }

    #[tokio::test]
    async fn submit_posts_payload_with_env_and_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/ecf")
                    .query_param("env", "CerteCF")
                    .header("x-access-token", "secret")
                    .body(r#"{"ECF":{"Encabezado":{"Version":"1.0"}}}"#);
                then.status(200).json_body(json!({
                    "status": "Aceptado",
                    "trackId": "T1",
                    "security_code": "S1",
                    "signature_datetime": "2020-06-20 10:00:00"
                }));
            })
            .await;

        let reply = client(&server).submit(&payload()).await.unwrap();

        mock.assert_async().await;
        match reply {
            SubmitReply::Received(receipt) => {
                assert_eq!(receipt.track_id.as_deref(), Some("T1"));
                assert_eq!(receipt.security_code.as_deref(), Some("S1"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_classifies_http_statuses() {
        let server = MockServer::start_async().await;
        let gateway = client(&server);

        let mut timeout = server
            .mock_async(|when, then| {
                when.method(POST).path("/ecf");
                then.status(408);
            })
            .await;
        assert!(matches!(
            gateway.submit(&payload()).await.unwrap(),
            SubmitReply::AuthorityTimeout
        ));
        timeout.delete_async().await;

        let mut invalid = server
            .mock_async(|when, then| {
                when.method(POST).path("/ecf");
                then.status(400)
                    .json_body(json!({"messages": ["Totales.MontoTotal is required"]}));
            })
            .await;
        match gateway.submit(&payload()).await.unwrap() {
            SubmitReply::SchemaRejected(messages) => {
                assert_eq!(messages, vec!["Totales.MontoTotal is required"])
            }
            other => panic!("unexpected reply {other:?}"),
        }
        invalid.delete_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/ecf");
                then.status(502).body("bad gateway");
            })
            .await;
        assert!(matches!(
            gateway.submit(&payload()).await.unwrap(),
            SubmitReply::Unexpected { status: 502, .. }
        ));
    }

    #[tokio::test]
    async fn unreadable_receipt_is_unexpected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ecf");
                then.status(200).body("<html>maintenance</html>");
            })
            .await;

        assert!(matches!(
            client(&server).submit(&payload()).await.unwrap(),
            SubmitReply::Unexpected { status: 200, .. }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_reported_not_raised() {
        let gateway = HttpGatewayClient::new(HttpGatewaySettings {
            api_url: Some("http://127.0.0.1:1/ecf".into()),
            result_api_url: Some("http://127.0.0.1:1/result".into()),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            gateway.submit(&payload()).await.unwrap(),
            SubmitReply::ConnectionFailed(_)
        ));
    }

    #[tokio::test]
    async fn request_timeout_is_reported_as_connection_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ecf");
                then.status(200).delay(Duration::from_millis(500));
            })
            .await;
        let gateway = HttpGatewayClient::new(HttpGatewaySettings {
            api_url: Some(server.url("/ecf")),
            result_api_url: Some(server.url("/ecf/result")),
            request_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            gateway.submit(&payload()).await.unwrap(),
            SubmitReply::ConnectionFailed(_)
        ));
    }

    #[tokio::test]
    async fn status_queries_by_track_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/ecf/result")
                    .query_param("env", "CerteCF")
                    .json_body(json!({"trackId": "T1"}));
                then.status(200).json_body(json!({"estado": "Aceptado", "mensajes": null}));
            })
            .await;

        let reply = client(&server).status("T1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply.estado.as_deref(), Some("Aceptado"));
    }

    #[tokio::test]
    async fn garbled_status_reply_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ecf/result");
                then.status(200).body("not json");
            })
            .await;

        assert!(matches!(
            client(&server).status("T1").await,
            Err(GatewayError::Malformed(_))
        ));
    }
}
