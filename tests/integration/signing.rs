//! Signed URLs checked by an endpoint that validates them the way customers do.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use chrono::Utc;
use push_relay::{
	AuthRejection, Error, ManualClock, PushBody, PushClient, Result, push::signing,
};
use serde_json::json;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate, matchers::method};
// self
use crate::endpoint;

struct VerifyingEndpoint {
	apikey: &'static str,
}
impl Respond for VerifyingEndpoint {
	fn respond(&self, request: &Request) -> ResponseTemplate {
		match signing::verify_url(&request.url, self.apikey, Utc::now().timestamp()) {
			Ok(()) => ResponseTemplate::new(200),
			Err(rejection) => ResponseTemplate::new(rejection.status().as_u16())
				.set_body_json(json!({ "msg": rejection.as_str() })),
		}
	}
}

async fn endpoint_expecting(apikey: &'static str) -> MockServer {
	let server = MockServer::start().await;

	Mock::given(method("POST")).respond_with(VerifyingEndpoint { apikey }).mount(&server).await;

	server
}

fn client_at(unix: i64) -> PushClient {
	PushClient::new(reqwest::Client::new(), Arc::new(ManualClock::at_unix(unix)))
}

fn rejection_msg(err: Error) -> Option<String> {
	match err {
		Error::PushStatus { msg, .. } => msg,
		_ => None,
	}
}

#[tokio::test]
async fn fresh_link_is_accepted() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = endpoint_expecting("K").await;
	let client = client_at(Utc::now().timestamp());
	let signed = client.sign(&endpoint(&server), "K", Duration::from_secs(40));

	client.deliver(&signed, &PushBody::from("payload"), Duration::from_secs(5)).await
}

#[tokio::test]
async fn stale_link_with_valid_token_is_reported_expired() -> Result<()> {
	let server = endpoint_expecting("K").await;
	let client = client_at(Utc::now().timestamp() - 3_600);
	let signed = client.sign(&endpoint(&server), "K", Duration::from_secs(40));
	let err = client
		.deliver(&signed, &PushBody::from("payload"), Duration::from_secs(5))
		.await
		.unwrap_err();

	assert_eq!(rejection_msg(err).as_deref(), Some(AuthRejection::ExpiredAccessToken.as_str()));

	Ok(())
}

#[tokio::test]
async fn wrong_apikey_is_a_bad_token_even_when_stale() -> Result<()> {
	let server = endpoint_expecting("K").await;
	let client = client_at(Utc::now().timestamp() - 3_600);
	let signed = client.sign(&endpoint(&server), "not-K", Duration::from_secs(40));
	let err = client
		.deliver(&signed, &PushBody::from("payload"), Duration::from_secs(5))
		.await
		.unwrap_err();

	assert_eq!(rejection_msg(err).as_deref(), Some("auth_bad_access_token"));

	Ok(())
}

#[tokio::test]
async fn unsigned_request_is_a_bad_argument() -> Result<()> {
	let server = endpoint_expecting("K").await;
	let err = client_at(0)
		.deliver(&endpoint(&server), &PushBody::from("payload"), Duration::from_secs(5))
		.await
		.unwrap_err();

	let Error::PushStatus { status, msg, .. } = err else { panic!("expected a status error") };

	assert_eq!(status.as_u16(), 400);
	assert_eq!(msg.as_deref(), Some("bad_argument"));

	Ok(())
}
