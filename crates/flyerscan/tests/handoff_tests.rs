//! Credential hand-off through the live channel and the browser login
//! driver.

mod common;

use std::time::Duration;

use common::*;
use flyerscan::auth::HandoffError;
use flyerscan::broadcast::{ChannelEvent, LogSubscription};
use flyerscan::session::SessionStore;
use secrecy::SecretString;

fn login_page() -> FakePage {
    FakePage {
        accepted_password: Some("hunter2".to_string()),
        ..events_page(2)
    }
}

async fn awaiting_request(subscription: &mut LogSubscription) -> String {
    let wait = async {
        loop {
            match subscription.recv().await {
                Some(ChannelEvent::AwaitingCredentials { request_id, .. }) => return request_id,
                Some(_) => continue,
                None => panic!("log channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no credential request was published")
}

async fn resolution(subscription: &mut LogSubscription, request_id: &str) -> String {
    loop {
        match subscription.recv().await {
            Some(ChannelEvent::CredentialsResolved {
                request_id: id,
                outcome,
            }) if id == request_id => return outcome,
            Some(_) => continue,
            None => panic!("log channel closed"),
        }
    }
}

#[tokio::test]
async fn test_login_stores_session_for_later_jobs() {
    let harness = TestHarness::new(login_page(), ScriptedClassifier::new());
    let mut subscription = harness.services.channel.subscribe();

    let handoff = harness.services.handoff.clone();
    let request = tokio::spawn(async move { handoff.request_login(Some("walled-job")).await });

    let request_id = awaiting_request(&mut subscription).await;
    assert_eq!(harness.services.handoff.open_request(), Some(request_id.clone()));
    harness
        .services
        .handoff
        .submit(&request_id, "admin@example.com", SecretString::from("hunter2".to_string()))
        .unwrap();

    let session = request.await.unwrap().unwrap();
    assert_eq!(session.cookies.len(), 2);
    assert_eq!(harness.sessions.save_count(), 1);
    assert_eq!(resolution(&mut subscription, &request_id).await, "success");
    assert_eq!(harness.launcher.open_sessions(), 0);

    // The request id is spent.
    let err = harness
        .services
        .handoff
        .submit(&request_id, "admin@example.com", SecretString::from("hunter2".to_string()))
        .unwrap_err();
    assert!(matches!(err, HandoffError::UnknownRequest(_)));

    // The next job restores the captured cookies.
    harness.pipeline().run(EVENTS_URL).await.unwrap();
    let restored = harness.launcher.cookies_restored();
    assert!(restored.iter().any(|c| c.name == "xs"));
}

#[tokio::test]
async fn test_wrong_secret_is_rejected_and_nothing_is_saved() {
    let harness = TestHarness::new(login_page(), ScriptedClassifier::new());
    let mut subscription = harness.services.channel.subscribe();

    let handoff = harness.services.handoff.clone();
    let request = tokio::spawn(async move { handoff.request_login(None).await });

    let request_id = awaiting_request(&mut subscription).await;
    harness
        .services
        .handoff
        .submit(&request_id, "admin@example.com", SecretString::from("letmein".to_string()))
        .unwrap();

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, HandoffError::Rejected(_)), "{}", err);
    assert_eq!(harness.sessions.save_count(), 0);
    assert!(harness.sessions.load().await.unwrap().is_none());
    assert_eq!(resolution(&mut subscription, &request_id).await, "failed");
    assert_eq!(harness.launcher.open_sessions(), 0);
}

#[tokio::test]
async fn test_mismatched_request_id_is_refused() {
    let harness = TestHarness::new(login_page(), ScriptedClassifier::new());
    let mut subscription = harness.services.channel.subscribe();

    let handoff = harness.services.handoff.clone();
    let request = tokio::spawn(async move { handoff.request_login(None).await });
    let request_id = awaiting_request(&mut subscription).await;

    let err = harness
        .services
        .handoff
        .submit("forged", "admin@example.com", SecretString::from("hunter2".to_string()))
        .unwrap_err();
    assert!(matches!(err, HandoffError::UnknownRequest(_)));

    // The genuine request is still open.
    harness
        .services
        .handoff
        .submit(&request_id, "admin@example.com", SecretString::from("hunter2".to_string()))
        .unwrap();
    assert!(request.await.unwrap().is_ok());
}
