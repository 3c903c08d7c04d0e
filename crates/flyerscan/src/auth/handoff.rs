use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::oneshot;

use super::{Credentials, HandoffError, LoginDriver};
use crate::broadcast::{ChannelEvent, LogChannel};
use crate::session::{SessionStore, StoredSession};

struct OpenRequest {
    id: String,
    reply: oneshot::Sender<Credentials>,
}

/// Request/response login over the `parser-logs` channel.
///
/// [`request_login`](Self::request_login) announces `AwaitingCredentials`
/// and waits; [`submit`](Self::submit) answers it. At most one request is
/// open at a time and each id is accepted once. Credentials travel through a
/// private oneshot, never through the broadcast channel.
#[derive(Clone)]
pub struct CredentialHandoff {
    channel: LogChannel,
    driver: Arc<dyn LoginDriver>,
    sessions: Arc<dyn SessionStore>,
    timeout: Duration,
    open: Arc<Mutex<Option<OpenRequest>>>,
}

impl CredentialHandoff {
    pub fn new(
        channel: LogChannel,
        driver: Arc<dyn LoginDriver>,
        sessions: Arc<dyn SessionStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            channel,
            driver,
            sessions,
            timeout,
            open: Arc::new(Mutex::new(None)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<OpenRequest>> {
        match self.open.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Credential hand-off lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Id of the request currently waiting for credentials.
    pub fn open_request(&self) -> Option<String> {
        self.slot().as_ref().map(|r| r.id.clone())
    }

    /// Publishes `AwaitingCredentials`, waits for a matching submission, logs
    /// in and stores the new session.
    pub async fn request_login(&self, job_id: Option<&str>) -> Result<StoredSession, HandoffError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (reply, answer) = oneshot::channel();

        {
            let mut slot = self.slot();
            if let Some(open) = slot.as_ref() {
                return Err(HandoffError::Busy(open.id.clone()));
            }
            *slot = Some(OpenRequest {
                id: request_id.clone(),
                reply,
            });
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::zero());
        self.channel.notify(ChannelEvent::AwaitingCredentials {
            request_id: request_id.clone(),
            job_id: job_id.map(str::to_string),
            expires_at,
        });
        self.channel.info(&format!(
            "Waiting up to {}s for login credentials (request {})",
            self.timeout.as_secs(),
            request_id
        ));

        let credentials = match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(credentials)) => credentials,
            Ok(Err(_)) | Err(_) => {
                self.withdraw(&request_id);
                self.resolve(&request_id, "timeout");
                return Err(HandoffError::Timeout {
                    request_id,
                    timeout: self.timeout,
                });
            }
        };

        let outcome = self.complete(credentials).await;
        match &outcome {
            Ok(_) => self.resolve(&request_id, "success"),
            Err(e) => {
                self.channel.warn(&format!("Login failed: {}", e));
                self.resolve(&request_id, "failed");
            }
        }
        outcome
    }

    async fn complete(&self, credentials: Credentials) -> Result<StoredSession, HandoffError> {
        let stored = self.driver.login(credentials).await?;
        self.sessions.save(&stored).await?;
        Ok(stored)
    }

    /// Answers the open request. The id is consumed whether or not the login
    /// that follows succeeds.
    pub fn submit(
        &self,
        request_id: &str,
        identifier: &str,
        secret: SecretString,
    ) -> Result<(), HandoffError> {
        let open = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(open) if open.id == request_id => slot.take(),
                _ => None,
            }
        };
        let Some(open) = open else {
            return Err(HandoffError::UnknownRequest(request_id.to_string()));
        };

        open.reply
            .send(Credentials {
                identifier: identifier.to_string(),
                secret,
            })
            .map_err(|_| HandoffError::UnknownRequest(request_id.to_string()))
    }

    fn withdraw(&self, request_id: &str) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|r| r.id == request_id) {
            slot.take();
        }
    }

    fn resolve(&self, request_id: &str, outcome: &str) {
        self.channel.notify(ChannelEvent::CredentialsResolved {
            request_id: request_id.to_string(),
            outcome: outcome.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::LogChannelSettings;
    use crate::session::{MemorySessionStore, SessionCookie};
    use async_trait::async_trait;
    use secrecy::ExposeSecret;

    /// Accepts the secret "open sesame" only.
    struct PasswordDriver;

    #[async_trait]
    impl LoginDriver for PasswordDriver {
        async fn login(&self, credentials: Credentials) -> Result<StoredSession, HandoffError> {
            if credentials.secret.expose_secret() != "open sesame" {
                return Err(HandoffError::Rejected("bad password".to_string()));
            }
            Ok(StoredSession::new(vec![SessionCookie::new(
                "c_user",
                &credentials.identifier,
                ".facebook.com",
            )]))
        }
    }

    fn handoff(timeout: Duration) -> (CredentialHandoff, LogChannel, Arc<MemorySessionStore>) {
        let channel = LogChannel::new(LogChannelSettings::default());
        let sessions = Arc::new(MemorySessionStore::new());
        let handoff = CredentialHandoff::new(
            channel.clone(),
            Arc::new(PasswordDriver),
            sessions.clone(),
            timeout,
        );
        (handoff, channel, sessions)
    }

    async fn awaited_request(sub: &mut crate::broadcast::LogSubscription) -> String {
        loop {
            match sub.recv().await {
                Some(ChannelEvent::AwaitingCredentials { request_id, .. }) => return request_id,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_submission_logs_in_and_saves_session() {
        let (handoff, channel, sessions) = handoff(Duration::from_secs(5));
        let mut sub = channel.subscribe();

        let waiting = {
            let handoff = handoff.clone();
            tokio::spawn(async move { handoff.request_login(Some("job-7")).await })
        };

        let request_id = awaited_request(&mut sub).await;
        assert_eq!(handoff.open_request().as_deref(), Some(request_id.as_str()));
        handoff
            .submit(&request_id, "admin@example.com", SecretString::from("open sesame".to_string()))
            .unwrap();

        let stored = waiting.await.unwrap().unwrap();
        assert_eq!(stored.cookies[0].value, "admin@example.com");
        assert_eq!(sessions.save_count(), 1);
        assert!(handoff.open_request().is_none());

        // Single use.
        assert!(matches!(
            handoff.submit(&request_id, "x", SecretString::from("open sesame".to_string())),
            Err(HandoffError::UnknownRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_secret_never_reaches_the_channel() {
        let (handoff, channel, _) = handoff(Duration::from_secs(5));
        let mut sub = channel.subscribe();

        let waiting = {
            let handoff = handoff.clone();
            tokio::spawn(async move { handoff.request_login(None).await })
        };
        let request_id = awaited_request(&mut sub).await;
        handoff
            .submit(&request_id, "admin", SecretString::from("wrong".to_string()))
            .unwrap();
        assert!(matches!(
            waiting.await.unwrap(),
            Err(HandoffError::Rejected(_))
        ));

        let mut seen = Vec::new();
        while let Some(event) = sub.try_recv() {
            seen.push(serde_json::to_string(&event).unwrap());
        }
        assert!(seen.iter().any(|e| e.contains("\"outcome\":\"failed\"")));
        assert!(seen.iter().all(|e| !e.contains("wrong")));
        assert!(channel.snapshot().iter().all(|e| !e.message.contains("wrong")));
    }

    #[tokio::test]
    async fn test_unknown_request_is_rejected() {
        let (handoff, _, _) = handoff(Duration::from_secs(5));
        assert!(matches!(
            handoff.submit("nope", "admin", SecretString::from("open sesame".to_string())),
            Err(HandoffError::UnknownRequest(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let (handoff, channel, sessions) = handoff(Duration::from_secs(30));
        let mut sub = channel.subscribe();

        let result = handoff.request_login(None).await;
        assert!(matches!(result, Err(HandoffError::Timeout { .. })));
        assert!(handoff.open_request().is_none());
        assert_eq!(sessions.save_count(), 0);

        let request_id = awaited_request(&mut sub).await;
        assert!(matches!(
            handoff.submit(&request_id, "late", SecretString::from("open sesame".to_string())),
            Err(HandoffError::UnknownRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_second_request_while_open_is_busy() {
        let (handoff, channel, _) = handoff(Duration::from_secs(5));
        let mut sub = channel.subscribe();

        let first = {
            let handoff = handoff.clone();
            tokio::spawn(async move { handoff.request_login(None).await })
        };
        let request_id = awaited_request(&mut sub).await;

        assert!(matches!(
            handoff.request_login(None).await,
            Err(HandoffError::Busy(_))
        ));

        handoff
            .submit(&request_id, "admin", SecretString::from("open sesame".to_string()))
            .unwrap();
        assert!(first.await.unwrap().is_ok());
    }
}
