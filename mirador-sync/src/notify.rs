//! Site update hook: tells a running preview site that its content moved.

use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use mirador_core::{CommitId, Instance, Settings};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct NotifyError {
    pub reason: String,
}

impl NotifyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outbound notifications to the site serving one instance.
pub trait SiteHook: Send + Sync {
    /// The instance's content moved from `from` to `to`; reload it.
    fn notify_wiki_update(
        &self,
        instance: &Instance,
        from: &CommitId,
        to: &CommitId,
    ) -> Result<(), NotifyError>;

    /// News posts changed; rebuild the news listing.
    fn notify_news_update(&self, instance: &Instance) -> Result<(), NotifyError>;
}

/// Hook that POSTs JSON to `http://<host>:<instance port>/_preview/...`.
#[derive(Debug, Clone)]
pub struct HttpSiteHook {
    host: String,
    agent: ureq::Agent,
}

impl HttpSiteHook {
    pub fn new(host: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            host: host.into(),
            agent: builder.build(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.site_host.clone(),
            settings.notify_timeout_secs.map(Duration::from_secs),
        )
    }

    fn endpoint(&self, instance: &Instance, action: &str) -> String {
        format!("http://{}:{}/_preview/{action}", self.host, instance.port)
    }

    fn post(&self, url: &str, body: serde_json::Value) -> Result<(), NotifyError> {
        match self.agent.post(url).send_json(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => {
                Err(NotifyError::new(format!("{url} answered HTTP {code}")))
            }
            Err(ureq::Error::Transport(t)) => Err(NotifyError::new(format!("{url}: {t}"))),
        }
    }
}

impl SiteHook for HttpSiteHook {
    fn notify_wiki_update(
        &self,
        instance: &Instance,
        from: &CommitId,
        to: &CommitId,
    ) -> Result<(), NotifyError> {
        let url = self.endpoint(instance, "wiki-update");
        self.post(
            &url,
            json!({
                "from": from.as_str(),
                "to": to.as_str(),
                "instance": instance.id,
            }),
        )
    }

    fn notify_news_update(&self, instance: &Instance) -> Result<(), NotifyError> {
        let url = self.endpoint(instance, "news-update");
        self.post(&url, json!({ "instance": instance.id }))
    }
}
