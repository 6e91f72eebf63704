//! Notification broker subscriptions.
//!
//! When a definition declares registered parts, the engine asks the broker to notify it whenever a
//! document with a matching type code is registered. The broker and its protocol live outside
//! the engine; this module defines the seam and a process-local implementation.

use serde::{Deserialize, Serialize};
use xdw_types::Pathway;

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("broker rejected subscription: {0}")]
    Rejected(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

pub type SubscriptionResult<T> = std::result::Result<T, SubscriptionError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub pathway: Pathway,
    pub expression: String,
    pub topic: String,
    pub broker_url: String,
    pub consumer_url: String,
}

/// An active subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub broker_ref: String,
    pub pathway: Pathway,
    pub topic: String,
    pub expression: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub pathway: Option<Pathway>,
    pub topic: Option<String>,
    pub expression: Option<String>,
}

impl SubscriptionFilter {
    pub fn matches(&self, subscription: &Subscription) -> bool {
        self.pathway
            .as_ref()
            .is_none_or(|p| *p == subscription.pathway)
            && self.topic.as_ref().is_none_or(|t| *t == subscription.topic)
            && self
                .expression
                .as_ref()
                .is_none_or(|e| *e == subscription.expression)
    }
}

pub trait SubscriptionService {
    /// Subscribe and return the broker reference. An empty reference means the broker accepted
    /// the request but did not create a subscription.
    fn create(&mut self, request: &SubscriptionRequest) -> SubscriptionResult<String>;

    /// Cancel every subscription of a pathway. Returns how many were cancelled.
    fn cancel(&mut self, pathway: &Pathway) -> SubscriptionResult<usize>;

    fn select(&self, filter: &SubscriptionFilter) -> SubscriptionResult<Vec<Subscription>>;
}

/// Subscriptions held in process, with locally issued broker references.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemorySubscriptions {
    subscriptions: Vec<Subscription>,
    issued: u64,
}

impl InMemorySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionService for InMemorySubscriptions {
    fn create(&mut self, request: &SubscriptionRequest) -> SubscriptionResult<String> {
        if request.expression.trim().is_empty() {
            return Err(SubscriptionError::Rejected(
                "subscription expression cannot be empty".into(),
            ));
        }
        self.issued += 1;
        let broker_ref = format!("urn:uuid:subscription-{}", self.issued);
        self.subscriptions.push(Subscription {
            broker_ref: broker_ref.clone(),
            pathway: request.pathway.clone(),
            topic: request.topic.clone(),
            expression: request.expression.clone(),
        });
        Ok(broker_ref)
    }

    fn cancel(&mut self, pathway: &Pathway) -> SubscriptionResult<usize> {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.pathway != *pathway);
        Ok(before - self.subscriptions.len())
    }

    fn select(&self, filter: &SubscriptionFilter) -> SubscriptionResult<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pathway: &str, expression: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            pathway: Pathway::new(pathway).unwrap(),
            expression: expression.into(),
            topic: "$XDSDocumentEntryTypeCode".into(),
            broker_url: String::new(),
            consumer_url: String::new(),
        }
    }

    #[test]
    fn create_select_cancel() {
        let mut subs = InMemorySubscriptions::new();
        let r1 = subs.create(&request("toc", "labresult")).unwrap();
        let r2 = subs.create(&request("ctr", "referral")).unwrap();
        assert_ne!(r1, r2);

        let toc = SubscriptionFilter {
            pathway: Some(Pathway::new("toc").unwrap()),
            ..Default::default()
        };
        assert_eq!(subs.select(&toc).unwrap().len(), 1);

        assert_eq!(subs.cancel(&Pathway::new("toc").unwrap()).unwrap(), 1);
        assert!(subs.select(&toc).unwrap().is_empty());
        assert_eq!(subs.select(&SubscriptionFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn rejects_blank_expression() {
        let mut subs = InMemorySubscriptions::new();
        assert!(matches!(
            subs.create(&request("toc", " ")),
            Err(SubscriptionError::Rejected(_))
        ));
    }
}
