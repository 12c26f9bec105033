//! Context analyzer.
//!
//! The publish/subscribe hub that turns "something happened around this
//! client" into a broadcast `ContextEvent`. A trigger resolves the client
//! through the ranked matcher, loads their communications, runs the
//! processing manager, and publishes the result to every subscriber,
//! unless a newer trigger for the same client started in the meantime, in
//! which case the stale result is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::directory::{resolve_client, ClientDirectory, ResolvedClient};
use crate::error::AnalysisError;
use crate::manager::ProcessingManager;
use crate::normalizer::CommunicationLoader;
use crate::types::{ContextEvent, Insights};

/// Handle returned by [`ContextAnalyzer::subscribe`]; pass it back to
/// [`ContextAnalyzer::unsubscribe`] to stop delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// What a trigger did. `NoMatch` and `Superseded` are normal outcomes, not
/// errors: unknown identifiers and overtaken analyses deliver nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Published,
    Superseded,
    NoMatch,
}

type Subscriber = Box<dyn Fn(&ContextEvent) + Send + Sync>;

pub struct ContextAnalyzer {
    manager: Arc<ProcessingManager>,
    directory: Arc<dyn ClientDirectory>,
    loader: CommunicationLoader,
    subscribers: RwLock<Vec<(SubscriberId, Subscriber)>>,
    next_subscriber_id: AtomicU64,
    /// Per-client trigger generation. A publish only goes out if its
    /// generation is still the latest for that client.
    generations: DashMap<String, u64>,
}

impl ContextAnalyzer {
    pub fn new(
        manager: Arc<ProcessingManager>,
        directory: Arc<dyn ClientDirectory>,
        loader: CommunicationLoader,
    ) -> Self {
        Self {
            manager,
            directory,
            loader,
            subscribers: RwLock::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            generations: DashMap::new(),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriberId
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, Box::new(listener)));
        id
    }

    /// Returns false when the id was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        before != subscribers.len()
    }

    pub async fn trigger_analysis_for_email(
        &self,
        identifier: &str,
    ) -> Result<TriggerOutcome, AnalysisError> {
        self.trigger("email", identifier).await
    }

    pub async fn trigger_analysis_for_client(
        &self,
        identifier: &str,
    ) -> Result<TriggerOutcome, AnalysisError> {
        self.trigger("client", identifier).await
    }

    /// Meeting triggers carry the meeting identifier for the log line only;
    /// resolution runs on the client identifier (organizer or attendee).
    pub async fn trigger_analysis_for_meeting(
        &self,
        meeting_identifier: &str,
        client_identifier: &str,
    ) -> Result<TriggerOutcome, AnalysisError> {
        log::debug!(
            "Context: meeting trigger {:?} for {:?}",
            meeting_identifier,
            client_identifier
        );
        self.trigger("meeting", client_identifier).await
    }

    /// Resolve and analyze immediately, without touching generations or
    /// subscribers. Unlike a trigger, an unknown identifier is an error here.
    pub async fn insights_for(&self, identifier: &str) -> Result<Insights, AnalysisError> {
        let resolved = self
            .resolve(identifier)
            .ok_or_else(|| AnalysisError::UnknownClient(identifier.to_string()))?;
        let records = self.loader.load_for_client(&resolved.client);
        self.manager
            .process_client_communications(&resolved.client.id, &records, None)
            .await
    }

    fn resolve(&self, identifier: &str) -> Option<ResolvedClient> {
        resolve_client(self.directory.as_ref(), identifier)
    }

    async fn trigger(
        &self,
        source: &str,
        identifier: &str,
    ) -> Result<TriggerOutcome, AnalysisError> {
        let Some(resolved) = self.resolve(identifier) else {
            log::debug!(
                "Context: {} trigger matched no client for {:?}",
                source,
                identifier
            );
            return Ok(TriggerOutcome::NoMatch);
        };
        let client = resolved.client;
        log::debug!(
            "Context: {} trigger resolved {:?} to {} (score {:.2})",
            source,
            identifier,
            client.id,
            resolved.score
        );

        let generation = {
            let mut slot = self.generations.entry(client.id.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        let records = self.loader.load_for_client(&client);
        let insights = match self
            .manager
            .process_client_communications(&client.id, &records, None)
            .await
        {
            Ok(insights) => insights,
            Err(err) => {
                log::warn!("Context: analysis failed for {}: {}", client.id, err);
                return Err(err);
            }
        };

        let latest = self
            .generations
            .get(&client.id)
            .map(|slot| *slot)
            .unwrap_or(0);
        if latest != generation {
            log::debug!(
                "Context: discarding stale analysis for {} (generation {} < {})",
                client.id,
                generation,
                latest
            );
            return Ok(TriggerOutcome::Superseded);
        }

        let event = ContextEvent {
            client_email: client.email.clone(),
            client_id: Some(client.id.clone()),
            insights,
            communications: records,
        };
        let subscribers = self.subscribers.read();
        for (_, listener) in subscribers.iter() {
            listener(&event);
        }
        log::debug!(
            "Context: published insights for {} to {} subscriber(s)",
            client.id,
            subscribers.len()
        );
        Ok(TriggerOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::directory::{Client, InMemoryDirectory};
    use crate::sources::{InMemorySources, StoredEmail};
    use crate::types::AnalysisMode;
    use parking_lot::Mutex;

    fn fixture() -> (Arc<ContextAnalyzer>, Arc<InMemorySources>) {
        fixture_with_config(ProcessingConfig::default())
    }

    fn fixture_with_config(
        config: ProcessingConfig,
    ) -> (Arc<ContextAnalyzer>, Arc<InMemorySources>) {
        let directory = Arc::new(InMemoryDirectory::new(vec![
            Client {
                id: "c-jane".to_string(),
                name: "Jane Doe".to_string(),
                email: "jane.doe@gmail.com".to_string(),
            },
            Client {
                id: "c-sam".to_string(),
                name: "Sam Moore".to_string(),
                email: "sam@oldfirm.com".to_string(),
            },
        ]));
        let sources = Arc::new(InMemorySources::new());
        sources.add_email(
            "c-jane",
            StoredEmail {
                id: "e1".to_string(),
                from: "jane.doe@gmail.com".to_string(),
                subject: "Hi".to_string(),
                body: "I'm worried about the market crash".to_string(),
                date: "2024-01-09T00:00:00Z".to_string(),
            },
        );
        let loader = CommunicationLoader::new(
            sources.clone(),
            sources.clone(),
            sources.clone(),
            sources.clone(),
        );
        let manager = Arc::new(ProcessingManager::new(config));
        let analyzer = Arc::new(ContextAnalyzer::new(manager, directory, loader));
        (analyzer, sources)
    }

    #[tokio::test]
    async fn test_email_trigger_publishes_context_event() {
        let (analyzer, _sources) = fixture();
        let seen: Arc<Mutex<Vec<ContextEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        analyzer.subscribe(move |event| sink.lock().push(event.clone()));

        let outcome = analyzer
            .trigger_analysis_for_email("jane.doe@gmail.com")
            .await
            .unwrap();
        assert_eq!(outcome, TriggerOutcome::Published);

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].client_id.as_deref(), Some("c-jane"));
        assert_eq!(events[0].client_email, "jane.doe@gmail.com");
        assert_eq!(events[0].communications.len(), 1);
        assert_eq!(
            events[0]
                .insights
                .last_interaction
                .as_ref()
                .unwrap()
                .subject
                .as_deref(),
            Some("Hi")
        );
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_no_match_with_zero_events() {
        let (analyzer, _sources) = fixture();
        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        analyzer.subscribe(move |_| *sink.lock() += 1);

        let outcome = analyzer
            .trigger_analysis_for_email("unknown@nowhere.test")
            .await
            .unwrap();
        assert_eq!(outcome, TriggerOutcome::NoMatch);
        assert_eq!(*count.lock(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (analyzer, _sources) = fixture();
        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        let id = analyzer.subscribe(move |_| *sink.lock() += 1);

        assert!(analyzer.unsubscribe(id));
        assert!(!analyzer.unsubscribe(id));

        analyzer
            .trigger_analysis_for_email("jane.doe@gmail.com")
            .await
            .unwrap();
        assert_eq!(*count.lock(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_subscription_order() {
        let (analyzer, _sources) = fixture();
        let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        analyzer.subscribe(move |_| first.lock().push(1));
        analyzer.subscribe(move |_| second.lock().push(2));

        analyzer
            .trigger_analysis_for_client("Jane Doe")
            .await
            .unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_meeting_trigger_resolves_client_identifier() {
        let (analyzer, _sources) = fixture();
        let seen: Arc<Mutex<Vec<ContextEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        analyzer.subscribe(move |event| sink.lock().push(event.clone()));

        let outcome = analyzer
            .trigger_analysis_for_meeting("Quarterly Review", "\"Jane Doe\" <jane.doe@gmail.com>")
            .await
            .unwrap();
        assert_eq!(outcome, TriggerOutcome::Published);
        assert_eq!(seen.lock()[0].client_id.as_deref(), Some("c-jane"));
    }

    #[tokio::test]
    async fn test_invalid_config_propagates_and_delivers_nothing() {
        let config = ProcessingConfig {
            mode: AnalysisMode::RemoteLlm,
            ..ProcessingConfig::default()
        };
        let (analyzer, _sources) = fixture_with_config(config);
        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        analyzer.subscribe(move |_| *sink.lock() += 1);

        let err = analyzer
            .trigger_analysis_for_email("jane.doe@gmail.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
        assert_eq!(*count.lock(), 0);
    }

    #[tokio::test]
    async fn test_insights_for_unknown_client_is_an_error() {
        let (analyzer, _sources) = fixture();
        let err = analyzer.insights_for("ghost@nowhere.test").await.unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownClient(_)));
    }

    #[tokio::test]
    async fn test_insights_for_resolves_and_analyzes() {
        let (analyzer, _sources) = fixture();
        let insights = analyzer.insights_for("Jane Doe").await.unwrap();
        assert_eq!(
            insights.last_interaction.unwrap().subject.as_deref(),
            Some("Hi")
        );
    }

    #[tokio::test]
    async fn test_overtaken_trigger_is_superseded() {
        use crate::analysis::{AnalysisBackend, AnalysisRun};
        use crate::error::AnalysisError;
        use crate::types::{CommunicationRecord, Insights};
        use async_trait::async_trait;
        use std::sync::atomic::AtomicUsize;

        let _ = env_logger::builder().is_test(true).try_init();

        // First call stalls long enough for a second trigger to overtake it.
        struct StaggeredBackend {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl AnalysisBackend for StaggeredBackend {
            fn method(&self) -> AnalysisMode {
                AnalysisMode::LocalNlp
            }

            async fn analyze(
                &self,
                client_id: &str,
                records: &[CommunicationRecord],
                run: &AnalysisRun,
            ) -> Result<Insights, AnalysisError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                }
                crate::analysis::rule_based::RuleBasedBackend::new()
                    .analyze(client_id, records, run)
                    .await
            }
        }

        let directory = Arc::new(InMemoryDirectory::new(vec![Client {
            id: "c-jane".to_string(),
            name: "Jane Doe".to_string(),
            email: "jane.doe@gmail.com".to_string(),
        }]));
        let sources = Arc::new(InMemorySources::new());
        sources.add_email(
            "c-jane",
            StoredEmail {
                id: "e1".to_string(),
                from: "jane.doe@gmail.com".to_string(),
                subject: "Hi".to_string(),
                body: "Quick note".to_string(),
                date: "2024-01-09T00:00:00Z".to_string(),
            },
        );
        let loader = CommunicationLoader::new(
            sources.clone(),
            sources.clone(),
            sources.clone(),
            sources.clone(),
        );
        let config = ProcessingConfig {
            mode: AnalysisMode::LocalNlp,
            fallback_to_rule_based: false,
            ..ProcessingConfig::default()
        };
        let manager = Arc::new(crate::manager::ProcessingManager::with_backends(
            config,
            Box::new(crate::analysis::rule_based::RuleBasedBackend::new()),
            Box::new(StaggeredBackend {
                calls: AtomicUsize::new(0),
            }),
            Box::new(crate::analysis::remote_llm::RemoteLlmBackend::new()),
        ));
        let analyzer = Arc::new(ContextAnalyzer::new(manager, directory, loader));

        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        analyzer.subscribe(move |_| *sink.lock() += 1);

        let slow = analyzer.clone();
        let stalled =
            tokio::spawn(
                async move { slow.trigger_analysis_for_email("jane.doe@gmail.com").await },
            );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let overtaker = analyzer
            .trigger_analysis_for_email("jane.doe@gmail.com")
            .await
            .unwrap();
        assert_eq!(overtaker, TriggerOutcome::Published);

        let stalled = stalled.await.unwrap().unwrap();
        assert_eq!(stalled, TriggerOutcome::Superseded);
        // Only the overtaking trigger delivered an event
        assert_eq!(*count.lock(), 1);
    }
}
