use log::error;
use std::sync::Arc;

use crate::db::PollRepository;
use crate::error::PollError;
use crate::models::Poll;
use crate::realtime::{Observer, ObserverId, SubscriptionRouter};
use crate::store::PollStore;

/// The operations offered to the HTTP and WebSocket layers.
///
/// Writes commit through the [`PollStore`] first; fan-out through the
/// [`SubscriptionRouter`] happens only after a commit and cannot fail it.
pub struct PollService {
    store: PollStore,
    router: Arc<SubscriptionRouter>,
}

impl PollService {
    pub fn new(repository: Arc<dyn PollRepository>) -> Self {
        Self {
            store: PollStore::new(repository),
            router: Arc::new(SubscriptionRouter::new()),
        }
    }

    pub async fn create_poll(
        &self,
        question: &str,
        options: &[String],
        created_by: Option<&str>,
    ) -> Result<Poll, PollError> {
        let poll = self
            .store
            .create(question, options, created_by)
            .await
            .inspect_err(log_storage_failure)?;
        self.router.broadcast_new_poll(&poll);
        Ok(poll)
    }

    pub async fn list_polls(&self) -> Result<Vec<Poll>, PollError> {
        self.store.list_all().await.inspect_err(log_storage_failure)
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Poll, PollError> {
        self.store.get(poll_id).await.inspect_err(log_storage_failure)
    }

    pub async fn has_voted(&self, poll_id: &str, voter_token: &str) -> Result<bool, PollError> {
        self.store
            .has_voted(poll_id, voter_token)
            .await
            .inspect_err(log_storage_failure)
    }

    pub async fn cast_vote(
        &self,
        poll_id: &str,
        option_index: i64,
        voter_token: &str,
    ) -> Result<Poll, PollError> {
        let router = self.router.clone();
        self.store
            .apply_vote(poll_id, option_index, voter_token, move |poll| {
                router.broadcast_vote_update(poll);
            })
            .await
            .inspect_err(log_storage_failure)
    }

    pub fn connect(&self) -> Observer {
        self.router.connect()
    }

    pub fn subscribe(&self, observer: ObserverId, poll_id: &str) -> bool {
        self.router.join(observer, poll_id)
    }

    pub fn unsubscribe(&self, observer: ObserverId, poll_id: &str) {
        self.router.leave(observer, poll_id)
    }

    pub fn disconnect(&self, observer: ObserverId) {
        self.router.disconnect(observer)
    }

    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }
}

fn log_storage_failure(e: &PollError) {
    if e.is_storage() || matches!(e, PollError::Interrupted(_)) {
        error!("Poll storage failure: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::SlowAckDatabase;
    use crate::db::{Database, MemoryDatabase};
    use crate::realtime::PollEvent;
    use std::time::Duration;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn drain(observer: &mut Observer) -> Vec<PollEvent> {
        let mut events = Vec::new();
        while let Ok(event) = observer.events.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn color_poll_end_to_end() {
        let service = PollService::new(Arc::new(
            Database::connect("sqlite::memory:", 5).await.expect("db"),
        ));
        let poll = service
            .create_poll("Color?", &strings(&["Red", "Blue"]), None)
            .await
            .expect("create");

        service.cast_vote(&poll.id, 0, "v1").await.expect("vote");

        let polls = service.list_polls().await.expect("list");
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].options[0].votes, 1);
        assert_eq!(polls[0].options[1].votes, 0);

        let err = service.cast_vote(&poll.id, 0, "v1").await.unwrap_err();
        assert!(matches!(err, PollError::DuplicateVote(_)));

        let polls = service.list_polls().await.expect("list");
        assert_eq!(polls[0].options[0].votes, 1);
        assert_eq!(polls[0].options[1].votes, 0);
    }

    #[tokio::test]
    async fn accepted_votes_fan_out_in_order_to_every_subscriber() {
        let service = PollService::new(Arc::new(MemoryDatabase::new()));
        let poll = service
            .create_poll("Color?", &strings(&["Red", "Blue"]), None)
            .await
            .expect("create");

        let mut o1 = service.connect();
        let mut o2 = service.connect();
        assert!(service.subscribe(o1.id, &poll.id));
        assert!(service.subscribe(o2.id, &poll.id));

        let v1 = service.cast_vote(&poll.id, 0, "v1").await.expect("v1");
        let v2 = service.cast_vote(&poll.id, 1, "v2").await.expect("v2");

        let expected = vec![
            PollEvent::PollVoteUpdated(v1.view()),
            PollEvent::PollVoteUpdated(v2.view()),
        ];
        assert_eq!(drain(&mut o1), expected);
        assert_eq!(drain(&mut o2), expected);
    }

    #[tokio::test]
    async fn rejected_votes_are_not_broadcast() {
        let service = PollService::new(Arc::new(MemoryDatabase::new()));
        let poll = service
            .create_poll("Color?", &strings(&["Red", "Blue"]), None)
            .await
            .expect("create");
        let mut observer = service.connect();
        service.subscribe(observer.id, &poll.id);

        service.cast_vote(&poll.id, 0, "v1").await.expect("vote");
        assert!(service.cast_vote(&poll.id, 1, "v1").await.is_err());
        assert!(service.cast_vote(&poll.id, 2, "v2").await.is_err());
        assert!(service.cast_vote(&poll.id, -1, "v3").await.is_err());

        assert_eq!(drain(&mut observer).len(), 1);
    }

    #[tokio::test]
    async fn creation_reaches_observers_without_subscription() {
        let service = PollService::new(Arc::new(MemoryDatabase::new()));
        let mut observer = service.connect();

        let poll = service
            .create_poll("Color?", &strings(&["Red", "Blue"]), Some("sam"))
            .await
            .expect("create");

        assert_eq!(drain(&mut observer), vec![PollEvent::PollCreated(poll.view())]);
    }

    #[tokio::test]
    async fn vote_commits_with_no_observers_and_after_disconnect() {
        let service = PollService::new(Arc::new(MemoryDatabase::new()));
        let poll = service
            .create_poll("Color?", &strings(&["Red", "Blue"]), None)
            .await
            .expect("create");

        service.cast_vote(&poll.id, 0, "v1").await.expect("vote without observers");

        let observer = service.connect();
        service.subscribe(observer.id, &poll.id);
        service.disconnect(observer.id);
        service.cast_vote(&poll.id, 1, "v2").await.expect("vote after disconnect");

        let stored = service.get_poll(&poll.id).await.expect("get");
        assert_eq!(stored.total_votes(), 2);
        assert!(service.has_voted(&poll.id, "v2").await.expect("ledger"));
        assert_eq!(service.router().observer_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_vote_request_is_still_broadcast() {
        let service = PollService::new(Arc::new(SlowAckDatabase::new(Duration::from_millis(200))));
        let poll = service
            .create_poll("Color?", &strings(&["Red", "Blue"]), None)
            .await
            .expect("create");
        let mut observer = service.connect();
        service.subscribe(observer.id, &poll.id);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            service.cast_vote(&poll.id, 0, "v1"),
        )
        .await;
        assert!(outcome.is_err(), "request should have been cancelled");

        tokio::time::sleep(Duration::from_millis(400)).await;

        let stored = service.get_poll(&poll.id).await.expect("get");
        assert_eq!(stored.total_votes(), 1);
        let events = drain(&mut observer);
        assert_eq!(events, vec![PollEvent::PollVoteUpdated(stored.view())]);
    }
}
