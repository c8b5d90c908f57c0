//! Enqueueing and replaying offline mutations.

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    QueueConfig,
    offline::{
        QueueError,
        local_state::LocalLedger,
        mutation::{Mutation, MutationStatus, PendingMutation, ServerEffect},
        remote::LedgerApi,
        store::QueueStore,
    },
};

/// What a call to [OfflineQueue::replay] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// The mutations the server accepted, in the order they were sent.
    pub synced: Vec<Uuid>,
    /// The mutations marked as failed during the replay.
    pub failed: Vec<Uuid>,
    /// Set if the replay stopped before reaching the end of the queue.
    pub halted: Option<ReplayHalt>,
}

/// The mutation a replay stopped at. It and every mutation after it are
/// still queued.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayHalt {
    /// The mutation that could not be sent.
    pub id: Uuid,
    /// When the mutation may be sent again, or `None` if it has run out of attempts.
    pub retry_at: Option<OffsetDateTime>,
    /// Why the mutation could not be sent.
    pub reason: String,
}

/// The client's queue of mutations made while offline.
///
/// Mutations are replayed in the order they were enqueued. A mutation that
/// fails with a retryable error holds back the rest of the queue, a mutation
/// the server rejects is marked as failed and skipped.
#[derive(Debug)]
pub struct OfflineQueue {
    store: QueueStore,
    config: QueueConfig,
    online: bool,
}

impl OfflineQueue {
    /// Create a queue on top of `store`. The queue starts offline.
    pub fn new(store: QueueStore, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            online: false,
        }
    }

    /// Whether the last connectivity change reported the client as online.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Add `mutation` to the tail of the queue under a new key.
    ///
    /// # Errors
    /// Returns an error if the mutation cannot be stored.
    pub fn enqueue(&self, mutation: Mutation) -> Result<PendingMutation, QueueError> {
        self.enqueue_with_key(Uuid::new_v4(), mutation)
    }

    /// Add `mutation` to the tail of the queue under the key `id`.
    ///
    /// If the queue already holds a mutation with the key, whether pending,
    /// failed or synced, that entry is returned unchanged and `mutation` is
    /// dropped. Synced keys are remembered until pruned.
    ///
    /// # Errors
    /// Returns an error if the mutation cannot be stored.
    pub fn enqueue_with_key(
        &self,
        id: Uuid,
        mutation: Mutation,
    ) -> Result<PendingMutation, QueueError> {
        if let Some(existing) = self.store.get(id)? {
            tracing::debug!("mutation {id} is already queued as {}", existing.status);
            return Ok(existing);
        }

        let entry = self.store.insert(id, &mutation, OffsetDateTime::now_utc())?;
        tracing::debug!("queued {} as {id}", mutation.kind());

        Ok(entry)
    }

    /// The mutations waiting to be sent, in queue order.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read.
    pub fn pending(&self) -> Result<Vec<PendingMutation>, QueueError> {
        self.store.with_status(MutationStatus::Pending)
    }

    /// The mutations that were rejected or ran out of attempts.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read.
    pub fn failed_mutations(&self) -> Result<Vec<PendingMutation>, QueueError> {
        self.store.with_status(MutationStatus::Failed)
    }

    /// The mutations the server accepted that have not been pruned yet.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read.
    pub fn synced_mutations(&self) -> Result<Vec<PendingMutation>, QueueError> {
        self.store.with_status(MutationStatus::Synced)
    }

    /// Remove a mutation that has never been sent.
    ///
    /// # Errors
    /// Returns a:
    /// - [QueueError::NotFound] if there is no mutation with the key,
    /// - or [QueueError::NotCancellable] if the mutation has been sent or has failed.
    pub fn cancel(&self, id: Uuid) -> Result<(), QueueError> {
        let entry = self.store.get(id)?.ok_or(QueueError::NotFound(id))?;

        if entry.status != MutationStatus::Pending || entry.attempts > 0 {
            return Err(QueueError::NotCancellable(id));
        }

        self.store.remove(id)?;
        tracing::debug!("cancelled {id}");

        Ok(())
    }

    /// Move a failed mutation to the tail of the queue with its attempts reset.
    ///
    /// The mutation keeps its key, so the server still recognises it if an
    /// earlier send was applied.
    ///
    /// # Errors
    /// Returns a:
    /// - [QueueError::NotFound] if there is no mutation with the key,
    /// - or [QueueError::NotFailed] if the mutation has not failed.
    pub fn retry_failed(&self, id: Uuid) -> Result<PendingMutation, QueueError> {
        let entry = self.store.get(id)?.ok_or(QueueError::NotFound(id))?;

        if entry.status != MutationStatus::Failed {
            return Err(QueueError::NotFailed(id));
        }

        self.store.requeue(id)
    }

    /// Record a change in connectivity, replaying the queue when the client
    /// comes back online.
    ///
    /// Returns the replay report if a replay was run.
    ///
    /// # Errors
    /// Returns the errors of [OfflineQueue::replay].
    pub async fn on_connectivity_change(
        &mut self,
        online: bool,
        api: &impl LedgerApi,
        local: &mut LocalLedger,
    ) -> Result<Option<ReplayReport>, QueueError> {
        let was_online = self.online;
        self.online = online;

        if online && !was_online {
            tracing::info!("back online, replaying queued mutations");
            return self.replay(api, local).await.map(Some);
        }

        Ok(None)
    }

    /// Send the pending mutations to `api` in queue order and merge the
    /// responses into `local`.
    ///
    /// Synced entries older than [QueueConfig::synced_retention] are pruned
    /// at the end of the replay.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read or updated. Errors from
    /// the server are recorded on the mutations and do not fail the replay.
    pub async fn replay(
        &mut self,
        api: &impl LedgerApi,
        local: &mut LocalLedger,
    ) -> Result<ReplayReport, QueueError> {
        self.replay_at(api, local, OffsetDateTime::now_utc()).await
    }

    /// [OfflineQueue::replay] with `now` as the current time.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read or updated.
    pub async fn replay_at(
        &mut self,
        api: &impl LedgerApi,
        local: &mut LocalLedger,
        now: OffsetDateTime,
    ) -> Result<ReplayReport, QueueError> {
        let mut report = ReplayReport::default();

        for entry in self.pending()? {
            if let Some(retry_at) = entry.next_attempt_at.filter(|&retry_at| retry_at > now) {
                report.halted = Some(ReplayHalt {
                    id: entry.id,
                    retry_at: Some(retry_at),
                    reason: entry.last_error.clone().unwrap_or_default(),
                });
                break;
            }

            let request = entry
                .mutation
                .resolve(|local_key| self.store.resolved_reference(local_key))?;

            let Some(request) = request else {
                let reason = format!(
                    "the transaction created by {} was never synced",
                    entry
                        .mutation
                        .local_reference()
                        .map(|key| key.to_string())
                        .unwrap_or_default()
                );
                tracing::warn!("could not replay {}: {reason}", entry.id);
                self.store.mark_failed(entry.id, &reason)?;
                report.failed.push(entry.id);
                continue;
            };

            let attempts = self.store.record_attempt(entry.id)?;

            match api.send(&entry.id.to_string(), &request).await {
                Ok(effect) => {
                    if let ServerEffect::TransactionCreated(created) = &effect {
                        self.store
                            .resolve_reference(entry.id, created.transaction.id)?;
                    }

                    local.apply(&effect);
                    self.store.mark_synced(entry.id, now)?;
                    tracing::info!("synced {} {}", entry.mutation.kind(), entry.id);
                    report.synced.push(entry.id);
                }
                Err(error) if error.is_retryable() => {
                    let reason = error.to_string();

                    if attempts >= self.config.max_attempts {
                        tracing::warn!(
                            "giving up on {} after {attempts} attempts: {reason}",
                            entry.id
                        );
                        self.store.mark_failed(entry.id, &reason)?;
                        report.failed.push(entry.id);
                        report.halted = Some(ReplayHalt {
                            id: entry.id,
                            retry_at: None,
                            reason,
                        });
                    } else {
                        let retry_at = now + self.config.backoff(attempts);
                        tracing::warn!(
                            "could not send {}, retrying at {retry_at}: {reason}",
                            entry.id
                        );
                        self.store.schedule_retry(entry.id, &reason, retry_at)?;
                        report.halted = Some(ReplayHalt {
                            id: entry.id,
                            retry_at: Some(retry_at),
                            reason,
                        });
                    }

                    break;
                }
                Err(error) => {
                    tracing::warn!("the server rejected {}: {error}", entry.id);
                    self.store.mark_failed(entry.id, &error.to_string())?;
                    report.failed.push(entry.id);
                }
            }
        }

        let cutoff = Duration::try_from(self.config.synced_retention)
            .ok()
            .and_then(|retention| now.checked_sub(retention));
        if let Some(cutoff) = cutoff {
            let pruned = self.store.prune_synced(cutoff)?;
            if pruned > 0 {
                tracing::debug!("pruned {pruned} synced mutations");
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    use rusqlite::Connection;
    use time::{Duration, OffsetDateTime, macros::date};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    use crate::{
        AppState, LedgerConfig, QueueConfig,
        account::{AccountType, DeleteAccountResponse, NewAccount, create_account},
        build_router,
        offline::{
            QueueError,
            local_state::LocalLedger,
            mutation::{Mutation, MutationStatus, ServerEffect, ServerRequest, TransactionRef},
            remote::{HttpLedgerApi, LedgerApi, RemoteError},
            store::QueueStore,
        },
        transaction::{Transaction, TransactionEdit, TransactionType, count_transactions},
    };

    use super::OfflineQueue;

    /// Answers with scripted results, then accepts everything.
    #[derive(Default)]
    struct ScriptedApi {
        results: Mutex<VecDeque<Result<ServerEffect, RemoteError>>>,
        sent: Mutex<Vec<(String, ServerRequest)>>,
    }

    impl ScriptedApi {
        fn with_results(results: Vec<Result<ServerEffect, RemoteError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                sent: Mutex::default(),
            }
        }

        fn sent_keys(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(key, _)| key.clone())
                .collect()
        }
    }

    impl LedgerApi for ScriptedApi {
        async fn send(
            &self,
            key: &str,
            request: &ServerRequest,
        ) -> Result<ServerEffect, RemoteError> {
            self.sent
                .lock()
                .unwrap()
                .push((key.to_owned(), request.clone()));

            self.results.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(ServerEffect::AccountDeleted(DeleteAccountResponse {
                    account_id: 1,
                }))
            })
        }
    }

    /// Forwards requests but loses the next acknowledgement.
    struct LostAckApi<A> {
        inner: A,
        drop_next: AtomicBool,
    }

    impl<A: LedgerApi + Sync> LedgerApi for LostAckApi<A> {
        async fn send(
            &self,
            key: &str,
            request: &ServerRequest,
        ) -> Result<ServerEffect, RemoteError> {
            let result = self.inner.send(key, request).await;

            if self.drop_next.swap(false, Ordering::SeqCst) {
                return Err(RemoteError::Transient("connection reset".to_owned()));
            }

            result
        }
    }

    fn transient() -> Result<ServerEffect, RemoteError> {
        Err(RemoteError::Transient("timed out".to_owned()))
    }

    fn rejected() -> Result<ServerEffect, RemoteError> {
        Err(RemoteError::Rejected {
            status: 422,
            code: "CREDIT_LIMIT_EXCEEDED".to_owned(),
            message: "the expense exceeds the credit limit".to_owned(),
        })
    }

    fn get_test_queue() -> OfflineQueue {
        OfflineQueue::new(
            QueueStore::open_in_memory().unwrap(),
            QueueConfig::default(),
        )
    }

    fn delete_account(account_id: i64) -> Mutation {
        Mutation::DeleteAccount { account_id }
    }

    async fn spawn_ledger() -> (String, Arc<Mutex<Connection>>, i64) {
        let state = AppState::new(
            Connection::open_in_memory().unwrap(),
            LedgerConfig::default(),
        )
        .unwrap();
        let connection = state.db_connection.clone();
        let account_id = create_account(
            &NewAccount {
                name: "Everyday".to_owned(),
                account_type: AccountType::Checking,
                credit_limit: None,
                billing_cycle: None,
            },
            &connection.lock().unwrap(),
        )
        .unwrap()
        .id;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let router = build_router(state);
        tokio::spawn(async move { axum::serve(listener, router).await });

        (format!("http://{address}"), connection, account_id)
    }

    #[test]
    fn enqueue_with_same_key_keeps_first_entry() {
        let queue = get_test_queue();
        let key = Uuid::new_v4();

        let first = queue.enqueue_with_key(key, delete_account(1)).unwrap();
        let second = queue.enqueue_with_key(key, delete_account(2)).unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lost_ack_retry_does_not_duplicate() {
        let (base_url, connection, account_id) = spawn_ledger().await;
        let api = LostAckApi {
            inner: HttpLedgerApi::new(&base_url),
            drop_next: AtomicBool::new(true),
        };
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let entry = queue
            .enqueue(Mutation::CreateTransaction(
                Transaction::build(
                    account_id,
                    500,
                    date!(2025 - 03 - 01),
                    TransactionType::Income,
                )
                .description("Refund"),
            ))
            .unwrap();
        let now = OffsetDateTime::now_utc();

        let first = queue.replay_at(&api, &mut local, now).await.unwrap();
        let second = queue
            .replay_at(&api, &mut local, now + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(first.halted.map(|halt| halt.id), Some(entry.id));
        assert_eq!(second.synced, vec![entry.id]);
        assert_eq!(count_transactions(&connection.lock().unwrap()).unwrap(), 1);
        assert_eq!(local.balance(account_id), Some(500));
        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn requeueing_synced_key_does_not_roll_back_balance() {
        let (base_url, connection, account_id) = spawn_ledger().await;
        let api = HttpLedgerApi::new(&base_url);
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let key = Uuid::new_v4();
        let refund = Mutation::CreateTransaction(Transaction::build(
            account_id,
            500,
            date!(2025 - 03 - 01),
            TransactionType::Income,
        ));
        queue.enqueue_with_key(key, refund.clone()).unwrap();
        queue.replay(&api, &mut local).await.unwrap();
        queue
            .enqueue(Mutation::CreateTransaction(Transaction::build(
                account_id,
                300,
                date!(2025 - 03 - 02),
                TransactionType::Income,
            )))
            .unwrap();
        queue.replay(&api, &mut local).await.unwrap();

        let entry = queue.enqueue_with_key(key, refund).unwrap();
        let report = queue.replay(&api, &mut local).await.unwrap();

        assert_eq!(entry.status, MutationStatus::Synced);
        assert!(entry.synced_at.is_some());
        assert!(report.synced.is_empty());
        assert_eq!(local.balance(account_id), Some(800));
        assert_eq!(count_transactions(&connection.lock().unwrap()).unwrap(), 2);
        assert_eq!(queue.synced_mutations().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn synced_entries_are_pruned_after_retention() {
        let api = ScriptedApi::default();
        let mut queue = OfflineQueue::new(
            QueueStore::open_in_memory().unwrap(),
            QueueConfig {
                synced_retention: std::time::Duration::from_secs(60),
                ..Default::default()
            },
        );
        let mut local = LocalLedger::default();
        let entry = queue.enqueue(delete_account(1)).unwrap();
        let now = OffsetDateTime::now_utc();

        queue.replay_at(&api, &mut local, now).await.unwrap();
        queue
            .replay_at(&api, &mut local, now + Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(queue.synced_mutations().unwrap()[0].id, entry.id);

        queue
            .replay_at(&api, &mut local, now + Duration::minutes(2))
            .await
            .unwrap();

        assert!(queue.synced_mutations().unwrap().is_empty());
        assert_eq!(api.sent_keys(), vec![entry.id.to_string()]);
    }

    #[tokio::test]
    async fn edit_replays_after_the_create_it_refers_to() {
        let (base_url, _, account_id) = spawn_ledger().await;
        let api = HttpLedgerApi::new(&base_url);
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let create = queue
            .enqueue(Mutation::CreateTransaction(Transaction::build(
                account_id,
                1_000,
                date!(2025 - 03 - 01),
                TransactionType::Income,
            )))
            .unwrap();
        queue
            .enqueue(Mutation::EditTransaction {
                transaction: TransactionRef::Local(create.id),
                edit: TransactionEdit {
                    amount: Some(700),
                    ..Default::default()
                },
            })
            .unwrap();

        let report = queue.replay(&api, &mut local).await.unwrap();

        assert_eq!(report.synced.len(), 2);
        assert!(report.failed.is_empty());
        let transaction_id = queue
            .store
            .resolved_reference(create.id)
            .unwrap()
            .expect("the create should be resolved");
        assert_eq!(
            local.transaction(transaction_id).map(|t| t.amount),
            Some(700)
        );
        assert_eq!(local.balance(account_id), Some(700));
    }

    #[tokio::test]
    async fn reference_to_failed_create_fails() {
        let api = ScriptedApi::with_results(vec![rejected()]);
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let create = queue
            .enqueue(Mutation::CreateTransaction(Transaction::build(
                1,
                -5_000,
                date!(2025 - 03 - 01),
                TransactionType::Expense,
            )))
            .unwrap();
        let delete = queue
            .enqueue(Mutation::DeleteTransaction {
                transaction: TransactionRef::Local(create.id),
            })
            .unwrap();
        let last = queue.enqueue(delete_account(3)).unwrap();

        let report = queue.replay(&api, &mut local).await.unwrap();

        assert_eq!(report.failed, vec![create.id, delete.id]);
        assert_eq!(report.synced, vec![last.id]);
        assert_eq!(api.sent_keys().len(), 2);
    }

    #[tokio::test]
    async fn transient_failure_holds_back_later_entries() {
        let api = ScriptedApi::with_results(vec![transient()]);
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let first = queue.enqueue(delete_account(1)).unwrap();
        let second = queue.enqueue(delete_account(2)).unwrap();
        let now = OffsetDateTime::now_utc();

        let report = queue.replay_at(&api, &mut local, now).await.unwrap();
        let early = queue
            .replay_at(&api, &mut local, now + Duration::seconds(1))
            .await
            .unwrap();

        let halt = report.halted.unwrap();
        assert_eq!(halt.id, first.id);
        assert_eq!(halt.retry_at, Some(now + Duration::seconds(2)));
        assert!(report.synced.is_empty());
        assert_eq!(early.halted.map(|halt| halt.id), Some(first.id));
        assert_eq!(api.sent_keys(), vec![first.id.to_string()]);
        let pending = queue.pending().unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[1].id, second.id);
        assert_eq!(pending[1].attempts, 0);

        let later = queue
            .replay_at(&api, &mut local, now + Duration::seconds(2))
            .await
            .unwrap();

        assert_eq!(later.synced, vec![first.id, second.id]);
        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_entry_fails_and_replay_continues() {
        let api = ScriptedApi::with_results(vec![rejected()]);
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let first = queue.enqueue(delete_account(1)).unwrap();
        let second = queue.enqueue(delete_account(2)).unwrap();

        let report = queue.replay(&api, &mut local).await.unwrap();

        assert_eq!(report.failed, vec![first.id]);
        assert_eq!(report.synced, vec![second.id]);
        assert_eq!(report.halted, None);
        let failed = queue.failed_mutations().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, MutationStatus::Failed);
        assert!(
            failed[0]
                .last_error
                .as_deref()
                .is_some_and(|error| error.contains("CREDIT_LIMIT_EXCEEDED"))
        );
    }

    #[tokio::test]
    async fn entry_fails_after_max_attempts() {
        let api = ScriptedApi::with_results(vec![transient(), transient()]);
        let mut queue = OfflineQueue::new(
            QueueStore::open_in_memory().unwrap(),
            QueueConfig {
                max_attempts: 2,
                ..Default::default()
            },
        );
        let mut local = LocalLedger::default();
        let first = queue.enqueue(delete_account(1)).unwrap();
        let second = queue.enqueue(delete_account(2)).unwrap();
        let now = OffsetDateTime::now_utc();

        queue.replay_at(&api, &mut local, now).await.unwrap();
        let report = queue
            .replay_at(&api, &mut local, now + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(report.failed, vec![first.id]);
        assert_eq!(report.halted.and_then(|halt| halt.retry_at), None);
        assert_eq!(queue.failed_mutations().unwrap()[0].attempts, 2);
        assert_eq!(queue.pending().unwrap()[0].id, second.id);
    }

    #[tokio::test]
    async fn only_unsent_entries_can_be_cancelled() {
        let api = ScriptedApi::with_results(vec![transient()]);
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let sent = queue.enqueue(delete_account(1)).unwrap();
        let unsent = queue.enqueue(delete_account(2)).unwrap();
        queue.replay(&api, &mut local).await.unwrap();

        assert!(matches!(
            queue.cancel(sent.id),
            Err(QueueError::NotCancellable(id)) if id == sent.id
        ));
        assert!(queue.cancel(unsent.id).is_ok());
        assert!(matches!(
            queue.cancel(unsent.id),
            Err(QueueError::NotFound(_))
        ));
        assert_eq!(queue.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_failed_moves_entry_to_tail() {
        let api = ScriptedApi::with_results(vec![rejected(), transient()]);
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let failed = queue.enqueue(delete_account(1)).unwrap();
        let pending = queue.enqueue(delete_account(2)).unwrap();
        queue.replay(&api, &mut local).await.unwrap();

        let requeued = queue.retry_failed(failed.id).unwrap();

        assert_eq!(requeued.id, failed.id);
        assert_eq!(requeued.attempts, 0);
        let order: Vec<Uuid> = queue
            .pending()
            .unwrap()
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(order, vec![pending.id, failed.id]);
        assert!(matches!(
            queue.retry_failed(pending.id),
            Err(QueueError::NotFailed(_))
        ));
        assert!(queue.failed_mutations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconnecting_triggers_replay() {
        let api = ScriptedApi::default();
        let mut queue = get_test_queue();
        let mut local = LocalLedger::default();
        let entry = queue.enqueue(delete_account(1)).unwrap();

        let offline = queue
            .on_connectivity_change(false, &api, &mut local)
            .await
            .unwrap();
        let online = queue
            .on_connectivity_change(true, &api, &mut local)
            .await
            .unwrap();
        let still_online = queue
            .on_connectivity_change(true, &api, &mut local)
            .await
            .unwrap();

        assert_eq!(offline, None);
        assert_eq!(online.map(|report| report.synced), Some(vec![entry.id]));
        assert_eq!(still_online, None);
        assert!(queue.is_online());
    }
}
