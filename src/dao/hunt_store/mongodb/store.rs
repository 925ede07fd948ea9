use std::{future::Future, sync::Arc, time::Duration};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Bson, Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoAttemptDocument, MongoLockDocument, MongoSlotDocument, MongoTimerDocument, bson_time,
        doc_id,
    },
};
use crate::dao::{
    hunt_store::HuntStore,
    models::{
        QuestionAttemptEntity, QuestionLockEntity, QuestionTimerEntity, QuotaSlotEntity,
    },
    storage::StorageResult,
};

const LOCK_COLLECTION_NAME: &str = "question_locks";
const ATTEMPT_COLLECTION_NAME: &str = "question_attempts";
const SLOT_COLLECTION_NAME: &str = "team_quota_slots";
const TIMER_COLLECTION_NAME: &str = "question_timers";

/// MongoDB-backed [`HuntStore`] implementation.
#[derive(Clone)]
pub struct MongoHuntStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn attempt_filter(team_id: i64, question_id: i64) -> Document {
    doc! { "team_id": team_id, "question_id": question_id }
}

/// Run `upsert` a second time when the first run failed with an error `is_race` accepts.
///
/// Two first-time upserts on one key both miss the filter and both insert; the loser hits
/// the unique index and goes through as a plain update on its second run.
async fn upsert_with_retry<T, E, F, Fut>(is_race: impl Fn(&E) -> bool, mut upsert: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match upsert().await {
        Err(err) if is_race(&err) => upsert().await,
        other => other,
    }
}

/// Single `$group` total of an aggregation, zero when nothing matched.
fn group_total(groups: &[Document]) -> i64 {
    groups
        .first()
        .and_then(|group| match group.get("total") {
            Some(Bson::Int64(value)) => Some(*value),
            Some(Bson::Int32(value)) => Some(i64::from(*value)),
            Some(Bson::Double(value)) => Some(*value as i64),
            _ => None,
        })
        .unwrap_or(0)
}

/// Pipeline update stopping a timer and storing the elapsed whole seconds.
fn complete_timer_pipeline(now: OffsetDateTime) -> Vec<Document> {
    let now = bson_time(now);
    vec![doc! {
        "$set": {
            "completed_at": now,
            "time_taken_seconds": {
                "$max": [
                    { "$toLong": { "$floor": { "$divide": [{ "$subtract": [now, "$started_at"] }, 1000_i64] } } },
                    0_i64,
                ]
            },
        }
    }]
}

/// Pipeline update incrementing the counter and adding `penalties[previous count]`.
fn wrong_attempt_pipeline(
    team_id: i64,
    question_id: i64,
    penalties: &[i64],
    now: OffsetDateTime,
) -> Vec<Document> {
    let previous = doc! { "$ifNull": ["$wrong_attempts", 0_i64] };
    vec![doc! {
        "$set": {
            "team_id": team_id,
            "question_id": question_id,
            "total_penalty": {
                "$add": [
                    { "$ifNull": ["$total_penalty", 0_i64] },
                    { "$ifNull": [{ "$arrayElemAt": [penalties.to_vec(), previous.clone()] }, 0_i64] },
                ]
            },
            "wrong_attempts": { "$add": [previous, 1_i64] },
            "last_attempt_at": bson_time(now),
        }
    }]
}

/// Pipeline update rolling the slot over once `slot_duration` elapsed, then adding `solved`.
fn slot_pipeline(now: OffsetDateTime, slot_duration: Duration, solved: i64) -> Vec<Document> {
    let now = bson_time(now);
    let duration_ms = i64::try_from(slot_duration.as_millis()).unwrap_or(i64::MAX);
    vec![
        doc! {
            "$set": {
                "rolled": {
                    "$or": [
                        { "$eq": [{ "$ifNull": ["$current_slot_start", Bson::Null] }, Bson::Null] },
                        { "$gte": [{ "$subtract": [now, "$current_slot_start"] }, duration_ms] },
                    ]
                }
            }
        },
        doc! {
            "$set": {
                "current_slot_start": { "$cond": ["$rolled", now, "$current_slot_start"] },
                "questions_solved_in_slot": {
                    "$add": [
                        { "$cond": ["$rolled", 0_i64, "$questions_solved_in_slot"] },
                        solved,
                    ]
                },
            }
        },
        doc! { "$unset": "rolled" },
    ]
}

impl MongoHuntStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let attempts = database.collection::<Document>(ATTEMPT_COLLECTION_NAME);
        let pair_index = mongodb::IndexModel::builder()
            .keys(doc! { "team_id": 1, "question_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("team_question_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        attempts
            .create_index(pair_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ATTEMPT_COLLECTION_NAME,
                index: "team_id,question_id",
                source,
            })?;

        let timers = database.collection::<Document>(TIMER_COLLECTION_NAME);
        let timer_index = mongodb::IndexModel::builder()
            .keys(doc! { "team_id": 1, "question_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("timer_team_question_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        timers
            .create_index(timer_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: TIMER_COLLECTION_NAME,
                index: "team_id,question_id",
                source,
            })?;

        let locks = database.collection::<Document>(LOCK_COLLECTION_NAME);
        let age_index = mongodb::IndexModel::builder()
            .keys(doc! { "locked_at": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("locked_at_idx".to_owned()))
                    .build(),
            )
            .build();
        locks
            .create_index(age_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: LOCK_COLLECTION_NAME,
                index: "locked_at",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn lock_collection(&self) -> Collection<MongoLockDocument> {
        self.database()
            .await
            .collection::<MongoLockDocument>(LOCK_COLLECTION_NAME)
    }

    async fn attempt_collection(&self) -> Collection<MongoAttemptDocument> {
        self.database()
            .await
            .collection::<MongoAttemptDocument>(ATTEMPT_COLLECTION_NAME)
    }

    async fn slot_collection(&self) -> Collection<MongoSlotDocument> {
        self.database()
            .await
            .collection::<MongoSlotDocument>(SLOT_COLLECTION_NAME)
    }

    async fn timer_collection(&self) -> Collection<MongoTimerDocument> {
        self.database()
            .await
            .collection::<MongoTimerDocument>(TIMER_COLLECTION_NAME)
    }

    async fn insert_lock_if_absent(&self, lock: QuestionLockEntity) -> MongoResult<bool> {
        let question_id = lock.question_id;
        let document: MongoLockDocument = lock.into();
        let collection = self.lock_collection().await;

        match collection.insert_one(&document).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::WriteLock {
                question_id,
                source,
            }),
        }
    }

    async fn delete_lock_matching(&self, question_id: i64, filter: Document) -> MongoResult<bool> {
        let collection = self.lock_collection().await;
        let result = collection
            .delete_one(filter)
            .await
            .map_err(|source| MongoDaoError::WriteLock {
                question_id,
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_stale_locks(&self, cutoff: OffsetDateTime) -> MongoResult<u64> {
        let collection = self.lock_collection().await;
        let result = collection
            .delete_many(doc! { "locked_at": { "$lte": bson_time(cutoff) } })
            .await
            .map_err(|source| MongoDaoError::ReadLocks { source })?;
        Ok(result.deleted_count)
    }

    async fn find_lock(&self, question_id: i64) -> MongoResult<Option<QuestionLockEntity>> {
        let collection = self.lock_collection().await;
        let document = collection
            .find_one(doc_id(question_id))
            .await
            .map_err(|source| MongoDaoError::ReadLocks { source })?;
        Ok(document.map(Into::into))
    }

    async fn list_locks(&self) -> MongoResult<Vec<QuestionLockEntity>> {
        let collection = self.lock_collection().await;
        let documents: Vec<MongoLockDocument> = collection
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .await
            .map_err(|source| MongoDaoError::ReadLocks { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ReadLocks { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn find_attempt(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> MongoResult<Option<QuestionAttemptEntity>> {
        let collection = self.attempt_collection().await;
        let document = collection
            .find_one(attempt_filter(team_id, question_id))
            .await
            .map_err(|source| MongoDaoError::ReadAttempts { team_id, source })?;
        Ok(document.map(Into::into))
    }

    async fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        penalties: Vec<i64>,
        now: OffsetDateTime,
    ) -> MongoResult<Option<QuestionAttemptEntity>> {
        if penalties.is_empty() {
            return Ok(None);
        }
        let max = i64::try_from(penalties.len()).unwrap_or(i64::MAX);
        let mut filter = attempt_filter(team_id, question_id);
        filter.insert("wrong_attempts", doc! { "$lt": max });

        let collection = self.attempt_collection().await;
        let update = wrong_attempt_pipeline(team_id, question_id, &penalties, now);
        let result = upsert_with_retry(is_duplicate_key, || {
            let collection = collection.clone();
            let filter = filter.clone();
            let update = update.clone();
            async move {
                collection
                    .find_one_and_update(filter, update)
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .await
            }
        })
        .await;

        match result {
            Ok(document) => Ok(document.map(Into::into)),
            // Still colliding on the second run: the row exists and fails the ceiling filter.
            Err(err) if is_duplicate_key(&err) => Ok(None),
            Err(source) => Err(MongoDaoError::WriteAttempts {
                team_id,
                question_id,
                source,
            }),
        }
    }

    async fn delete_attempts(&self, team_id: i64, question_id: i64) -> MongoResult<bool> {
        let collection = self.attempt_collection().await;
        let result = collection
            .delete_one(attempt_filter(team_id, question_id))
            .await
            .map_err(|source| MongoDaoError::WriteAttempts {
                team_id,
                question_id,
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn sum_penalties(&self, team_id: i64) -> MongoResult<i64> {
        let collection = self.database().await.collection::<Document>(ATTEMPT_COLLECTION_NAME);
        let groups: Vec<Document> = collection
            .aggregate(vec![
                doc! { "$match": { "team_id": team_id } },
                doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$total_penalty" } } },
            ])
            .await
            .map_err(|source| MongoDaoError::ReadAttempts { team_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ReadAttempts { team_id, source })?;

        Ok(group_total(&groups))
    }

    async fn upsert_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
        solved: i64,
    ) -> MongoResult<QuotaSlotEntity> {
        let collection = self.slot_collection().await;
        let update = slot_pipeline(now, slot_duration, solved);
        let result = upsert_with_retry(is_duplicate_key, || {
            let collection = collection.clone();
            let update = update.clone();
            async move {
                collection
                    .find_one_and_update(doc_id(team_id), update)
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .await
            }
        })
        .await;

        match result {
            Ok(Some(document)) => Ok(document.into()),
            Ok(None) => Err(MongoDaoError::MissingUpsert {
                collection: SLOT_COLLECTION_NAME,
            }),
            Err(source) => Err(MongoDaoError::WriteSlot { team_id, source }),
        }
    }

    async fn start_timer_if_absent(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> MongoResult<bool> {
        let collection = self.timer_collection().await;
        let update = doc! {
            "$setOnInsert": {
                "team_id": team_id,
                "question_id": question_id,
                "started_at": bson_time(now),
            }
        };
        match collection
            .update_one(attempt_filter(team_id, question_id), update)
            .upsert(true)
            .await
        {
            Ok(result) => Ok(result.upserted_id.is_some()),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::WriteTimer {
                team_id,
                question_id,
                source,
            }),
        }
    }

    async fn complete_timer(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> MongoResult<Option<QuestionTimerEntity>> {
        let mut filter = attempt_filter(team_id, question_id);
        filter.insert("completed_at", Bson::Null);

        let collection = self.timer_collection().await;
        let document = collection
            .find_one_and_update(filter, complete_timer_pipeline(now))
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::WriteTimer {
                team_id,
                question_id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn find_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> MongoResult<Option<QuestionTimerEntity>> {
        let collection = self.timer_collection().await;
        let document = collection
            .find_one(attempt_filter(team_id, question_id))
            .await
            .map_err(|source| MongoDaoError::ReadTimers { team_id, source })?;
        Ok(document.map(Into::into))
    }

    async fn delete_timer(&self, team_id: i64, question_id: i64) -> MongoResult<bool> {
        let collection = self.timer_collection().await;
        let result = collection
            .delete_one(attempt_filter(team_id, question_id))
            .await
            .map_err(|source| MongoDaoError::WriteTimer {
                team_id,
                question_id,
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn sum_solve_seconds(&self, team_id: i64) -> MongoResult<i64> {
        let collection = self.database().await.collection::<Document>(TIMER_COLLECTION_NAME);
        let groups: Vec<Document> = collection
            .aggregate(vec![
                doc! { "$match": { "team_id": team_id, "completed_at": { "$ne": Bson::Null } } },
                doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$time_taken_seconds" } } },
            ])
            .await
            .map_err(|source| MongoDaoError::ReadTimers { team_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ReadTimers { team_id, source })?;
        Ok(group_total(&groups))
    }
}

impl HuntStore for MongoHuntStore {
    fn insert_lock_if_absent(
        &self,
        lock: QuestionLockEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_lock_if_absent(lock).await.map_err(Into::into) })
    }

    fn delete_lock(&self, question_id: i64) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_lock_matching(question_id, doc_id(question_id))
                .await
                .map_err(Into::into)
        })
    }

    fn delete_lock_held_by(
        &self,
        question_id: i64,
        team_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! { "_id": question_id, "locked_by_team_id": team_id };
            store
                .delete_lock_matching(question_id, filter)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_stale_lock(
        &self,
        question_id: i64,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! { "_id": question_id, "locked_at": { "$lte": bson_time(cutoff) } };
            store
                .delete_lock_matching(question_id, filter)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_stale_locks(&self, cutoff: OffsetDateTime) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.delete_stale_locks(cutoff).await.map_err(Into::into) })
    }

    fn find_lock(
        &self,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionLockEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_lock(question_id).await.map_err(Into::into) })
    }

    fn list_locks(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionLockEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_locks().await.map_err(Into::into) })
    }

    fn find_attempt(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_attempt(team_id, question_id)
                .await
                .map_err(Into::into)
        })
    }

    fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        penalties: Vec<i64>,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_wrong_attempt(team_id, question_id, penalties, now)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_attempts(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_attempts(team_id, question_id)
                .await
                .map_err(Into::into)
        })
    }

    fn sum_penalties(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.sum_penalties(team_id).await.map_err(Into::into) })
    }

    fn current_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .upsert_slot(team_id, now, slot_duration, 0)
                .await
                .map_err(Into::into)
        })
    }

    fn increment_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .upsert_slot(team_id, now, slot_duration, 1)
                .await
                .map_err(Into::into)
        })
    }

    fn start_timer_if_absent(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .start_timer_if_absent(team_id, question_id, now)
                .await
                .map_err(Into::into)
        })
    }

    fn complete_timer(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .complete_timer(team_id, question_id, now)
                .await
                .map_err(Into::into)
        })
    }

    fn find_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_timer(team_id, question_id).await.map_err(Into::into) })
    }

    fn delete_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_timer(team_id, question_id).await.map_err(Into::into) })
    }

    fn sum_solve_seconds(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.sum_solve_seconds(team_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use time::macros::datetime;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Duplicate,
        Other,
    }

    fn is_duplicate(err: &FakeError) -> bool {
        *err == FakeError::Duplicate
    }

    #[tokio::test]
    async fn upsert_losing_the_insert_race_runs_again_as_an_update() {
        let runs = AtomicU32::new(0);
        let result = upsert_with_retry(is_duplicate, || {
            let run = runs.fetch_add(1, Ordering::SeqCst);
            async move {
                if run == 0 {
                    Err(FakeError::Duplicate)
                } else {
                    Ok(run)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upsert_retries_only_once() {
        let runs = AtomicU32::new(0);
        let result: Result<(), _> = upsert_with_retry(is_duplicate, || {
            runs.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError::Duplicate) }
        })
        .await;

        assert_eq!(result, Err(FakeError::Duplicate));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_upsert_failures_are_not_retried() {
        let runs = AtomicU32::new(0);
        let result: Result<(), _> = upsert_with_retry(is_duplicate, || {
            runs.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError::Other) }
        })
        .await;

        assert_eq!(result, Err(FakeError::Other));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timer_pipeline_floors_elapsed_milliseconds_to_seconds() {
        let pipeline = complete_timer_pipeline(datetime!(2025-03-01 12:00 UTC));
        let set = pipeline[0].get_document("$set").unwrap();
        assert!(set.get_datetime("completed_at").is_ok());

        let clamp = set
            .get_document("time_taken_seconds")
            .unwrap()
            .get_array("$max")
            .unwrap();
        assert_eq!(clamp[1], Bson::Int64(0));
    }

    #[test]
    fn missing_group_reads_as_zero() {
        assert_eq!(group_total(&[]), 0);
        assert_eq!(group_total(&[doc! { "_id": Bson::Null, "total": 42_i32 }]), 42);
    }

    #[test]
    fn wrong_attempt_pipeline_indexes_schedule_by_previous_count() {
        let pipeline =
            wrong_attempt_pipeline(3, 9, &[0, 10, 30], datetime!(2025-03-01 12:00 UTC));
        assert_eq!(pipeline.len(), 1);

        let set = pipeline[0].get_document("$set").unwrap();
        assert_eq!(set.get_i64("team_id").unwrap(), 3);
        assert_eq!(set.get_i64("question_id").unwrap(), 9);

        let penalty = set
            .get_document("total_penalty")
            .unwrap()
            .get_array("$add")
            .unwrap();
        let lookup = penalty[1].as_document().unwrap().get_array("$ifNull").unwrap();
        let element = lookup[0].as_document().unwrap().get_array("$arrayElemAt").unwrap();
        assert_eq!(
            element[0],
            Bson::Array(vec![Bson::Int64(0), Bson::Int64(10), Bson::Int64(30)])
        );
    }

    #[test]
    fn slot_pipeline_drops_its_scratch_field() {
        let pipeline = slot_pipeline(
            datetime!(2025-03-01 12:00 UTC),
            Duration::from_secs(36_000),
            1,
        );
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline[2].get_str("$unset").unwrap(), "rolled");

        let rolled = pipeline[0]
            .get_document("$set")
            .unwrap()
            .get_document("rolled")
            .unwrap()
            .get_array("$or")
            .unwrap();
        let elapsed = rolled[1].as_document().unwrap().get_array("$gte").unwrap();
        assert_eq!(elapsed[1], Bson::Int64(36_000_000));
    }
}
