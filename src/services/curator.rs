//! Recommended listings curation
//!
//! Operators keep an ordered set of realty listings that the public feed
//! shows first. The set is either curated by hand or replaced wholesale by a
//! random draw from the active listings. A random draw backs up the set it
//! replaces so the last replacement can be undone.

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::CurationConfig;
use crate::db::repositories::{AppendOutcome, RecommendedRepository, ReorderOutcome};
use crate::models::{
    ListingSnapshot, ModerationStatus, RandomModeOutcome, RecommendedEntry, RecommendedItem,
    RecommendedListing,
};

#[derive(Debug, Error)]
pub enum CuratorError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Listing {listing_id} is {status}, only active listings can be recommended")]
    NotEligible {
        listing_id: i64,
        status: ModerationStatus,
    },

    #[error("Listing {0} is already recommended")]
    AlreadyRecommended(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct CuratorService {
    repo: Arc<dyn RecommendedRepository>,
    batch_size: usize,
    available_limit: usize,
}

impl CuratorService {
    pub fn new(repo: Arc<dyn RecommendedRepository>, config: &CurationConfig) -> Self {
        Self {
            repo,
            batch_size: config.random_batch_size,
            available_limit: config.available_limit,
        }
    }

    /// Active listings that could be added, newest first
    pub async fn list_available(&self) -> Result<Vec<ListingSnapshot>, CuratorError> {
        Ok(self.repo.list_available(self.available_limit as i64).await?)
    }

    /// The public feed: entries whose listing is still active, renumbered densely
    pub async fn list_recommended(&self) -> Result<Vec<RecommendedItem>, CuratorError> {
        let rows = self.repo.list_with_listings().await?;
        Ok(present(rows.into_iter().filter(|row| !row.is_stale())))
    }

    /// Every stored entry, with stale ones flagged
    pub async fn list_recommended_for_admin(&self) -> Result<Vec<RecommendedItem>, CuratorError> {
        let rows = self.repo.list_with_listings().await?;
        Ok(present(rows))
    }

    /// Append a listing to the end of the set
    pub async fn add(&self, listing_id: i64) -> Result<RecommendedEntry, CuratorError> {
        match self.repo.append(listing_id, Utc::now()).await? {
            AppendOutcome::Added(entry) => {
                info!(
                    listing_id,
                    entry_id = entry.id,
                    position = entry.position,
                    "listing recommended"
                );
                Ok(entry)
            }
            AppendOutcome::ListingNotFound => {
                Err(CuratorError::NotFound(format!("Listing {}", listing_id)))
            }
            AppendOutcome::NotEligible(status) => {
                Err(CuratorError::NotEligible { listing_id, status })
            }
            AppendOutcome::AlreadyRecommended => Err(CuratorError::AlreadyRecommended(listing_id)),
        }
    }

    /// Remove one entry. Remaining positions are left as they are.
    pub async fn remove(&self, entry_id: i64) -> Result<(), CuratorError> {
        if !self.repo.remove(entry_id).await? {
            return Err(CuratorError::NotFound(format!(
                "Recommended entry {}",
                entry_id
            )));
        }
        info!(entry_id, "recommendation removed");
        Ok(())
    }

    /// Put the whole set in the given order.
    ///
    /// `entry_ids` must name every current entry exactly once.
    pub async fn reorder(&self, entry_ids: &[i64]) -> Result<Vec<RecommendedItem>, CuratorError> {
        let mut seen = HashSet::with_capacity(entry_ids.len());
        if let Some(dup) = entry_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(CuratorError::ValidationError(format!(
                "entry {} appears more than once",
                dup
            )));
        }

        match self.repo.reorder(entry_ids).await? {
            ReorderOutcome::Applied => {
                info!(count = entry_ids.len(), "recommended set reordered");
                self.list_recommended_for_admin().await
            }
            ReorderOutcome::UnknownEntry(id) => {
                Err(CuratorError::NotFound(format!("Recommended entry {}", id)))
            }
            ReorderOutcome::MissingEntries(missing) => Err(CuratorError::ValidationError(format!(
                "order must list every entry, {} missing",
                missing
            ))),
        }
    }

    /// Switch random mode on or off.
    ///
    /// Turning it on replaces the whole set with a fresh random batch, even
    /// if it was already on. Turning it off keeps the current entries.
    pub async fn set_random_mode(&self, enabled: bool) -> Result<RandomModeOutcome, CuratorError> {
        if !enabled {
            return self.disable_random_mode(false).await;
        }

        let candidates = self.repo.active_listing_ids().await?;
        let batch = sample_batch(&candidates, self.batch_size, &mut rand::thread_rng());
        let inserted = self.repo.replace_with_random(&batch, Utc::now()).await?;
        info!(
            candidates = candidates.len(),
            inserted, "recommended set replaced by random batch"
        );

        self.outcome(true).await
    }

    /// Turn random mode off; with `clear` the random entries are dropped too
    pub async fn disable_random_mode(
        &self,
        clear: bool,
    ) -> Result<RandomModeOutcome, CuratorError> {
        let removed = self.repo.disable_random(clear, Utc::now()).await?;
        info!(clear, removed, "random mode disabled");
        self.outcome(false).await
    }

    /// Bring back the set that the last random replacement overwrote.
    ///
    /// Only the step right after a draw can be undone: adding, removing,
    /// reordering or disabling random mode discards the backup.
    pub async fn restore_previous(&self) -> Result<RandomModeOutcome, CuratorError> {
        match self.repo.restore_backup(Utc::now()).await? {
            Some(restored) => {
                info!(restored, "recommended set restored from backup");
                self.outcome(false).await
            }
            None => Err(CuratorError::NotFound("Recommended backup".to_string())),
        }
    }

    pub async fn random_mode(&self) -> Result<bool, CuratorError> {
        Ok(self.repo.random_mode().await?)
    }

    /// Hand-picked entries that enabling random mode would discard
    pub async fn manual_entry_count(&self) -> Result<i64, CuratorError> {
        Ok(self.repo.count_manual().await?)
    }

    async fn outcome(&self, enabled: bool) -> Result<RandomModeOutcome, CuratorError> {
        Ok(RandomModeOutcome {
            enabled,
            items: self.list_recommended_for_admin().await?,
        })
    }
}

/// Draw up to `size` distinct ids uniformly at random
pub fn sample_batch<R: Rng + ?Sized>(candidates: &[i64], size: usize, rng: &mut R) -> Vec<i64> {
    let batch: Vec<i64> = candidates.choose_multiple(rng, size).copied().collect();
    debug!(requested = size, drawn = batch.len(), "sampled random batch");
    batch
}

/// Number rows 0.. in the order given
fn present(rows: impl IntoIterator<Item = RecommendedListing>) -> Vec<RecommendedItem> {
    rows.into_iter()
        .enumerate()
        .map(|(position, row)| RecommendedItem {
            id: row.entry.id,
            position,
            is_random: row.entry.is_random,
            stale: row.is_stale(),
            created_at: row.entry.created_at,
            listing: row.listing,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModerationConfig;
    use crate::db::repositories::{
        SqlxEntityRepository, SqlxRecommendedRepository, SqlxUserRepository,
    };
    use crate::db::{migrated_file_pool, migrated_test_pool, seed_user, DynDatabasePool};
    use crate::models::{EntityDetails, EntityKind, NewEntity, RealtyListingDetails};
    use crate::services::ModerationService;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Fixture {
        moderation: ModerationService,
        curator: CuratorService,
        user_id: i64,
    }

    async fn fixture() -> Fixture {
        fixture_on(migrated_test_pool().await).await
    }

    async fn fixture_on(pool: DynDatabasePool) -> Fixture {
        let user_id = seed_user(&pool, "seller@example.com").await;
        Fixture {
            moderation: ModerationService::new(
                SqlxEntityRepository::boxed(pool.clone()),
                SqlxUserRepository::boxed(pool.clone()),
                &ModerationConfig::default(),
            ),
            curator: CuratorService::new(
                SqlxRecommendedRepository::boxed(pool),
                &CurationConfig::default(),
            ),
            user_id,
        }
    }

    impl Fixture {
        async fn pending_listing(&self) -> i64 {
            self.moderation
                .submit(NewEntity {
                    user_id: self.user_id,
                    details: EntityDetails::Listing(RealtyListingDetails {
                        price: 80_000,
                        rooms: Some(2),
                        area: 48.0,
                        floor: None,
                        building_floors: None,
                        description: None,
                    }),
                })
                .await
                .unwrap()
                .id
        }

        async fn active_listing(&self) -> i64 {
            let id = self.pending_listing().await;
            self.moderation.approve(EntityKind::Listing, id).await.unwrap();
            id
        }
    }

    #[tokio::test]
    async fn test_add_rules() {
        let f = fixture().await;
        let pending = f.pending_listing().await;
        let active = f.active_listing().await;

        assert!(matches!(
            f.curator.add(pending).await,
            Err(CuratorError::NotEligible { status: ModerationStatus::PendingModeration, .. })
        ));
        assert!(matches!(f.curator.add(9999).await, Err(CuratorError::NotFound(_))));

        let entry = f.curator.add(active).await.unwrap();
        assert!(!entry.is_random);
        assert!(matches!(
            f.curator.add(active).await,
            Err(CuratorError::AlreadyRecommended(id)) if id == active
        ));

        f.curator.remove(entry.id).await.unwrap();
        assert!(matches!(f.curator.remove(entry.id).await, Err(CuratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_feed_positions_dense_after_removal() {
        let f = fixture().await;
        let mut entries = Vec::new();
        for _ in 0..4 {
            let id = f.active_listing().await;
            entries.push(f.curator.add(id).await.unwrap());
        }
        f.curator.remove(entries[1].id).await.unwrap();

        let feed = f.curator.list_recommended().await.unwrap();
        assert_eq!(feed.iter().map(|i| i.position).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(
            feed.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![entries[0].id, entries[2].id, entries[3].id]
        );
    }

    #[tokio::test]
    async fn test_rejected_listing_leaves_feed_but_stays_stored() {
        let f = fixture().await;
        let id = f.pending_listing().await;
        f.moderation.approve(EntityKind::Listing, id).await.unwrap();
        let entry = f.curator.add(id).await.unwrap();
        f.moderation
            .reject(EntityKind::Listing, id, "misleading price".to_string())
            .await
            .unwrap();

        let stored = f.moderation.get(EntityKind::Listing, id).await.unwrap();
        assert_eq!(stored.status, ModerationStatus::Rejected);

        assert!(f.curator.list_recommended().await.unwrap().is_empty());
        assert!(f.curator.list_available().await.unwrap().is_empty());

        let admin = f.curator.list_recommended_for_admin().await.unwrap();
        assert_eq!(admin.len(), 1);
        assert_eq!(admin[0].id, entry.id);
        assert!(admin[0].stale);
    }

    #[tokio::test]
    async fn test_deleting_listing_drops_entry() {
        let f = fixture().await;
        let id = f.active_listing().await;
        f.curator.add(id).await.unwrap();
        f.moderation.delete(EntityKind::Listing, id).await.unwrap();
        assert!(f.curator.list_recommended_for_admin().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reorder() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let listing = f.active_listing().await;
            ids.push(f.curator.add(listing).await.unwrap().id);
        }

        let reversed: Vec<i64> = ids.iter().rev().copied().collect();
        let items = f.curator.reorder(&reversed).await.unwrap();
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), reversed);

        assert!(matches!(
            f.curator.reorder(&[ids[0], ids[0], ids[1]]).await,
            Err(CuratorError::ValidationError(_))
        ));
        assert!(matches!(
            f.curator.reorder(&[ids[0], ids[1]]).await,
            Err(CuratorError::ValidationError(_))
        ));
        assert!(matches!(
            f.curator.reorder(&[ids[0], ids[1], 777]).await,
            Err(CuratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_random_mode_replaces_manual_set() {
        let f = fixture().await;
        let mut manual = Vec::new();
        for _ in 0..7 {
            let id = f.active_listing().await;
            if manual.len() < 2 {
                manual.push(f.curator.add(id).await.unwrap().id);
            }
        }
        assert_eq!(f.curator.manual_entry_count().await.unwrap(), 2);

        let outcome = f.curator.set_random_mode(true).await.unwrap();
        assert!(outcome.enabled);
        assert_eq!(outcome.items.len(), 5);
        assert!(outcome.items.iter().all(|i| i.is_random));
        assert!(outcome.items.iter().all(|i| !manual.contains(&i.id)));
        assert!(f.curator.random_mode().await.unwrap());
        assert_eq!(f.curator.manual_entry_count().await.unwrap(), 0);

        let distinct: HashSet<i64> = outcome.items.iter().map(|i| i.listing.id).collect();
        assert_eq!(distinct.len(), 5);
    }

    #[tokio::test]
    async fn test_random_mode_with_few_candidates() {
        let f = fixture().await;
        f.active_listing().await;
        f.active_listing().await;
        f.pending_listing().await;

        let outcome = f.curator.set_random_mode(true).await.unwrap();
        assert_eq!(outcome.items.len(), 2);
    }

    #[tokio::test]
    async fn test_disable_keeps_or_clears() {
        let f = fixture().await;
        for _ in 0..3 {
            f.active_listing().await;
        }
        f.curator.set_random_mode(true).await.unwrap();

        let kept = f.curator.set_random_mode(false).await.unwrap();
        assert!(!kept.enabled);
        assert_eq!(kept.items.len(), 3);
        assert!(!f.curator.random_mode().await.unwrap());

        f.curator.set_random_mode(true).await.unwrap();
        let cleared = f.curator.disable_random_mode(true).await.unwrap();
        assert!(cleared.items.is_empty());
    }

    #[tokio::test]
    async fn test_restore_previous() {
        let f = fixture().await;
        assert!(matches!(f.curator.restore_previous().await, Err(CuratorError::NotFound(_))));

        let first = f.active_listing().await;
        let second = f.active_listing().await;
        f.curator.add(second).await.unwrap();
        f.curator.add(first).await.unwrap();
        f.curator.set_random_mode(true).await.unwrap();

        let restored = f.curator.restore_previous().await.unwrap();
        assert!(!restored.enabled);
        assert_eq!(
            restored.items.iter().map(|i| i.listing.id).collect::<Vec<_>>(),
            vec![second, first]
        );
        assert!(restored.items.iter().all(|i| !i.is_random));

        // The backup is single use
        assert!(matches!(f.curator.restore_previous().await, Err(CuratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_manual_change_after_draw_discards_backup() {
        let f = fixture().await;
        let first = f.active_listing().await;
        f.active_listing().await;
        let later = f.active_listing().await;
        f.curator.add(first).await.unwrap();

        f.curator.set_random_mode(true).await.unwrap();
        f.curator.disable_random_mode(true).await.unwrap();
        f.curator.add(later).await.unwrap();

        assert!(matches!(f.curator.restore_previous().await, Err(CuratorError::NotFound(_))));
        let ids: Vec<i64> = f
            .curator
            .list_recommended()
            .await
            .unwrap()
            .iter()
            .map(|i| i.listing.id)
            .collect();
        assert_eq!(ids, vec![later]);

        // Removing and reordering invalidate a fresh draw the same way
        f.curator.set_random_mode(true).await.unwrap();
        let drawn = f.curator.list_recommended_for_admin().await.unwrap();
        f.curator.remove(drawn[0].id).await.unwrap();
        assert!(matches!(f.curator.restore_previous().await, Err(CuratorError::NotFound(_))));

        f.curator.set_random_mode(true).await.unwrap();
        let order: Vec<i64> = f
            .curator
            .list_recommended_for_admin()
            .await
            .unwrap()
            .iter()
            .rev()
            .map(|i| i.id)
            .collect();
        f.curator.reorder(&order).await.unwrap();
        assert!(matches!(f.curator.restore_previous().await, Err(CuratorError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = migrated_file_pool(&dir.path().join("matchdesk.db")).await;
        let f = Arc::new(fixture_on(pool).await);

        let mut listings = Vec::new();
        for _ in 0..8 {
            listings.push(f.active_listing().await);
        }

        let handles: Vec<_> = listings
            .iter()
            .map(|&id| {
                let f = f.clone();
                tokio::spawn(async move { f.curator.add(id).await })
            })
            .collect();
        let mut positions = Vec::new();
        for handle in handles {
            positions.push(handle.await.unwrap().unwrap().position);
        }
        positions.sort_unstable();
        assert_eq!(positions, (0..8).collect::<Vec<i64>>());

        // Racing adds of one listing: a single winner, the rest get a domain error
        let contested = f.active_listing().await;
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let f = f.clone();
                tokio::spawn(async move { f.curator.add(contested).await })
            })
            .collect();
        let mut added = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => added += 1,
                Err(CuratorError::AlreadyRecommended(id)) => assert_eq!(id, contested),
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(added, 1);
    }

    #[test]
    fn test_sample_batch_is_seeded_and_bounded() {
        let candidates: Vec<i64> = (1..=20).collect();
        let a = sample_batch(&candidates, 5, &mut StdRng::seed_from_u64(7));
        let b = sample_batch(&candidates, 5, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);

        assert_eq!(sample_batch(&[1, 2], 5, &mut StdRng::seed_from_u64(1)).len(), 2);
        assert!(sample_batch(&[], 5, &mut StdRng::seed_from_u64(1)).is_empty());
        assert!(sample_batch(&candidates, 0, &mut StdRng::seed_from_u64(1)).is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_sample_is_distinct_subset(
                candidates in proptest::collection::hash_set(1i64..10_000, 0..60),
                size in 0usize..20,
                seed in any::<u64>(),
            ) {
                let candidates: Vec<i64> = candidates.into_iter().collect();
                let batch = sample_batch(&candidates, size, &mut StdRng::seed_from_u64(seed));

                prop_assert_eq!(batch.len(), size.min(candidates.len()));
                let distinct: HashSet<i64> = batch.iter().copied().collect();
                prop_assert_eq!(distinct.len(), batch.len());
                prop_assert!(batch.iter().all(|id| candidates.contains(id)));
            }
        }
    }
}
