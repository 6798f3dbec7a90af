//! Read-only listing views over the donation store.
//!
//! Public listings and single lookups first sweep lapsed `available` donations
//! to `expired` so a reader never sees an offer that can no longer be reserved.

use std::sync::Arc;

use chrono::Utc;

use crate::db::{Donation, DonationFilter, DonationSort, DonationStatus, DonationStore};
use crate::error::{AppError, AppResult};
use crate::i18n;

pub struct DonationQueries {
    donations: Arc<dyn DonationStore>,
}

impl DonationQueries {
    pub fn new(donations: Arc<dyn DonationStore>) -> Self {
        Self { donations }
    }

    /// All donations, optionally narrowed to one status.
    pub async fn list_all(
        &self,
        status: Option<DonationStatus>,
        sort: DonationSort,
    ) -> AppResult<Vec<Donation>> {
        self.sweep().await;

        let mut filter = DonationFilter::default().sorted(sort);
        if let Some(status) = status {
            filter = filter.with_status(status);
        }
        self.donations.find_by_filter(&filter).await
    }

    pub async fn get_by_id(&self, id: &str) -> AppResult<Donation> {
        self.sweep().await;
        self.donations
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(i18n::t("not_found.donation")))
    }

    /// Everything a donor has listed, in any status.
    pub async fn by_donor(&self, donor_id: &str) -> AppResult<Vec<Donation>> {
        self.sweep().await;
        self.donations
            .find_by_filter(&DonationFilter::default().donor(donor_id))
            .await
    }

    /// Donations the recipient currently holds.
    pub async fn reserved_by_active(&self, holder_id: &str) -> AppResult<Vec<Donation>> {
        self.donations
            .find_by_filter(
                &DonationFilter::default()
                    .reserved_by(holder_id)
                    .with_status(DonationStatus::Reserved),
            )
            .await
    }

    /// Current reservations plus completed pickups for the recipient.
    pub async fn reservation_history(&self, holder_id: &str) -> AppResult<Vec<Donation>> {
        self.donations
            .find_by_filter(
                &DonationFilter::default()
                    .reserved_by(holder_id)
                    .with_status(DonationStatus::Reserved)
                    .with_status(DonationStatus::Completed),
            )
            .await
    }

    async fn sweep(&self) {
        match self.donations.expire_lapsed(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(expired = n, "Expired lapsed donations"),
            Err(e) => tracing::warn!("Expiry sweep failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{donation_fixture, memory_pool};
    use crate::db::{DonationRepository, StatusTransition};

    async fn setup() -> (DonationQueries, Arc<DonationRepository>) {
        let repo = Arc::new(DonationRepository::new(memory_pool().await));
        (DonationQueries::new(repo.clone()), repo)
    }

    async fn reserve(repo: &DonationRepository, id: &str, holder: &str) {
        repo.conditional_update(
            id,
            DonationStatus::Available,
            &StatusTransition::Reserve {
                holder_id: holder.to_string(),
                holder_name: holder.to_uppercase(),
                at: Utc::now(),
            },
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn listing_expires_lapsed_offers_first() {
        let (queries, repo) = setup().await;
        let fresh = repo.insert(&donation_fixture("d1", 2)).await.unwrap();
        let stale = repo.insert(&donation_fixture("d1", -1)).await.unwrap();

        let available = queries
            .list_all(Some(DonationStatus::Available), DonationSort::Newest)
            .await
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, fresh.id);

        let expired = queries
            .list_all(Some(DonationStatus::Expired), DonationSort::Newest)
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
    }

    #[tokio::test]
    async fn lookup_by_id_agrees_with_listing_on_expiry() {
        let (queries, repo) = setup().await;
        let stale = repo.insert(&donation_fixture("d1", -1)).await.unwrap();
        assert_eq!(stale.status, DonationStatus::Available);

        let fetched = queries.get_by_id(&stale.id).await.unwrap();
        assert_eq!(fetched.status, DonationStatus::Expired);

        let listed = queries.list_all(None, DonationSort::Newest).await.unwrap();
        assert_eq!(listed[0].status, fetched.status);
    }

    #[tokio::test]
    async fn expiring_sort_puts_soonest_first() {
        let (queries, repo) = setup().await;
        let later = repo.insert(&donation_fixture("d1", 5)).await.unwrap();
        let sooner = repo.insert(&donation_fixture("d1", 1)).await.unwrap();

        let listed = queries.list_all(None, DonationSort::Expiring).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![sooner.id.as_str(), later.id.as_str()]);
    }

    #[tokio::test]
    async fn recipient_views_split_active_and_history() {
        let (queries, repo) = setup().await;
        let a = repo.insert(&donation_fixture("d1", 2)).await.unwrap();
        let b = repo.insert(&donation_fixture("d1", 2)).await.unwrap();
        let other = repo.insert(&donation_fixture("d1", 2)).await.unwrap();

        reserve(&repo, &a.id, "r1").await;
        reserve(&repo, &b.id, "r1").await;
        reserve(&repo, &other.id, "r2").await;
        repo.conditional_update(
            &b.id,
            DonationStatus::Reserved,
            &StatusTransition::Complete { at: Utc::now() },
        )
        .await
        .unwrap()
        .unwrap();

        let active = queries.reserved_by_active("r1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);

        let history = queries.reservation_history("r1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|d| d.reserved_by.as_deref() == Some("r1")));
    }

    #[tokio::test]
    async fn by_donor_and_missing_lookup() {
        let (queries, repo) = setup().await;
        repo.insert(&donation_fixture("d1", 2)).await.unwrap();
        repo.insert(&donation_fixture("d2", 2)).await.unwrap();

        let mine = queries.by_donor("d1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].donor_id, "d1");

        assert!(matches!(
            queries.get_by_id("nope").await,
            Err(AppError::NotFound(_))
        ));
    }
}
