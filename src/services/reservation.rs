//! Donation lifecycle and reservation engine.
//!
//! Every intent arrives with an explicit [`Caller`]. The engine checks role and
//! ownership, validates the transition against the stored status, commits it
//! through the listing store's compare-and-set, and only then appends
//! notifications. Notification failures are logged and never undo a committed
//! transition. No lock is held across store calls; concurrent reservations are
//! arbitrated by the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    Donation, DonationPatch, DonationStatus, DonationStore, NewDonation, NotificationLedger, Role,
    StatusTransition, UserDirectory,
};
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::identity::Caller;

pub struct ReservationEngine {
    donations: Arc<dyn DonationStore>,
    ledger: Arc<dyn NotificationLedger>,
    directory: Arc<dyn UserDirectory>,
}

impl ReservationEngine {
    pub fn new(
        donations: Arc<dyn DonationStore>,
        ledger: Arc<dyn NotificationLedger>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            donations,
            ledger,
            directory,
        }
    }

    /// List a new donation and broadcast it to every recipient organization.
    pub async fn create(&self, caller: &Caller, input: NewDonation) -> AppResult<Donation> {
        caller.require_role(Role::Donor)?;
        input.validate()?;

        let now = Utc::now();
        let donation = Donation {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            description: input.description,
            quantity: input.quantity,
            expiry_date: input.expiry_date,
            pickup_address: input.pickup_address,
            pickup_time_start: input.pickup_time_start,
            pickup_time_end: input.pickup_time_end,
            donor_id: caller.id.clone(),
            donor_name: caller.name.clone(),
            status: DonationStatus::Available,
            reserved_by: None,
            reserved_by_name: None,
            reserved_at: None,
            image_url: input.image_url,
            created_at: now,
            updated_at: now,
        };

        let created = self.donations.insert(&donation).await?;
        tracing::info!(donation_id = %created.id, donor_id = %caller.id, "Donation created");

        self.broadcast(
            Role::Recipient,
            &i18n::tr("notify.donation_posted", &[("title", &created.title)]),
        )
        .await;

        Ok(created)
    }

    /// Reserve an available, unexpired donation for the calling recipient.
    ///
    /// At most one of several concurrent attempts commits; the rest fail with a
    /// state conflict. A retry by the current holder is also a state conflict,
    /// reported with a message saying the caller already holds it.
    pub async fn reserve(&self, caller: &Caller, id: &str) -> AppResult<Donation> {
        caller.require_role(Role::Recipient)?;

        let now = Utc::now();
        let current = self.load(id).await?;

        if current.is_lapsed(now) {
            self.expire_if_lapsed(&current, now).await;
            tracing::debug!(donation_id = %id, caller = %caller.id, "Reserve rejected: expired");
            return Err(AppError::StateConflict(i18n::t("conflict.expired")));
        }

        if current.status != DonationStatus::Available {
            tracing::debug!(
                donation_id = %id,
                caller = %caller.id,
                status = %current.status,
                "Reserve rejected: not available"
            );
            return Err(Self::not_available(&current, caller));
        }

        let transition = StatusTransition::Reserve {
            holder_id: caller.id.clone(),
            holder_name: caller.name.clone(),
            at: now,
        };

        let reserved = match self
            .donations
            .conditional_update(id, DonationStatus::Available, &transition)
            .await?
        {
            Some(d) => d,
            None => return Err(self.explain_reserve_conflict(caller, id, now).await),
        };

        tracing::info!(donation_id = %id, holder = %caller.id, "Donation reserved");

        self.notify(
            &reserved.donor_id,
            &i18n::tr(
                "notify.donation_reserved",
                &[("title", &reserved.title), ("name", &caller.name)],
            ),
        )
        .await;

        Ok(reserved)
    }

    /// Release the caller's reservation.
    ///
    /// The donation returns to `available`, or to `expired` if its expiry date
    /// has passed in the meantime. Reservation fields are cleared either way.
    pub async fn unreserve(&self, caller: &Caller, id: &str) -> AppResult<Donation> {
        caller.require_role(Role::Recipient)?;

        let now = Utc::now();
        let current = self.load(id).await?;
        Self::check_releasable(&current, caller)?;

        let transition = StatusTransition::Release {
            holder_id: caller.id.clone(),
            at: now,
        };

        match self
            .donations
            .conditional_update(id, DonationStatus::Reserved, &transition)
            .await?
        {
            Some(released) => {
                tracing::info!(
                    donation_id = %id,
                    holder = %caller.id,
                    status = %released.status,
                    "Reservation released"
                );
                Ok(released)
            }
            None => {
                let latest = self.load(id).await?;
                Self::check_releasable(&latest, caller)?;
                Err(AppError::StateConflict(i18n::t("conflict.not_reserved")))
            }
        }
    }

    /// Mark a reserved donation as handed over. Owner only.
    pub async fn complete(&self, caller: &Caller, id: &str) -> AppResult<Donation> {
        caller.require_role(Role::Donor)?;

        let current = self.load(id).await?;
        Self::check_owner(&current, caller)?;

        if current.status != DonationStatus::Reserved {
            return Err(AppError::StateConflict(i18n::t("conflict.must_be_reserved")));
        }

        let transition = StatusTransition::Complete { at: Utc::now() };
        match self
            .donations
            .conditional_update(id, DonationStatus::Reserved, &transition)
            .await?
        {
            Some(completed) => {
                tracing::info!(donation_id = %id, donor_id = %caller.id, "Donation completed");
                Ok(completed)
            }
            None => {
                // Gone or no longer reserved by the time the write ran.
                self.load(id).await?;
                Err(AppError::StateConflict(i18n::t("conflict.must_be_reserved")))
            }
        }
    }

    /// Owner edit of descriptive and logistics fields. Lifecycle fields cannot
    /// be reached through this path.
    pub async fn update(
        &self,
        caller: &Caller,
        id: &str,
        patch: DonationPatch,
    ) -> AppResult<Donation> {
        caller.require_role(Role::Donor)?;

        let current = self.load(id).await?;
        Self::check_owner(&current, caller)?;
        patch.validate()?;

        let updated = self
            .donations
            .update_owned(id, &caller.id, &patch, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound(i18n::t("not_found.donation")))?;

        tracing::info!(donation_id = %id, donor_id = %caller.id, "Donation updated");
        Ok(updated)
    }

    /// Remove a donation. Owner only.
    pub async fn delete(&self, caller: &Caller, id: &str) -> AppResult<()> {
        caller.require_role(Role::Donor)?;

        let current = self.load(id).await?;
        Self::check_owner(&current, caller)?;

        if !self.donations.delete_owned(id, &caller.id).await? {
            return Err(AppError::NotFound(i18n::t("not_found.donation")));
        }

        tracing::info!(donation_id = %id, donor_id = %caller.id, "Donation deleted");
        Ok(())
    }

    async fn load(&self, id: &str) -> AppResult<Donation> {
        self.donations
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(i18n::t("not_found.donation")))
    }

    fn check_owner(donation: &Donation, caller: &Caller) -> AppResult<()> {
        if donation.is_owned_by(&caller.id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(i18n::t("forbidden.not_owner")))
        }
    }

    fn check_releasable(donation: &Donation, caller: &Caller) -> AppResult<()> {
        if donation.status != DonationStatus::Reserved {
            return Err(AppError::StateConflict(i18n::t("conflict.not_reserved")));
        }
        if !donation.is_held_by(&caller.id) {
            return Err(AppError::Forbidden(i18n::t("forbidden.not_holder")));
        }
        Ok(())
    }

    fn not_available(donation: &Donation, caller: &Caller) -> AppError {
        if donation.status == DonationStatus::Reserved && donation.is_held_by(&caller.id) {
            AppError::StateConflict(i18n::t("conflict.already_reserved_by_you"))
        } else {
            AppError::StateConflict(i18n::t("conflict.not_available"))
        }
    }

    /// Classify a lost compare-and-set for `reserve` from a fresh read.
    async fn explain_reserve_conflict(
        &self,
        caller: &Caller,
        id: &str,
        now: DateTime<Utc>,
    ) -> AppError {
        match self.donations.get_by_id(id).await {
            Ok(None) => AppError::NotFound(i18n::t("not_found.donation")),
            Ok(Some(latest)) if latest.is_lapsed(now) => {
                AppError::StateConflict(i18n::t("conflict.expired"))
            }
            Ok(Some(latest)) => {
                tracing::debug!(
                    donation_id = %id,
                    caller = %caller.id,
                    winner = ?latest.reserved_by,
                    "Reserve lost compare-and-set"
                );
                Self::not_available(&latest, caller)
            }
            Err(e) => e,
        }
    }

    /// Lazily move a lapsed `available` donation to `expired`. Best effort.
    async fn expire_if_lapsed(&self, donation: &Donation, now: DateTime<Utc>) {
        if donation.status != DonationStatus::Available || !donation.is_lapsed(now) {
            return;
        }
        match self
            .donations
            .conditional_update(
                &donation.id,
                DonationStatus::Available,
                &StatusTransition::Expire { at: now },
            )
            .await
        {
            Ok(Some(_)) => tracing::info!(donation_id = %donation.id, "Donation expired"),
            Ok(None) => {}
            Err(e) => tracing::warn!(donation_id = %donation.id, "Failed to mark expired: {}", e),
        }
    }

    async fn notify(&self, recipient_id: &str, message: &str) {
        if let Err(e) = self.ledger.append(recipient_id, message).await {
            tracing::warn!(
                recipient_id = %recipient_id,
                "Failed to append notification after committed transition: {}",
                e
            );
        }
    }

    async fn broadcast(&self, role: Role, message: &str) {
        let recipients = match self.directory.ids_with_role(role).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(role = %role, "Failed to resolve broadcast audience: {}", e);
                return;
            }
        };

        match self.ledger.append_many(&recipients, message).await {
            Ok(count) => tracing::debug!(role = %role, count, "Broadcast appended"),
            Err(e) => tracing::warn!(role = %role, "Failed to append broadcast: {}", e),
        }
    }
}
