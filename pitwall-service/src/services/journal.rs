//! Race journal: notes and tags per stored race.
//!
//! Tags are free-form except for `prefix:value` tags with a known prefix,
//! whose values are constrained to an enumerated set. Journal reads join
//! the session the entry refers to; an absent session still yields the
//! entry, just without race context.

use chrono::Utc;
use tracing::instrument;

use pitwall_types::{
    DriverId, RaceId,
    api::v1::{JournalEntryView, RaceContext},
    driver::DriverSession,
    journal::JournalEntry,
};

use crate::services::store::RecordStoreService;

/// The known tag prefixes and their allowed values.
const KNOWN_TAG_PREFIXES: &[(&str, &[&str])] = &[("sentiment", &["good", "neutral", "bad"])];

/// Error kinds of journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// A `prefix:value` tag used a known prefix with a value outside the
    /// allowed set.
    #[error("invalid value {value:?} for tag prefix {prefix:?}")]
    InvalidTag {
        /// The known prefix.
        prefix: String,
        /// The rejected value.
        value: String,
    },
    /// The record store failed.
    #[error(transparent)]
    Storage(#[from] eyre::Error),
}

/// Validates tags against the known-prefix table.
///
/// Tags without a `:` or with an unknown prefix pass untouched.
pub fn validate_tags(tags: &[String]) -> Result<(), JournalError> {
    for tag in tags {
        let Some((prefix, value)) = tag.split_once(':') else {
            continue;
        };
        let Some((_, allowed)) = KNOWN_TAG_PREFIXES
            .iter()
            .find(|(known, _)| *known == prefix)
        else {
            continue;
        };
        if !allowed.contains(&value) {
            return Err(JournalError::InvalidTag {
                prefix: prefix.to_owned(),
                value: value.to_owned(),
            });
        }
    }
    Ok(())
}

/// Manages journal entries joined with session data.
#[derive(Clone)]
pub struct JournalService {
    store: RecordStoreService,
}

impl JournalService {
    /// Creates the journal service.
    pub fn new(store: RecordStoreService) -> Self {
        Self { store }
    }

    /// Creates or updates an entry. `created_at` survives updates.
    #[instrument(level = "debug", skip_all, fields(%driver_id, %race_id))]
    pub async fn save_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
        notes: String,
        tags: Vec<String>,
    ) -> Result<JournalEntryView, JournalError> {
        validate_tags(&tags)?;
        let now = Utc::now();
        let created_at = self
            .store
            .get_journal_entry(driver_id, race_id)
            .await?
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let entry = JournalEntry {
            driver_id,
            race_id,
            notes,
            tags,
            created_at,
            updated_at: now,
        };
        self.store.save_journal_entry(&entry).await?;
        Ok(self.join_race(entry).await?)
    }

    /// Loads one entry. `None` when absent.
    #[instrument(level = "debug", skip_all, fields(%driver_id, %race_id))]
    pub async fn get_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
    ) -> Result<Option<JournalEntryView>, JournalError> {
        match self.store.get_journal_entry(driver_id, race_id).await? {
            Some(entry) => Ok(Some(self.join_race(entry).await?)),
            None => Ok(None),
        }
    }

    /// Lists a driver's entries, newest race first.
    #[instrument(level = "debug", skip_all, fields(%driver_id))]
    pub async fn list_entries(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<JournalEntryView>, JournalError> {
        let entries = self.store.list_journal_entries(driver_id).await?;
        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            views.push(self.join_race(entry).await?);
        }
        Ok(views)
    }

    /// Deletes an entry; deleting a missing entry is a no-op.
    #[instrument(level = "debug", skip_all, fields(%driver_id, %race_id))]
    pub async fn delete_entry(
        &self,
        driver_id: DriverId,
        race_id: RaceId,
    ) -> Result<(), JournalError> {
        Ok(self.store.delete_journal_entry(driver_id, race_id).await?)
    }

    /// Joins the session the entry points at. An absent session leaves the
    /// race context empty rather than failing the read.
    async fn join_race(&self, entry: JournalEntry) -> eyre::Result<JournalEntryView> {
        let race = match entry.race_id.start_time() {
            Some(start_time) => self
                .store
                .get_driver_session(entry.driver_id, start_time)
                .await?
                .map(race_context),
            None => None,
        };
        Ok(JournalEntryView {
            race_id: entry.race_id,
            notes: entry.notes,
            tags: entry.tags,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            race,
        })
    }
}

fn race_context(session: DriverSession) -> RaceContext {
    RaceContext {
        start_time: session.start_time,
        subsession_id: session.subsession_id,
        series_id: session.series_id,
        car_id: session.car_id,
        track_id: session.track_id,
        finish_position: session.finish_position,
        i_rating_change: session.new_irating - session.old_irating,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prefix_values_are_constrained() {
        assert!(validate_tags(&["sentiment:good".to_owned()]).is_ok());
        assert!(validate_tags(&["sentiment:neutral".to_owned()]).is_ok());
        assert!(validate_tags(&["sentiment:bad".to_owned()]).is_ok());
        let err = validate_tags(&["sentiment:amazing".to_owned()]).unwrap_err();
        assert!(matches!(err, JournalError::InvalidTag { .. }));
    }

    #[test]
    fn unknown_prefixes_and_plain_tags_pass() {
        assert!(
            validate_tags(&[
                "wet-race".to_owned(),
                "setup:loose".to_owned(),
                "".to_owned(),
            ])
            .is_ok()
        );
    }
}
