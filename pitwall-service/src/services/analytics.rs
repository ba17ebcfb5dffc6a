//! Analytics over stored driver sessions.
//!
//! The service fetches the driver's sessions for a time window from the
//! record store and then runs pure, synchronous computation: dimension
//! filters (OR within a dimension, AND across dimensions), the aggregate
//! summary, per-dimension grouping, and time bucketing.
//!
//! Positions are 0-based throughout (0 = first place), so podium means
//! `finish <= 2`, top-5 means `finish <= 4` and a win means `finish == 0`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use itertools::Itertools as _;
use tracing::instrument;

use pitwall_types::{
    DriverId,
    api::v1::{
        AnalyticsResponse, BucketRow, Dimension, DimensionsResponse, Granularity, GroupKey,
        GroupRow, SessionSummary,
    },
    driver::DriverSession,
};

use crate::services::store::RecordStoreService;

/// A fully parsed analytics query.
#[derive(Debug, Clone)]
pub struct AnalyticsRequest {
    /// Driver whose sessions are analyzed.
    pub driver_id: DriverId,
    /// Window start (inclusive).
    pub from: DateTime<Utc>,
    /// Window end (exclusive).
    pub to: DateTime<Utc>,
    /// Dimensions to group by; empty means no grouping.
    pub group_by: Vec<Dimension>,
    /// Time bucketing; `None` means no buckets.
    pub granularity: Option<Granularity>,
    /// Series filter; empty means all series.
    pub series_ids: Vec<i64>,
    /// Car filter; empty means all cars.
    pub car_ids: Vec<i64>,
    /// Track filter; empty means all tracks.
    pub track_ids: Vec<i64>,
}

/// Serves analytics queries.
#[derive(Clone)]
pub struct AnalyticsService {
    store: RecordStoreService,
}

impl AnalyticsService {
    /// Creates the analytics service.
    pub fn new(store: RecordStoreService) -> Self {
        Self { store }
    }

    /// The distinct series/car/track ids of the driver's sessions in
    /// `[from, to)`, each strictly ascending and duplicate-free.
    #[instrument(level = "debug", skip_all, fields(%driver_id))]
    pub async fn get_dimensions(
        &self,
        driver_id: DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> eyre::Result<DimensionsResponse> {
        let sessions = self
            .store
            .get_driver_sessions_by_time_range(driver_id, from, to)
            .await?;
        let series_ids: BTreeSet<i64> = sessions.iter().map(|s| s.series_id).collect();
        let car_ids: BTreeSet<i64> = sessions.iter().map(|s| s.car_id).collect();
        let track_ids: BTreeSet<i64> = sessions.iter().map(|s| s.track_id).collect();
        Ok(DimensionsResponse {
            series_ids: series_ids.into_iter().collect(),
            car_ids: car_ids.into_iter().collect(),
            track_ids: track_ids.into_iter().collect(),
        })
    }

    /// Runs a full analytics query.
    #[instrument(level = "debug", skip_all, fields(driver_id = %request.driver_id))]
    pub async fn get_analytics(&self, request: &AnalyticsRequest) -> eyre::Result<AnalyticsResponse> {
        let sessions = self
            .store
            .get_driver_sessions_by_time_range(request.driver_id, request.from, request.to)
            .await?;
        let filtered: Vec<&DriverSession> = sessions
            .iter()
            .filter(|session| matches_filters(session, request))
            .collect();

        let summary = compute_summary(&filtered);
        let groups = (!request.group_by.is_empty())
            .then(|| group_sessions(&filtered, &request.group_by));
        let buckets = request
            .granularity
            .map(|granularity| bucket_sessions(&filtered, granularity));

        Ok(AnalyticsResponse {
            summary,
            groups,
            buckets,
        })
    }
}

/// OR within each dimension, AND across dimensions; an empty filter list
/// matches everything.
fn matches_filters(session: &DriverSession, request: &AnalyticsRequest) -> bool {
    let series_ok = request.series_ids.is_empty() || request.series_ids.contains(&session.series_id);
    let car_ok = request.car_ids.is_empty() || request.car_ids.contains(&session.car_id);
    let track_ok = request.track_ids.is_empty() || request.track_ids.contains(&session.track_id);
    series_ok && car_ok && track_ok
}

/// Aggregates a chronologically ascending session slice.
///
/// Start/end values come from the earliest/latest session; gains and losses
/// are per-session sums with losses stored as positive magnitudes, so
/// `gain - loss == delta` over a contiguous history.
pub fn compute_summary(sessions: &[&DriverSession]) -> SessionSummary {
    let Some((first, last)) = sessions.first().zip(sessions.last()) else {
        return SessionSummary::default();
    };
    let race_count = sessions.len();

    let mut summary = SessionSummary {
        race_count,
        i_rating_start: first.old_irating,
        i_rating_end: last.new_irating,
        i_rating_delta: last.new_irating - first.old_irating,
        cpi_start: first.old_cpi,
        cpi_end: last.new_cpi,
        cpi_delta: last.new_cpi - first.old_cpi,
        ..SessionSummary::default()
    };

    let mut start_sum = 0i64;
    let mut finish_sum = 0i64;
    let mut gained_sum = 0i64;
    for session in sessions {
        let irating_change = session.new_irating - session.old_irating;
        if irating_change >= 0 {
            summary.i_rating_gain += irating_change;
        } else {
            summary.i_rating_loss += -irating_change;
        }
        let cpi_change = session.new_cpi - session.old_cpi;
        if cpi_change >= 0.0 {
            summary.cpi_gain += cpi_change;
        } else {
            summary.cpi_loss += -cpi_change;
        }
        if session.finish_position <= 2 {
            summary.podiums += 1;
        }
        if session.finish_position <= 4 {
            summary.top5 += 1;
        }
        if session.finish_position == 0 {
            summary.wins += 1;
        }
        start_sum += i64::from(session.start_position);
        finish_sum += i64::from(session.finish_position);
        gained_sum += i64::from(session.start_position - session.finish_position);
        summary.total_incidents += i64::from(session.incidents);
    }

    let count = race_count as f64;
    summary.avg_start = start_sum as f64 / count;
    summary.avg_finish = finish_sum as f64 / count;
    summary.positions_gained = gained_sum as f64 / count;
    summary.avg_incidents = summary.total_incidents as f64 / count;
    summary
}

/// Groups sessions by the selected dimensions; rows are sorted by race
/// count descending (key ascending as the tie-break).
pub fn group_sessions(sessions: &[&DriverSession], dimensions: &[Dimension]) -> Vec<GroupRow> {
    let mut grouped: HashMap<GroupKey, Vec<&DriverSession>> = HashMap::new();
    for session in sessions {
        let mut key = GroupKey::default();
        for dimension in dimensions {
            match dimension {
                Dimension::Series => key.series_id = Some(session.series_id),
                Dimension::Car => key.car_id = Some(session.car_id),
                Dimension::Track => key.track_id = Some(session.track_id),
            }
        }
        grouped.entry(key).or_default().push(session);
    }
    grouped
        .into_iter()
        .map(|(key, sessions)| GroupRow {
            key,
            summary: compute_summary(&sessions),
        })
        .sorted_by(|a, b| {
            b.summary
                .race_count
                .cmp(&a.summary.race_count)
                .then_with(|| key_tuple(&a.key).cmp(&key_tuple(&b.key)))
        })
        .collect()
}

fn key_tuple(key: &GroupKey) -> (Option<i64>, Option<i64>, Option<i64>) {
    (key.series_id, key.car_id, key.track_id)
}

/// Buckets sessions by period label; rows come out sorted lexicographically,
/// which is chronological for these label formats.
pub fn bucket_sessions(sessions: &[&DriverSession], granularity: Granularity) -> Vec<BucketRow> {
    let mut buckets: BTreeMap<String, Vec<&DriverSession>> = BTreeMap::new();
    for session in sessions {
        buckets
            .entry(format_period(session.start_time, granularity))
            .or_default()
            .push(session);
    }
    buckets
        .into_iter()
        .map(|(period, sessions)| BucketRow {
            period,
            summary: compute_summary(&sessions),
        })
        .collect()
}

/// Formats a timestamp as its bucket label: `YYYY-MM-DD`, ISO `YYYY-Www`,
/// `YYYY-MM`, or `YYYY`.
pub fn format_period(at: DateTime<Utc>, granularity: Granularity) -> String {
    match granularity {
        Granularity::Day => at.format("%Y-%m-%d").to_string(),
        Granularity::Week => at.format("%G-W%V").to_string(),
        Granularity::Month => at.format("%Y-%m").to_string(),
        Granularity::Year => at.format("%Y").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;
    use pitwall_types::SubsessionId;

    fn session(
        start_offset_hours: i64,
        series_id: i64,
        car_id: i64,
        track_id: i64,
        old_irating: i32,
        new_irating: i32,
        start_position: i32,
        finish_position: i32,
        incidents: i32,
    ) -> DriverSession {
        DriverSession {
            driver_id: DriverId::new(1),
            start_time: Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
                + chrono::Duration::hours(start_offset_hours),
            series_id,
            car_id,
            track_id,
            subsession_id: SubsessionId::new(1000 + start_offset_hours),
            old_irating,
            new_irating,
            old_cpi: 3.0,
            new_cpi: 3.0,
            start_position,
            finish_position,
            incidents,
            lap_details: None,
        }
    }

    #[test]
    fn format_period_boundary_values() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        assert_eq!(format_period(at, Granularity::Week), "2024-W03");
        assert_eq!(format_period(at, Granularity::Month), "2024-01");
        assert_eq!(format_period(at, Granularity::Day), "2024-01-15");
        assert_eq!(format_period(at, Granularity::Year), "2024");
    }

    #[test]
    fn iso_week_year_differs_from_calendar_year_at_boundaries() {
        // 2023-01-01 is a Sunday and belongs to ISO week 2022-W52
        let at = Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(format_period(at, Granularity::Week), "2022-W52");
    }

    #[test]
    fn summary_of_single_session() {
        let sessions = vec![session(0, 1, 1, 1, 1500, 1550, 5, 2, 3)];
        let refs: Vec<&DriverSession> = sessions.iter().collect();
        let summary = compute_summary(&refs);
        assert_eq!(summary.race_count, 1);
        assert_eq!(summary.i_rating_start, 1500);
        assert_eq!(summary.i_rating_end, 1550);
        assert_eq!(summary.i_rating_delta, 50);
        assert_eq!(summary.podiums, 1);
        assert_eq!(summary.top5, 1);
        assert_eq!(summary.wins, 0);
        assert_eq!(summary.avg_finish, 2.0);
        assert_eq!(summary.positions_gained, 3.0);
        assert_eq!(summary.total_incidents, 3);
    }

    #[test]
    fn summary_of_empty_set_is_zeroed() {
        assert_eq!(compute_summary(&[]), SessionSummary::default());
    }

    #[test]
    fn gain_minus_loss_equals_delta_over_contiguous_history() {
        let sessions = vec![
            session(0, 1, 1, 1, 1500, 1580, 4, 1, 0),
            session(1, 1, 1, 1, 1580, 1540, 8, 11, 6),
            session(2, 1, 1, 1, 1540, 1600, 2, 0, 1),
        ];
        let refs: Vec<&DriverSession> = sessions.iter().collect();
        let summary = compute_summary(&refs);
        assert_eq!(summary.i_rating_delta, 100);
        assert_eq!(summary.i_rating_gain, 140);
        assert_eq!(summary.i_rating_loss, 40);
        assert_eq!(
            summary.i_rating_gain - summary.i_rating_loss,
            summary.i_rating_delta
        );
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.podiums, 2);
    }

    #[test]
    fn filters_are_or_within_and_across_dimensions() {
        let sessions = vec![
            session(0, 1, 10, 100, 1500, 1510, 3, 3, 0),
            session(1, 1, 11, 100, 1510, 1520, 3, 3, 0),
            session(2, 2, 10, 101, 1520, 1530, 3, 3, 0),
        ];
        let request = AnalyticsRequest {
            driver_id: DriverId::new(1),
            from: sessions[0].start_time,
            to: sessions[2].start_time + chrono::Duration::hours(1),
            group_by: vec![],
            granularity: None,
            series_ids: vec![1],
            car_ids: vec![10, 11],
            track_ids: vec![],
        };
        let matched: Vec<&DriverSession> = sessions
            .iter()
            .filter(|s| matches_filters(s, &request))
            .collect();
        // series 2 fails the AND; cars 10 and 11 both pass the OR
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn groups_sort_by_race_count_descending() {
        let sessions = vec![
            session(0, 1, 10, 100, 1500, 1510, 3, 3, 0),
            session(1, 2, 10, 100, 1510, 1520, 3, 3, 0),
            session(2, 2, 10, 100, 1520, 1530, 3, 3, 0),
        ];
        let refs: Vec<&DriverSession> = sessions.iter().collect();
        let groups = group_sessions(&refs, &[Dimension::Series]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key.series_id, Some(2));
        assert_eq!(groups[0].summary.race_count, 2);
        assert_eq!(groups[1].key.series_id, Some(1));
        // unselected dimensions stay unset
        assert_eq!(groups[0].key.car_id, None);
    }

    #[test]
    fn buckets_sort_lexicographically() {
        let sessions = vec![
            session(0, 1, 1, 1, 1500, 1510, 3, 3, 0),
            session(24 * 40, 1, 1, 1, 1510, 1520, 3, 3, 0),
        ];
        let refs: Vec<&DriverSession> = sessions.iter().collect();
        let buckets = bucket_sessions(&refs, Granularity::Month);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].period, "2024-01");
        assert_eq!(buckets[1].period, "2024-02");
    }
}
