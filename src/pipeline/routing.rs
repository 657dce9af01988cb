use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::error::EngineError;
use crate::shared::schema::users;

const SALES_ROLE: &str = "sales";

#[derive(Debug, Clone, Queryable)]
pub struct OwnerCandidate {
    pub id: Uuid,
    pub service_regions: Vec<String>,
    pub active_opportunities: i32,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

/// Leading postcode segment before the space: "WA1 1AA" -> "WA1".
pub fn area_token(postcode: &str) -> String {
    postcode
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase()
}

/// A configured region matches when it is a prefix of the area token or
/// equals it exactly ("WA" covers "WA1", "WA1" covers only "WA1").
pub fn region_matches(region: &str, area: &str) -> bool {
    !region.is_empty() && area.starts_with(&region.to_uppercase())
}

/// Least-loaded candidate, ties broken by oldest `last_assigned_at`.
/// Never-assigned users sort before any assigned one.
pub fn pick_candidate(candidates: &[OwnerCandidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| (c.active_opportunities, c.last_assigned_at))
        .map(|(i, _)| i)
}

/// Routes a new lead to a sales owner: region-matching candidates are
/// preferred, the full active pool is the fallback so a lead is never
/// left unrouted just because no region matched.
pub fn assign_owner(conn: &mut PgConnection, postcode: &str) -> Result<Uuid, EngineError> {
    let pool: Vec<OwnerCandidate> = users::table
        .filter(users::is_active.eq(true))
        .filter(users::role.eq(SALES_ROLE))
        .select((
            users::id,
            users::service_regions,
            users::active_opportunities,
            users::last_assigned_at,
        ))
        .load(conn)?;

    if pool.is_empty() {
        return Err(EngineError::NoAvailableOwner);
    }

    let area = area_token(postcode);
    let regional: Vec<OwnerCandidate> = pool
        .iter()
        .filter(|c| c.service_regions.iter().any(|r| region_matches(r, &area)))
        .cloned()
        .collect();

    let candidates = if regional.is_empty() { &pool } else { &regional };
    let winner = match pick_candidate(candidates) {
        Some(i) => candidates[i].id,
        None => return Err(EngineError::NoAvailableOwner),
    };

    // Single-statement increment; concurrent assignments must not lose
    // counts to a read-then-write interleave.
    diesel::update(users::table.find(winner))
        .set((
            users::active_opportunities.eq(users::active_opportunities + 1),
            users::last_assigned_at.eq(Some(Utc::now())),
        ))
        .execute(conn)?;

    Ok(winner)
}

/// Decrements the owner's load when an opportunity leaves their book
/// (completion or reassignment), floored at zero.
pub fn release_owner(conn: &mut PgConnection, owner_id: Uuid) -> Result<(), EngineError> {
    diesel::sql_query(
        "UPDATE users SET active_opportunities = GREATEST(active_opportunities - 1, 0) WHERE id = $1",
    )
    .bind::<diesel::sql_types::Uuid, _>(owner_id)
    .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(
        active: i32,
        last_assigned: Option<DateTime<Utc>>,
        regions: &[&str],
    ) -> OwnerCandidate {
        OwnerCandidate {
            id: Uuid::new_v4(),
            service_regions: regions.iter().map(|r| r.to_string()).collect(),
            active_opportunities: active,
            last_assigned_at: last_assigned,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn area_token_takes_leading_segment() {
        assert_eq!(area_token("WA1 1AA"), "WA1");
        assert_eq!(area_token("sw19 2ab"), "SW19");
        assert_eq!(area_token("M1"), "M1");
        assert_eq!(area_token(""), "");
    }

    #[test]
    fn region_prefix_matching() {
        assert!(region_matches("WA", "WA1"));
        assert!(region_matches("WA1", "WA1"));
        assert!(!region_matches("WA11", "WA1"));
        assert!(!region_matches("M", "WA1"));
        assert!(!region_matches("", "WA1"));
    }

    #[test]
    fn least_loaded_wins() {
        let candidates = vec![
            candidate(5, None, &[]),
            candidate(2, Some(at(9)), &[]),
            candidate(4, None, &[]),
        ];
        assert_eq!(pick_candidate(&candidates), Some(1));
    }

    #[test]
    fn load_tie_breaks_on_oldest_assignment() {
        // active = [3, 1, 1], last_assigned = [t1, t3, t2] with t1 < t2 < t3:
        // both index 1 and 2 carry the lightest load, and index 2 was
        // assigned longer ago.
        let candidates = vec![
            candidate(3, Some(at(8)), &[]),
            candidate(1, Some(at(12)), &[]),
            candidate(1, Some(at(10)), &[]),
        ];
        assert_eq!(pick_candidate(&candidates), Some(2));
    }

    #[test]
    fn never_assigned_beats_any_timestamp() {
        let candidates = vec![
            candidate(1, Some(at(8)), &[]),
            candidate(1, None, &[]),
        ];
        assert_eq!(pick_candidate(&candidates), Some(1));
    }

    #[test]
    fn empty_pool_yields_nothing() {
        assert_eq!(pick_candidate(&[]), None);
    }

    #[test]
    fn regional_filter_beats_load() {
        // A single region match must win over better-loaded candidates
        // outside the region; the filter runs before load ordering.
        let area = area_token("WA1 1AA");
        let pool = vec![
            candidate(0, None, &["M"]),
            candidate(9, Some(at(11)), &["WA"]),
            candidate(0, None, &["SW"]),
        ];
        let regional: Vec<OwnerCandidate> = pool
            .iter()
            .filter(|c| c.service_regions.iter().any(|r| region_matches(r, &area)))
            .cloned()
            .collect();
        assert_eq!(regional.len(), 1);
        assert_eq!(regional[0].active_opportunities, 9);
        assert_eq!(pick_candidate(&regional), Some(0));
    }
}
