//! Sales-Rep Router (spec.md §4.3): `reps_for(service, province)` returns
//! the ordered set of active reps eligible to take a given lead.

use crate::db::sales_reps::{self, SalesRepRow};
use crate::domain::Service;
use sqlx::sqlite::SqlitePool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rep {
    pub id: String,
    pub name: String,
}

/// Filters active reps whose `services` and `provinces` sets both contain
/// the request. An empty result means intake MUST fail-closed (§4.3) unless
/// the request is an abrupt-ending retry.
pub async fn reps_for(
    pool: &SqlitePool,
    service: Service,
    province: &str,
) -> Result<Vec<Rep>, sqlx::Error> {
    let rows: Vec<SalesRepRow> = sales_reps::active_reps(pool).await?;
    let matches = rows
        .into_iter()
        .filter(|row| {
            row.services().any(|s| s.eq_ignore_ascii_case(service.as_str()))
                && row.provinces().any(|p| p.eq_ignore_ascii_case(province))
        })
        .map(|row| Rep {
            id: row.ghl_user_id,
            name: row.name,
        })
        .collect();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(ghl_user_id: &str, services: &str, provinces: &str) -> SalesRepRow {
        SalesRepRow {
            id: 0,
            ghl_user_id: ghl_user_id.to_string(),
            name: "test".to_string(),
            services: services.to_string(),
            provinces: provinces.to_string(),
            active: true,
        }
    }

    #[test]
    fn filters_on_service_and_province_intersection() {
        let reps = vec![
            rep("U1", "Infissi,Vetrate", "RM,MI"),
            rep("U2", "Pergole", "RM"),
        ];
        let eligible: Vec<&SalesRepRow> = reps
            .iter()
            .filter(|r| {
                r.services().any(|s| s.eq_ignore_ascii_case("Infissi"))
                    && r.provinces().any(|p| p.eq_ignore_ascii_case("RM"))
            })
            .collect();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].ghl_user_id, "U1");
    }
}
