use super::*;
use shared::{
    domain::{LeadStatus, UserId},
    protocol::ManualAmount,
};

fn seller(id: i64, current_leads: u64, converted: u64, region: Option<&str>) -> SellerProfile {
    SellerProfile {
        id: UserId(id),
        name: format!("seller-{id}"),
        current_leads,
        converted,
        region: region.map(str::to_string),
        score: None,
    }
}

fn roster() -> Vec<SellerProfile> {
    vec![
        seller(1, 10, 1, Some("Cordoba")),
        seller(2, 4, 0, Some("Mendoza")),
        seller(3, 0, 0, None),
    ]
}

fn wire(strategy: &str, quantity: i64, ids: &[i64]) -> BulkAssignRequest {
    BulkAssignRequest {
        strategy: strategy.to_string(),
        quantity,
        user_ids: ids.iter().copied().map(UserId).collect(),
        criteria: DistributionCriteria::default(),
        manual: Vec::new(),
    }
}

fn pool(total: u64, regions: &[(&str, u64)]) -> CandidatePool {
    CandidatePool {
        total,
        by_region: regions
            .iter()
            .map(|(province, count)| ProvinceCount {
                province: province.to_string(),
                count: *count,
            })
            .collect(),
    }
}

fn new_leads(plan: &DistributionPlan) -> Vec<u64> {
    plan.entries.iter().map(|entry| entry.new_leads).collect()
}

#[test]
fn equal_split_of_ten_across_three_sellers() {
    let request = DistributionRequest::from_wire(&wire("equitativo", 10, &[1, 2, 3])).expect("valid");
    let plan = plan(&request, &roster(), &pool(100, &[])).expect("plan");

    assert_eq!(new_leads(&plan), vec![4, 3, 3]);
    assert_eq!(plan.planned, 10);
    assert!(plan.warning.is_none());
    assert_eq!(plan.entries[0].total_after, 14);
}

#[test]
fn equal_split_follows_selection_order() {
    let request = DistributionRequest::from_wire(&wire("equal", 10, &[3, 1, 2])).expect("valid");
    let plan = plan(&request, &roster(), &pool(100, &[])).expect("plan");

    let ids: Vec<i64> = plan.entries.iter().map(|entry| entry.user_id.0).collect();
    assert_eq!(ids, vec![3, 1, 2]);
    assert_eq!(new_leads(&plan), vec![4, 3, 3]);
}

#[test]
fn empty_selection_is_a_validation_error() {
    let err = DistributionRequest::from_wire(&wire("equitativo", 10, &[])).expect_err("invalid");
    assert!(matches!(err, AllocationError::Validation(_)));
}

#[test]
fn non_positive_quantity_is_a_validation_error() {
    for quantity in [0, -3] {
        let err = DistributionRequest::from_wire(&wire("regional", quantity, &[1]))
            .expect_err("invalid");
        assert!(matches!(err, AllocationError::Validation(_)));
    }
}

#[test]
fn unknown_strategy_is_reported_by_name() {
    let err = DistributionRequest::from_wire(&wire("lottery", 5, &[1])).expect_err("invalid");
    assert_eq!(err, AllocationError::UnknownStrategy("lottery".to_string()));
    let api: ApiError = err.into();
    assert_eq!(api.code, ErrorCode::UnknownStrategy);
}

#[test]
fn duplicate_sellers_are_rejected() {
    let err = DistributionRequest::from_wire(&wire("equitativo", 5, &[1, 1])).expect_err("invalid");
    assert!(matches!(err, AllocationError::Validation(_)));
}

#[test]
fn scarce_candidates_truncate_with_warning() {
    let request = DistributionRequest::from_wire(&wire("equitativo", 10, &[1, 2, 3])).expect("valid");
    let plan = plan(&request, &roster(), &pool(5, &[])).expect("plan");

    assert_eq!(new_leads(&plan).iter().sum::<u64>(), 5);
    assert_eq!(new_leads(&plan), vec![2, 2, 1]);
    let warning = plan.warning.expect("partial fulfillment");
    assert_eq!(warning.requested, 10);
    assert_eq!(warning.available, 5);
    assert_eq!(warning.shortfall.len(), 3);
    assert_eq!(warning.shortfall[0].planned, 4);
    assert_eq!(warning.shortfall[0].granted, 2);
}

#[test]
fn no_seller_exceeds_matching_pool_for_any_strategy() {
    let mut manual = wire("manual", 0, &[1, 2, 3]);
    manual.manual = vec![
        ManualAmount {
            user_id: UserId(1),
            quantity: 6,
        },
        ManualAmount {
            user_id: UserId(3),
            quantity: 2,
        },
    ];
    let requests = [
        wire("equitativo", 9, &[1, 2, 3]),
        wire("regional", 9, &[1, 2, 3]),
        wire("performance", 9, &[1, 2, 3]),
        manual,
    ];

    for available in [0u64, 1, 3, 4, 8, 50] {
        let pool = pool(available, &[("Cordoba", available.min(2))]);
        for wire_request in &requests {
            let request = DistributionRequest::from_wire(wire_request).expect("valid");
            let plan = plan(&request, &roster(), &pool).expect("plan");
            let total: u64 = new_leads(&plan).iter().sum();
            assert_eq!(total, request.quantity.min(available));
            assert!(
                plan.entries.iter().all(|entry| entry.new_leads <= available),
                "{:?} with {available} available: {:?}",
                request.strategy,
                new_leads(&plan)
            );
        }
    }
}

#[test]
fn regional_prefers_sellers_own_region() {
    let request = DistributionRequest::from_wire(&wire("regional", 9, &[1, 2, 3])).expect("valid");
    let plan = plan(&request, &roster(), &pool(20, &[("cordoba", 2), ("Mendoza", 7)])).expect("plan");

    assert_eq!(new_leads(&plan), vec![3, 3, 3]);
    let regional: Vec<u64> = plan
        .entries
        .iter()
        .map(|entry| match &entry.annotation {
            Some(PlanAnnotation::Region { regional_leads, .. }) => *regional_leads,
            other => panic!("unexpected annotation {other:?}"),
        })
        .collect();
    // Cordoba only has two candidates; the seller without a region falls back entirely.
    assert_eq!(regional, vec![2, 3, 0]);
}

#[test]
fn sellers_sharing_a_region_share_its_candidates() {
    let roster = vec![
        seller(1, 0, 0, Some("Salta")),
        seller(2, 0, 0, Some("salta")),
    ];
    let request = DistributionRequest::from_wire(&wire("regional", 6, &[1, 2])).expect("valid");
    let plan = plan(&request, &roster, &pool(10, &[("Salta", 4)])).expect("plan");

    let regional: Vec<u64> = plan
        .entries
        .iter()
        .filter_map(|entry| match &entry.annotation {
            Some(PlanAnnotation::Region { regional_leads, .. }) => Some(*regional_leads),
            _ => None,
        })
        .collect();
    assert_eq!(regional, vec![3, 1]);
}

#[test]
fn performance_gives_converters_more_but_never_less_than_floor() {
    let mut roster = roster();
    roster[0].score = Some(0.9);
    roster[1].score = Some(0.1);
    roster[2].score = Some(0.1);
    let request = DistributionRequest::from_wire(&wire("performance", 11, &[1, 2, 3])).expect("valid");
    let plan = plan(&request, &roster, &pool(100, &[])).expect("plan");

    let shares = new_leads(&plan);
    assert_eq!(shares.iter().sum::<u64>(), 11);
    assert!(shares[0] > shares[1]);
    assert!(shares.iter().all(|share| *share >= 11 / 3));
    assert!(matches!(
        plan.entries[0].annotation,
        Some(PlanAnnotation::Performance { score }) if (score - 0.9).abs() < f64::EPSILON
    ));
}

#[test]
fn performance_score_smooths_empty_history() {
    let fresh = seller(9, 0, 0, None);
    assert!((fresh.performance_score() - 0.5).abs() < f64::EPSILON);
    let strong = seller(9, 8, 6, None);
    assert!(strong.performance_score() > fresh.performance_score());
}

#[test]
fn manual_amounts_are_validated_not_computed() {
    let mut request = wire("manual", 0, &[1, 2]);
    request.manual = vec![
        ManualAmount {
            user_id: UserId(2),
            quantity: 5,
        },
        ManualAmount {
            user_id: UserId(1),
            quantity: 1,
        },
    ];
    let validated = DistributionRequest::from_wire(&request).expect("valid");
    assert_eq!(validated.strategy, Strategy::Manual(vec![1, 5]));
    assert_eq!(validated.quantity, 6);

    let plan = plan(&validated, &roster(), &pool(100, &[])).expect("plan");
    assert_eq!(new_leads(&plan), vec![1, 5]);
}

#[test]
fn manual_amounts_reject_negative_and_foreign_sellers() {
    let mut negative = wire("manual", 0, &[1]);
    negative.manual = vec![ManualAmount {
        user_id: UserId(1),
        quantity: -1,
    }];
    assert!(matches!(
        DistributionRequest::from_wire(&negative),
        Err(AllocationError::Validation(_))
    ));

    let mut foreign = wire("manual", 0, &[1]);
    foreign.manual = vec![ManualAmount {
        user_id: UserId(7),
        quantity: 2,
    }];
    assert!(matches!(
        DistributionRequest::from_wire(&foreign),
        Err(AllocationError::Validation(_))
    ));
}

#[test]
fn manual_amounts_that_overflow_are_rejected() {
    let mut request = wire("manual", 0, &[1, 2, 3]);
    request.manual = [i64::MAX, i64::MAX, 2]
        .into_iter()
        .zip(1..)
        .map(|(quantity, id)| ManualAmount {
            user_id: UserId(id),
            quantity,
        })
        .collect();
    assert_eq!(
        DistributionRequest::from_wire(&request),
        Err(AllocationError::Validation(
            "manual amounts are too large".to_string()
        ))
    );
}

#[test]
fn unknown_seller_in_roster_is_a_validation_error() {
    let request = DistributionRequest::from_wire(&wire("equitativo", 3, &[1, 42])).expect("valid");
    let err = plan(&request, &roster(), &pool(10, &[])).expect_err("missing seller");
    assert!(matches!(err, AllocationError::Validation(_)));
}

#[test]
fn criteria_travel_with_the_request() {
    let mut request = wire("equitativo", 3, &[1]);
    request.criteria = DistributionCriteria {
        status: Some(LeadStatus::Contacted),
        province: Some("Jujuy".into()),
        unassigned_only: false,
    };
    let validated = DistributionRequest::from_wire(&request).expect("valid");
    assert_eq!(validated.criteria, request.criteria);
}
