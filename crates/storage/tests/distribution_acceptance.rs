use chrono::Utc;
use shared::{
    domain::{LeadStatus, Role},
    protocol::DistributionCriteria,
};
use storage::{AssignmentQuota, LeadFilter, LeadSort, NewLead, NewUser, SellerFilter, Storage};

fn seller(username: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        name: username.to_string(),
        password_hash: "x".to_string(),
        role: Role::Seller,
        region: None,
    }
}

#[tokio::test]
async fn repeated_distributions_never_assign_a_lead_twice() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let a = storage
        .create_user(&seller("a"))
        .await
        .expect("user")
        .expect("created");
    let b = storage
        .create_user(&seller("b"))
        .await
        .expect("user")
        .expect("created");
    let leads: Vec<NewLead> = (0..7)
        .map(|idx| NewLead {
            name: format!("lead {idx}"),
            phone: Some(format!("+54 {idx}")),
            ..NewLead::default()
        })
        .collect();
    storage.insert_leads(&leads).await.expect("insert");

    let quotas = [
        AssignmentQuota {
            seller: a,
            count: 3,
            preferred_region: None,
            preferred: 0,
        },
        AssignmentQuota {
            seller: b,
            count: 3,
            preferred_region: None,
            preferred: 0,
        },
    ];
    let criteria = DistributionCriteria::default();
    let first = storage
        .assign_quotas(&criteria, &quotas, Utc::now())
        .await
        .expect("first");
    let second = storage
        .assign_quotas(&criteria, &quotas, Utc::now())
        .await
        .expect("second");

    let first_total: u64 = first.iter().map(|entry| entry.count).sum();
    let second_total: u64 = second.iter().map(|entry| entry.count).sum();
    assert_eq!(first_total, 6);
    assert_eq!(second_total, 1);

    let stats = storage.lead_stats(None).await.expect("stats");
    assert_eq!(stats.total, 7);
    assert_eq!(stats.unassigned, 0);
    assert_eq!(stats.new, 7);

    let sellers = storage.list_sellers().await.expect("sellers");
    let assigned: u64 = sellers.iter().map(|seller| seller.total_leads).sum();
    assert_eq!(assigned, 7);

    let (own, total) = storage
        .list_leads(
            &LeadFilter {
                seller: SellerFilter::Seller(a),
                status: Some(LeadStatus::Uncontacted),
                ..LeadFilter::default()
            },
            1,
            20,
            LeadSort::default(),
        )
        .await
        .expect("list");
    assert_eq!(own.len() as u64, total);
    assert!(own.iter().all(|lead| lead.assigned_to == Some(a)));
}

#[tokio::test]
async fn large_runs_that_redistribute_assigned_leads_complete() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let a = storage
        .create_user(&seller("bulk-a"))
        .await
        .expect("user")
        .expect("created");
    let b = storage
        .create_user(&seller("bulk-b"))
        .await
        .expect("user")
        .expect("created");
    let leads: Vec<NewLead> = (0..33_010)
        .map(|idx| NewLead {
            name: format!("lead {idx}"),
            phone: Some(format!("+54 {idx}")),
            ..NewLead::default()
        })
        .collect();
    storage.insert_leads(&leads).await.expect("insert");

    let quotas = [
        AssignmentQuota {
            seller: a,
            count: 33_000,
            preferred_region: None,
            preferred: 0,
        },
        AssignmentQuota {
            seller: b,
            count: 10,
            preferred_region: None,
            preferred: 0,
        },
    ];
    let criteria = DistributionCriteria {
        unassigned_only: false,
        ..DistributionCriteria::default()
    };
    for _ in 0..2 {
        let counts = storage
            .assign_quotas(&criteria, &quotas, Utc::now())
            .await
            .expect("assign");
        let granted: Vec<u64> = counts.iter().map(|entry| entry.count).collect();
        assert_eq!(granted, vec![33_000, 10]);
    }

    let stats = storage.lead_stats(None).await.expect("stats");
    assert_eq!(stats.unassigned, 0);
    let sellers = storage.list_sellers().await.expect("sellers");
    let held: Vec<u64> = sellers.iter().map(|seller| seller.total_leads).collect();
    assert!(held.contains(&33_000));
    assert!(held.contains(&10));
}
