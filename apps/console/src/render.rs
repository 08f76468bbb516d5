//! Text renderers. Each one subscribes to a state key and redraws when the
//! key changes.

use client_core::{store::keys, StateContainer};
use serde_json::Value;
use shared::{
    domain::Seller,
    protocol::{BulkAssignResponse, DistributionPlan, ImportSummary, LeadPage, LeadStats, PlanAnnotation, ProvinceCount},
};

pub fn install(store: &StateContainer) {
    store.subscribe(keys::LEADS_PAGE, |value| {
        print_leads(&serde_json::from_value(value.clone())?);
        Ok(())
    })
    .detach();
    store.subscribe(keys::DASHBOARD_STATS, |value| {
        print_stats(&serde_json::from_value(value.clone())?);
        Ok(())
    })
    .detach();
    store.subscribe(keys::DASHBOARD_SELLERS, |value| {
        print_sellers(&serde_json::from_value::<Vec<Seller>>(value.clone())?);
        Ok(())
    })
    .detach();
    store.subscribe(keys::DASHBOARD_PROVINCES, |value| {
        let provinces: Vec<ProvinceCount> = serde_json::from_value(value.clone())?;
        println!("unassigned by province:");
        for entry in provinces {
            println!("  {:<24} {}", entry.province, entry.count);
        }
        Ok(())
    })
    .detach();
    store.subscribe(keys::DASHBOARD_PLAN, |value| {
        if !value.is_null() {
            print_plan(&serde_json::from_value(value.clone())?);
        }
        Ok(())
    })
    .detach();
    store.subscribe(keys::DASHBOARD_LAST_ASSIGNMENT, |value| {
        print_assignment(&serde_json::from_value(value.clone())?);
        Ok(())
    })
    .detach();
    store.subscribe(keys::IMPORT_SUMMARY, |value| {
        print_import(&serde_json::from_value(value.clone())?);
        Ok(())
    })
    .detach();
    for key in [keys::LEADS_ERROR, keys::DASHBOARD_ERROR, keys::IMPORT_ERROR] {
        store
            .subscribe(key, move |value| {
                if let Value::String(message) = value {
                    eprintln!("error: {message}");
                }
                Ok(())
            })
            .detach();
    }
    store.subscribe(keys::AUTH_EXPIRED, |value| {
        if value == &Value::Bool(true) {
            eprintln!("session expired; log in again");
        }
        Ok(())
    })
    .detach();
}

fn print_leads(page: &LeadPage) {
    println!(
        "{:>6}  {:<24} {:<14} {:<16} {:<12} {}",
        "id", "name", "phone", "province", "status", "seller"
    );
    for lead in &page.leads {
        println!(
            "{:>6}  {:<24} {:<14} {:<16} {:<12} {}",
            lead.id.0,
            lead.name,
            lead.phone.as_deref().unwrap_or("-"),
            lead.province.as_deref().unwrap_or("-"),
            lead.status.as_str(),
            lead.assigned_to
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unassigned".into()),
        );
    }
    println!(
        "page {}/{} ({} leads)",
        page.page,
        page.total_pages().max(1),
        page.total
    );
}

fn print_stats(stats: &LeadStats) {
    println!(
        "total={} new={} contacted={} converted={} unassigned={}",
        stats.total, stats.new, stats.contacted, stats.converted, stats.unassigned
    );
}

fn print_sellers(sellers: &[Seller]) {
    println!("{:>5}  {:<20} {:<16} {:>6} {:>9}", "id", "name", "region", "leads", "contacted");
    for seller in sellers {
        println!(
            "{:>5}  {:<20} {:<16} {:>6} {:>9}",
            seller.id.0,
            seller.name,
            seller.region.as_deref().unwrap_or("-"),
            seller.total_leads,
            seller.total_contacted,
        );
    }
}

fn print_plan(plan: &DistributionPlan) {
    println!(
        "plan ({}): {} of {} requested",
        plan.strategy, plan.planned, plan.requested
    );
    for entry in &plan.entries {
        let note = match &entry.annotation {
            Some(PlanAnnotation::Region {
                region,
                regional_leads,
            }) => format!(
                "{} from {}",
                regional_leads,
                region.as_deref().unwrap_or("any region")
            ),
            Some(PlanAnnotation::Performance { score }) => format!("score {score:.2}"),
            None => String::new(),
        };
        println!(
            "  {:<20} {:>5} + {:>4} = {:>5}  {}",
            entry.name, entry.current_leads, entry.new_leads, entry.total_after, note
        );
    }
    if let Some(warning) = &plan.warning {
        println!(
            "warning: only {} matching leads for {} requested",
            warning.available, warning.requested
        );
    }
}

fn print_assignment(response: &BulkAssignResponse) {
    println!("assigned {} leads", response.assigned_count);
    for entry in &response.per_seller {
        println!("  seller {:>5}: {}", entry.user_id.0, entry.count);
    }
    if let Some(warning) = &response.warning {
        println!(
            "warning: only {} matching leads for {} requested",
            warning.available, warning.requested
        );
    }
}

fn print_import(summary: &ImportSummary) {
    println!(
        "imported={} duplicates={} rejected={}",
        summary.imported,
        summary.duplicates,
        summary.errors.len()
    );
    for error in &summary.errors {
        println!("  line {}: {}", error.line, error.message);
    }
}
